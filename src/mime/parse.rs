//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailsump.
//
// Mailsump is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version  3 of the License, or (at your option)
// any later version.
//
// Mailsump is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailsump. If not, see <http://www.gnu.org/licenses/>.

//! The MIME tree parser and the projections derived from it.
//!
//! `parse_tree` descends through a raw message and produces a tree of
//! `Entity` values; `parse_message` reduces that tree to the stored
//! message model, and `extract_part` re-walks it to pull a single part's
//! decoded content out of the raw bytes on demand.
//!
//! The parser is total: there is no input for which it fails. Malformed
//! content degrades to a single opaque part, which is exactly the right
//! behaviour for a sink that must accept whatever broken software sends
//! at it.

use chrono::{DateTime, Utc};

use super::encoded_word::ew_decode_unstructured;
use super::header::{
    self, ContentDisposition, ContentTransferEncoding, ContentType,
};
use super::quoted_printable::qp_decode;
use crate::store::model::{Address, ParsedMessage, Part, PartContent};

/// Maximum depth of nested multipart content considered. Parts below
/// this depth are treated as opaque content of their parent.
const MAX_DEPTH: u32 = 20;
/// Maximum number of parts across the whole tree.
const MAX_PARTS: usize = 1000;

/// One node of a decoded MIME tree.
#[derive(Debug)]
pub struct Entity {
    /// Dotted path identifying this node: `"1"`, `"1.2"`, `"2.1.1"`.
    /// Empty for a multipart root, which is not itself addressable.
    pub part_id: String,
    pub content_type: ContentType,
    pub disposition: Option<ContentDisposition>,
    /// Recognised transfer encoding, `None` when absent or unknown (both
    /// decode as identity).
    pub transfer_encoding: Option<ContentTransferEncoding>,
    /// The declared transfer encoding name, lowercased; "7bit" if absent.
    pub cte_name: String,
    /// `Content-ID` without the angle brackets; empty if absent.
    pub content_id: String,
    pub headers: Vec<(String, Vec<u8>)>,
    /// Transfer-encoded body bytes. For a node with children this is the
    /// raw inner content and is not addressable.
    pub body: Vec<u8>,
    pub children: Vec<Entity>,
}

impl Entity {
    /// Transfer-decode the body of a leaf.
    ///
    /// Base64 that does not decode passes through raw, as do unknown
    /// encodings.
    pub fn decoded(&self) -> Vec<u8> {
        use ContentTransferEncoding as CTE;

        match self.transfer_encoding {
            Some(CTE::Base64) => {
                let compact: Vec<u8> = self
                    .body
                    .iter()
                    .copied()
                    .filter(|b| !b" \t\r\n".contains(b))
                    .collect();
                base64::decode(&compact).unwrap_or_else(|_| self.body.clone())
            },
            Some(CTE::QuotedPrintable) => qp_decode(&self.body).into_owned(),
            _ => self.body.clone(),
        }
    }

    /// Transfer-decode and charset-normalise the body of a text leaf.
    pub fn decoded_text(&self) -> String {
        let bytes = self.decoded();
        let charset = self.content_type.parm("charset").unwrap_or("utf-8");
        match encoding_rs::Encoding::for_label_no_replacement(
            charset.as_bytes(),
        ) {
            Some(enc) => enc.decode_with_bom_removal(&bytes).0.into_owned(),
            None => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    /// The declared file name, preferring `Content-Disposition` over the
    /// legacy `name` parameter of `Content-Type`. Empty if unnamed.
    pub fn filename(&self) -> String {
        let raw = self
            .disposition
            .as_ref()
            .and_then(|d| d.parm("filename"))
            .or_else(|| self.content_type.parm("name"))
            .unwrap_or("");
        ew_decode_unstructured(raw).into_owned()
    }

    /// Locate the node with the given part ID.
    pub fn find(&self, part_id: &str) -> Option<&Entity> {
        if self.part_id == part_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(part_id))
    }

    fn is_attachment_disposed(&self) -> bool {
        self.disposition
            .as_ref()
            .map_or(false, |d| d.kind == "attachment")
    }

    fn is_inline_disposed(&self) -> bool {
        self.disposition.as_ref().map_or(false, |d| d.kind == "inline")
    }
}

/// Parse a raw message into its MIME tree.
pub fn parse_tree(raw: &[u8]) -> Entity {
    let mut part_count = 0usize;
    let mut root = parse_entity(raw, 0, &mut part_count);
    if root.children.is_empty() {
        // A single-part message's body is addressed as part 1
        root.part_id = "1".to_owned();
    } else {
        assign_ids(&mut root.children, "");
    }
    root
}

fn assign_ids(children: &mut [Entity], prefix: &str) {
    for (ix, child) in children.iter_mut().enumerate() {
        child.part_id = if prefix.is_empty() {
            (ix + 1).to_string()
        } else {
            format!("{}.{}", prefix, ix + 1)
        };
        let id = child.part_id.clone();
        assign_ids(&mut child.children, &id);
    }
}

fn parse_entity(raw: &[u8], depth: u32, part_count: &mut usize) -> Entity {
    let (header_block, body) = header::split_message(raw);
    let headers = header::parse_headers(header_block);

    let content_type = header::get_header(&headers, "Content-Type")
        .and_then(header::parse_content_type)
        .unwrap_or_else(ContentType::text_plain);
    let disposition = header::get_header(&headers, "Content-Disposition")
        .and_then(header::parse_content_disposition);
    let cte_raw = header::get_header(&headers, "Content-Transfer-Encoding");
    let transfer_encoding =
        cte_raw.and_then(header::parse_content_transfer_encoding);
    let cte_name = cte_raw
        .map(|v| {
            header::decode_header_value(v).trim().to_ascii_lowercase()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "7bit".to_owned());
    let content_id = header::get_header(&headers, "Content-ID")
        .map(|v| {
            header::decode_header_value(v)
                .trim()
                .trim_matches(['<', '>'])
                .to_owned()
        })
        .unwrap_or_default();

    let mut children = Vec::new();
    if depth < MAX_DEPTH && content_type.is_type("multipart") {
        if let Some(boundary) = content_type.parm("boundary") {
            for segment in split_multipart(body, boundary.as_bytes()) {
                if *part_count >= MAX_PARTS {
                    break;
                }
                *part_count += 1;
                children.push(parse_entity(segment, depth + 1, part_count));
            }
        }
    }

    Entity {
        part_id: String::new(),
        content_type,
        disposition,
        transfer_encoding,
        cte_name,
        content_id,
        headers,
        body: body.to_vec(),
        children,
    }
}

/// Split multipart content into its encapsulated segments.
///
/// The preamble and epilogue are discarded. The line ending immediately
/// before a boundary line belongs to the delimiter, not to the segment it
/// terminates. A missing final boundary leaves the last segment running
/// to the end of the content.
fn split_multipart<'a>(body: &'a [u8], boundary: &[u8]) -> Vec<&'a [u8]> {
    let mut delim = Vec::with_capacity(boundary.len() + 2);
    delim.extend_from_slice(b"--");
    delim.extend_from_slice(boundary);

    let mut segments = Vec::new();
    let mut segment_start: Option<usize> = None;
    let mut line_start = 0;

    while line_start < body.len() {
        let line_end = memchr::memchr(b'\n', &body[line_start..])
            .map(|n| line_start + n + 1)
            .unwrap_or(body.len());
        let line = &body[line_start..line_end];

        if line.starts_with(&delim) {
            let tail = &line[delim.len()..];
            let is_final = tail.starts_with(b"--");

            if let Some(start) = segment_start.take() {
                let mut end = line_start;
                if body[start..end].ends_with(b"\r\n") {
                    end -= 2;
                } else if body[start..end].ends_with(b"\n") {
                    end -= 1;
                }
                segments.push(&body[start..end]);
            }

            if is_final {
                return segments;
            }
            segment_start = Some(line_end);
        }

        line_start = line_end;
    }

    if let Some(start) = segment_start {
        segments.push(&body[start..]);
    }
    segments
}

/// Parse a raw message into the stored message model.
///
/// `fallback_date` (normally the ingest time) substitutes for a missing
/// or unparseable `Date` header.
pub fn parse_message(raw: &[u8], fallback_date: DateTime<Utc>) -> ParsedMessage {
    let root = parse_tree(raw);
    let headers = &root.headers;

    let from = header::get_header(headers, "From")
        .and_then(header::parse_address)
        .unwrap_or_default();
    let address_list = |name: &str| {
        header::get_header(headers, name)
            .map(header::parse_address_list)
            .unwrap_or_default()
    };
    let to = address_list("To");
    let cc = address_list("Cc");
    let bcc = address_list("Bcc");
    let reply_to = address_list("Reply-To");

    let subject = header::get_header(headers, "Subject")
        .map(header::decode_unstructured)
        .unwrap_or_default();
    let date = header::get_header(headers, "Date")
        .and_then(|v| header::parse_datetime(&header::decode_header_value(v)))
        .unwrap_or(fallback_date);
    let message_id = header::get_header(headers, "Message-ID")
        .map(header::parse_message_id)
        .unwrap_or_default();

    let mut view = BodyView::default();
    collect_parts(&root, &mut view);

    ParsedMessage {
        from,
        to,
        cc,
        bcc,
        reply_to,
        subject,
        date,
        message_id,
        body_text: view.text,
        body_html: view.html,
        attachments: view.attachments,
        inline: view.inline,
        headers: headers
            .iter()
            .map(|(n, v)| {
                (n.clone(), String::from_utf8_lossy(v).into_owned())
            })
            .collect(),
        size: raw.len(),
    }
}

#[derive(Default)]
struct BodyView {
    text: String,
    html: String,
    attachments: Vec<Part>,
    inline: Vec<Part>,
}

/// Walk the tree depth-first, routing each leaf into the text view, the
/// HTML view, the attachment list or the inline list.
fn collect_parts(entity: &Entity, view: &mut BodyView) {
    if !entity.children.is_empty() {
        for child in &entity.children {
            collect_parts(child, view);
        }
        return;
    }

    let filename = entity.filename();
    let attachment_disposed = entity.is_attachment_disposed();

    // An unnamed, non-attachment text part is body content. Multiple such
    // parts concatenate, which is what readers expect of the weirder
    // multipart arrangements; within multipart/alternative the first
    // part of each flavour fills the view and nothing else shows up twice.
    if !attachment_disposed && filename.is_empty() {
        if entity.content_type.is_type("text")
            && entity.content_type.is_subtype("plain")
        {
            push_body(&mut view.text, entity.decoded_text());
            return;
        }
        if entity.content_type.is_type("text")
            && entity.content_type.is_subtype("html")
        {
            push_body(&mut view.html, entity.decoded_text());
            return;
        }
    }

    let part = Part {
        part_id: entity.part_id.clone(),
        content_type: entity.content_type.essence(),
        filename,
        content_id: entity.content_id.clone(),
        size: entity.decoded().len(),
        transfer_encoding: entity.cte_name.clone(),
    };

    if !attachment_disposed
        && (entity.is_inline_disposed() || !entity.content_id.is_empty())
    {
        view.inline.push(part);
    } else {
        view.attachments.push(part);
    }
}

fn push_body(slot: &mut String, text: String) {
    if slot.is_empty() {
        *slot = text;
    } else {
        slot.push('\n');
        slot.push_str(&text);
    }
}

/// Re-extract a single part from a raw message.
///
/// Returns `None` when no leaf part carries the given ID. Container
/// nodes are not addressable.
pub fn extract_part(raw: &[u8], part_id: &str) -> Option<PartContent> {
    let root = parse_tree(raw);
    let entity = root.find(part_id)?;
    if !entity.children.is_empty() {
        return None;
    }
    Some(PartContent {
        content_type: entity.content_type.essence(),
        filename: entity.filename(),
        content: entity.decoded(),
    })
}

/// Build a minimal `ParsedMessage` for raw bytes nothing could be made
/// of.
///
/// `parse_message` is total, so this is only reached if the parser ever
/// panics on hostile input; the ingest facade catches that and stores
/// the blob with this skeleton so the sink never refuses mail.
pub fn fallback_message(raw: &[u8], date: DateTime<Utc>) -> ParsedMessage {
    ParsedMessage {
        from: Address::default(),
        to: Vec::new(),
        cc: Vec::new(),
        bcc: Vec::new(),
        reply_to: Vec::new(),
        subject: String::new(),
        date,
        message_id: String::new(),
        body_text: String::new(),
        body_html: String::new(),
        attachments: Vec::new(),
        inline: Vec::new(),
        headers: Vec::new(),
        size: raw.len(),
    }
}
