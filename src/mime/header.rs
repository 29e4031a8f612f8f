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

//! Utilities for working with individual RFC 5322 headers.
//!
//! The parsers here accept the obsolete syntaxes and the common real-world
//! violations. None of them can fail in a way that aborts processing of a
//! message; unparseable input degrades to an empty or raw result.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use super::encoded_word::ew_decode_unstructured;
use crate::store::model::Address;

/// Split a raw message into its header block and its body.
///
/// The header block retains its final line ending; the separating blank
/// line belongs to neither half. A message with no blank line is all
/// headers.
pub fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(rest) = raw.strip_prefix(b"\r\n") {
        return (b"", rest);
    }
    if let Some(rest) = raw.strip_prefix(b"\n") {
        return (b"", rest);
    }

    let dos = memchr::memmem::find(raw, b"\n\r\n");
    let unix = memchr::memmem::find(raw, b"\n\n");
    match (dos, unix) {
        (Some(d), Some(u)) if d < u => (&raw[..=d], &raw[d + 3..]),
        (Some(d), None) => (&raw[..=d], &raw[d + 3..]),
        (_, Some(u)) => (&raw[..=u], &raw[u + 2..]),
        (None, None) => (raw, b""),
    }
}

/// Unfold a header block into an ordered list of `(name, value)` pairs.
///
/// Order and duplicates are preserved. Folded continuation lines are
/// joined to their header with a single space, which matches how RFC 5322
/// section 2.2.3 intends folding to round-trip. Lines that are neither a
/// header nor a continuation are skipped.
pub fn parse_headers(block: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut headers: Vec<(String, Vec<u8>)> = Vec::new();

    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            if let Some(last) = headers.last_mut() {
                let folded = trim_bytes(line);
                if !folded.is_empty() {
                    last.1.push(b' ');
                    last.1.extend_from_slice(folded);
                }
            }
            continue;
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let Ok(name) = std::str::from_utf8(&line[..colon]) else {
            continue;
        };
        headers.push((
            name.trim().to_owned(),
            trim_bytes(&line[colon + 1..]).to_vec(),
        ));
    }

    headers
}

/// Return the value of the first header matching `name`, case-insensitively.
pub fn get_header<'a>(
    headers: &'a [(String, Vec<u8>)],
    name: &str,
) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| &v[..])
}

fn trim_bytes(mut b: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = b {
        b = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = b {
        b = rest;
    }
    b
}

/// Decode raw header bytes to a string.
///
/// UTF-8 is tried first; anything else is taken as windows-1252, which
/// accepts every byte sequence.
pub fn decode_header_value(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(s) => s.to_owned(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(value).0.into_owned(),
    }
}

/// Decode an unstructured header value (Subject and friends): charset
/// fallback plus RFC 2047 encoded words.
pub fn decode_unstructured(value: &[u8]) -> String {
    ew_decode_unstructured(&decode_header_value(value)).into_owned()
}

/// A parsed `Content-Type` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    /// Primary type, lowercased.
    pub typ: String,
    /// Subtype, lowercased.
    pub subtype: String,
    /// Parameters, names lowercased, in declaration order.
    pub parms: Vec<(String, String)>,
}

impl ContentType {
    pub fn text_plain() -> Self {
        ContentType {
            typ: "text".to_owned(),
            subtype: "plain".to_owned(),
            parms: Vec::new(),
        }
    }

    pub fn is_type(&self, typ: &str) -> bool {
        self.typ == typ
    }

    pub fn is_subtype(&self, subtype: &str) -> bool {
        self.subtype == subtype
    }

    /// The `type/subtype` string without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.typ, self.subtype)
    }

    pub fn parm(&self, name: &str) -> Option<&str> {
        self.parms
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a `Content-Type` header value.
///
/// Returns `None` only when there is no recognisable `type/subtype` at
/// all; parameter problems merely lose the offending parameter.
pub fn parse_content_type(value: &[u8]) -> Option<ContentType> {
    let text = decode_header_value(value);
    let mut segments = split_unquoted(&text, &[';']);
    let essence = segments.next()?.trim();

    let (typ, subtype) = essence.split_once('/')?;
    let typ = typ.trim().to_ascii_lowercase();
    let subtype = subtype.trim().to_ascii_lowercase();
    if typ.is_empty() || subtype.is_empty() {
        return None;
    }

    Some(ContentType {
        typ,
        subtype,
        parms: parse_parms(segments),
    })
}

/// A parsed `Content-Disposition` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Disposition kind ("inline", "attachment", ...), lowercased.
    pub kind: String,
    pub parms: Vec<(String, String)>,
}

impl ContentDisposition {
    pub fn parm(&self, name: &str) -> Option<&str> {
        self.parms
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

pub fn parse_content_disposition(value: &[u8]) -> Option<ContentDisposition> {
    let text = decode_header_value(value);
    let mut segments = split_unquoted(&text, &[';']);
    let kind = segments.next()?.trim().to_ascii_lowercase();
    if kind.is_empty() {
        return None;
    }

    Some(ContentDisposition {
        kind,
        parms: parse_parms(segments),
    })
}

/// The `Content-Transfer-Encoding` values the engine knows how to decode.
///
/// Anything unrecognised is treated as an identity encoding so the raw
/// bytes fall through unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentTransferEncoding {
    #[default]
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
}

pub fn parse_content_transfer_encoding(
    value: &[u8],
) -> Option<ContentTransferEncoding> {
    use ContentTransferEncoding as CTE;

    match trim_bytes(value).to_ascii_lowercase().as_slice() {
        b"7bit" => Some(CTE::SevenBit),
        b"8bit" => Some(CTE::EightBit),
        b"binary" => Some(CTE::Binary),
        b"base64" => Some(CTE::Base64),
        b"quoted-printable" => Some(CTE::QuotedPrintable),
        _ => None,
    }
}

/// Split on any of `delims` outside of double quotes, honouring backslash
/// escapes inside quotes.
fn split_unquoted<'a>(
    s: &'a str,
    delims: &'a [char],
) -> impl Iterator<Item = &'a str> + 'a {
    let mut splits = vec![];
    let mut in_quotes = false;
    let mut escaped = false;
    for (ix, ch) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if in_quotes && ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes && delims.contains(&ch) {
            splits.push(ix);
        }
    }

    let mut start = 0;
    splits
        .into_iter()
        .chain(std::iter::once(s.len()))
        .map(move |end| {
            let piece = &s[start..end];
            start = (end + 1).min(s.len());
            piece
        })
}

/// Parse `name=value` parameter segments, merging RFC 2231 extended and
/// continued parameters into plain ones.
fn parse_parms<'a>(
    segments: impl Iterator<Item = &'a str>,
) -> Vec<(String, String)> {
    // (base name, continuation number, is extended, value)
    let mut raw: Vec<(String, Option<u32>, bool, String)> = Vec::new();

    for segment in segments {
        let Some((name, value)) = segment.split_once('=') else {
            continue;
        };
        let mut name = name.trim().to_ascii_lowercase();
        let value = unquote(value.trim());

        let extended = if name.ends_with('*') {
            name.pop();
            true
        } else {
            false
        };
        let number = match name.split_once('*') {
            Some((base, num)) => match num.parse::<u32>() {
                Ok(n) => {
                    name = base.to_owned();
                    Some(n)
                },
                Err(_) => continue,
            },
            None => None,
        };

        if !name.is_empty() {
            raw.push((name, number, extended, value));
        }
    }

    // Continuations arrive in order in practice; merge adjacent segments
    // of the same base name.
    let mut parms: Vec<(String, String)> = Vec::new();
    for (name, number, extended, value) in raw {
        let value = if extended {
            decode_extended_value(&value, number.map_or(true, |n| n == 0))
        } else {
            value
        };

        match parms.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) if number.is_some() => {
                existing.push_str(&value)
            },
            Some(_) => (), // Duplicate plain parameter, first one wins
            None => parms.push((name, value)),
        }
    }

    parms
}

/// Decode an RFC 2231 extended value: `charset'language'percent-encoded`.
///
/// Only the first segment of a continued parameter carries the charset
/// prefix.
fn decode_extended_value(value: &str, first_segment: bool) -> String {
    let (charset, encoded) = if first_segment {
        let mut it = value.splitn(3, '\'');
        match (it.next(), it.next(), it.next()) {
            (Some(charset), Some(_lang), Some(encoded)) => {
                (Some(charset), encoded)
            },
            _ => (None, value),
        }
    } else {
        (None, value)
    };

    let bytes = percent_decode(encoded);
    let enc = charset
        .and_then(|c| {
            encoding_rs::Encoding::for_label_no_replacement(c.as_bytes())
        })
        .unwrap_or(encoding_rs::UTF_8);
    enc.decode_without_bom_handling(&bytes).0.into_owned()
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut ix = 0;
    while ix < bytes.len() {
        if bytes[ix] == b'%' && ix + 3 <= bytes.len() {
            if let Some(b) = std::str::from_utf8(&bytes[ix + 1..ix + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                out.push(b);
                ix += 3;
                continue;
            }
        }
        out.push(bytes[ix]);
        ix += 1;
    }
    out
}

/// Strip surrounding double quotes and resolve backslash escapes.
fn unquote(s: &str) -> String {
    let Some(inner) = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    else {
        return s.to_owned();
    };

    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Parse an address list header (`From`, `To`, `Cc`, ...).
///
/// Handles `Display Name <user@domain>`, bare addresses, quoted display
/// names containing commas, and the group syntax (the group name is
/// discarded and its members flattened into the list). Encoded words in
/// display names are decoded. Unparseable fragments degrade to an
/// `Address` whose `address` holds the raw text.
pub fn parse_address_list(value: &[u8]) -> Vec<Address> {
    let text = ew_decode_unstructured(&decode_header_value(value)).into_owned();

    let mut out = Vec::new();
    for segment in split_addresses(&text) {
        if let Some(addr) = parse_one_address(segment) {
            out.push(addr);
        }
    }
    out
}

/// Parse a single address, the first of the list if several are present.
pub fn parse_address(value: &[u8]) -> Option<Address> {
    parse_address_list(value).into_iter().next()
}

/// Split an address list on commas and semicolons that are outside
/// quotes and angle brackets, discarding group display names.
fn split_addresses(s: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;

    for (ix, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            // A colon this early is a group marker: everything before it
            // is the group display name, which has no address of its own
            ':' if !in_quotes && !in_angle => start = ix + 1,
            ',' | ';' if !in_quotes && !in_angle => {
                segments.push(&s[start..ix]);
                start = ix + 1;
            },
            _ => (),
        }
    }
    segments.push(&s[start..]);

    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_one_address(s: &str) -> Option<Address> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(open) = trimmed.rfind('<') {
        if let Some(close) = trimmed[open..].find('>') {
            let address = trimmed[open + 1..open + close].trim().to_owned();
            let name = unquote(trimmed[..open].trim());
            return Some(Address { name, address });
        }
    }

    // Bare address, or an unparseable fragment kept raw
    Some(Address {
        name: String::new(),
        address: trimmed.to_owned(),
    })
}

/// Extract the `<...>` identifier from a `Message-ID`-shaped header.
///
/// Returns the bracketed form; if there are no brackets, the trimmed raw
/// text.
pub fn parse_message_id(value: &[u8]) -> String {
    let text = decode_header_value(value);
    let trimmed = text.trim();
    if let Some(open) = trimmed.find('<') {
        if let Some(close) = trimmed[open..].find('>') {
            return trimmed[open..=open + close].to_owned();
        }
    }
    trimmed.to_owned()
}

/// Parse an RFC 5322 date header.
///
/// Tries the standard syntax first (with comments stripped), then a
/// ladder of formats agents actually produce. Returns `None` for
/// hopeless input; the caller substitutes the ingest time.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Comments (typically a trailing "(PDT)") are legal but rarely
    // understood by datetime parsers
    let cleaned = strip_comments(trimmed);
    let cleaned = cleaned.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(cleaned);

    const FORMATS: &[&str] = &[
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%d %b %y %H:%M:%S %z",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];

    let candidates: [std::borrow::Cow<'_, str>; 2] =
        [no_dow.into(), replace_named_zone(no_dow)];
    for candidate in &candidates {
        let candidate: &str = candidate;
        for fmt in FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    None
}

fn strip_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0u32;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => (),
        }
    }
    out
}

fn strip_day_of_week(s: &str) -> &str {
    for day in ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"] {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches([',', ' ']).trim();
        }
    }
    s
}

/// Substitute a trailing named time zone with its numeric offset.
///
/// RFC 5322 section 4.3 assigns meanings to the North American zones;
/// everything else is "-0000" (unknown, treated as UTC).
fn replace_named_zone(s: &str) -> std::borrow::Cow<'_, str> {
    let Some((rest, zone)) = s.trim_end().rsplit_once(' ') else {
        return s.into();
    };
    if !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return s.into();
    }

    let offset = match zone.to_ascii_uppercase().as_str() {
        "UT" | "GMT" | "UTC" => "+0000",
        "EDT" => "-0400",
        "EST" | "CDT" => "-0500",
        "CST" | "MDT" => "-0600",
        "MST" | "PDT" => "-0700",
        "PST" => "-0800",
        _ => "+0000",
    };
    format!("{rest} {offset}").into()
}
