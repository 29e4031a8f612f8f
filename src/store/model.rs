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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single mail address with its optional display name.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct Address {
    /// Display name; empty if none was given.
    pub name: String,
    /// The bare `local@domain` address, or the raw header fragment if it
    /// could not be parsed.
    pub address: String,
}

/// Descriptor of an attachment or inline part.
///
/// Content bytes are not stored with the descriptor; they are
/// re-extracted from the raw message by `Store::get_attachment_part`.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct Part {
    /// Dotted path into the MIME tree, stable across reads of the same
    /// message.
    pub part_id: String,
    /// `type/subtype` without parameters.
    pub content_type: String,
    /// Declared file name; may be empty.
    pub filename: String,
    /// `Content-ID` without angle brackets; may be empty.
    pub content_id: String,
    /// Size of the transfer-decoded content in bytes.
    pub size: usize,
    /// Declared transfer encoding name, lowercased.
    pub transfer_encoding: String,
}

/// The full parsed representation of a stored message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub reply_to: Vec<Address>,
    /// Decoded subject; empty if absent.
    pub subject: String,
    /// The `Date` header, or the ingest time if missing or unparseable.
    pub date: DateTime<Utc>,
    /// The `Message-ID` header; may be empty.
    pub message_id: String,
    /// Decoded plain-text body, normalised to UTF-8. Empty if none.
    pub body_text: String,
    /// Decoded HTML body, normalised to UTF-8. Empty if none.
    pub body_html: String,
    pub attachments: Vec<Part>,
    pub inline: Vec<Part>,
    /// All headers in original order with their raw values.
    pub headers: Vec<(String, String)>,
    /// Size of the raw message in bytes.
    pub size: usize,
}

/// The projection of a message used by list and search views.
///
/// Cheap to decode; retrieving one never touches the raw blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub from: Address,
    /// Recipient addresses, without the cc/bcc lists.
    pub to: Vec<Address>,
    pub subject: String,
    pub date: DateTime<Utc>,
    /// Raw message size in bytes.
    pub size: usize,
    pub read: bool,
    /// Opening snippet of the text body (or the subject if there is no
    /// body), truncated to a couple hundred characters.
    pub snippet: String,
}

/// Extracted content of one message part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartContent {
    pub content_type: String,
    pub filename: String,
    pub content: Vec<u8>,
}

/// Per-mailbox counts, as reported by `Store::mailboxes`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxStat {
    pub name: String,
    pub total: usize,
    pub unread: usize,
}

/// A change notification delivered to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A message was stored.
    Inserted {
        mailbox: String,
        summary: MessageSummary,
    },
    /// A single message was deleted.
    Deleted { mailbox: String, id: String },
    /// A whole mailbox was deleted.
    Truncated { mailbox: String },
    /// A message transitioned from unread to read.
    Read { mailbox: String, id: String },
    /// A message was explicitly marked unread.
    Unread { mailbox: String, id: String },
    /// The store is shutting down; no further events will arrive.
    Closed,
}

impl Event {
    /// The mailbox this event concerns, if it concerns one.
    pub fn mailbox(&self) -> Option<&str> {
        match self {
            Event::Inserted { mailbox, .. }
            | Event::Deleted { mailbox, .. }
            | Event::Truncated { mailbox }
            | Event::Read { mailbox, .. }
            | Event::Unread { mailbox, .. } => Some(mailbox),
            Event::Closed => None,
        }
    }
}
