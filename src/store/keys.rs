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

//! The key schema.
//!
//! All keys are byte-lexicographic. Message data lives under
//! `m/<mailbox>/<id>/<kind>` with one key per kind; the search index
//! lives under `i/<mailbox>/<token>/<id>` with empty values. Mailbox
//! names cannot contain `/` (see `support::safe_name`) and IDs and
//! tokens have restricted alphabets, so splitting on `/` is
//! unambiguous.

/// Key kind suffix for the raw message blob.
pub const KIND_RAW: &str = "raw";
/// Key kind suffix for the encoded summary.
pub const KIND_SUM: &str = "sum";
/// Key kind suffix for the encoded parsed message.
pub const KIND_MSG: &str = "msg";
/// Key kind suffix for the one-byte read flag.
pub const KIND_READ: &str = "read";

pub fn message_key(mailbox: &str, id: &str, kind: &str) -> Vec<u8> {
    format!("m/{mailbox}/{id}/{kind}").into_bytes()
}

/// Prefix covering every message key of a mailbox.
pub fn mailbox_prefix(mailbox: &str) -> Vec<u8> {
    format!("m/{mailbox}/").into_bytes()
}

/// Prefix covering every index key of a mailbox.
pub fn index_prefix(mailbox: &str) -> Vec<u8> {
    format!("i/{mailbox}/").into_bytes()
}

/// Prefix covering the index entries of one token.
pub fn token_prefix(mailbox: &str, token: &str) -> Vec<u8> {
    format!("i/{mailbox}/{token}/").into_bytes()
}

pub fn index_key(mailbox: &str, token: &str, id: &str) -> Vec<u8> {
    format!("i/{mailbox}/{token}/{id}").into_bytes()
}

/// Extract the message ID from a summary key under the given mailbox,
/// or `None` for any other key.
pub fn id_from_summary_key<'a>(
    key: &'a [u8],
    mailbox: &str,
) -> Option<&'a str> {
    let rest = key.strip_prefix(mailbox_prefix(mailbox).as_slice())?;
    let rest = std::str::from_utf8(rest).ok()?;
    rest.strip_suffix("/sum")
}

/// Extract the trailing message ID from an index key.
pub fn id_from_index_key(key: &[u8]) -> Option<&str> {
    let key = std::str::from_utf8(key).ok()?;
    key.rsplit_once('/').map(|(_, id)| id)
}

/// Extract the mailbox name from any message key (`m/<mailbox>/...`).
pub fn mailbox_from_message_key(key: &[u8]) -> Option<&str> {
    let rest = key.strip_prefix(b"m/")?;
    let rest = std::str::from_utf8(rest).ok()?;
    rest.split_once('/').map(|(mailbox, _)| mailbox)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_schema() {
        assert_eq!(
            b"m/INBOX/01H5/raw".to_vec(),
            message_key("INBOX", "01H5", KIND_RAW)
        );
        assert_eq!(
            b"i/INBOX/hello/01H5".to_vec(),
            index_key("INBOX", "hello", "01H5")
        );

        let sum = message_key("INBOX", "01H5", KIND_SUM);
        assert_eq!(Some("01H5"), id_from_summary_key(&sum, "INBOX"));
        assert_eq!(None, id_from_summary_key(&sum, "Other"));
        let raw = message_key("INBOX", "01H5", KIND_RAW);
        assert_eq!(None, id_from_summary_key(&raw, "INBOX"));

        let idx = index_key("INBOX", "hello", "01H5");
        assert_eq!(Some("01H5"), id_from_index_key(&idx));

        assert_eq!(Some("INBOX"), mailbox_from_message_key(&sum));
        assert_eq!(None, mailbox_from_message_key(&idx));
    }

    #[test]
    fn message_kinds_share_an_id_prefix() {
        // Reverse scans rely on all four kinds of one message sorting
        // adjacently under the id
        let prefix = b"m/INBOX/01H5/";
        for kind in [KIND_MSG, KIND_RAW, KIND_READ, KIND_SUM] {
            assert!(message_key("INBOX", "01H5", kind).starts_with(prefix));
        }
    }
}
