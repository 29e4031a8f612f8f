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

/// Maximum accepted length of a mailbox name, in bytes.
pub const MAX_MAILBOX_NAME: usize = 64;

/// Determine whether the given mailbox name is "safe".
///
/// Mailbox names become segments of the key schema and, for operators who
/// point tooling at the data directory, file-system-adjacent strings, so
/// this excludes everything but printable ASCII as well as a handful of
/// characters with special meaning elsewhere (`/` is the key-schema
/// delimiter; `*` and `%` are wildcards in most mail protocols).
///
/// Mailboxes are created implicitly on first delivery, so this is the only
/// gate a name ever passes through.
pub fn is_safe_mailbox_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_MAILBOX_NAME
        // Block traversal-looking names and hidden files on UNIX
        && !name.starts_with('.')
        // Names beginning with # have special meaning in IMAP; reject them
        // so the sink can never collide with a real mail store
        && !name.starts_with('#')
        && name.bytes().all(is_allowed_byte)
}

fn is_allowed_byte(b: u8) -> bool {
    match b {
        // Printable ASCII only; this excludes space, controls, and
        // anything 8-bit
        b'!'..=b'~' => !matches!(b, b'/' | b'\\' | b'*' | b'%'),
        _ => false,
    }
}
