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

/// A single-part 7-bit text message with nothing surprising in it.
pub static PLAIN_TEXT: &[u8] = include_bytes!("plain-text.eml");

/// A multipart/mixed message containing a multipart/related body (with
/// a multipart/alternative text+html pair and an inline JPEG referenced
/// by `cid:`) plus one PDF attachment. Subject `inline + attachment`,
/// from `"Sender Smith" <sender@example.com>`, to
/// `"Recipient Ross" <recipient@example.com>`; the attachment is named
/// `Sample PDF.pdf` and the inline image `inline-image.jpg`.
pub static MIME_ATTACHMENT: &[u8] = include_bytes!("mime-attachment.eml");

/// RFC 2047 encoded words in From and Subject, with a quoted-printable
/// ISO 8859-1 body.
pub static ENCODED_HEADERS: &[u8] = include_bytes!("encoded-headers.eml");
