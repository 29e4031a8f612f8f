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

//! Decoding of RFC 2047 "encoded words" in unstructured header text.

use std::borrow::Cow;
use std::iter;

use lazy_static::lazy_static;
use regex::Regex;

use super::quoted_printable::qp_decode;

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"^=\?([!->@-~]*)\?([!->@-~]*)\?([!->@-~]*)\?=$").unwrap();
}

/// Decode all encoded words in the given unstructured string.
///
/// Whitespace between two adjacent encoded words is deleted, as RFC 2047
/// requires; everything else passes through unchanged.
pub fn ew_decode_unstructured(text: &str) -> Cow<'_, str> {
    let mut transformed = String::new();

    let mut untransformed_ix = 0;
    let mut word_start = 0;
    let mut last_was_encoded = false;

    let word_ends = text
        .bytes()
        .enumerate()
        .filter(|&(_, c)| {
            c == b' ' || c == b'\t' || c == b'\n' || c == b'\r'
        })
        .map(|(ix, _)| ix)
        .chain(iter::once(text.len()));

    for word_end in word_ends {
        let word = &text[word_start..word_end];

        if let Some(decoded) = ew_decode(word) {
            if !last_was_encoded {
                transformed.push_str(&text[untransformed_ix..word_start]);
            }
            transformed.push_str(&decoded);
            untransformed_ix = word_end;
            last_was_encoded = true;
        } else if !word.is_empty() {
            last_was_encoded = false;
        }

        word_start = word_end + 1;
    }

    if transformed.is_empty() {
        Cow::Borrowed(text)
    } else {
        transformed.push_str(&text[untransformed_ix..]);
        Cow::Owned(transformed)
    }
}

/// Test if `word` (in its entirety) is an RFC 2047 encoded word, and if
/// so, decode it.
///
/// Returns `None` if it is not an encoded word or could not be decoded.
/// The distinction against "decoded to itself" matters to the caller:
/// whitespace is deleted between adjacent encoded words but must be kept
/// everywhere else.
///
/// RFC 2047 caps encoded words at 75 characters, but real agents produce
/// longer ones and real readers accept them, so no length limit is
/// enforced here.
pub fn ew_decode(word: &str) -> Option<String> {
    let captures = ENCODED_WORD.captures(word)?;

    let charset = captures.get(1).unwrap().as_str();
    let encoding = captures.get(2).unwrap().as_str();
    let content = captures.get(3).unwrap().as_str().as_bytes();

    let bytes: Vec<u8> = match encoding {
        "q" | "Q" => {
            // _ stands for ASCII space regardless of charset, and is
            // substituted before transfer decoding
            let unspaced: Vec<u8> = content
                .iter()
                .map(|&b| if b == b'_' { b' ' } else { b })
                .collect();
            qp_decode(&unspaced).into_owned()
        },
        "b" | "B" => base64::decode(content).ok()?,
        _ => return None,
    };

    // RFC 2184 allows a language suffix on the charset; discard it
    let charset = charset.split('*').next().unwrap();

    encoding_rs::Encoding::for_label_no_replacement(charset.as_bytes())
        .map(|enc| enc.decode_with_bom_removal(&bytes).0.into_owned())
}
