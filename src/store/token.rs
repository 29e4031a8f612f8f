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

//! The search tokeniser.
//!
//! The same rules apply to messages at ingest time and to query strings
//! at search time, which is what makes index lookups exact: lowercase,
//! split on every non-alphanumeric character (so `@`, `.`, `-` and `_`
//! all separate), no stemming, no stopwords.

use std::collections::BTreeSet;

use crate::store::model::ParsedMessage;

/// Tokenise the searchable projection of a message: sender and
/// recipient names and addresses, subject, text body, and the file
/// names of attachment and inline parts.
pub fn tokenize_message(msg: &ParsedMessage) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();

    for addr in std::iter::once(&msg.from)
        .chain(&msg.to)
        .chain(&msg.cc)
    {
        tokenize_into(&addr.name, &mut tokens);
        tokenize_into(&addr.address, &mut tokens);
    }
    tokenize_into(&msg.subject, &mut tokens);
    tokenize_into(&msg.body_text, &mut tokens);
    for part in msg.attachments.iter().chain(&msg.inline) {
        tokenize_into(&part.filename, &mut tokens);
    }

    tokens
}

/// Tokenise a search query with the same rules as message content.
pub fn tokenize_query(query: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    tokenize_into(query, &mut tokens);
    tokens
}

fn tokenize_into(text: &str, tokens: &mut BTreeSet<String>) {
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if !word.is_empty() {
            tokens.insert(word.to_lowercase());
        }
    }
}
