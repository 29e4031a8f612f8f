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

//! Mailsump is the storage and retrieval engine behind a development mail
//! sink: it ingests raw RFC 5322 byte streams handed over by an SMTP
//! front-end, parses them into a structured model, persists them into
//! per-mailbox stores over an embedded key-value backend, maintains a
//! token index for full-text search, enforces a rolling per-mailbox size
//! bound, and notifies in-process subscribers of changes.
//!
//! The engine has no knowledge of transports. The SMTP receiver calls
//! [`Store::store`] with a mailbox name and the message bytes; the HTTP
//! layer calls the query operations and [`Store::subscribe`]s for its
//! websocket feed.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod mime;
pub mod store;
pub mod support;

#[cfg(test)]
mod test_data;

pub use crate::store::message_store::Store;
pub use crate::store::model::{
    Address, Event, MailboxStat, MessageSummary, ParsedMessage, Part,
    PartContent,
};
pub use crate::store::notify::{Subscription, FILTER_ALL};
pub use crate::support::cancel::Cancel;
pub use crate::support::config::{Config, DEFAULT_MAILBOX};
pub use crate::support::error::Error;
