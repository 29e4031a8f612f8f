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

use serde::{Deserialize, Serialize};

/// The mailbox messages are delivered to when the SMTP front-end has no
/// better idea.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Configuration for a single message store.
///
/// There is deliberately no process-global configuration; the front-ends
/// construct one of these and hand it to `Store::open`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Directory holding the message database.
    ///
    /// If empty, messages are held in process memory and are lost on
    /// shutdown.
    #[serde(default)]
    pub data_dir: String,

    /// Maximum number of messages a mailbox can hold. Excess messages are
    /// pruned oldest-first every minute. 0 disables pruning.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Suppress diagnostic output. Mainly for tests.
    #[serde(default)]
    pub no_logging: bool,
}

fn default_max_messages() -> usize {
    500
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: String::new(),
            max_messages: default_max_messages(),
            no_logging: false,
        }
    }
}
