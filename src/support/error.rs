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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsafe mailbox name")]
    InvalidMailbox,
    #[error("No such message or part")]
    NotFound,
    #[error("Query contains no searchable tokens")]
    InvalidQuery,
    #[error("Store is closed")]
    Closed,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Gave up message insertion after too many ID collisions")]
    GaveUpInsertion,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    Backend(#[from] redb::Error),
}
