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

//! Decoding of RFC 5322 messages and their MIME structure.
//!
//! Everything in here is written to be robust rather than strictly
//! correct: the engine is a sink for whatever software under test emits,
//! so wildly malformed input must still produce *some* usable result and
//! must never abort ingest.

pub mod encoded_word;
pub mod header;
pub mod parse;
pub mod quoted_printable;
