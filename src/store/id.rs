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

//! Message ID generation.
//!
//! IDs are ULID-shaped: a 48-bit millisecond timestamp followed by 80
//! bits of randomness, rendered as 26 characters of Crockford base32.
//! Because the encoding is fixed-width and the timestamp leads, the
//! byte-lexicographic order of IDs is their creation order, which is
//! what makes reverse-chronological listing a plain reverse key scan.
//! Uniqueness needs no coordination; collisions within one millisecond
//! would require colliding 80 random bits.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Crockford base32, as used by ULID: no I, L, O or U.
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Length of a rendered message ID.
pub const ID_LEN: usize = 26;

/// Generate a fresh message ID for the given creation time.
pub fn generate(time: DateTime<Utc>) -> String {
    let millis = time.timestamp_millis().max(0) as u128;

    let mut value = (millis & 0xffff_ffff_ffff) << 80;
    value |= rand::thread_rng().gen::<u128>() & ((1u128 << 80) - 1);

    encode(value)
}

fn encode(mut value: u128) -> String {
    let mut out = [0u8; ID_LEN];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(value & 0x1f) as usize];
        value >>= 5;
    }
    // Infallible: the alphabet is ASCII
    String::from_utf8(out.to_vec()).unwrap()
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn ids_are_fixed_width_and_in_alphabet() {
        let id = generate(Utc::now());
        assert_eq!(ID_LEN, id.len());
        assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(1);
        let t2 = t0 + chrono::Duration::days(400);

        let id0 = generate(t0);
        let id1 = generate(t1);
        let id2 = generate(t2);
        assert!(id0 < id1, "{id0} !< {id1}");
        assert!(id1 < id2, "{id1} !< {id2}");
    }

    #[test]
    fn ids_with_equal_time_are_distinct() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_ne!(generate(t), generate(t));
    }

    #[test]
    fn encode_is_order_preserving() {
        let mut previous = encode(0);
        for shift in 0..120 {
            let current = encode(1u128 << shift);
            assert!(
                previous < current,
                "encode(1 << {shift}) did not sort above its predecessor"
            );
            previous = current;
        }
    }
}
