//! # Silo Needle
//!
//! Binary codec for needle records - the single-object unit stored inside a
//! silo volume log.
//!
//! ## Record Format
//!
//! Every record starts with a fixed 20-byte header so a scanner can determine
//! the remaining record length before parsing the body:
//!
//! ```text
//! | cookie (8) | id (8) | size (4) | body (size) | crc32 (4) [| append_ns (8)] | padding |
//! ```
//!
//! - Version 1: the body is the raw data bytes (`size` = data length).
//! - Versions 2/3: the body is self-describing - a 4-byte data length plus
//!   data, a flags byte, then flag-gated optional fields (name, mime,
//!   last-modified, TTL, pairs). Version 3 appends an 8-byte append
//!   timestamp after the checksum.
//!
//! Records are zero-padded so the next record starts on an 8-byte boundary.
//! The checksum covers the data bytes only and is verified on every decode;
//! a mismatch is a fatal corruption signal.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod crc;
mod error;
mod needle;
mod ttl;
mod types;
mod version;

pub use codec::{decode, encode, parse_header, NeedleHeader};
pub use crc::compute_crc32;
pub use error::{NeedleError, NeedleResult};
pub use needle::{Needle, NeedleFlags};
pub use ttl::{Ttl, TtlUnit};
pub use types::{Cookie, NeedleId};
pub use version::{
    actual_size, body_length, padding_length, Version, COOKIE_SIZE, LAST_MODIFIED_SIZE,
    NEEDLE_CHECKSUM_SIZE, NEEDLE_HEADER_SIZE, NEEDLE_ID_SIZE, NEEDLE_PADDING_SIZE, SIZE_SIZE,
    TIMESTAMP_SIZE, TOMBSTONE_SIZE, TTL_SIZE,
};
