//! Format versions and record layout constants.

use crate::error::{NeedleError, NeedleResult};

/// Size of the cookie field in bytes.
pub const COOKIE_SIZE: u32 = 8;
/// Size of the needle ID field in bytes.
pub const NEEDLE_ID_SIZE: u32 = 8;
/// Size of the size field in bytes.
pub const SIZE_SIZE: u32 = 4;
/// Fixed header size: cookie + id + size.
pub const NEEDLE_HEADER_SIZE: u32 = COOKIE_SIZE + NEEDLE_ID_SIZE + SIZE_SIZE;
/// Size of the CRC32 checksum in bytes.
pub const NEEDLE_CHECKSUM_SIZE: u32 = 4;
/// Size of the version-3 append timestamp in bytes.
pub const TIMESTAMP_SIZE: u32 = 8;
/// Record alignment boundary; every record starts at a multiple of this.
pub const NEEDLE_PADDING_SIZE: u32 = 8;
/// Size of the persisted last-modified timestamp in bytes.
pub const LAST_MODIFIED_SIZE: u32 = 5;
/// Size of the persisted TTL in bytes.
pub const TTL_SIZE: u32 = 2;
/// Reserved size value marking an index entry as deleted.
pub const TOMBSTONE_SIZE: u32 = u32::MAX;

/// On-disk format version of a volume and its needle records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// Raw data body, checksum, padding.
    V1,
    /// Self-describing body with flag-gated optional fields.
    V2,
    /// Version 2 plus an append timestamp for tail synchronization.
    V3,
}

impl Version {
    /// The version used for newly created volumes.
    pub const CURRENT: Self = Self::V3;

    /// Parses a version byte.
    ///
    /// # Errors
    ///
    /// Returns [`NeedleError::UnsupportedVersion`] for any unknown byte.
    pub fn from_byte(b: u8) -> NeedleResult<Self> {
        match b {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(NeedleError::UnsupportedVersion(other)),
        }
    }

    /// Returns the raw version byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Whether records of this version carry an append timestamp.
    #[must_use]
    pub const fn has_timestamp(self) -> bool {
        matches!(self, Self::V3)
    }
}

/// Returns the number of zero bytes appended after a record so that the next
/// record starts on an 8-byte boundary. Always in `[0, NEEDLE_PADDING_SIZE)`.
#[must_use]
pub fn padding_length(size: u32, version: Version) -> u32 {
    let mut unpadded = NEEDLE_HEADER_SIZE + size + NEEDLE_CHECKSUM_SIZE;
    if version.has_timestamp() {
        unpadded += TIMESTAMP_SIZE;
    }
    (NEEDLE_PADDING_SIZE - (unpadded % NEEDLE_PADDING_SIZE)) % NEEDLE_PADDING_SIZE
}

/// Returns the encoded length of everything after the header.
#[must_use]
pub fn body_length(size: u32, version: Version) -> u64 {
    let mut len = u64::from(size) + u64::from(NEEDLE_CHECKSUM_SIZE);
    if version.has_timestamp() {
        len += u64::from(TIMESTAMP_SIZE);
    }
    len + u64::from(padding_length(size, version))
}

/// Returns the full on-disk length of a record with the given size field.
#[must_use]
pub fn actual_size(size: u32, version: Version) -> u64 {
    u64::from(NEEDLE_HEADER_SIZE) + body_length(size, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_byte_roundtrip() {
        for v in [Version::V1, Version::V2, Version::V3] {
            assert_eq!(Version::from_byte(v.as_byte()).unwrap(), v);
        }
    }

    #[test]
    fn unknown_version_rejected() {
        assert!(matches!(
            Version::from_byte(0),
            Err(NeedleError::UnsupportedVersion(0))
        ));
        assert!(Version::from_byte(9).is_err());
    }

    #[test]
    fn padding_keeps_records_aligned() {
        for version in [Version::V1, Version::V2, Version::V3] {
            for size in 0..64 {
                let padding = padding_length(size, version);
                assert!(padding < NEEDLE_PADDING_SIZE);
                assert_eq!(
                    actual_size(size, version) % u64::from(NEEDLE_PADDING_SIZE),
                    0
                );
            }
        }
    }

    #[test]
    fn already_aligned_record_gets_no_padding() {
        // v1: 20 header + size + 4 checksum; size 8 gives 32 bytes exactly.
        assert_eq!(padding_length(8, Version::V1), 0);
        assert_eq!(actual_size(8, Version::V1), 32);
    }
}
