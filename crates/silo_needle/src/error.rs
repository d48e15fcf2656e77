//! Error types for needle encoding and decoding.

use thiserror::Error;

/// Result type for needle operations.
pub type NeedleResult<T> = Result<T, NeedleError>;

/// Errors that can occur while encoding or decoding needle records.
#[derive(Debug, Error)]
pub enum NeedleError {
    /// The version byte does not name a supported format version.
    #[error("unsupported needle version: {0}")]
    UnsupportedVersion(u8),

    /// The record is truncated or a declared sub-field length overruns the
    /// remaining buffer.
    #[error("corrupt needle record: {message}")]
    CorruptRecord {
        /// Description of the inconsistency.
        message: String,
    },

    /// The stored checksum does not match the checksum of the decoded data.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the decoded data.
        actual: u32,
    },

    /// The decoded size field does not match the size recorded at write time.
    #[error("size mismatch: record declares {declared}, index recorded {recorded}")]
    SizeMismatch {
        /// Size field stored in the record header.
        declared: u32,
        /// Size recorded by the index at write time.
        recorded: u32,
    },

    /// A variable-length field exceeds its encodable maximum.
    #[error("{field} too large: {len} bytes, maximum {max}")]
    FieldTooLarge {
        /// Name of the offending field.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Maximum encodable length.
        max: usize,
    },
}

impl NeedleError {
    /// Creates a corrupt record error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            message: message.into(),
        }
    }
}
