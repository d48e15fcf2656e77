//! The needle record type.

use crate::ttl::Ttl;
use crate::types::{Cookie, NeedleId};
use crate::version::{LAST_MODIFIED_SIZE, TTL_SIZE, Version};

/// Metadata flags of a needle, one byte on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NeedleFlags(u8);

impl NeedleFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Data is gzip-compressed.
    pub const GZIP: u8 = 0x01;
    /// Record carries a name.
    pub const HAS_NAME: u8 = 0x02;
    /// Record carries a mime type.
    pub const HAS_MIME: u8 = 0x04;
    /// Record carries a last-modified timestamp.
    pub const HAS_LAST_MODIFIED: u8 = 0x08;
    /// Record carries a TTL.
    pub const HAS_TTL: u8 = 0x10;
    /// Record carries key/value pairs.
    pub const HAS_PAIRS: u8 = 0x20;
    /// Data is a chunk manifest rather than object content.
    pub const IS_CHUNK_MANIFEST: u8 = 0x80;

    /// Creates flags from the raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks whether `flag` is set.
    #[must_use]
    pub const fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Returns a copy with `flag` set.
    #[must_use]
    pub const fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }
}

/// One stored object version inside a volume log.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Needle {
    /// Random anti-enumeration token.
    pub cookie: Cookie,
    /// Content key, unique per volume.
    pub id: NeedleId,
    /// Raw object bytes.
    pub data: Vec<u8>,
    /// Optional object name, at most 255 bytes.
    pub name: Vec<u8>,
    /// Optional mime type, at most 255 bytes.
    pub mime: Vec<u8>,
    /// Optional key/value pairs, opaque size-prefixed bytes.
    pub pairs: Vec<u8>,
    /// Metadata flags.
    pub flags: NeedleFlags,
    /// Unix seconds of the last modification; 5 bytes on disk.
    pub last_modified: u64,
    /// Time-to-live; expiry is resolved lazily at read time.
    pub ttl: Ttl,
    /// CRC32 over `data`, filled in by the codec.
    pub checksum: u32,
    /// Append timestamp in nanoseconds (version 3 only).
    pub append_at_ns: u64,
}

impl Needle {
    /// Creates a needle holding `data` with a freshly generated cookie.
    #[must_use]
    pub fn new(id: NeedleId, data: Vec<u8>) -> Self {
        Self {
            cookie: Cookie::random(),
            id,
            data,
            ..Self::default()
        }
    }

    /// Sets the name and its flag.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<Vec<u8>>) -> Self {
        self.name = name.into();
        self.flags = self.flags.with(NeedleFlags::HAS_NAME);
        self
    }

    /// Sets the mime type and its flag.
    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<Vec<u8>>) -> Self {
        self.mime = mime.into();
        self.flags = self.flags.with(NeedleFlags::HAS_MIME);
        self
    }

    /// Sets the last-modified timestamp and its flag.
    #[must_use]
    pub fn with_last_modified(mut self, secs: u64) -> Self {
        self.last_modified = secs;
        self.flags = self.flags.with(NeedleFlags::HAS_LAST_MODIFIED);
        self
    }

    /// Sets the TTL and its flag.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self.flags = self.flags.with(NeedleFlags::HAS_TTL);
        self
    }

    /// Sets the key/value pairs and their flag.
    #[must_use]
    pub fn with_pairs(mut self, pairs: impl Into<Vec<u8>>) -> Self {
        self.pairs = pairs.into();
        self.flags = self.flags.with(NeedleFlags::HAS_PAIRS);
        self
    }

    /// Whether the data is gzip-compressed.
    #[must_use]
    pub fn is_gzipped(&self) -> bool {
        self.flags.has(NeedleFlags::GZIP)
    }

    /// Whether the record carries a name.
    #[must_use]
    pub fn has_name(&self) -> bool {
        self.flags.has(NeedleFlags::HAS_NAME)
    }

    /// Whether the record carries a mime type.
    #[must_use]
    pub fn has_mime(&self) -> bool {
        self.flags.has(NeedleFlags::HAS_MIME)
    }

    /// Whether the record carries a last-modified timestamp.
    #[must_use]
    pub fn has_last_modified(&self) -> bool {
        self.flags.has(NeedleFlags::HAS_LAST_MODIFIED)
    }

    /// Whether the record carries a TTL.
    #[must_use]
    pub fn has_ttl(&self) -> bool {
        self.flags.has(NeedleFlags::HAS_TTL)
    }

    /// Whether the record carries key/value pairs.
    #[must_use]
    pub fn has_pairs(&self) -> bool {
        self.flags.has(NeedleFlags::HAS_PAIRS)
    }

    /// Whether the data is a chunk manifest.
    #[must_use]
    pub fn is_chunk_manifest(&self) -> bool {
        self.flags.has(NeedleFlags::IS_CHUNK_MANIFEST)
    }

    /// Returns the value of the record's size field for the given version.
    ///
    /// Version 1 stores the raw data length. Versions 2/3 store the total
    /// length of the self-describing body: data length prefix, data, flags,
    /// and each flag-gated field that is present - or zero when the data is
    /// empty.
    #[must_use]
    pub fn size(&self, version: Version) -> u32 {
        match version {
            Version::V1 => self.data.len() as u32,
            Version::V2 | Version::V3 => {
                if self.data.is_empty() {
                    return 0;
                }
                let mut size = 4 + self.data.len() as u32 + 1;
                if self.has_name() {
                    size += 1 + self.name.len() as u32;
                }
                if self.has_mime() {
                    size += 1 + self.mime.len() as u32;
                }
                if self.has_last_modified() {
                    size += LAST_MODIFIED_SIZE;
                }
                if self.has_ttl() {
                    size += TTL_SIZE;
                }
                if self.has_pairs() {
                    size += 2 + self.pairs.len() as u32;
                }
                size
            }
        }
    }

    /// Whether the needle has expired as of `now_secs`, resolved from its
    /// TTL and last-modified timestamp.
    #[must_use]
    pub fn is_expired(&self, now_secs: u64) -> bool {
        if !self.has_ttl() || !self.has_last_modified() {
            return false;
        }
        self.ttl.is_expired(self.last_modified, now_secs)
    }
}
