//! Versioned needle record encoding and decoding.

use crate::crc::compute_crc32;
use crate::error::{NeedleError, NeedleResult};
use crate::needle::Needle;
use crate::ttl::Ttl;
use crate::types::{Cookie, NeedleId};
use crate::version::{
    actual_size, padding_length, Version, LAST_MODIFIED_SIZE, NEEDLE_CHECKSUM_SIZE,
    NEEDLE_HEADER_SIZE, TIMESTAMP_SIZE, TTL_SIZE,
};

/// Parsed fixed-size record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleHeader {
    /// Anti-enumeration cookie.
    pub cookie: Cookie,
    /// Needle ID.
    pub id: NeedleId,
    /// Size field; semantics depend on the format version.
    pub size: u32,
}

/// Parses the 20-byte record header.
///
/// # Errors
///
/// Returns a corrupt-record error if fewer than 20 bytes are available.
pub fn parse_header(bytes: &[u8]) -> NeedleResult<NeedleHeader> {
    if bytes.len() < NEEDLE_HEADER_SIZE as usize {
        return Err(NeedleError::corrupt("truncated needle header"));
    }
    let cookie = u64::from_le_bytes(bytes[0..8].try_into().unwrap_or_default());
    let id = u64::from_le_bytes(bytes[8..16].try_into().unwrap_or_default());
    let size = u32::from_le_bytes(bytes[16..20].try_into().unwrap_or_default());
    Ok(NeedleHeader {
        cookie: Cookie::new(cookie),
        id: NeedleId::new(id),
        size,
    })
}

/// Encodes a needle to its on-disk record representation.
///
/// The returned buffer is fully padded; its length is a multiple of the
/// record alignment and equals [`actual_size`] of the needle's size field.
///
/// # Errors
///
/// Returns [`NeedleError::FieldTooLarge`] if the name or mime exceeds 255
/// bytes or the pairs exceed 65535 bytes.
pub fn encode(needle: &Needle, version: Version) -> NeedleResult<Vec<u8>> {
    if needle.name.len() > u8::MAX as usize {
        return Err(NeedleError::FieldTooLarge {
            field: "name",
            len: needle.name.len(),
            max: u8::MAX as usize,
        });
    }
    if needle.mime.len() > u8::MAX as usize {
        return Err(NeedleError::FieldTooLarge {
            field: "mime",
            len: needle.mime.len(),
            max: u8::MAX as usize,
        });
    }
    if needle.pairs.len() > u16::MAX as usize {
        return Err(NeedleError::FieldTooLarge {
            field: "pairs",
            len: needle.pairs.len(),
            max: u16::MAX as usize,
        });
    }

    let size = needle.size(version);
    let mut buf = Vec::with_capacity(actual_size(size, version) as usize);

    buf.extend_from_slice(&needle.cookie.as_u64().to_le_bytes());
    buf.extend_from_slice(&needle.id.as_u64().to_le_bytes());
    buf.extend_from_slice(&size.to_le_bytes());

    match version {
        Version::V1 => {
            buf.extend_from_slice(&needle.data);
        }
        Version::V2 | Version::V3 => {
            if !needle.data.is_empty() {
                buf.extend_from_slice(&(needle.data.len() as u32).to_le_bytes());
                buf.extend_from_slice(&needle.data);
                buf.push(needle.flags.as_byte());
                if needle.has_name() {
                    buf.push(needle.name.len() as u8);
                    buf.extend_from_slice(&needle.name);
                }
                if needle.has_mime() {
                    buf.push(needle.mime.len() as u8);
                    buf.extend_from_slice(&needle.mime);
                }
                if needle.has_last_modified() {
                    buf.extend_from_slice(&needle.last_modified.to_le_bytes()[..5]);
                }
                if needle.has_ttl() {
                    buf.extend_from_slice(&needle.ttl.to_bytes());
                }
                if needle.has_pairs() {
                    buf.extend_from_slice(&(needle.pairs.len() as u16).to_le_bytes());
                    buf.extend_from_slice(&needle.pairs);
                }
            }
        }
    }

    let checksum = compute_crc32(&needle.data);
    buf.extend_from_slice(&checksum.to_le_bytes());

    if version.has_timestamp() {
        buf.extend_from_slice(&needle.append_at_ns.to_le_bytes());
    }

    buf.resize(buf.len() + padding_length(size, version) as usize, 0);

    debug_assert_eq!(buf.len() as u64, actual_size(size, version));
    Ok(buf)
}

/// Decodes a needle from a full record buffer.
///
/// `expected_size` is the size recorded by the index at write time; a record
/// declaring any other size is rejected. The stored checksum is verified
/// against the decoded data.
///
/// # Errors
///
/// - [`NeedleError::SizeMismatch`] if the declared size differs from the
///   recorded one
/// - [`NeedleError::CorruptRecord`] for truncation or sub-field overruns
/// - [`NeedleError::ChecksumMismatch`] on integrity failure
pub fn decode(bytes: &[u8], expected_size: u32, version: Version) -> NeedleResult<Needle> {
    let header = parse_header(bytes)?;
    if header.size != expected_size {
        return Err(NeedleError::SizeMismatch {
            declared: header.size,
            recorded: expected_size,
        });
    }

    let size = header.size as usize;
    let header_len = NEEDLE_HEADER_SIZE as usize;
    let mut unpadded = header_len + size + NEEDLE_CHECKSUM_SIZE as usize;
    if version.has_timestamp() {
        unpadded += TIMESTAMP_SIZE as usize;
    }
    if bytes.len() < unpadded {
        return Err(NeedleError::corrupt("truncated needle record"));
    }

    let mut needle = Needle {
        cookie: header.cookie,
        id: header.id,
        ..Needle::default()
    };

    match version {
        Version::V1 => {
            needle.data = bytes[header_len..header_len + size].to_vec();
        }
        Version::V2 | Version::V3 => {
            read_body_v2(&mut needle, &bytes[header_len..header_len + size])?;
        }
    }

    if size > 0 {
        let checksum_offset = header_len + size;
        let stored = u32::from_le_bytes(
            bytes[checksum_offset..checksum_offset + 4]
                .try_into()
                .unwrap_or_default(),
        );
        let computed = compute_crc32(&needle.data);
        if stored != computed {
            return Err(NeedleError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }
        needle.checksum = computed;
    }

    if version.has_timestamp() {
        let ts_offset = header_len + size + NEEDLE_CHECKSUM_SIZE as usize;
        needle.append_at_ns = u64::from_le_bytes(
            bytes[ts_offset..ts_offset + 8]
                .try_into()
                .unwrap_or_default(),
        );
    }

    Ok(needle)
}

/// Parses the self-describing version-2/3 body into `needle`.
///
/// Every sub-field length is validated against the remaining buffer; an
/// overrun is a corrupt record, never an out-of-bounds read.
fn read_body_v2(needle: &mut Needle, body: &[u8]) -> NeedleResult<()> {
    use crate::needle::NeedleFlags;

    if body.is_empty() {
        return Ok(());
    }

    let mut index = 0usize;

    if body.len() < 4 {
        return Err(NeedleError::corrupt("body shorter than data length prefix"));
    }
    let data_len = u32::from_le_bytes(body[0..4].try_into().unwrap_or_default()) as usize;
    index += 4;
    if index + data_len > body.len() {
        return Err(NeedleError::corrupt("data length overruns body"));
    }
    needle.data = body[index..index + data_len].to_vec();
    index += data_len;

    if index >= body.len() {
        return Err(NeedleError::corrupt("missing flags byte"));
    }
    needle.flags = NeedleFlags::from_byte(body[index]);
    index += 1;

    if needle.has_name() {
        if index >= body.len() {
            return Err(NeedleError::corrupt("missing name length"));
        }
        let name_len = body[index] as usize;
        index += 1;
        if index + name_len > body.len() {
            return Err(NeedleError::corrupt("name length overruns body"));
        }
        needle.name = body[index..index + name_len].to_vec();
        index += name_len;
    }

    if needle.has_mime() {
        if index >= body.len() {
            return Err(NeedleError::corrupt("missing mime length"));
        }
        let mime_len = body[index] as usize;
        index += 1;
        if index + mime_len > body.len() {
            return Err(NeedleError::corrupt("mime length overruns body"));
        }
        needle.mime = body[index..index + mime_len].to_vec();
        index += mime_len;
    }

    if needle.has_last_modified() {
        if index + LAST_MODIFIED_SIZE as usize > body.len() {
            return Err(NeedleError::corrupt("last-modified overruns body"));
        }
        let mut ts_bytes = [0u8; 8];
        ts_bytes[..5].copy_from_slice(&body[index..index + 5]);
        needle.last_modified = u64::from_le_bytes(ts_bytes);
        index += LAST_MODIFIED_SIZE as usize;
    }

    if needle.has_ttl() {
        if index + TTL_SIZE as usize > body.len() {
            return Err(NeedleError::corrupt("ttl overruns body"));
        }
        needle.ttl = Ttl::from_bytes([body[index], body[index + 1]]);
        index += TTL_SIZE as usize;
    }

    if needle.has_pairs() {
        if index + 2 > body.len() {
            return Err(NeedleError::corrupt("missing pairs length"));
        }
        let pairs_len =
            u16::from_le_bytes(body[index..index + 2].try_into().unwrap_or_default()) as usize;
        index += 2;
        if index + pairs_len > body.len() {
            return Err(NeedleError::corrupt("pairs length overruns body"));
        }
        needle.pairs = body[index..index + pairs_len].to_vec();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttl::TtlUnit;
    use crate::version::NEEDLE_PADDING_SIZE;
    use proptest::prelude::*;

    fn sample_needle() -> Needle {
        Needle::new(NeedleId::new(0x1234), b"hello needle".to_vec())
            .with_name("greeting.txt")
            .with_mime("text/plain")
            .with_last_modified(1_700_000_000)
            .with_ttl(Ttl::new(3, TtlUnit::Day))
            .with_pairs(vec![1, 2, 3, 4])
    }

    fn assert_same_content(decoded: &Needle, original: &Needle) {
        assert_eq!(decoded.cookie, original.cookie);
        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.data, original.data);
    }

    #[test]
    fn v1_roundtrip_keeps_data() {
        let needle = sample_needle();
        let size = needle.size(Version::V1);
        let encoded = encode(&needle, Version::V1).unwrap();

        let decoded = decode(&encoded, size, Version::V1).unwrap();
        assert_same_content(&decoded, &needle);
        // v1 has no metadata fields
        assert!(decoded.name.is_empty());
    }

    #[test]
    fn v2_roundtrip_keeps_all_fields() {
        let needle = sample_needle();
        let size = needle.size(Version::V2);
        let encoded = encode(&needle, Version::V2).unwrap();

        let decoded = decode(&encoded, size, Version::V2).unwrap();
        assert_same_content(&decoded, &needle);
        assert_eq!(decoded.name, needle.name);
        assert_eq!(decoded.mime, needle.mime);
        assert_eq!(decoded.last_modified, needle.last_modified);
        assert_eq!(decoded.ttl, needle.ttl);
        assert_eq!(decoded.pairs, needle.pairs);
        assert_eq!(decoded.flags, needle.flags);
    }

    #[test]
    fn v3_roundtrip_keeps_timestamp() {
        let mut needle = sample_needle();
        needle.append_at_ns = 987_654_321;
        let size = needle.size(Version::V3);
        let encoded = encode(&needle, Version::V3).unwrap();

        let decoded = decode(&encoded, size, Version::V3).unwrap();
        assert_eq!(decoded.append_at_ns, 987_654_321);
        assert_eq!(decoded.name, needle.name);
    }

    #[test]
    fn empty_data_v2_encodes_header_only_body() {
        let needle = Needle::new(NeedleId::new(9), Vec::new());
        let size = needle.size(Version::V2);
        assert_eq!(size, 0);

        let encoded = encode(&needle, Version::V2).unwrap();
        assert_eq!(encoded.len() as u64, actual_size(0, Version::V2));

        let decoded = decode(&encoded, 0, Version::V2).unwrap();
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn size_mismatch_rejected() {
        let needle = sample_needle();
        let size = needle.size(Version::V2);
        let encoded = encode(&needle, Version::V2).unwrap();

        let result = decode(&encoded, size + 1, Version::V2);
        assert!(matches!(result, Err(NeedleError::SizeMismatch { .. })));
    }

    #[test]
    fn corrupted_data_fails_checksum() {
        let needle = sample_needle();
        let size = needle.size(Version::V2);
        let mut encoded = encode(&needle, Version::V2).unwrap();

        // Flip a byte inside the data region.
        encoded[NEEDLE_HEADER_SIZE as usize + 6] ^= 0xFF;

        let result = decode(&encoded, size, Version::V2);
        assert!(matches!(result, Err(NeedleError::ChecksumMismatch { .. })));
    }

    #[test]
    fn truncated_record_rejected() {
        let needle = sample_needle();
        let size = needle.size(Version::V3);
        let encoded = encode(&needle, Version::V3).unwrap();

        let result = decode(&encoded[..encoded.len() / 2], size, Version::V3);
        assert!(matches!(result, Err(NeedleError::CorruptRecord { .. })));
    }

    #[test]
    fn overrunning_name_length_rejected() {
        let needle = Needle::new(NeedleId::new(1), b"abc".to_vec()).with_name("name");
        let size = needle.size(Version::V2);
        let mut encoded = encode(&needle, Version::V2).unwrap();

        // Inflate the declared name length past the body end.
        let name_len_offset = NEEDLE_HEADER_SIZE as usize + 4 + 3 + 1;
        encoded[name_len_offset] = 200;

        let result = decode(&encoded, size, Version::V2);
        assert!(matches!(result, Err(NeedleError::CorruptRecord { .. })));
    }

    #[test]
    fn oversized_name_rejected_at_encode() {
        let mut needle = Needle::new(NeedleId::new(1), b"x".to_vec()).with_name("n");
        needle.name = vec![b'a'; 300];

        let result = encode(&needle, Version::V2);
        assert!(matches!(result, Err(NeedleError::FieldTooLarge { .. })));
    }

    proptest! {
        #[test]
        fn roundtrip_all_versions(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            name in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
            mime in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..32)),
            pairs in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..128)),
            last_modified in proptest::option::of(0u64..(1 << 39)),
            ttl_count in proptest::option::of(1u8..=255),
        ) {
            let mut needle = Needle::new(NeedleId::new(42), data);
            if let Some(name) = name {
                needle = needle.with_name(name);
            }
            if let Some(mime) = mime {
                needle = needle.with_mime(mime);
            }
            if let Some(pairs) = pairs {
                needle = needle.with_pairs(pairs);
            }
            if let Some(secs) = last_modified {
                needle = needle.with_last_modified(secs);
            }
            if let Some(count) = ttl_count {
                needle = needle.with_ttl(Ttl::new(count, TtlUnit::Minute));
            }

            for version in [Version::V2, Version::V3] {
                let size = needle.size(version);
                let encoded = encode(&needle, version).unwrap();
                let decoded = decode(&encoded, size, version).unwrap();

                prop_assert_eq!(&decoded.data, &needle.data);
                // Optional fields only survive when data is non-empty.
                if !needle.data.is_empty() {
                    prop_assert_eq!(&decoded.name, &needle.name);
                    prop_assert_eq!(&decoded.mime, &needle.mime);
                    prop_assert_eq!(&decoded.pairs, &needle.pairs);
                    prop_assert_eq!(decoded.last_modified, needle.last_modified);
                    prop_assert_eq!(decoded.ttl, needle.ttl);
                }
            }
        }

        #[test]
        fn encoded_records_are_aligned(
            data in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let needle = Needle::new(NeedleId::new(7), data);
            for version in [Version::V1, Version::V2, Version::V3] {
                let size = needle.size(version);
                let encoded = encode(&needle, version).unwrap();

                prop_assert_eq!(encoded.len() as u64, actual_size(size, version));
                prop_assert_eq!(encoded.len() % NEEDLE_PADDING_SIZE as usize, 0);
                prop_assert!(padding_length(size, version) < NEEDLE_PADDING_SIZE);
            }
        }
    }
}
