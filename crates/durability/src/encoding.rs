//! WAL record encoding and decoding
//!
//! Records are framed with a CRC32 checksum for corruption detection.
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: Total size of type + payload + crc (NOT including length itself)
//! - **type**: Record type tag (1=Put, 2=Delete)
//! - **payload**: bincode-serialized WalRecord
//! - **crc32**: CRC32 checksum over \[type\]\[payload\]
//!
//! All integers are little-endian.

use crate::wal::WalRecord;
use crc32fast::Hasher;
use kipu_core::error::{Error, Result};

/// Record type tag for document writes
pub const TYPE_PUT: u8 = 1;
/// Record type tag for document removals
pub const TYPE_DELETE: u8 = 2;

/// Size of the length prefix
const LEN_SIZE: usize = 4;
/// Smallest valid value of the length field: type(1) + crc(4)
const MIN_FRAME_LEN: usize = 5;
/// Largest value the length field may carry
///
/// A length beyond this can only come from a damaged prefix, so the reader
/// reports it instead of waiting for bytes that will never arrive.
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

fn type_tag(record: &WalRecord) -> u8 {
    match record {
        WalRecord::Put { .. } => TYPE_PUT,
        WalRecord::Delete { .. } => TYPE_DELETE,
    }
}

fn checksum(type_tag: u8, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[type_tag]);
    hasher.update(payload);
    hasher.finalize()
}

/// Encode a WAL record to bytes
///
/// Format: `[length: u32][type: u8][payload: bytes][crc32: u32]`
pub fn encode_record(record: &WalRecord) -> Result<Vec<u8>> {
    let tag = type_tag(record);
    let payload = bincode::serialize(record)?;

    let total_len = 1 + payload.len() + 4;
    if total_len > MAX_RECORD_SIZE {
        return Err(Error::StorageError(format!(
            "WAL record too large: {} bytes (maximum is {})",
            total_len, MAX_RECORD_SIZE
        )));
    }
    let total_len_u32 = total_len as u32;

    let mut buf = Vec::with_capacity(LEN_SIZE + total_len);
    buf.extend_from_slice(&total_len_u32.to_le_bytes());
    buf.push(tag);
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&checksum(tag, &payload).to_le_bytes());

    Ok(buf)
}

/// Decode one WAL record from the start of `buf` with CRC validation
///
/// Returns the record and the number of bytes consumed.
///
/// # Errors
///
/// - `IncompleteEntry` if `buf` ends before the frame does (partial write)
/// - `Corruption` on a length outside `5..=MAX_RECORD_SIZE`, a CRC
///   mismatch, an undecodable payload, or a type tag that disagrees with
///   the payload
pub fn decode_record(buf: &[u8], offset: u64) -> Result<(WalRecord, usize)> {
    if buf.len() < LEN_SIZE {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: LEN_SIZE,
        });
    }

    let mut len_bytes = [0u8; LEN_SIZE];
    len_bytes.copy_from_slice(&buf[..LEN_SIZE]);
    let total_len = u32::from_le_bytes(len_bytes) as usize;

    if total_len < MIN_FRAME_LEN {
        return Err(Error::Corruption(format!(
            "offset {}: invalid record length {} (minimum is {})",
            offset, total_len, MIN_FRAME_LEN
        )));
    }
    if total_len > MAX_RECORD_SIZE {
        return Err(Error::Corruption(format!(
            "offset {}: invalid record length {} (maximum is {})",
            offset, total_len, MAX_RECORD_SIZE
        )));
    }

    let frame_len = LEN_SIZE + total_len;
    if buf.len() < frame_len {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: frame_len,
        });
    }

    let tag = buf[LEN_SIZE];
    let payload = &buf[LEN_SIZE + 1..frame_len - 4];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&buf[frame_len - 4..frame_len]);
    let expected_crc = u32::from_le_bytes(crc_bytes);

    let actual_crc = checksum(tag, payload);
    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "offset {}: CRC mismatch: expected {:08x}, got {:08x}",
            offset, expected_crc, actual_crc
        )));
    }

    let record: WalRecord = bincode::deserialize(payload).map_err(|e| {
        Error::Corruption(format!("offset {}: deserialization failed: {}", offset, e))
    })?;

    if type_tag(&record) != tag {
        return Err(Error::Corruption(format!(
            "offset {}: type tag {} does not match payload",
            offset, tag
        )));
    }

    Ok((record, frame_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kipu_core::{DocumentId, Fields, Revision, Value};

    fn put(seq: u64) -> WalRecord {
        let mut fields = Fields::new();
        fields.insert("type".to_string(), Value::from("text"));
        fields.insert("createdAt".to_string(), Value::Int(1_700_000_000_000));
        WalRecord::Put {
            seq,
            collection: "nodes".to_string(),
            id: DocumentId::from("n1"),
            revision: Revision::FIRST,
            fields,
        }
    }

    #[test]
    fn test_encode_decode() {
        let record = put(7);
        let bytes = encode_record(&record).unwrap();
        let (decoded, consumed) = decode_record(&bytes, 0).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len());
        assert_eq!(bytes[4], TYPE_PUT);
    }

    #[test]
    fn test_truncated_frame_is_incomplete() {
        let bytes = encode_record(&put(1)).unwrap();
        for cut in [0, 2, 4, 5, bytes.len() - 1] {
            let err = decode_record(&bytes[..cut], 0).unwrap_err();
            assert!(
                matches!(err, Error::IncompleteEntry { .. }),
                "cut at {} gave {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_bit_flip_is_corruption() {
        let mut bytes = encode_record(&put(1)).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        let err = decode_record(&bytes, 128).unwrap_err();
        match err {
            Error::Corruption(msg) => assert!(msg.contains("offset 128")),
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_tiny_length_is_corruption() {
        let bytes = [2u8, 0, 0, 0, 1, 0];
        assert!(matches!(
            decode_record(&bytes, 0),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_oversized_length_is_corruption() {
        let mut bytes = encode_record(&put(1)).unwrap();
        bytes[2] = 0x7F;
        let err = decode_record(&bytes, 0).unwrap_err();
        match err {
            Error::Corruption(msg) => assert!(msg.contains("maximum")),
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_record_rejected_on_encode() {
        let mut fields = Fields::new();
        fields.insert("blob".to_string(), Value::Bytes(vec![0; MAX_RECORD_SIZE]));
        let record = WalRecord::Put {
            seq: 1,
            collection: "nodes".to_string(),
            id: DocumentId::from("big"),
            revision: Revision::FIRST,
            fields,
        };
        assert!(matches!(
            encode_record(&record),
            Err(Error::StorageError(_))
        ));
    }

    #[test]
    fn test_type_tag_must_match_payload() {
        let mut bytes = encode_record(&put(1)).unwrap();
        bytes[4] = TYPE_DELETE;
        // Re-seal the frame so only the tag check can fail
        let frame_len = bytes.len();
        let crc = checksum(TYPE_DELETE, &bytes[5..frame_len - 4]);
        bytes[frame_len - 4..].copy_from_slice(&crc.to_le_bytes());
        let err = decode_record(&bytes, 0).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
