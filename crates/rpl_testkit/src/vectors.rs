//! Byte-level vectors pinning the on-disk formats.
//!
//! Tables written by one build must stay readable by the next, so these
//! vectors are checked against the encoder and decoder on every run.

use rpl_core::{Log, COMPRESSION_NONE, COMPRESSION_SNAPPY};

/// A record paired with its exact encoding.
#[derive(Debug, Clone)]
pub struct RecordVector {
    /// Unique identifier for this vector.
    pub id: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// The decoded record.
    pub log: Log,
    /// Expected encoding (hex).
    pub expected_hex: &'static str,
}

/// Record encoding vectors.
pub fn record_vectors() -> Vec<RecordVector> {
    vec![
        RecordVector {
            id: "record_basic",
            description: "id 1, fixed time, uncompressed 3-byte payload",
            log: Log {
                id: 1,
                create_time: 0x0102_0304,
                compression: COMPRESSION_NONE,
                data: b"abc".to_vec(),
            },
            expected_hex: "0000000000000001\
                           01020304\
                           00\
                           00000003\
                           616263",
        },
        RecordVector {
            id: "record_split",
            description: "table terminator record",
            log: Log {
                id: 0,
                create_time: 1,
                compression: COMPRESSION_SNAPPY,
                data: b"ledisdb".to_vec(),
            },
            expected_hex: "0000000000000000\
                           00000001\
                           01\
                           00000007\
                           6c656469736462",
        },
        RecordVector {
            id: "record_empty_max",
            description: "maximum id and time with an empty payload",
            log: Log {
                id: u64::MAX,
                create_time: u32::MAX,
                compression: COMPRESSION_SNAPPY,
                data: Vec::new(),
            },
            expected_hex: "ffffffffffffffff\
                           ffffffff\
                           01\
                           00000000",
        },
    ]
}

/// Commit cursor value and the exact contents of its file.
pub const COMMIT_CURSOR_VECTOR: (u64, &str) = (300, "000000000000012c");

/// Encodes bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes lowercase or uppercase hex. Panics on malformed input.
pub fn from_hex(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "odd-length hex string");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("invalid hex digit"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestReplication;
    use rpl_core::{LogHead, StoreKind, LOG_HEAD_SIZE};

    #[test]
    fn test_hex_helpers() {
        assert_eq!(to_hex(&[0x00, 0x0f, 0xab]), "000fab");
        assert_eq!(from_hex("000FaB"), vec![0x00, 0x0f, 0xab]);
    }

    #[test]
    fn test_record_vectors_encode() {
        for v in record_vectors() {
            let encoded = v.log.marshal().unwrap();
            assert_eq!(to_hex(&encoded), v.expected_hex, "vector {}", v.id);
            assert_eq!(encoded.len(), v.log.size(), "vector {}", v.id);
        }
    }

    #[test]
    fn test_record_vectors_decode() {
        for v in record_vectors() {
            let bytes = from_hex(v.expected_hex);
            assert_eq!(Log::unmarshal(&bytes).unwrap(), v.log, "vector {}", v.id);

            let head = LogHead::parse(&bytes[..LOG_HEAD_SIZE]).unwrap();
            assert_eq!(head.id, v.log.id);
            assert_eq!(head.create_time, v.log.create_time);
            assert_eq!(head.data_len as usize, v.log.data.len());
        }
    }

    #[test]
    fn test_truncated_vector_is_rejected() {
        let bytes = from_hex(record_vectors()[0].expected_hex);
        assert!(Log::unmarshal(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_commit_cursor_vector() {
        let (id, expected) = COMMIT_CURSOR_VECTOR;
        let rpl = TestReplication::open(StoreKind::File);
        rpl.update_commit_id(id).unwrap();

        let bytes = std::fs::read(rpl.path().join("commit.log")).unwrap();
        assert_eq!(to_hex(&bytes), expected);
    }
}
