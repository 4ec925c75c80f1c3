//! Sortable timestamp encoding
//!
//! Clustering columns are ordered by comparing their raw bytes, not by a
//! typed comparator. A plain big-endian `i64` sorts negative values after
//! positive ones, so the sign bit is flipped before writing:
//!
//! ```text
//! i64::MIN  -> 00 00 00 00 00 00 00 00
//! -1        -> 7f ff ff ff ff ff ff ff
//! 0         -> 80 00 00 00 00 00 00 00
//! i64::MAX  -> ff ff ff ff ff ff ff ff
//! ```
//!
//! Unsigned byte order of the encoded value is then chronological order.

use crate::error::{StoreError, StoreResult};
use byteorder::{BigEndian, ByteOrder};
use chrono::{SecondsFormat, TimeZone, Utc};

/// Width of an encoded timestamp in bytes.
pub const ENCODED_TIMESTAMP_LEN: usize = 8;

const SIGN_BIT: u64 = 1 << 63;

/// A timestamp ready to bind into a clustering column.
///
/// Ordering compares the encoded bytes, the same way the store does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedTimestamp {
    bytes: [u8; ENCODED_TIMESTAMP_LEN],
    micros: i64,
}

impl EncodedTimestamp {
    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8; ENCODED_TIMESTAMP_LEN] {
        &self.bytes
    }

    /// Original value, microseconds since epoch.
    pub fn micros(&self) -> i64 {
        self.micros
    }

    /// ISO-8601 rendering for logs. Falls back to the raw value when out of range.
    pub fn to_iso8601(&self) -> String {
        match Utc.timestamp_micros(self.micros).single() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Micros, true),
            None => self.micros.to_string(),
        }
    }
}

/// Converts microsecond timestamps to and from the sortable column encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampCodec;

impl TimestampCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode a timestamp in microseconds since epoch.
    #[inline]
    pub fn encode(&self, micros: i64) -> EncodedTimestamp {
        let mut bytes = [0u8; ENCODED_TIMESTAMP_LEN];
        BigEndian::write_u64(&mut bytes, (micros as u64) ^ SIGN_BIT);
        EncodedTimestamp { bytes, micros }
    }

    /// Decode bytes previously produced by [`encode`](Self::encode).
    pub fn decode(&self, bytes: &[u8]) -> StoreResult<i64> {
        if bytes.len() != ENCODED_TIMESTAMP_LEN {
            return Err(StoreError::InvalidValue {
                column: "ts".into(),
                reason: format!(
                    "expected {} bytes, got {}",
                    ENCODED_TIMESTAMP_LEN,
                    bytes.len()
                ),
            });
        }
        Ok((BigEndian::read_u64(bytes) ^ SIGN_BIT) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_encodings() {
        let codec = TimestampCodec::new();
        assert_eq!(codec.encode(i64::MIN).as_bytes(), &[0u8; 8]);
        assert_eq!(codec.encode(0).as_bytes(), &[0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(codec.encode(i64::MAX).as_bytes(), &[0xff; 8]);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let codec = TimestampCodec::new();
        assert!(matches!(
            codec.decode(&[0u8; 4]),
            Err(StoreError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_iso8601_rendering() {
        let ts = TimestampCodec::new().encode(1_000_000);
        assert_eq!(ts.to_iso8601(), "1970-01-01T00:00:01.000000Z");
    }

    proptest! {
        #[test]
        fn prop_byte_order_is_chronological(a in any::<i64>(), b in any::<i64>()) {
            let codec = TimestampCodec::new();
            let (ea, eb) = (codec.encode(a), codec.encode(b));
            prop_assert_eq!(a.cmp(&b), ea.as_bytes().cmp(eb.as_bytes()));
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn prop_decode_inverts_encode(ts in any::<i64>()) {
            let codec = TimestampCodec::new();
            prop_assert_eq!(codec.decode(codec.encode(ts).as_bytes()).unwrap(), ts);
        }
    }
}
