pub mod decode;
pub mod encode;

use std::ops::Range;

pub use decode::CodecError;

/*
    Byte codec for queue rows and index keys.

    Encodings are concatenative and order-preserving: two encoded keys
    compare the same way the values they encode do, so rocksdb range scans
    walk rows in domain order.
*/

pub trait Encode {
    /// Append this value's encoding to the sink.
    fn encode_into(&self, out: &mut Vec<u8>);

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

pub trait Decode: Sized {
    /// Read one value off the front of `bytes`, advancing the cursor past it.
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError>;

    /// Decode a value, ignoring any trailing bytes.
    fn decode_all(mut bytes: &[u8]) -> Result<Self, CodecError> {
        Self::take(&mut bytes)
    }
}

/// Key range covering every key that starts with `prefix`. The upper bound
/// is the prefix with its last incrementable byte bumped; a prefix of all
/// 0xff bytes has no upper bound (empty end vec).
pub fn prefix_range(prefix: &[u8]) -> Range<Vec<u8>> {
    let mut end = prefix.to_vec();

    while end.last() == Some(&u8::MAX) {
        end.pop();
    }

    if let Some(last) = end.last_mut() {
        *last += 1;
    }

    prefix.to_vec()..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_encoding_sorts_numerically() {
        let values = [0u64, 1, 255, 256, 99_999, u64::MAX];

        let mut encoded: Vec<Vec<u8>> = values.iter().map(|v| v.encode()).collect();
        encoded.sort();

        let decoded: Vec<u64> = encoded
            .iter()
            .map(|b| u64::decode_all(b).unwrap())
            .collect();

        let mut expected = values.to_vec();
        expected.sort();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn take_advances_the_cursor() {
        let mut buf = vec![];
        7u32.encode_into(&mut buf);
        "ab".to_string().encode_into(&mut buf);

        let mut cursor = buf.as_slice();
        assert_eq!(u32::take(&mut cursor).unwrap(), 7);
        assert_eq!(String::take(&mut cursor).unwrap(), "ab");
        assert!(cursor.is_empty());
    }

    #[test]
    fn prefix_range_bumps_last_byte() {
        let range = prefix_range(&[0x01, 0x02]);
        assert_eq!(range.start, vec![0x01, 0x02]);
        assert_eq!(range.end, vec![0x01, 0x03]);
    }

    #[test]
    fn prefix_range_drops_trailing_ff() {
        let range = prefix_range(&[0x01, 0xff]);
        assert_eq!(range.end, vec![0x02]);

        // nothing to bump: unbounded above
        let range = prefix_range(&[0xff, 0xff]);
        assert_eq!(range.end, Vec::<u8>::new());
    }
}
