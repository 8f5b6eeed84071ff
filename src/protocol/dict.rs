// Binary Dict Codec
//
// Serialized layout, all length fields 4-byte big-endian:
//
//   | count | key len | val len | key \0 | value \0 | key len | ...
//
// "key len" excludes the NUL terminator, "val len" includes it. Dicts travel
// as opaque byte fields inside handshake and callback payloads.

use std::collections::HashMap;

use bytes::{Buf, BufMut};
use thiserror::Error;

const LEN_FIELD: usize = 4;

/// Smallest possible entry: two length fields plus two terminators
const MIN_ENTRY_LEN: usize = 2 * LEN_FIELD + 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DictError {
    #[error("nil or empty dict")]
    EmptyDict,

    #[error("dict key or value contains a NUL byte")]
    EmbeddedNul,

    #[error("dict serialized size mismatch: expected {expected}, wrote {written}")]
    SizeMismatch { expected: usize, written: usize },

    #[error("invalid dict count {0}")]
    InvalidCount(u32),

    #[error("dict buffer truncated")]
    Truncated,

    #[error("dict entry is missing its NUL terminator")]
    MissingTerminator,

    #[error("dict entry is not valid UTF-8")]
    InvalidUtf8,

    #[error("dict field of {0} bytes does not fit a length field")]
    TooLong(usize),
}

fn serialized_len(dict: &HashMap<String, String>) -> usize {
    dict.iter().fold(LEN_FIELD, |total, (key, value)| {
        total + 2 * LEN_FIELD + (key.len() + 1) + (value.len() + 1)
    })
}

fn len_field(len: usize) -> Result<u32, DictError> {
    u32::try_from(len).map_err(|_| DictError::TooLong(len))
}

/// Serialize a string map
///
/// `None` and empty maps are rejected, as are keys or values that contain
/// the terminator byte.
pub fn serialize<'a>(
    dict: impl Into<Option<&'a HashMap<String, String>>>,
) -> Result<Vec<u8>, DictError> {
    let dict = match dict.into() {
        Some(dict) if !dict.is_empty() => dict,
        _ => return Err(DictError::EmptyDict),
    };

    if dict.iter().any(|(k, v)| k.contains('\0') || v.contains('\0')) {
        return Err(DictError::EmbeddedNul);
    }

    let expected = serialized_len(dict);
    let mut buf = Vec::with_capacity(expected);

    buf.put_u32(len_field(dict.len())?);
    for (key, value) in dict {
        buf.put_u32(len_field(key.len())?);
        buf.put_u32(len_field(value.len() + 1)?);
        buf.put_slice(key.as_bytes());
        buf.put_u8(0);
        buf.put_slice(value.as_bytes());
        buf.put_u8(0);
    }

    if buf.len() != expected {
        return Err(DictError::SizeMismatch {
            expected,
            written: buf.len(),
        });
    }

    Ok(buf)
}

fn take_len(buf: &mut &[u8]) -> Result<usize, DictError> {
    if buf.remaining() < LEN_FIELD {
        return Err(DictError::Truncated);
    }
    Ok(buf.get_u32() as usize)
}

/// Take `len` bytes followed by a NUL terminator
fn take_terminated(buf: &mut &[u8], len: usize) -> Result<String, DictError> {
    if len >= buf.remaining() {
        return Err(DictError::Truncated);
    }
    let current: &[u8] = *buf;
    let (text, rest) = current.split_at(len);
    if rest[0] != 0 {
        return Err(DictError::MissingTerminator);
    }
    let text = std::str::from_utf8(text)
        .map_err(|_| DictError::InvalidUtf8)?
        .to_string();
    *buf = &rest[1..];
    Ok(text)
}

/// Deserialize a string map
///
/// Every length is checked against the remaining buffer before use; any
/// malformed input fails without returning a partial map.
pub fn deserialize(mut buf: &[u8]) -> Result<HashMap<String, String>, DictError> {
    let buf = &mut buf;

    if buf.remaining() < LEN_FIELD {
        return Err(DictError::Truncated);
    }
    let count = buf.get_u32();
    if i32::try_from(count).is_err() || count as usize > buf.remaining() / MIN_ENTRY_LEN {
        return Err(DictError::InvalidCount(count));
    }

    let mut dict = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let key_len = take_len(buf)?;
        let value_len = take_len(buf)?;
        if value_len == 0 {
            return Err(DictError::MissingTerminator);
        }

        let key = take_terminated(buf, key_len)?;
        let value = take_terminated(buf, value_len - 1)?;
        dict.insert(key, value);
    }

    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_single_entry_layout() {
        let bytes = serialize(&dict(&[("a", "bb")])).unwrap();
        assert_eq!(
            bytes,
            [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 3, b'a', 0, b'b', b'b', 0]
        );
    }

    #[test]
    fn test_round_trip() {
        let original = dict(&[
            ("op-version", "70000"),
            ("volname", "gv0"),
            ("empty", ""),
            ("trusted.glusterfs.dht", "0x00000001"),
        ]);
        let bytes = serialize(&original).unwrap();
        assert_eq!(deserialize(&bytes).unwrap(), original);
    }

    #[test]
    fn test_empty_and_none_rejected() {
        assert_eq!(serialize(&HashMap::<String, String>::new()), Err(DictError::EmptyDict));
        assert_eq!(serialize(None::<&HashMap<String, String>>), Err(DictError::EmptyDict));
    }

    #[test]
    fn test_embedded_nul_rejected() {
        assert_eq!(
            serialize(&dict(&[("k\0ey", "v")])),
            Err(DictError::EmbeddedNul)
        );
        assert_eq!(
            serialize(&dict(&[("key", "v\0")])),
            Err(DictError::EmbeddedNul)
        );
    }

    #[test]
    fn test_negative_count_rejected() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(deserialize(&bytes), Err(DictError::InvalidCount(u32::MAX)));
    }

    #[test]
    fn test_count_larger_than_buffer_rejected() {
        let bytes = [0, 0, 0x10, 0, 0, 0, 0, 1];
        assert!(matches!(deserialize(&bytes), Err(DictError::InvalidCount(_))));
    }

    #[test]
    fn test_truncated_input_never_panics() {
        let bytes = serialize(&dict(&[("key", "value"), ("k2", "v2")])).unwrap();
        for cut in 0..bytes.len() {
            assert!(deserialize(&bytes[..cut]).is_err(), "cut={cut}");
        }
    }

    #[test]
    fn test_oversize_lengths_rejected() {
        // count=1, keylen huge
        let bytes = [0, 0, 0, 1, 0x7F, 0xFF, 0xFF, 0xFF, 0, 0, 0, 1, b'a', 0];
        assert_eq!(deserialize(&bytes), Err(DictError::Truncated));

        // count=1, vallen huge
        let bytes = [0, 0, 0, 1, 0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF, b'a', 0];
        assert_eq!(deserialize(&bytes), Err(DictError::Truncated));
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let bytes = [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 2, b'a', b'x', b'b', 0];
        assert_eq!(deserialize(&bytes), Err(DictError::MissingTerminator));

        let bytes = [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0, b'a', 0, 0, 0];
        assert_eq!(deserialize(&bytes), Err(DictError::MissingTerminator));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let bytes = [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 2, 0xFF, 0, b'b', 0];
        assert_eq!(deserialize(&bytes), Err(DictError::InvalidUtf8));
    }

    #[test]
    fn test_length_field_bounds() {
        assert_eq!(len_field(0), Ok(0));
        assert_eq!(len_field(u32::MAX as usize), Ok(u32::MAX));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_length_over_u32_rejected() {
        let len = u32::MAX as usize + 1;
        assert_eq!(len_field(len), Err(DictError::TooLong(len)));
    }
}
