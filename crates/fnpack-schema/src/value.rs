//! Self-describing binary value format for entry-point metadata.
//!
//! Every value starts with one tag byte, followed by big-endian fields:
//!
//! | Tag | Variant | Payload |
//! |---|---|---|
//! | `0` | [`Value::U32`] | 4-byte integer |
//! | `1` | [`Value::U64`] | 8-byte integer |
//! | `2` | [`Value::Str`] | 4-byte length, then UTF-8 bytes |
//! | `3` | [`Value::Array`] | 4-byte count, then `count` values |
//! | `4` | [`Value::Map`] | 4-byte count, then `count` key/value pairs |
//!
//! Map keys are arbitrary values. A key that appears twice keeps its first
//! position and takes the last value written.

use thiserror::Error;

/// Maximum nesting of arrays and maps accepted by [`decode`].
pub const MAX_DEPTH: usize = 64;

const TAG_U32: u8 = 0;
const TAG_U64: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_ARRAY: u8 = 3;
const TAG_MAP: u8 = 4;

/// Errors raised while decoding or interpreting a metadata blob.
///
/// Every variant means the blob is malformed; callers treat them uniformly as
/// fatal for the entry point that carried the blob.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// The tag byte does not name a known variant.
    #[error("unknown tag byte {tag:#04x} at offset {offset}")]
    UnknownTag {
        /// The offending tag byte.
        tag: u8,
        /// Byte offset of the tag within the blob.
        offset: usize,
    },

    /// The stream ended before a declared field was complete.
    #[error("truncated stream: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Bytes required by the field being read.
        needed: usize,
        /// Byte offset where the field starts.
        offset: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A string payload is not valid UTF-8.
    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 {
        /// Byte offset of the string payload.
        offset: usize,
    },

    /// Arrays and maps are nested deeper than [`MAX_DEPTH`].
    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,

    /// The root value is not a map.
    #[error("metadata root must be a map")]
    NotAMap,

    /// A required metadata field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A metadata field has the wrong variant or an out-of-range value.
    #[error("field `{field}` must be {expected}")]
    WrongType {
        /// Name of the field.
        field: &'static str,
        /// Human description of the accepted shape.
        expected: &'static str,
    },

    /// The manifest's base64 text could not be decoded.
    #[error("invalid base64: {0}")]
    Base64(String),
}

/// A decoded metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Ordered key/value pairs with unique keys.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Look up a map entry by string key.
    ///
    /// Returns `None` for non-map values and for missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let Self::Map(entries) = self else {
            return None;
        };
        entries
            .iter()
            .find(|(k, _)| matches!(k, Self::Str(s) if s == key))
            .map(|(_, v)| v)
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Widen either integer variant to `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U32(n) => Some(u64::from(*n)),
            Self::U64(n) => Some(*n),
            _ => None,
        }
    }
}

/// Insert into an ordered map, keeping the first position of a repeated key.
fn insert_entry(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
        slot.1 = value;
    } else {
        entries.push((key, value));
    }
}

/// Decode one value from the start of `data`.
///
/// Bytes following the root value are ignored.
///
/// # Errors
///
/// Returns a [`MetadataError`] on an unknown tag, a truncated stream,
/// non-UTF-8 string bytes, or nesting beyond [`MAX_DEPTH`].
pub fn decode(data: &[u8]) -> Result<Value, MetadataError> {
    Decoder { data, pos: 0 }.value(0)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MetadataError> {
        if self.remaining() < n {
            return Err(MetadataError::Truncated {
                needed: n,
                offset: self.pos,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, MetadataError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, MetadataError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, MetadataError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn value(&mut self, depth: usize) -> Result<Value, MetadataError> {
        let offset = self.pos;
        match self.u8()? {
            TAG_U32 => Ok(Value::U32(self.u32()?)),
            TAG_U64 => Ok(Value::U64(self.u64()?)),
            TAG_STR => {
                let len = self.u32()? as usize;
                let start = self.pos;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| MetadataError::InvalidUtf8 { offset: start })?;
                Ok(Value::Str(s.to_owned()))
            }
            TAG_ARRAY => {
                if depth >= MAX_DEPTH {
                    return Err(MetadataError::TooDeep);
                }
                let count = self.u32()? as usize;
                // Every element needs at least its tag byte.
                let mut items = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            TAG_MAP => {
                if depth >= MAX_DEPTH {
                    return Err(MetadataError::TooDeep);
                }
                let count = self.u32()? as usize;
                let mut entries = Vec::with_capacity(count.min(self.remaining() / 2));
                for _ in 0..count {
                    let key = self.value(depth + 1)?;
                    let value = self.value(depth + 1)?;
                    insert_entry(&mut entries, key, value);
                }
                Ok(Value::Map(entries))
            }
            tag => Err(MetadataError::UnknownTag { tag, offset }),
        }
    }
}

/// Encode a value into the wire format read by [`decode`].
///
/// # Panics
///
/// Panics if a string, array, or map is longer than `u32::MAX`, which the
/// format cannot represent.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_len(len: usize, out: &mut Vec<u8>) {
    let len = u32::try_from(len).expect("length exceeds u32::MAX");
    out.extend_from_slice(&len.to_be_bytes());
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::U32(n) => {
            out.push(TAG_U32);
            out.extend_from_slice(&n.to_be_bytes());
        }
        Value::U64(n) => {
            out.push(TAG_U64);
            out.extend_from_slice(&n.to_be_bytes());
        }
        Value::Str(s) => {
            out.push(TAG_STR);
            encode_len(s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            encode_len(items.len(), out);
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(entries) => {
            out.push(TAG_MAP);
            encode_len(entries.len(), out);
            for (k, v) in entries {
                encode_into(k, out);
                encode_into(v, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    #[test]
    fn decodes_big_endian_integers() {
        assert_eq!(decode(&[0, 0, 0, 1, 0]).unwrap(), Value::U32(256));
        assert_eq!(
            decode(&[1, 0, 0, 0, 0, 0, 0, 0, 42]).unwrap(),
            Value::U64(42)
        );
    }

    #[test]
    fn decodes_string() {
        let blob = [2, 0, 0, 0, 3, b'f', b'o', b'o'];
        assert_eq!(decode(&blob).unwrap(), s("foo"));
    }

    #[test]
    fn decodes_nested_map_with_array() {
        let value = Value::Map(vec![
            (s("identifier"), s("handler")),
            (
                s("sizes"),
                Value::Array(vec![Value::U32(1), Value::U64(u64::MAX)]),
            ),
            (Value::U32(7), s("non-string key")),
        ]);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn duplicate_map_key_last_write_wins() {
        let mut blob = vec![4, 0, 0, 0, 2];
        blob.extend(encode(&s("memory")));
        blob.extend(encode(&Value::U32(128)));
        blob.extend(encode(&s("memory")));
        blob.extend(encode(&Value::U32(1024)));

        let value = decode(&blob).unwrap();
        assert_eq!(value, Value::Map(vec![(s("memory"), Value::U32(1024))]));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        assert_eq!(decode(&[0, 0, 0, 0, 9, 0xff, 0xff]).unwrap(), Value::U32(9));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            decode(&[9]).unwrap_err(),
            MetadataError::UnknownTag { tag: 9, offset: 0 }
        );
    }

    #[test]
    fn truncated_integer_is_rejected() {
        assert!(matches!(
            decode(&[1, 0, 0]).unwrap_err(),
            MetadataError::Truncated { needed: 8, .. }
        ));
        assert!(matches!(
            decode(&[]).unwrap_err(),
            MetadataError::Truncated { needed: 1, .. }
        ));
    }

    #[test]
    fn truncated_string_is_rejected() {
        let blob = [2, 0, 0, 0, 10, b'a', b'b'];
        assert!(matches!(
            decode(&blob).unwrap_err(),
            MetadataError::Truncated {
                needed: 10,
                available: 2,
                ..
            }
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let blob = [2, 0, 0, 0, 2, 0xc3, 0x28];
        assert_eq!(
            decode(&blob).unwrap_err(),
            MetadataError::InvalidUtf8 { offset: 5 }
        );
    }

    #[test]
    fn huge_declared_count_fails_without_allocating() {
        let blob = [3, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0, 1];
        assert!(matches!(
            decode(&blob).unwrap_err(),
            MetadataError::Truncated { .. }
        ));
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut value = Value::U32(0);
        for _ in 0..=MAX_DEPTH {
            value = Value::Array(vec![value]);
        }
        assert_eq!(decode(&encode(&value)).unwrap_err(), MetadataError::TooDeep);
    }

    #[test]
    fn get_looks_up_string_keys_only() {
        let value = Value::Map(vec![(Value::U32(1), s("x")), (s("a"), Value::U32(2))]);
        assert_eq!(value.get("a"), Some(&Value::U32(2)));
        assert_eq!(value.get("1"), None);
        assert_eq!(s("a").get("a"), None);
    }

    fn unique_keys(entries: Vec<(Value, Value)>) -> Vec<(Value, Value)> {
        let mut seen = std::collections::HashSet::new();
        entries
            .into_iter()
            .filter(|(k, _)| seen.insert(k.clone()))
            .collect()
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<u32>().prop_map(Value::U32),
            any::<u64>().prop_map(Value::U64),
            ".{0,16}".prop_map(Value::Str),
        ];
        leaf.prop_recursive(4, 64, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::vec((inner.clone(), inner), 0..6)
                    .prop_map(|entries| Value::Map(unique_keys(entries))),
            ]
        })
    }

    proptest! {
        #[test]
        fn encoded_values_decode_unchanged(value in value_strategy()) {
            prop_assert_eq!(decode(&encode(&value)).unwrap(), value);
        }
    }
}
