//! Canonical CBOR encoding for stored records and snapshots.
//!
//! Output follows RFC 8949 section 4.2.1: shortest integer heads, definite
//! lengths only, map keys ordered length-first then bytewise. The decoder
//! accepts only that form so one record has exactly one byte image.

use std::cmp::Ordering;

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Maximum element count accepted for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum accepted byte or text string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Maximum nesting depth accepted by the decoder.
const MAX_DEPTH: usize = 128;

/// Encode a value to canonical CBOR bytes.
///
/// Encoding cannot fail because [`Value`] has no float variant.
pub fn to_canonical_cbor(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(&mut out, value);
    out
}

/// Decode exactly one canonical CBOR value from `bytes`.
///
/// # Errors
///
/// Fails on floats, tags, indefinite lengths, non-shortest heads, unsorted
/// or duplicate map keys, and on bytes left over after the value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = Decoder { data: bytes, pos: 0 };
    let value = decoder.decode(0)?;
    let remaining = bytes.len() - decoder.pos;
    if remaining > 0 {
        return Err(CodecError::TrailingBytes { remaining });
    }
    Ok(value)
}

fn encode_into(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(0xf6),
        Value::Bool(b) => out.push(if *b { 0xf5 } else { 0xf4 }),
        #[allow(clippy::cast_sign_loss)]
        Value::Integer(n) => {
            if *n >= 0 {
                write_head(out, 0, *n as u64);
            } else {
                // -1 encodes as 0, -2 as 1, and so on.
                write_head(out, 1, (-(n + 1)) as u64);
            }
        }
        Value::Bytes(b) => {
            write_head(out, 2, b.len() as u64);
            out.extend_from_slice(b);
        }
        Value::Text(s) => {
            write_head(out, 3, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            write_head(out, 4, items.len() as u64);
            for item in items {
                encode_into(out, item);
            }
        }
        Value::Map(pairs) => {
            let mut encoded: Vec<(Vec<u8>, &Value)> = pairs
                .iter()
                .map(|(k, v)| (to_canonical_cbor(k), v))
                .collect();
            encoded.sort_by(|a, b| canonical_order(&a.0, &b.0));
            write_head(out, 5, encoded.len() as u64);
            for (key, value) in encoded {
                out.extend_from_slice(&key);
                encode_into(out, value);
            }
        }
    }
}

fn canonical_order(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[allow(clippy::cast_possible_truncation)]
fn write_head(out: &mut Vec<u8>, major: u8, value: u64) {
    let mt = major << 5;
    if value < 24 {
        out.push(mt | value as u8);
    } else if value <= u64::from(u8::MAX) {
        out.push(mt | 24);
        out.push(value as u8);
    } else if value <= u64::from(u16::MAX) {
        out.push(mt | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u64::from(u32::MAX) {
        out.push(mt | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(mt | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn decode(&mut self, depth: usize) -> CodecResult<Value> {
        if depth > MAX_DEPTH {
            return Err(CodecError::invalid_structure("nesting too deep"));
        }
        let initial = self.read_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        match major {
            0 => {
                let n = self.read_argument(info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOutOfRange(n.to_string()))
            }
            1 => {
                let n = self.read_argument(info)?;
                i64::try_from(n)
                    .map(|n| Value::Integer(-n - 1))
                    .map_err(|_| CodecError::IntegerOutOfRange(format!("-1-{n}")))
            }
            2 => {
                let len = self.read_length(info, MAX_BYTES_LENGTH)?;
                Ok(Value::Bytes(self.read_slice(len)?.to_vec()))
            }
            3 => {
                let len = self.read_length(info, MAX_BYTES_LENGTH)?;
                let raw = self.read_slice(len)?;
                std::str::from_utf8(raw)
                    .map(|s| Value::Text(s.to_string()))
                    .map_err(|_| CodecError::InvalidUtf8)
            }
            4 => {
                let len = self.read_length(info, MAX_CONTAINER_ELEMENTS)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            5 => {
                let len = self.read_length(info, MAX_CONTAINER_ELEMENTS)?;
                let mut pairs = Vec::with_capacity(len.min(1024));
                let mut previous_key: Option<&'a [u8]> = None;
                for _ in 0..len {
                    let start = self.pos;
                    let key = self.decode(depth + 1)?;
                    let data = self.data;
                    let raw_key = &data[start..self.pos];
                    if let Some(prev) = previous_key {
                        match canonical_order(prev, raw_key) {
                            Ordering::Less => {}
                            Ordering::Equal => {
                                return Err(CodecError::invalid_structure("duplicate map key"))
                            }
                            Ordering::Greater => {
                                return Err(CodecError::invalid_structure(
                                    "map keys not in canonical order",
                                ))
                            }
                        }
                    }
                    previous_key = Some(raw_key);
                    let value = self.decode(depth + 1)?;
                    pairs.push((key, value));
                }
                Ok(Value::Map(pairs))
            }
            6 => Err(CodecError::unsupported_type("tagged value")),
            _ => match info {
                20 => Ok(Value::Bool(false)),
                21 => Ok(Value::Bool(true)),
                22 => Ok(Value::Null),
                25..=27 => Err(CodecError::FloatForbidden),
                31 => Err(CodecError::IndefiniteLengthForbidden),
                other => Err(CodecError::unsupported_type(format!(
                    "simple value {other}"
                ))),
            },
        }
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_length(&mut self, info: u8, max_allowed: u64) -> CodecResult<usize> {
        let claimed = self.read_argument(info)?;
        if claimed > max_allowed {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed,
            });
        }
        usize::try_from(claimed).map_err(|_| CodecError::SizeLimitExceeded {
            claimed,
            max_allowed,
        })
    }

    fn read_argument(&mut self, info: u8) -> CodecResult<u64> {
        let (value, floor) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (u64::from(self.read_byte()?), 24),
            25 => {
                let b = self.read_slice(2)?;
                (u64::from(u16::from_be_bytes([b[0], b[1]])), 0x100)
            }
            26 => {
                let b = self.read_slice(4)?;
                (
                    u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
                    0x1_0000,
                )
            }
            27 => {
                let b = self.read_slice(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                (u64::from_be_bytes(buf), 0x1_0000_0000)
            }
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional info")),
        };
        if value < floor {
            return Err(CodecError::invalid_structure(
                "non-canonical: value could be encoded in fewer bytes",
            ));
        }
        Ok(value)
    }
}
