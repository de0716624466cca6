//! BAM optional tags (auxiliary data).
//!
//! Optional tags store additional information about alignments such as:
//! - Edit distance (NM:i)
//! - Alignment score (AS:i)
//! - Supplementary alignments (SA:Z)
//! - Read group (RG:Z)
//!
//! # Format
//!
//! Each tag is encoded as:
//! - 2 bytes: tag name (e.g., "NM")
//! - 1 byte: value type (A, c, C, s, S, i, I, f, Z, H, B)
//! - N bytes: value (format depends on type)
//!
//! # Unrecognized data
//!
//! The length of a tag payload is only known from its type code, so an
//! unknown code (or a payload that runs off the end of the record) ends
//! tag interpretation for that record. Tags decoded before that point are
//! kept and [`Tags::is_complete`] reports `false`. The record decoder skips
//! by block size, so later records are unaffected.

use super::bytes::{read_f32_le, read_i32_le, read_u16_le, read_u32_le, read_u8, take};
use crate::error::{BamCacheError, Result};
use std::fmt;

/// Typed array payload of a `B` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// `c`
    Int8(Vec<i8>),
    /// `C`
    UInt8(Vec<u8>),
    /// `s`
    Int16(Vec<i16>),
    /// `S`
    UInt16(Vec<u16>),
    /// `i`
    Int32(Vec<i32>),
    /// `I`
    UInt32(Vec<u32>),
    /// `f`
    Float(Vec<f32>),
}

impl ArrayValue {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Int8(v) => v.len(),
            ArrayValue::UInt8(v) => v.len(),
            ArrayValue::Int16(v) => v.len(),
            ArrayValue::UInt16(v) => v.len(),
            ArrayValue::Int32(v) => v.len(),
            ArrayValue::UInt32(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
        }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer elements widened to `i64`, regardless of stored width.
    ///
    /// Returns `None` for float arrays.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        let widened = match self {
            ArrayValue::Int8(v) => v.iter().map(|&x| i64::from(x)).collect(),
            ArrayValue::UInt8(v) => v.iter().map(|&x| i64::from(x)).collect(),
            ArrayValue::Int16(v) => v.iter().map(|&x| i64::from(x)).collect(),
            ArrayValue::UInt16(v) => v.iter().map(|&x| i64::from(x)).collect(),
            ArrayValue::Int32(v) => v.iter().map(|&x| i64::from(x)).collect(),
            ArrayValue::UInt32(v) => v.iter().map(|&x| i64::from(x)).collect(),
            ArrayValue::Float(_) => return None,
        };
        Some(widened)
    }
}

/// A decoded tag value.
///
/// Integer scalars of every width are widened to `i64`.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// `A`: a single printable character
    Char(u8),
    /// `c C s S i I`
    Int(i64),
    /// `f`
    Float(f32),
    /// `Z`
    String(String),
    /// `H`: hex digits, kept as text
    Hex(String),
    /// `B`
    Array(ArrayValue),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Char(c) => write!(f, "{}", *c as char),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(x) => write!(f, "{}", x),
            TagValue::String(s) | TagValue::Hex(s) => f.write_str(s),
            TagValue::Array(a) => write!(f, "[{} values]", a.len()),
        }
    }
}

/// A single optional tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Two-character tag name
    pub name: [u8; 2],
    /// Decoded value
    pub value: TagValue,
}

impl Tag {
    /// Tag name as a string.
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Decoded optional tags of one record, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tags {
    entries: Vec<Tag>,
    complete: bool,
}

impl Default for Tags {
    fn default() -> Self {
        Self::new()
    }
}

impl Tags {
    /// Create an empty, complete tag set.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            complete: true,
        }
    }

    /// Value of the first tag named `name`.
    pub fn get(&self, name: &[u8; 2]) -> Option<&TagValue> {
        self.entries
            .iter()
            .find(|tag| &tag.name == name)
            .map(|tag| &tag.value)
    }

    /// Integer value of `name`, if present and integral.
    pub fn get_int(&self, name: &[u8; 2]) -> Option<i64> {
        match self.get(name)? {
            TagValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String value of `name`, if present and a `Z` string.
    pub fn get_str(&self, name: &[u8; 2]) -> Option<&str> {
        match self.get(name)? {
            TagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Iterate over tags in file order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.entries.iter()
    }

    /// Number of decoded tags.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no tags were decoded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `false` if decoding stopped at an unrecognized or truncated tag.
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Read a NUL-terminated string payload.
fn read_cstr(data: &[u8], cursor: &mut usize) -> Result<String> {
    let rest = &data[*cursor..];
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(BamCacheError::TruncatedInput {
            context: "string tag",
            offset: *cursor,
            needed: rest.len() + 1,
            available: rest.len(),
        })?;
    let value = String::from_utf8_lossy(&rest[..nul]).into_owned();
    *cursor += nul + 1;
    Ok(value)
}

/// Read a `B` array payload. `Ok(None)` for an unknown element subtype.
fn read_array(data: &[u8], cursor: &mut usize) -> Result<Option<ArrayValue>> {
    let subtype = read_u8(data, cursor, "array subtype")?;
    let count = read_u32_le(data, cursor, "array count")? as usize;

    let width = match subtype {
        b'c' | b'C' => 1,
        b's' | b'S' => 2,
        b'i' | b'I' | b'f' => 4,
        _ => return Ok(None),
    };
    let offset = *cursor;
    let len = count.checked_mul(width).ok_or_else(|| {
        BamCacheError::malformed(offset, format!("array count {} overflows", count))
    })?;
    let bytes = take(data, cursor, len, "array values")?;

    let value = match subtype {
        b'c' => ArrayValue::Int8(bytes.iter().map(|&b| b as i8).collect()),
        b'C' => ArrayValue::UInt8(bytes.to_vec()),
        b's' => ArrayValue::Int16(
            bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
        ),
        b'S' => ArrayValue::UInt16(
            bytes
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect(),
        ),
        b'i' => ArrayValue::Int32(
            bytes
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
        b'I' => ArrayValue::UInt32(
            bytes
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
        _ => ArrayValue::Float(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
    };
    Ok(Some(value))
}

/// Decode one tag. `Ok(None)` when the type code is not recognized.
fn read_tag(data: &[u8], cursor: &mut usize) -> Result<Option<Tag>> {
    let name = take(data, cursor, 2, "tag name")?;
    let name = [name[0], name[1]];
    let type_code = read_u8(data, cursor, "tag type")?;

    let value = match type_code {
        b'A' => TagValue::Char(read_u8(data, cursor, "tag value")?),
        b'c' => TagValue::Int(i64::from(read_u8(data, cursor, "tag value")? as i8)),
        b'C' => TagValue::Int(i64::from(read_u8(data, cursor, "tag value")?)),
        b's' => TagValue::Int(i64::from(read_u16_le(data, cursor, "tag value")? as i16)),
        b'S' => TagValue::Int(i64::from(read_u16_le(data, cursor, "tag value")?)),
        b'i' => TagValue::Int(i64::from(read_i32_le(data, cursor, "tag value")?)),
        b'I' => TagValue::Int(i64::from(read_u32_le(data, cursor, "tag value")?)),
        b'f' => TagValue::Float(read_f32_le(data, cursor, "tag value")?),
        b'Z' => TagValue::String(read_cstr(data, cursor)?),
        b'H' => TagValue::Hex(read_cstr(data, cursor)?),
        b'B' => match read_array(data, cursor)? {
            Some(array) => TagValue::Array(array),
            None => return Ok(None),
        },
        _ => return Ok(None),
    };

    Ok(Some(Tag { name, value }))
}

/// Decode the optional-tag region of a record.
///
/// Never fails: see the module docs for how unrecognized data is handled.
///
/// # Example
///
/// ```
/// use bamcache::io::bam::parse_tags;
///
/// let data = [b'N', b'M', b'C', 3];
/// let tags = parse_tags(&data);
/// assert_eq!(tags.get_int(b"NM"), Some(3));
/// assert!(tags.is_complete());
/// ```
pub fn parse_tags(data: &[u8]) -> Tags {
    let mut entries = Vec::new();
    let mut cursor = 0;

    while cursor < data.len() {
        let start = cursor;
        match read_tag(data, &mut cursor) {
            Ok(Some(tag)) => entries.push(tag),
            Ok(None) => {
                tracing::trace!(offset = start, "unrecognized tag type, skipping rest of tags");
                return Tags {
                    entries,
                    complete: false,
                };
            }
            Err(e) => {
                tracing::trace!(offset = start, error = %e, "truncated tag, skipping rest of tags");
                return Tags {
                    entries,
                    complete: false,
                };
            }
        }
    }

    Tags {
        entries,
        complete: true,
    }
}
