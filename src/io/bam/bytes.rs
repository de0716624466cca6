//! Bounds-checked little-endian readers over an in-memory buffer.
//!
//! All readers advance `cursor` only on success and report a short buffer as
//! [`BamCacheError::TruncatedInput`]; callers that need a different error
//! class (record bodies) remap it.

use crate::error::{BamCacheError, Result};

/// Borrow `len` bytes at `cursor` and advance past them.
pub(crate) fn take<'a>(
    data: &'a [u8],
    cursor: &mut usize,
    len: usize,
    context: &'static str,
) -> Result<&'a [u8]> {
    let available = data.len().saturating_sub(*cursor);
    if len > available {
        return Err(BamCacheError::TruncatedInput {
            context,
            offset: *cursor,
            needed: len,
            available,
        });
    }
    let bytes = &data[*cursor..*cursor + len];
    *cursor += len;
    Ok(bytes)
}

pub(crate) fn read_u8(data: &[u8], cursor: &mut usize, context: &'static str) -> Result<u8> {
    Ok(take(data, cursor, 1, context)?[0])
}

pub(crate) fn read_u16_le(data: &[u8], cursor: &mut usize, context: &'static str) -> Result<u16> {
    let b = take(data, cursor, 2, context)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn read_i32_le(data: &[u8], cursor: &mut usize, context: &'static str) -> Result<i32> {
    let b = take(data, cursor, 4, context)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn read_u32_le(data: &[u8], cursor: &mut usize, context: &'static str) -> Result<u32> {
    let b = take(data, cursor, 4, context)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn read_f32_le(data: &[u8], cursor: &mut usize, context: &'static str) -> Result<f32> {
    read_u32_le(data, cursor, context).map(f32::from_bits)
}

/// Read a non-negative `i32` length field.
///
/// Negative lengths are structural violations, not truncation.
pub(crate) fn read_length(data: &[u8], cursor: &mut usize, context: &'static str) -> Result<usize> {
    let offset = *cursor;
    let value = read_i32_le(data, cursor, context)?;
    usize::try_from(value).map_err(|_| {
        BamCacheError::malformed(offset, format!("negative {}: {}", context, value))
    })
}
