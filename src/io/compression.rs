//! BGZF block decompression.
//!
//! A BAM file is a series of BGZF blocks: each block is a complete gzip
//! member whose FEXTRA field carries a `BC` subfield with the block size.
//! Blocks are inflated independently and concatenated in file order; block
//! boundaries carry no meaning for the layers above.
//!
//! # Block Structure
//!
//! ```text
//! - Bytes 0-1: Gzip magic (31, 139)
//! - Byte 2: CM = 8 (deflate)
//! - Byte 3: FLG, FEXTRA (0x04) must be set
//! - Bytes 4-9: MTIME, XFL, OS
//! - Bytes 10-11: XLEN (extra field length)
//! - Extra subfields, one of which is SI1='B', SI2='C', SLEN=2, BSIZE
//! - Deflate payload
//! - CRC32 (4 bytes), ISIZE (4 bytes)
//! ```
//!
//! `BSIZE` is the total block size minus one.

use crate::error::{BamCacheError, Result};
use flate2::read::GzDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use rayon::prelude::*;
use std::io::{Read, Write};

/// Fixed part of a BGZF header, up to and including XLEN.
const GZIP_FIXED_HEADER: usize = 12;

/// CRC32 + ISIZE.
const GZIP_TRAILER: usize = 8;

/// Maximum uncompressed payload written into one block.
///
/// BGZF caps a block at 64 KB; 60 KB leaves headroom for incompressible data.
const BGZF_BLOCK_SIZE: usize = 60 * 1024;

/// Largest uncompressed payload a valid block can hold.
const BGZF_MAX_ISIZE: usize = 64 * 1024;

/// The empty block that terminates a BGZF file.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// One framed block located in the compressed input.
#[derive(Debug, Clone, Copy)]
struct BgzfBlock<'a> {
    /// Offset of the block in the compressed input
    offset: usize,
    /// The whole block, header through trailer
    data: &'a [u8],
}

impl BgzfBlock<'_> {
    /// Uncompressed size recorded in the trailer.
    fn isize(&self) -> usize {
        let n = self.data.len();
        u32::from_le_bytes([
            self.data[n - 4],
            self.data[n - 3],
            self.data[n - 2],
            self.data[n - 1],
        ]) as usize
    }
}

/// Locate every block in `data` without inflating anything.
fn parse_bgzf_blocks(data: &[u8]) -> Result<Vec<BgzfBlock<'_>>> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let remaining = data.len() - pos;
        if remaining < GZIP_FIXED_HEADER {
            return Err(BamCacheError::TruncatedInput {
                context: "BGZF block header",
                offset: pos,
                needed: GZIP_FIXED_HEADER,
                available: remaining,
            });
        }

        if data[pos] != 31 || data[pos + 1] != 139 {
            return Err(BamCacheError::corrupt(
                pos,
                format!(
                    "invalid gzip magic: expected [31, 139], got [{}, {}]",
                    data[pos],
                    data[pos + 1]
                ),
            ));
        }
        if data[pos + 2] != 8 {
            return Err(BamCacheError::corrupt(
                pos,
                format!("unsupported compression method {}", data[pos + 2]),
            ));
        }
        if data[pos + 3] & 0x04 == 0 {
            return Err(BamCacheError::corrupt(pos, "FEXTRA flag not set"));
        }

        let xlen = u16::from_le_bytes([data[pos + 10], data[pos + 11]]) as usize;
        let extra_start = pos + GZIP_FIXED_HEADER;
        let extra_end = extra_start + xlen;
        if extra_end > data.len() {
            return Err(BamCacheError::TruncatedInput {
                context: "BGZF extra field",
                offset: pos,
                needed: GZIP_FIXED_HEADER + xlen,
                available: remaining,
            });
        }

        let bsize = find_bsize(&data[extra_start..extra_end])
            .ok_or_else(|| BamCacheError::corrupt(pos, "missing BC subfield"))?;
        let block_size = bsize as usize + 1;

        if block_size < GZIP_FIXED_HEADER + xlen + GZIP_TRAILER {
            return Err(BamCacheError::corrupt(
                pos,
                format!("block size {} smaller than its own framing", block_size),
            ));
        }
        if block_size > remaining {
            return Err(BamCacheError::TruncatedInput {
                context: "BGZF block",
                offset: pos,
                needed: block_size,
                available: remaining,
            });
        }

        blocks.push(BgzfBlock {
            offset: pos,
            data: &data[pos..pos + block_size],
        });
        pos += block_size;
    }

    Ok(blocks)
}

/// Scan the extra subfields for `BC` and return its BSIZE.
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;

        if si1 == b'B' && si2 == b'C' && slen == 2 {
            if pos + 6 > extra.len() {
                return None;
            }
            return Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }

        pos += 4 + slen;
    }
    None
}

/// Inflate a single block, checking CRC32 and ISIZE.
fn decompress_block(block: &BgzfBlock<'_>) -> Result<Vec<u8>> {
    let expected = block.isize();
    let mut decoder = GzDecoder::new(block.data);
    let mut decompressed = Vec::with_capacity(expected.min(BGZF_MAX_ISIZE));
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| BamCacheError::corrupt(block.offset, e.to_string()))?;

    if decompressed.len() != expected {
        return Err(BamCacheError::corrupt(
            block.offset,
            format!(
                "ISIZE mismatch: trailer says {}, inflated {}",
                expected,
                decompressed.len()
            ),
        ));
    }

    Ok(decompressed)
}

/// Decompress a whole BGZF buffer into one contiguous buffer.
///
/// # Errors
///
/// - [`BamCacheError::CorruptBlock`] if a block has bad magic, no `BC`
///   subfield, an impossible `BSIZE`, or a payload that fails to inflate
/// - [`BamCacheError::TruncatedInput`] if the input ends inside a block
///
/// # Example
///
/// ```
/// use bamcache::io::compression::{compress_bgzf, decompress_bgzf};
///
/// # fn main() -> bamcache::Result<()> {
/// let compressed = compress_bgzf(b"BAM\x01")?;
/// assert_eq!(decompress_bgzf(&compressed)?, b"BAM\x01");
/// # Ok(())
/// # }
/// ```
pub fn decompress_bgzf(data: &[u8]) -> Result<Vec<u8>> {
    let blocks = parse_bgzf_blocks(data)?;
    let total: usize = blocks.iter().map(|b| b.isize().min(BGZF_MAX_ISIZE)).sum();

    let mut out = Vec::with_capacity(total);
    for block in &blocks {
        out.extend_from_slice(&decompress_block(block)?);
    }

    tracing::trace!(blocks = blocks.len(), bytes = out.len(), "decompressed BGZF");
    Ok(out)
}

/// Decompress a whole BGZF buffer, inflating blocks on the rayon pool.
///
/// Output is byte-identical to [`decompress_bgzf`]; the first failing
/// block in file order determines the error.
pub fn decompress_bgzf_parallel(data: &[u8]) -> Result<Vec<u8>> {
    let blocks = parse_bgzf_blocks(data)?;

    let decompressed_blocks: Vec<_> = blocks
        .par_iter()
        .map(decompress_block)
        .collect::<Result<Vec<_>>>()?;

    tracing::trace!(blocks = blocks.len(), "decompressed BGZF in parallel");
    Ok(decompressed_blocks.concat())
}

/// Compress one payload into a single BGZF block.
fn compress_block(data: &[u8]) -> Result<Vec<u8>> {
    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(data)?;
    let deflated = deflate.finish()?;

    let crc = crc32fast::hash(data);
    let isize = data.len() as u32;

    let mut block = Vec::with_capacity(deflated.len() + 26);
    block.extend_from_slice(&[31, 139, 8, 4]); // magic, CM, FLG=FEXTRA
    block.extend_from_slice(&[0, 0, 0, 0]); // MTIME
    block.push(0); // XFL
    block.push(255); // OS
    block.extend_from_slice(&6u16.to_le_bytes()); // XLEN
    block.extend_from_slice(&[b'B', b'C']);
    block.extend_from_slice(&2u16.to_le_bytes()); // SLEN

    let bsize_pos = block.len();
    block.extend_from_slice(&0u16.to_le_bytes());

    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc.to_le_bytes());
    block.extend_from_slice(&isize.to_le_bytes());

    let bsize = u16::try_from(block.len() - 1)
        .map_err(|_| BamCacheError::corrupt(0, "compressed block exceeds 64 KB"))?;
    block[bsize_pos..bsize_pos + 2].copy_from_slice(&bsize.to_le_bytes());

    Ok(block)
}

/// Frame `data` as BGZF blocks followed by the EOF marker.
///
/// Used to produce fixtures and to check the decompressor; the crate never
/// writes BAM files itself.
pub fn compress_bgzf(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2 + BGZF_EOF.len());
    for chunk in data.chunks(BGZF_BLOCK_SIZE) {
        out.extend_from_slice(&compress_block(chunk)?);
    }
    out.extend_from_slice(&BGZF_EOF);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_eof_block_decodes_to_nothing() {
        let out = decompress_bgzf(&BGZF_EOF).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(decompress_bgzf(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_basic() {
        let data = b"Hello, BGZF!\nLine 2\nLine 3\n";
        let compressed = compress_bgzf(data).unwrap();
        assert_eq!(decompress_bgzf(&compressed).unwrap(), data);
    }

    #[test]
    fn test_round_trip_spans_blocks() {
        let pattern = b"ATGCATGCATGCATGC\n";
        let mut data = Vec::new();
        for _ in 0..20_000 {
            data.extend_from_slice(pattern);
        }
        assert!(data.len() > BGZF_BLOCK_SIZE * 4);

        let compressed = compress_bgzf(&data).unwrap();
        let blocks = parse_bgzf_blocks(&compressed).unwrap();
        assert_eq!(blocks.len(), data.len().div_ceil(BGZF_BLOCK_SIZE) + 1);

        assert_eq!(decompress_bgzf(&compressed).unwrap(), data);
        assert_eq!(decompress_bgzf_parallel(&compressed).unwrap(), data);
    }

    #[test]
    fn test_block_format() {
        let compressed = compress_bgzf(b"BGZF format validation\n").unwrap();
        assert_eq!(compressed[0], 31);
        assert_eq!(compressed[1], 139);
        assert_eq!(compressed[3] & 0x04, 0x04);
        assert_eq!(u16::from_le_bytes([compressed[10], compressed[11]]), 6);
        assert_eq!(compressed[12], b'B');
        assert_eq!(compressed[13], b'C');
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let mut compressed = compress_bgzf(b"data").unwrap();
        compressed[0] = 0;
        let err = decompress_bgzf(&compressed).unwrap_err();
        assert!(matches!(err, BamCacheError::CorruptBlock { offset: 0, .. }));
    }

    #[test]
    fn test_missing_bc_subfield_is_corrupt() {
        let mut compressed = compress_bgzf(b"data").unwrap();
        compressed[12] = b'X';
        let err = decompress_bgzf(&compressed).unwrap_err();
        assert!(matches!(err, BamCacheError::CorruptBlock { .. }));
    }

    #[test]
    fn test_truncated_block() {
        let compressed = compress_bgzf(b"some payload that is long enough").unwrap();
        let first_block_len = compressed.len() - BGZF_EOF.len();
        let err = decompress_bgzf(&compressed[..first_block_len - 3]).unwrap_err();
        assert!(matches!(
            err,
            BamCacheError::TruncatedInput { context: "BGZF block", .. }
        ));
    }

    #[test]
    fn test_truncated_header() {
        let err = decompress_bgzf(&BGZF_EOF[..5]).unwrap_err();
        assert!(matches!(err, BamCacheError::TruncatedInput { .. }));
    }

    #[test]
    fn test_bad_crc_is_corrupt() {
        let mut compressed = compress_bgzf(b"checksummed payload").unwrap();
        let crc_pos = compressed.len() - BGZF_EOF.len() - 8;
        compressed[crc_pos] ^= 0xFF;
        let err = decompress_bgzf(&compressed).unwrap_err();
        assert!(matches!(err, BamCacheError::CorruptBlock { .. }));
    }

    #[test]
    fn test_bsize_too_small_is_corrupt() {
        let mut compressed = compress_bgzf(b"x").unwrap();
        compressed[16..18].copy_from_slice(&10u16.to_le_bytes());
        let err = decompress_bgzf(&compressed).unwrap_err();
        assert!(matches!(err, BamCacheError::CorruptBlock { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip(data in prop::collection::vec(any::<u8>(), 0..150_000)) {
            let compressed = compress_bgzf(&data).unwrap();
            prop_assert_eq!(decompress_bgzf(&compressed).unwrap(), data.clone());
            prop_assert_eq!(decompress_bgzf_parallel(&compressed).unwrap(), data);
        }
    }
}
