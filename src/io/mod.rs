//! I/O module: BGZF decompression and BAM decoding
//!
//! Everything here works on in-memory buffers. Loading bytes from disk is
//! the session's job (see [`crate::reader`]).

pub mod bam;
pub mod compression;

pub use compression::{compress_bgzf, decompress_bgzf, decompress_bgzf_parallel, BGZF_EOF};
