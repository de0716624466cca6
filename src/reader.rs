//! Non-indexed BAM reader.
//!
//! A [`BamSession`] decodes an entire BAM file once and then answers any
//! number of range queries from memory. Loading is all-or-nothing: if any
//! stage fails there is no session, so no alignment of a corrupt file is
//! ever served.
//!
//! # Example
//!
//! ```no_run
//! use bamcache::{BamSession, ReaderConfig};
//!
//! # fn main() -> bamcache::Result<()> {
//! let session = BamSession::from_path("alignments.bam", ReaderConfig::default())?;
//!
//! let container = session.query("1", 10_000, 20_000)?;
//! for alignment in container.alignments()? {
//!     println!("{} {}-{}", alignment.name, alignment.start, alignment.end);
//! }
//! # Ok(())
//! # }
//! ```

use crate::cache::FeatureCache;
use crate::config::ReaderConfig;
use crate::container::{AlignmentContainer, GenomicRange};
use crate::error::Result;
use crate::io::bam::{decode_header, decode_records, Header};
use crate::io::compression::{decompress_bgzf, decompress_bgzf_parallel};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Files at least this large are memory-mapped instead of read into a
/// buffer.
pub const MMAP_THRESHOLD: u64 = 50 * 1024 * 1024; // 50 MB

/// A fully decoded BAM file.
#[derive(Debug)]
pub struct BamSession {
    header: Header,
    cache: FeatureCache,
    config: ReaderConfig,
}

impl BamSession {
    /// Decode a complete BGZF-compressed BAM file held in memory.
    ///
    /// # Errors
    ///
    /// Any decode error from decompression, the header or the records.
    pub fn from_bytes(bytes: &[u8], config: ReaderConfig) -> Result<Self> {
        let data = if config.parallel_decompression {
            decompress_bgzf_parallel(bytes)?
        } else {
            decompress_bgzf(bytes)?
        };
        tracing::debug!(
            compressed = bytes.len(),
            decompressed = data.len(),
            parallel = config.parallel_decompression,
            "decompressed BGZF stream"
        );

        let (header, offset) = decode_header(&data)?;
        tracing::debug!(
            references = header.reference_count(),
            header_bytes = offset,
            "decoded BAM header"
        );

        let alignments = decode_records(&data, offset, &header.chr_names())?;
        let records = alignments.len();
        let cache = FeatureCache::build_with(alignments, &header, config.include_unmapped);

        tracing::info!(
            records,
            cached = cache.len(),
            chromosomes = cache.chromosomes().len(),
            "loaded BAM file"
        );

        Ok(Self {
            header,
            cache,
            config,
        })
    }

    /// Read and decode a local BAM file.
    ///
    /// Files of [`MMAP_THRESHOLD`] bytes or more are memory-mapped.
    ///
    /// # Errors
    ///
    /// [`BamCacheError::Io`](crate::BamCacheError::Io) if the file can't be
    /// read, otherwise as [`from_bytes`](Self::from_bytes).
    pub fn from_path<P: AsRef<Path>>(path: P, config: ReaderConfig) -> Result<Self> {
        let path = path.as_ref();
        let file_size = std::fs::metadata(path)?.len();
        tracing::debug!(path = %path.display(), file_size, "opening BAM file");

        if file_size >= MMAP_THRESHOLD {
            let file = File::open(path)?;
            // SAFETY: the map is read-only and dropped before returning;
            // the file must not be truncated while it is being decoded.
            let mmap = unsafe { Mmap::map(&file)? };
            Self::from_bytes(&mmap, config)
        } else {
            let bytes = std::fs::read(path)?;
            Self::from_bytes(&bytes, config)
        }
    }

    /// Alignments on `chr` overlapping `[start, end)`, sampled and
    /// finished.
    ///
    /// `chr` may use any spelling in the header's alias table; an unknown
    /// chromosome gives an empty container.
    ///
    /// # Errors
    ///
    /// [`BamCacheError::InvalidRange`](crate::BamCacheError::InvalidRange)
    /// for a negative `start` or `end < start`.
    pub fn query(&self, chr: &str, start: i64, end: i64) -> Result<AlignmentContainer> {
        let range = GenomicRange::new(chr, start, end)?;
        let hits = self.cache.query(chr, start, end);
        tracing::trace!(range = %range, hits = hits.len(), "cache query");

        let mut container = AlignmentContainer::new(
            range,
            self.config.sampling_window_size,
            self.config.sampling_depth,
            self.config.pairs_supported,
        )
        .with_filter(self.config.filter.clone());

        for alignment in hits {
            container.push(alignment)?;
        }
        container.finish()?;
        Ok(container)
    }

    /// The decoded header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The alignment cache queries run against.
    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }

    /// The configuration the session was loaded with.
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }
}
