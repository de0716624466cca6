//! bamcache: whole-file BAM decoding with an in-memory interval cache
//!
//! # Overview
//!
//! bamcache loads a complete BAM file (BGZF-compressed SAM records) once,
//! decodes every record, and answers repeated genomic-range queries from
//! memory without touching the source again.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bamcache::{BamSession, ReaderConfig};
//!
//! # fn main() -> bamcache::Result<()> {
//! let config = ReaderConfig::default().with_sampling_depth(200).with_pairs(true);
//! let session = BamSession::from_path("alignments.bam", config)?;
//!
//! // "chr1" and "1" resolve to the same reference
//! let container = session.query("chr1", 1_000_000, 1_010_000)?;
//! println!("{} alignments kept", container.alignments()?.len());
//! println!("{} pairs", container.pairs()?.len());
//! println!("max depth {}", container.coverage()?.max_total());
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! bytes → [`io::decompress_bgzf`] → [`io::bam::decode_header`] →
//! [`io::bam::decode_records`] → [`FeatureCache`] → per query,
//! [`AlignmentContainer`].
//!
//! Decoding is all-or-nothing: a corrupt file yields an error and no
//! session.
//!
//! ## Module Organization
//!
//! - [`io`]: BGZF decompression and BAM header/record decoding
//! - [`cache`]: Chromosome-keyed overlap index
//! - [`container`]: Sampling, coverage and mate pairing for one query
//! - [`reader`]: The session tying it together
//! - [`config`]: Reader options and alignment filter
//!
//! ## Logging
//!
//! Load stages are reported through [`tracing`]; install a subscriber to
//! see them.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod container;
pub mod error;
pub mod io;
pub mod reader;

// Re-export commonly used types
pub use cache::FeatureCache;
pub use config::{AlignmentFilter, ReaderConfig};
pub use container::{
    AlignmentContainer, BaseCounts, CoverageMap, DownsampledInterval, GenomicRange,
    PairedAlignment,
};
pub use error::{BamCacheError, Result};
pub use io::bam::{Alignment, CigarOp, Flags, Header, Reference, Strand};
pub use reader::BamSession;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
