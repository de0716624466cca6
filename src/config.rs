//! Reader configuration: sampling, pairing, filtering and decode options.
//!
//! Both structs deserialize from any serde format, with every field
//! optional:
//!
//! ```
//! use bamcache::ReaderConfig;
//!
//! let config: ReaderConfig = serde_json::from_str(
//!     r#"{ "sampling_depth": 50, "filter": { "min_mapping_quality": 10 } }"#,
//! ).unwrap();
//! assert_eq!(config.sampling_window_size, 100);
//! assert_eq!(config.sampling_depth, 50);
//! assert!(config.filter.filter_duplicates);
//! ```

use crate::io::bam::Alignment;
use serde::Deserialize;

/// Default sampling window in bases.
pub const DEFAULT_SAMPLING_WINDOW_SIZE: u32 = 100;

/// Default number of alignments kept per sampling window.
pub const DEFAULT_SAMPLING_DEPTH: u32 = 1000;

/// Which alignments are dropped before sampling and coverage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AlignmentFilter {
    /// Drop records that failed vendor quality checks (flag 0x200)
    pub filter_failed_reads: bool,
    /// Drop PCR/optical duplicates (flag 0x400)
    pub filter_duplicates: bool,
    /// Drop secondary alignments (flag 0x100)
    pub filter_secondary: bool,
    /// Drop supplementary alignments (flag 0x800)
    pub filter_supplementary: bool,
    /// Drop records with a mapping quality below this
    pub min_mapping_quality: u8,
}

impl Default for AlignmentFilter {
    fn default() -> Self {
        Self {
            filter_failed_reads: true,
            filter_duplicates: true,
            filter_secondary: false,
            filter_supplementary: false,
            min_mapping_quality: 0,
        }
    }
}

impl AlignmentFilter {
    /// A filter that keeps everything.
    pub fn none() -> Self {
        Self {
            filter_failed_reads: false,
            filter_duplicates: false,
            filter_secondary: false,
            filter_supplementary: false,
            min_mapping_quality: 0,
        }
    }

    /// Whether `alignment` passes the filter.
    ///
    /// A missing mapping quality (255) only passes when no minimum is set.
    pub fn accepts(&self, alignment: &Alignment) -> bool {
        let flags = alignment.flags;
        if self.filter_failed_reads && flags.is_qc_fail() {
            return false;
        }
        if self.filter_duplicates && flags.is_duplicate() {
            return false;
        }
        if self.filter_secondary && flags.is_secondary() {
            return false;
        }
        if self.filter_supplementary && flags.is_supplementary() {
            return false;
        }
        self.min_mapping_quality == 0
            || alignment
                .mapq
                .is_some_and(|mapq| mapq >= self.min_mapping_quality)
    }

    /// Set QC-fail filtering.
    pub fn with_failed_reads(mut self, filter: bool) -> Self {
        self.filter_failed_reads = filter;
        self
    }

    /// Set duplicate filtering.
    pub fn with_duplicates(mut self, filter: bool) -> Self {
        self.filter_duplicates = filter;
        self
    }

    /// Set secondary-alignment filtering.
    pub fn with_secondary(mut self, filter: bool) -> Self {
        self.filter_secondary = filter;
        self
    }

    /// Set supplementary-alignment filtering.
    pub fn with_supplementary(mut self, filter: bool) -> Self {
        self.filter_supplementary = filter;
        self
    }

    /// Set the minimum mapping quality (0 disables the check).
    pub fn with_min_mapping_quality(mut self, mapq: u8) -> Self {
        self.min_mapping_quality = mapq;
        self
    }
}

/// Options for a [`BamSession`](crate::BamSession).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Width of a sampling window in bases
    pub sampling_window_size: u32,
    /// Alignments kept per sampling window
    pub sampling_depth: u32,
    /// Link mates into pairs when a query finishes
    pub pairs_supported: bool,
    /// Decompress BGZF blocks on the rayon pool
    pub parallel_decompression: bool,
    /// Cache unmapped records that still carry a reference and position
    pub include_unmapped: bool,
    /// Per-record filter applied at query time
    pub filter: AlignmentFilter,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            sampling_window_size: DEFAULT_SAMPLING_WINDOW_SIZE,
            sampling_depth: DEFAULT_SAMPLING_DEPTH,
            pairs_supported: false,
            parallel_decompression: false,
            include_unmapped: false,
            filter: AlignmentFilter::default(),
        }
    }
}

impl ReaderConfig {
    /// Set the sampling window size.
    ///
    /// A window of 0 is treated as 1 by the container.
    pub fn with_sampling_window_size(mut self, size: u32) -> Self {
        self.sampling_window_size = size;
        self
    }

    /// Set the number of alignments kept per window.
    pub fn with_sampling_depth(mut self, depth: u32) -> Self {
        self.sampling_depth = depth;
        self
    }

    /// Enable or disable mate pairing.
    pub fn with_pairs(mut self, pairs_supported: bool) -> Self {
        self.pairs_supported = pairs_supported;
        self
    }

    /// Enable or disable parallel BGZF decompression.
    pub fn with_parallel_decompression(mut self, parallel: bool) -> Self {
        self.parallel_decompression = parallel;
        self
    }

    /// Cache placed unmapped records.
    pub fn with_unmapped(mut self, include: bool) -> Self {
        self.include_unmapped = include;
        self
    }

    /// Replace the alignment filter.
    pub fn with_filter(mut self, filter: AlignmentFilter) -> Self {
        self.filter = filter;
        self
    }
}
