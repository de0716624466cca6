//! Query-scoped alignment accumulator.
//!
//! An [`AlignmentContainer`] receives the cache hits for one query and
//! applies, in push order:
//!
//! 1. the [`AlignmentFilter`];
//! 2. coverage accumulation (every alignment that passed the filter);
//! 3. window/depth sampling: the range is cut into windows of
//!    `sampling_window_size` bases starting at the range start, and each
//!    window keeps the first `sampling_depth` alignments pushed into it.
//!
//! [`finish`](AlignmentContainer::finish) then links mates into
//! [`PairedAlignment`]s (when enabled) and freezes the container. Results
//! are only readable after `finish`.

use crate::config::AlignmentFilter;
use crate::error::{BamCacheError, Result};
use crate::io::bam::{Alignment, CigarOp};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A 0-based half-open range on one chromosome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenomicRange {
    /// Chromosome name, as the caller spelled it
    pub chr: String,
    /// Start position (0-based, inclusive)
    pub start: i64,
    /// End position (0-based, exclusive)
    pub end: i64,
}

impl GenomicRange {
    /// Create a range.
    ///
    /// # Errors
    ///
    /// [`BamCacheError::InvalidRange`] if `start` is negative or
    /// `end < start`. An empty range (`start == end`) is allowed.
    ///
    /// # Examples
    ///
    /// ```
    /// use bamcache::GenomicRange;
    ///
    /// let range = GenomicRange::new("chr1", 100, 250)?;
    /// assert_eq!(range.length(), 150);
    /// assert!(GenomicRange::new("chr1", 200, 100).is_err());
    /// # Ok::<(), bamcache::BamCacheError>(())
    /// ```
    pub fn new(chr: impl Into<String>, start: i64, end: i64) -> Result<Self> {
        if start < 0 || end < start {
            return Err(BamCacheError::InvalidRange { start, end });
        }
        Ok(Self {
            chr: chr.into(),
            start,
            end,
        })
    }

    /// Number of bases in the range.
    #[inline]
    pub fn length(&self) -> i64 {
        self.end - self.start
    }

    /// Whether `position` lies inside the range.
    #[inline]
    pub fn contains(&self, position: i64) -> bool {
        self.start <= position && position < self.end
    }
}

impl fmt::Display for GenomicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chr, self.start, self.end)
    }
}

/// A sampling window that dropped alignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownsampledInterval {
    /// Window start
    pub start: i64,
    /// Window end (exclusive)
    pub end: i64,
    /// Alignments dropped in this window
    pub count: usize,
}

/// Per-position counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseCounts {
    /// Aligned bases (M, = and X ops)
    pub total: u32,
    /// `A` bases
    pub a: u32,
    /// `C` bases
    pub c: u32,
    /// `G` bases
    pub g: u32,
    /// `T` bases
    pub t: u32,
    /// `N` and every other symbol except `=`
    pub n: u32,
    /// Deletions (D ops), not part of `total`
    pub deletions: u32,
}

impl BaseCounts {
    fn add_base(&mut self, base: Option<u8>) {
        self.total += 1;
        match base.map(|b| b.to_ascii_uppercase()) {
            Some(b'A') => self.a += 1,
            Some(b'C') => self.c += 1,
            Some(b'G') => self.g += 1,
            Some(b'T') => self.t += 1,
            // Matches the reference; the base itself is unknown here.
            Some(b'=') | None => {}
            Some(_) => self.n += 1,
        }
    }
}

/// Positions per coverage chunk.
const COVERAGE_CHUNK: i64 = 1024;

/// Coverage over a query range.
///
/// Counts are stored in fixed-size chunks allocated the first time an
/// alignment touches them, so memory follows the covered bases rather than
/// the width of the range.
#[derive(Debug, Clone)]
pub struct CoverageMap {
    start: i64,
    end: i64,
    chunks: BTreeMap<i64, Box<[BaseCounts]>>,
}

impl CoverageMap {
    /// Empty coverage for `[start, end)`.
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            chunks: BTreeMap::new(),
        }
    }

    /// Chunk key and offset inside the chunk for an in-range position.
    fn locate(&self, position: i64) -> (i64, usize) {
        let relative = position - self.start;
        (
            relative.div_euclid(COVERAGE_CHUNK),
            relative.rem_euclid(COVERAGE_CHUNK) as usize,
        )
    }

    fn slot(&mut self, position: i64) -> &mut BaseCounts {
        let (key, offset) = self.locate(position);
        let chunk = self.chunks.entry(key).or_insert_with(|| {
            vec![BaseCounts::default(); COVERAGE_CHUNK as usize].into_boxed_slice()
        });
        &mut chunk[offset]
    }

    /// Indices `i` in `0..len` whose position `ref_pos + i` is in range.
    fn span_in_range(&self, ref_pos: i64, len: i64) -> std::ops::Range<i64> {
        let lo = (self.start - ref_pos).clamp(0, len);
        let hi = (self.end - ref_pos).clamp(0, len);
        lo..hi.max(lo)
    }

    /// Add one alignment's aligned bases and deletions.
    ///
    /// Soft clips, insertions, skips, hard clips and padding add nothing.
    pub fn add(&mut self, alignment: &Alignment) {
        if alignment.start >= self.end || alignment.end <= self.start {
            return;
        }

        let mut ref_pos = alignment.start;
        let mut read_pos = 0usize;
        for op in &alignment.cigar {
            let len = i64::from(op.length());
            match op {
                CigarOp::Match(_) | CigarOp::SeqMatch(_) | CigarOp::SeqMismatch(_) => {
                    for i in self.span_in_range(ref_pos, len) {
                        let base = alignment.sequence.get(read_pos + i as usize).copied();
                        self.slot(ref_pos + i).add_base(base);
                    }
                    ref_pos += len;
                    read_pos += len as usize;
                }
                CigarOp::Deletion(_) => {
                    for i in self.span_in_range(ref_pos, len) {
                        self.slot(ref_pos + i).deletions += 1;
                    }
                    ref_pos += len;
                }
                CigarOp::RefSkip(_) => ref_pos += len,
                CigarOp::Insertion(_) | CigarOp::SoftClip(_) => read_pos += len as usize,
                CigarOp::HardClip(_) | CigarOp::Padding(_) => {}
            }
        }
    }

    /// Counts at `position`; all zero where nothing was counted.
    pub fn get(&self, position: i64) -> BaseCounts {
        if position < self.start || position >= self.end {
            return BaseCounts::default();
        }
        let (key, offset) = self.locate(position);
        self.chunks
            .get(&key)
            .map_or_else(BaseCounts::default, |chunk| chunk[offset])
    }

    /// Aligned-base depth at `position`.
    pub fn total(&self, position: i64) -> u32 {
        self.get(position).total
    }

    /// Highest aligned-base depth in the range.
    pub fn max_total(&self) -> u32 {
        self.chunks
            .values()
            .flat_map(|chunk| chunk.iter().map(|c| c.total))
            .max()
            .unwrap_or(0)
    }

    /// `(position, counts)` for every position with a non-zero count, in
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &BaseCounts)> {
        let start = self.start;
        self.chunks.iter().flat_map(move |(&key, chunk)| {
            chunk.iter().enumerate().filter_map(move |(i, counts)| {
                let covered = counts.total > 0 || counts.deletions > 0;
                covered.then_some((start + key * COVERAGE_CHUNK + i as i64, counts))
            })
        })
    }

    /// Number of positions backed by allocated storage.
    #[cfg(test)]
    fn allocated_positions(&self) -> usize {
        self.chunks.len() * COVERAGE_CHUNK as usize
    }

    /// The queried range as `(start, end)`.
    pub fn bounds(&self) -> (i64, i64) {
        (self.start, self.end)
    }
}

/// Two mates of one template found in the same container.
#[derive(Debug, Clone)]
pub struct PairedAlignment {
    /// First-of-pair mate
    pub first: Arc<Alignment>,
    /// Second-of-pair mate
    pub second: Arc<Alignment>,
}

impl PairedAlignment {
    fn new(a: Arc<Alignment>, b: Arc<Alignment>) -> Self {
        if a.flags.is_first_of_pair() {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// Whether `a` and `b` are the two segments of one template.
    fn are_mates(a: &Alignment, b: &Alignment) -> bool {
        (a.flags.is_first_of_pair() && b.flags.is_second_of_pair())
            || (a.flags.is_second_of_pair() && b.flags.is_first_of_pair())
    }

    /// Leftmost start of the two mates.
    pub fn start(&self) -> i64 {
        self.first.start.min(self.second.start)
    }

    /// Rightmost end of the two mates.
    pub fn end(&self) -> i64 {
        self.first.end.max(self.second.end)
    }

    /// Shared read name.
    pub fn name(&self) -> &str {
        &self.first.name
    }
}

/// Accepts alignments for one query, see the [module docs](self).
#[derive(Debug)]
pub struct AlignmentContainer {
    range: GenomicRange,
    window_size: i64,
    depth: usize,
    pairs_supported: bool,
    filter: AlignmentFilter,
    window_counts: HashMap<i64, usize>,
    dropped: BTreeMap<i64, usize>,
    alignments: Vec<Arc<Alignment>>,
    downsampled: Vec<DownsampledInterval>,
    pairs: Vec<PairedAlignment>,
    coverage: CoverageMap,
    filtered: usize,
    finished: bool,
}

impl AlignmentContainer {
    /// Create an empty container for `range`.
    ///
    /// No filter is applied until [`with_filter`](Self::with_filter) sets
    /// one. A window size of 0 is treated as 1.
    pub fn new(range: GenomicRange, window_size: u32, depth: u32, pairs_supported: bool) -> Self {
        let coverage = CoverageMap::new(range.start, range.end);
        Self {
            range,
            window_size: i64::from(window_size.max(1)),
            depth: depth as usize,
            pairs_supported,
            filter: AlignmentFilter::none(),
            window_counts: HashMap::new(),
            dropped: BTreeMap::new(),
            alignments: Vec::new(),
            downsampled: Vec::new(),
            pairs: Vec::new(),
            coverage,
            filtered: 0,
            finished: false,
        }
    }

    /// Drop alignments rejected by `filter` before sampling and coverage.
    pub fn with_filter(mut self, filter: AlignmentFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Offer one alignment.
    ///
    /// # Errors
    ///
    /// [`BamCacheError::IllegalState`] after [`finish`](Self::finish).
    pub fn push(&mut self, alignment: Arc<Alignment>) -> Result<()> {
        if self.finished {
            return Err(BamCacheError::IllegalState("push after finish"));
        }
        if !self.filter.accepts(&alignment) {
            self.filtered += 1;
            return Ok(());
        }

        self.coverage.add(&alignment);

        let window = (alignment.start - self.range.start).div_euclid(self.window_size);
        let count = self.window_counts.entry(window).or_insert(0);
        if *count < self.depth {
            *count += 1;
            self.alignments.push(alignment);
        } else {
            *self.dropped.entry(window).or_insert(0) += 1;
        }
        Ok(())
    }

    /// Link mates and freeze the container.
    ///
    /// # Errors
    ///
    /// [`BamCacheError::IllegalState`] when called twice.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(BamCacheError::IllegalState("container already finished"));
        }

        self.downsampled = self
            .dropped
            .iter()
            .map(|(&window, &count)| {
                let start = self.range.start + window * self.window_size;
                DownsampledInterval {
                    start,
                    end: start + self.window_size,
                    count,
                }
            })
            .collect();

        if self.pairs_supported {
            self.pairs = self.link_pairs();
        }
        self.finished = true;

        tracing::debug!(
            range = %self.range,
            kept = self.alignments.len(),
            downsampled = self.downsampled.iter().map(|d| d.count).sum::<usize>(),
            filtered = self.filtered,
            pairs = self.pairs.len(),
            "finished alignment container"
        );
        Ok(())
    }

    fn link_pairs(&self) -> Vec<PairedAlignment> {
        let mut pending: HashMap<&str, Arc<Alignment>> = HashMap::new();
        let mut pairs = Vec::new();

        for alignment in &self.alignments {
            let flags = alignment.flags;
            let same_chr_mate = !flags.is_secondary()
                && !flags.is_supplementary()
                && alignment.is_mate_mapped()
                && alignment
                    .mate
                    .as_ref()
                    .is_some_and(|mate| mate.chr == alignment.chr);
            if !same_chr_mate {
                continue;
            }
            match pending.get(alignment.name.as_str()) {
                Some(mate) if PairedAlignment::are_mates(mate, alignment) => {
                    let mate = Arc::clone(mate);
                    pending.remove(alignment.name.as_str());
                    pairs.push(PairedAlignment::new(mate, Arc::clone(alignment)));
                }
                // Same segment twice: keep the earlier one waiting.
                Some(_) => {}
                None => {
                    pending.insert(alignment.name.as_str(), Arc::clone(alignment));
                }
            }
        }

        if !pending.is_empty() {
            tracing::trace!(unmatched = pending.len(), "mates outside container");
        }
        pairs
    }

    fn finished(&self) -> Result<()> {
        if self.finished {
            Ok(())
        } else {
            Err(BamCacheError::IllegalState("container read before finish"))
        }
    }

    /// Alignments kept by sampling, in push order.
    pub fn alignments(&self) -> Result<&[Arc<Alignment>]> {
        self.finished()?;
        Ok(&self.alignments)
    }

    /// Mates linked by `finish`; empty when pairing is off.
    pub fn pairs(&self) -> Result<&[PairedAlignment]> {
        self.finished()?;
        Ok(&self.pairs)
    }

    /// Windows that dropped alignments, ordered by start.
    pub fn downsampled_intervals(&self) -> Result<&[DownsampledInterval]> {
        self.finished()?;
        Ok(&self.downsampled)
    }

    /// Coverage of every alignment that passed the filter, sampled out or not.
    pub fn coverage(&self) -> Result<&CoverageMap> {
        self.finished()?;
        Ok(&self.coverage)
    }

    /// Alignments rejected by the filter.
    pub fn filtered_count(&self) -> usize {
        self.filtered
    }

    /// The queried range.
    pub fn range(&self) -> &GenomicRange {
        &self.range
    }

    /// Chromosome name as given in the query.
    pub fn chr(&self) -> &str {
        &self.range.chr
    }

    /// Whether `finish` has run.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether `finish` links mates.
    pub fn pairs_supported(&self) -> bool {
        self.pairs_supported
    }
}
