//! In-memory interval cache over decoded alignments.
//!
//! Alignments are grouped by chromosome and sorted by start. Alongside each
//! sorted list the cache keeps the running maximum of `end`, which makes
//! the overlap query two binary searches plus a scan over candidates:
//!
//! - everything at or after the first alignment starting at or past the
//!   query end is excluded;
//! - everything before the first index whose running max end exceeds the
//!   query start is excluded (no alignment there can reach the range).
//!
//! The scan in between still checks each candidate's own end, since long
//! alignments raise the running max for shorter neighbours.

use crate::io::bam::{Alignment, Header};
use std::collections::HashMap;
use std::sync::Arc;

/// Alignments of one chromosome, sorted by start.
#[derive(Debug, Default)]
struct ChromosomeIndex {
    alignments: Vec<Arc<Alignment>>,
    max_end: Vec<i64>,
}

impl ChromosomeIndex {
    fn new(mut alignments: Vec<Arc<Alignment>>) -> Self {
        // Stable: equal starts keep file order.
        alignments.sort_by_key(|a| a.start);
        let max_end = alignments
            .iter()
            .scan(i64::MIN, |max, a| {
                *max = (*max).max(a.end);
                Some(*max)
            })
            .collect();
        Self {
            alignments,
            max_end,
        }
    }

    fn query(&self, start: i64, end: i64) -> Vec<Arc<Alignment>> {
        let hi = self.alignments.partition_point(|a| a.start < end);
        let lo = self.max_end[..hi].partition_point(|&max| max <= start);
        self.alignments[lo..hi]
            .iter()
            .filter(|a| a.end > start)
            .cloned()
            .collect()
    }
}

/// Chromosome-keyed overlap index, built once per decoded file.
///
/// Immutable after construction; share it between threads freely.
#[derive(Debug, Default)]
pub struct FeatureCache {
    chromosomes: HashMap<Arc<str>, ChromosomeIndex>,
    aliases: HashMap<String, Arc<str>>,
    len: usize,
}

impl FeatureCache {
    /// Index the mapped alignments of a decoded file.
    ///
    /// Unmapped records and records without a position are skipped.
    pub fn build(alignments: Vec<Alignment>, header: &Header) -> Self {
        Self::build_with(alignments, header, false)
    }

    /// Index alignments, optionally keeping unmapped records that still
    /// carry a reference and position (typically mates of mapped reads).
    pub fn build_with(alignments: Vec<Alignment>, header: &Header, include_unmapped: bool) -> Self {
        let total = alignments.len();
        let mut groups: HashMap<Arc<str>, Vec<Arc<Alignment>>> = HashMap::new();

        for alignment in alignments {
            let keep = if include_unmapped {
                alignment.is_placed()
            } else {
                alignment.is_mapped()
            };
            if !keep {
                continue;
            }
            if let Some(chr) = alignment.chr.clone() {
                groups.entry(chr).or_default().push(Arc::new(alignment));
            }
        }

        let len = groups.values().map(Vec::len).sum();
        let chromosomes: HashMap<_, _> = groups
            .into_iter()
            .map(|(chr, group)| (chr, ChromosomeIndex::new(group)))
            .collect();

        tracing::debug!(
            cached = len,
            skipped = total - len,
            chromosomes = chromosomes.len(),
            "built feature cache"
        );

        Self {
            chromosomes,
            aliases: header.alias_table().clone(),
            len,
        }
    }

    fn index(&self, chr: &str) -> Option<&ChromosomeIndex> {
        let canonical = self.aliases.get(chr).map_or(chr, |name| name.as_ref());
        self.chromosomes.get(canonical)
    }

    /// Alignments on `chr` overlapping `[start, end)`, ordered by start.
    ///
    /// `chr` may be any spelling known to the header's alias table. An
    /// unknown chromosome gives an empty result.
    pub fn query(&self, chr: &str, start: i64, end: i64) -> Vec<Arc<Alignment>> {
        match self.index(chr) {
            Some(index) => index.query(start, end),
            None => {
                tracing::trace!(chr, "query on uncached chromosome");
                Vec::new()
            }
        }
    }

    /// Canonical names of chromosomes holding at least one alignment.
    pub fn chromosomes(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = self.chromosomes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of cached alignments on `chr` (any alias).
    pub fn count(&self, chr: &str) -> usize {
        self.index(chr).map_or(0, |index| index.alignments.len())
    }

    /// Total number of cached alignments.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no alignment was cached.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::{CigarOp, Flags, Reference, Tags};
    use proptest::prelude::*;

    fn header() -> Header {
        Header::new(
            String::new(),
            vec![Reference::new("chr1", 10_000), Reference::new("chr2", 10_000)],
            0,
        )
    }

    fn alignment(reference_id: Option<usize>, start: i64, len: u32, flags: u16) -> Alignment {
        let chr = reference_id.map(|id| Arc::from(["chr1", "chr2"][id]));
        Alignment {
            name: format!("r{}", start),
            reference_id,
            chr,
            start,
            end: start + i64::from(len),
            mapq: Some(60),
            flags: Flags::new(flags),
            cigar: vec![CigarOp::Match(len)],
            sequence: Vec::new(),
            quality: Vec::new(),
            tags: Tags::new(),
            mate: None,
            template_length: 0,
        }
    }

    fn starts(hits: &[Arc<Alignment>]) -> Vec<i64> {
        hits.iter().map(|a| a.start).collect()
    }

    #[test]
    fn test_query_overlap() {
        let cache = FeatureCache::build(
            vec![
                alignment(Some(0), 500, 50, 0),
                alignment(Some(0), 100, 50, 0),
                alignment(Some(0), 150, 50, 0),
            ],
            &header(),
        );
        assert_eq!(starts(&cache.query("chr1", 90, 200)), vec![100, 150]);
        assert_eq!(starts(&cache.query("chr1", 0, 10_000)), vec![100, 150, 500]);
        // Half-open on both sides.
        assert!(cache.query("chr1", 200, 500).is_empty());
        assert_eq!(starts(&cache.query("chr1", 199, 501)), vec![150, 500]);
    }

    #[test]
    fn test_unknown_chromosome_is_empty() {
        let cache = FeatureCache::build(vec![alignment(Some(0), 100, 50, 0)], &header());
        assert!(cache.query("chr3", 0, 10).is_empty());
        assert!(cache.query("chr2", 0, 10_000).is_empty());
        assert_eq!(cache.count("chr3"), 0);
    }

    #[test]
    fn test_alias_lookup() {
        let cache = FeatureCache::build(vec![alignment(Some(0), 100, 50, 0)], &header());
        assert_eq!(starts(&cache.query("1", 0, 1000)), vec![100]);
        assert_eq!(cache.count("1"), 1);
    }

    #[test]
    fn test_long_alignment_not_pruned() {
        let cache = FeatureCache::build(
            vec![
                alignment(Some(0), 0, 5_000, 0),
                alignment(Some(0), 10, 5, 0),
                alignment(Some(0), 20, 5, 0),
            ],
            &header(),
        );
        assert_eq!(starts(&cache.query("chr1", 4_000, 4_001)), vec![0]);
        assert_eq!(starts(&cache.query("chr1", 12, 21)), vec![0, 10, 20]);
    }

    #[test]
    fn test_unmapped_skipped_unless_requested() {
        let records = vec![
            alignment(Some(0), 100, 50, 0),
            alignment(Some(0), 100, 0, Flags::UNMAPPED),
            alignment(None, -1, 0, Flags::UNMAPPED),
        ];
        let cache = FeatureCache::build(records.clone(), &header());
        assert_eq!(cache.len(), 1);

        let cache = FeatureCache::build_with(records, &header(), true);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.chromosomes().len(), 1);
    }

    #[test]
    fn test_empty_cache() {
        let cache = FeatureCache::build(Vec::new(), &header());
        assert!(cache.is_empty());
        assert!(cache.chromosomes().is_empty());
        assert!(cache.query("chr1", 0, 100).is_empty());
    }

    #[test]
    fn test_chromosomes_sorted() {
        let cache = FeatureCache::build(
            vec![alignment(Some(1), 5, 5, 0), alignment(Some(0), 5, 5, 0)],
            &header(),
        );
        let names: Vec<String> = cache.chromosomes().iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["chr1", "chr2"]);
    }

    proptest! {
        #[test]
        fn prop_query_matches_brute_force(
            intervals in prop::collection::vec((0i64..2_000, 0u32..300), 0..200),
            start in 0i64..2_500,
            len in 0i64..500,
        ) {
            let records: Vec<Alignment> = intervals
                .iter()
                .map(|&(s, l)| alignment(Some(0), s, l, 0))
                .collect();
            let end = start + len;
            let mut expected: Vec<(i64, i64)> = records
                .iter()
                .filter(|a| a.start < end && a.end > start)
                .map(|a| (a.start, a.end))
                .collect();

            let cache = FeatureCache::build(records, &header());
            let mut actual: Vec<(i64, i64)> = cache
                .query("chr1", start, end)
                .iter()
                .map(|a| (a.start, a.end))
                .collect();

            expected.sort_unstable();
            actual.sort_unstable();
            prop_assert_eq!(actual, expected);
        }
    }
}
