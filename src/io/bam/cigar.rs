//! CIGAR (Compact Idiosyncratic Gapped Alignment Report) parsing.
//!
//! CIGAR strings describe how a read aligns to the reference, including
//! matches, insertions, deletions, and other operations.
//!
//! # BAM Format
//!
//! In BAM, CIGAR is stored as 32-bit integers:
//! - Low 4 bits: operation type (0-8)
//! - High 28 bits: operation length (0 to 268,435,455)
//!
//! # Operations
//!
//! - M: Match/mismatch (alignment match, can include mismatches)
//! - I: Insertion to reference
//! - D: Deletion from reference
//! - N: Skipped region from reference (intron for RNA-seq)
//! - S: Soft clipping (bases present in read, not in alignment)
//! - H: Hard clipping (bases not present in read)
//! - P: Padding (silent deletion from padded reference)
//! - =: Sequence match (bases match reference)
//! - X: Sequence mismatch (bases don't match reference)
//!
//! M, D, N, = and X consume reference bases; M, I, S, = and X consume read
//! bases.

use std::fmt;

/// CIGAR operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    /// Match or mismatch (M)
    Match(u32),
    /// Insertion to reference (I)
    Insertion(u32),
    /// Deletion from reference (D)
    Deletion(u32),
    /// Skipped region from reference (N)
    RefSkip(u32),
    /// Soft clipping (S)
    SoftClip(u32),
    /// Hard clipping (H)
    HardClip(u32),
    /// Padding (P)
    Padding(u32),
    /// Sequence match (=)
    SeqMatch(u32),
    /// Sequence mismatch (X)
    SeqMismatch(u32),
}

impl CigarOp {
    /// Decode a packed BAM CIGAR value.
    ///
    /// Returns `None` for operation codes above 8.
    pub fn from_packed(value: u32) -> Option<Self> {
        let length = value >> 4;
        let op = match value & 0x0F {
            0 => CigarOp::Match(length),
            1 => CigarOp::Insertion(length),
            2 => CigarOp::Deletion(length),
            3 => CigarOp::RefSkip(length),
            4 => CigarOp::SoftClip(length),
            5 => CigarOp::HardClip(length),
            6 => CigarOp::Padding(length),
            7 => CigarOp::SeqMatch(length),
            8 => CigarOp::SeqMismatch(length),
            _ => return None,
        };
        Some(op)
    }

    /// Get the operation length.
    pub fn length(&self) -> u32 {
        match *self {
            CigarOp::Match(len)
            | CigarOp::Insertion(len)
            | CigarOp::Deletion(len)
            | CigarOp::RefSkip(len)
            | CigarOp::SoftClip(len)
            | CigarOp::HardClip(len)
            | CigarOp::Padding(len)
            | CigarOp::SeqMatch(len)
            | CigarOp::SeqMismatch(len) => len,
        }
    }

    /// Check if this operation has zero length.
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Whether the operation advances along the reference.
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Deletion(_)
                | CigarOp::RefSkip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// Whether the operation advances along the read.
    pub fn consumes_read(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Insertion(_)
                | CigarOp::SoftClip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// Get the operation type as a character (for SAM format).
    pub fn as_char(&self) -> char {
        match self {
            CigarOp::Match(_) => 'M',
            CigarOp::Insertion(_) => 'I',
            CigarOp::Deletion(_) => 'D',
            CigarOp::RefSkip(_) => 'N',
            CigarOp::SoftClip(_) => 'S',
            CigarOp::HardClip(_) => 'H',
            CigarOp::Padding(_) => 'P',
            CigarOp::SeqMatch(_) => '=',
            CigarOp::SeqMismatch(_) => 'X',
        }
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.length(), self.as_char())
    }
}

/// Number of reference bases covered by `ops`.
pub fn reference_length(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.consumes_reference())
        .map(|op| u64::from(op.length()))
        .sum()
}

/// Format ops as a SAM CIGAR string ("*" when empty).
pub fn to_cigar_string(ops: &[CigarOp]) -> String {
    if ops.is_empty() {
        return "*".to_string();
    }
    ops.iter().map(ToString::to_string).collect()
}

/// Parse BAM CIGAR operations from binary format.
///
/// `data` must hold exactly `4 * n` bytes. On an invalid operation code the
/// offending packed value is returned as the error.
///
/// # Example
///
/// ```
/// use bamcache::io::bam::{parse_cigar, CigarOp};
///
/// // 100M = 100 << 4 | 0 = 1600 = 0x00000640 (little-endian)
/// let data = vec![0x40, 0x06, 0x00, 0x00];
/// let cigar = parse_cigar(&data).unwrap();
/// assert_eq!(cigar, vec![CigarOp::Match(100)]);
/// ```
pub fn parse_cigar(data: &[u8]) -> std::result::Result<Vec<CigarOp>, u32> {
    data.chunks_exact(4)
        .map(|b| {
            let packed = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            CigarOp::from_packed(packed).ok_or(packed)
        })
        .collect()
}
