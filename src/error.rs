//! Error types for bamcache

use thiserror::Error;

/// Result type alias for bamcache operations
pub type Result<T> = std::result::Result<T, BamCacheError>;

/// Error types that can occur while decoding or querying a BAM file
///
/// Every decode-time variant is fatal: a file that produces one is
/// unusable and no alignments are cached for it.
#[derive(Debug, Error)]
pub enum BamCacheError {
    /// Fewer bytes remain than a structure declares
    #[error("Truncated input while reading {context} at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedInput {
        /// What was being read
        context: &'static str,
        /// Offset where the structure starts
        offset: usize,
        /// Bytes the structure declares
        needed: usize,
        /// Bytes actually remaining
        available: usize,
    },

    /// BGZF block framing is invalid
    #[error("Corrupt BGZF block at offset {offset}: {reason}")]
    CorruptBlock {
        /// Offset of the block in the compressed input
        offset: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The decompressed stream does not start with `BAM\1`
    #[error("Invalid BAM magic bytes: expected [BAM\\x01], got {actual:?}")]
    InvalidMagic {
        /// The bytes found instead
        actual: [u8; 4],
    },

    /// Declared lengths inconsistent with the buffer, or an invalid field value
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord {
        /// Offset in the decompressed stream
        offset: usize,
        /// What was wrong with it
        reason: String,
    },

    /// API misuse, such as pushing into a finished container
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),

    /// Query coordinates that do not describe a range
    #[error("Invalid range: {start}-{end}")]
    InvalidRange {
        /// Requested start
        start: i64,
        /// Requested end
        end: i64,
    },

    /// I/O error while loading a local file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BamCacheError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Self::CorruptBlock {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether the error came from the file contents rather than API use.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::TruncatedInput { .. }
                | Self::CorruptBlock { .. }
                | Self::InvalidMagic { .. }
                | Self::MalformedRecord { .. }
        )
    }
}
