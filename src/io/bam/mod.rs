//! BAM (Binary Alignment Map) decoding.
//!
//! Decoding works on the whole decompressed stream at once:
//!
//! 1. [`decode_header`] reads the magic, SAM header text and reference
//!    table, and returns the offset where records start.
//! 2. [`decode_records`] walks the remaining bytes record by record,
//!    resolving reference IDs against the header's names.
//!
//! Both are all-or-nothing; a structural violation anywhere rejects the
//! file.
//!
//! # Example
//!
//! ```no_run
//! use bamcache::io::bam::{decode_header, decode_records};
//! use bamcache::io::decompress_bgzf;
//!
//! # fn main() -> bamcache::Result<()> {
//! let compressed = std::fs::read("alignments.bam")?;
//! let data = decompress_bgzf(&compressed)?;
//! let (header, offset) = decode_header(&data)?;
//! let alignments = decode_records(&data, offset, &header.chr_names())?;
//!
//! println!("{} references, {} records", header.reference_count(), alignments.len());
//! # Ok(())
//! # }
//! ```

mod bytes;
pub mod cigar;
pub mod header;
pub mod record;
pub mod sequence;
pub mod tags;

pub use cigar::{parse_cigar, CigarOp};
pub use header::{decode_header, Header, Reference};
pub use record::{decode_records, parse_record, Alignment, Flags, Mate, Strand};
pub use sequence::decode_sequence;
pub use tags::{parse_tags, ArrayValue, Tag, TagValue, Tags};
