//! BAM record decoding.
//!
//! A BAM record represents a single alignment (read mapped to reference).
//! Records follow the header back to back, each prefixed by its size.
//!
//! # Binary Format
//!
//! ```text
//! BAM Record (binary, little-endian):
//! - block_size (int32): Total record size in bytes (excluding this field)
//! - refID (int32): Reference sequence ID (-1 for unmapped)
//! - pos (int32): 0-based leftmost position (-1 for unmapped)
//! - l_read_name (uint8): Length of read name (includes null terminator)
//! - mapq (uint8): Mapping quality (255 = unavailable)
//! - bin (uint16): BAI index bin (unused here)
//! - n_cigar_op (uint16): Number of CIGAR operations
//! - flag (uint16): Bitwise FLAGS
//! - l_seq (int32): Sequence length
//! - next_refID (int32): Reference ID of mate/next read
//! - next_pos (int32): Position of mate/next read
//! - tlen (int32): Template length
//! - read_name (char[l_read_name]): Null-terminated read name
//! - cigar (uint32[n_cigar_op]): CIGAR operations
//! - seq (uint8[(l_seq+1)/2]): 4-bit encoded sequence
//! - qual (char[l_seq]): Phred quality scores (0xFF = not stored)
//! - tags: Optional tags (rest of the block)
//! ```
//!
//! The decoder always advances by `block_size`, so a record whose tag
//! region it cannot fully interpret never desynchronizes the next one.

use super::bytes::{read_i32_le, read_length, read_u16_le, read_u8, take};
use super::cigar::{parse_cigar, reference_length, to_cigar_string, CigarOp};
use super::sequence::decode_sequence;
use super::tags::{parse_tags, TagValue, Tags};
use crate::error::{BamCacheError, Result};
use std::fmt;
use std::sync::Arc;

/// Size of the fixed-length part of a record body.
const FIXED_FIELDS_SIZE: usize = 32;

/// SAM flag bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    /// Template has multiple segments
    pub const PAIRED: u16 = 0x1;
    /// Each segment properly aligned
    pub const PROPER_PAIR: u16 = 0x2;
    /// Segment unmapped
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment unmapped
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence reverse complemented
    pub const REVERSE: u16 = 0x10;
    /// Next segment reverse complemented
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in the template
    pub const FIRST_OF_PAIR: u16 = 0x40;
    /// Last segment in the template
    pub const SECOND_OF_PAIR: u16 = 0x80;
    /// Secondary alignment
    pub const SECONDARY: u16 = 0x100;
    /// Not passing quality controls
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment
    pub const SUPPLEMENTARY: u16 = 0x800;

    /// Wrap raw flag bits.
    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether every bit of `mask` is set.
    pub const fn contains(self, mask: u16) -> bool {
        self.0 & mask == mask
    }

    /// Template has multiple segments.
    pub fn is_paired(self) -> bool {
        self.contains(Self::PAIRED)
    }

    /// Each segment properly aligned.
    pub fn is_proper_pair(self) -> bool {
        self.contains(Self::PROPER_PAIR)
    }

    /// Segment unmapped.
    pub fn is_unmapped(self) -> bool {
        self.contains(Self::UNMAPPED)
    }

    /// Next segment unmapped.
    pub fn is_mate_unmapped(self) -> bool {
        self.contains(Self::MATE_UNMAPPED)
    }

    /// Sequence reverse complemented.
    pub fn is_reverse(self) -> bool {
        self.contains(Self::REVERSE)
    }

    /// Next segment reverse complemented.
    pub fn is_mate_reverse(self) -> bool {
        self.contains(Self::MATE_REVERSE)
    }

    /// First segment in the template.
    pub fn is_first_of_pair(self) -> bool {
        self.contains(Self::FIRST_OF_PAIR)
    }

    /// Last segment in the template.
    pub fn is_second_of_pair(self) -> bool {
        self.contains(Self::SECOND_OF_PAIR)
    }

    /// Secondary alignment.
    pub fn is_secondary(self) -> bool {
        self.contains(Self::SECONDARY)
    }

    /// Not passing quality controls.
    pub fn is_qc_fail(self) -> bool {
        self.contains(Self::QC_FAIL)
    }

    /// PCR or optical duplicate.
    pub fn is_duplicate(self) -> bool {
        self.contains(Self::DUPLICATE)
    }

    /// Supplementary alignment.
    pub fn is_supplementary(self) -> bool {
        self.contains(Self::SUPPLEMENTARY)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#06x})", self.0)
    }
}

/// Strand an alignment (or its mate) maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    /// Plus strand
    Forward,
    /// Minus strand (reverse complemented)
    Reverse,
}

impl Strand {
    fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }
}

/// Mate information of a paired record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mate {
    /// Mate reference ID, `None` when unavailable (-1)
    pub reference_id: Option<usize>,
    /// Mate chromosome name
    pub chr: Option<Arc<str>>,
    /// Mate 0-based position, -1 when unavailable
    pub position: i64,
    /// Mate strand
    pub strand: Strand,
}

/// One decoded BAM record.
///
/// `start` is the 0-based leftmost position and `end` the exclusive end on
/// the reference, `start + ` the reference length of the CIGAR. Records
/// without a reference (`reference_id == None`) keep the raw position and
/// `end == start`; they have no meaningful interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// Read name/query name
    pub name: String,
    /// Reference sequence ID (index into header references)
    pub reference_id: Option<usize>,
    /// Reference name resolved through the header
    pub chr: Option<Arc<str>>,
    /// 0-based leftmost mapping position (-1 if unavailable)
    pub start: i64,
    /// Exclusive end position derived from the CIGAR
    pub end: i64,
    /// Mapping quality, `None` if unavailable (255)
    pub mapq: Option<u8>,
    /// Bitwise FLAGS
    pub flags: Flags,
    /// CIGAR operations
    pub cigar: Vec<CigarOp>,
    /// Sequence bases (ASCII)
    pub sequence: Vec<u8>,
    /// Phred quality scores, empty when not stored
    pub quality: Vec<u8>,
    /// Optional tags
    pub tags: Tags,
    /// Mate information, present for paired records
    pub mate: Option<Mate>,
    /// Template length (TLEN)
    pub template_length: i32,
}

impl Alignment {
    /// Whether the record is unmapped (flag 0x4 or no reference).
    pub fn is_unmapped(&self) -> bool {
        self.flags.is_unmapped() || self.reference_id.is_none()
    }

    /// Whether the record has a reference and a position.
    ///
    /// Unmapped mates are usually placed at their partner's position.
    pub fn is_placed(&self) -> bool {
        self.reference_id.is_some() && self.start >= 0
    }

    /// Whether the record is mapped with a valid interval.
    pub fn is_mapped(&self) -> bool {
        self.is_placed() && !self.flags.is_unmapped()
    }

    /// Template has multiple segments.
    pub fn is_paired(&self) -> bool {
        self.flags.is_paired()
    }

    /// Whether the mate is present and mapped.
    pub fn is_mate_mapped(&self) -> bool {
        self.is_paired()
            && !self.flags.is_mate_unmapped()
            && self.mate.as_ref().is_some_and(|m| m.reference_id.is_some())
    }

    /// Strand the read maps to.
    pub fn strand(&self) -> Strand {
        Strand::from_reverse(self.flags.is_reverse())
    }

    /// Bases covered on the reference.
    pub fn reference_length(&self) -> i64 {
        self.end - self.start
    }

    /// Whether `[start, end)` overlaps the query range `[start, end)`.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start < end && self.end > start
    }

    /// CIGAR as a SAM string.
    pub fn cigar_string(&self) -> String {
        to_cigar_string(&self.cigar)
    }
}

/// Validate a reference ID against the header table.
///
/// -1 means "none"; any other negative value or an ID past the end of the
/// table is a structural error.
fn resolve_reference(
    ref_id: i32,
    chr_names: &[Arc<str>],
    offset: usize,
    field: &str,
) -> Result<Option<(usize, Arc<str>)>> {
    if ref_id == -1 {
        return Ok(None);
    }
    usize::try_from(ref_id)
        .ok()
        .and_then(|id| chr_names.get(id).map(|name| (id, Arc::clone(name))))
        .map(Some)
        .ok_or_else(|| {
            BamCacheError::malformed(
                offset,
                format!(
                    "{} reference ID {} outside header table of {}",
                    field,
                    ref_id,
                    chr_names.len()
                ),
            )
        })
}

/// Recover the real CIGAR of a long read.
///
/// BAM's 16-bit `n_cigar_op` caps the CIGAR at 65,535 operations. Longer
/// CIGARs are stored as a placeholder `<l_seq>S<n>N` with the real one in a
/// `CG:B,I` tag.
fn recover_long_cigar(
    cigar: Vec<CigarOp>,
    sequence_length: usize,
    tags: &Tags,
    offset: usize,
) -> Result<Vec<CigarOp>> {
    let is_placeholder = matches!(
        cigar.as_slice(),
        [CigarOp::SoftClip(len), CigarOp::RefSkip(_)] if *len as usize == sequence_length
    );
    if !is_placeholder {
        return Ok(cigar);
    }

    let packed = match tags.get(b"CG") {
        Some(TagValue::Array(array)) => match array.to_i64_vec() {
            Some(values) => values,
            None => return Ok(cigar),
        },
        _ => return Ok(cigar),
    };

    packed
        .into_iter()
        .map(|value| {
            CigarOp::from_packed(value as u32).ok_or_else(|| {
                BamCacheError::malformed(
                    offset,
                    format!("invalid CIGAR op code {} in CG tag", value & 0xF),
                )
            })
        })
        .collect()
}

/// Turn errors with body-relative offsets into record errors with
/// stream offsets.
fn rebase(base: usize) -> impl Fn(BamCacheError) -> BamCacheError {
    move |e| match e {
        BamCacheError::TruncatedInput {
            context,
            offset,
            needed,
            available,
        } => BamCacheError::malformed(
            base + offset,
            format!(
                "{} needs {} bytes, {} left in record",
                context, needed, available
            ),
        ),
        BamCacheError::MalformedRecord { offset, reason } => BamCacheError::MalformedRecord {
            offset: base + offset,
            reason,
        },
        other => other,
    }
}

fn parse_record_body(body: &[u8], chr_names: &[Arc<str>]) -> Result<Alignment> {
    if body.len() < FIXED_FIELDS_SIZE {
        return Err(BamCacheError::malformed(
            0,
            format!(
                "record too short: {} bytes (minimum {})",
                body.len(),
                FIXED_FIELDS_SIZE
            ),
        ));
    }

    let mut cursor = 0;

    let ref_id = read_i32_le(body, &mut cursor, "refID")?;
    let pos_offset = cursor;
    let pos = read_i32_le(body, &mut cursor, "pos")?;
    if pos < -1 {
        return Err(BamCacheError::malformed(
            pos_offset,
            format!("invalid position {}", pos),
        ));
    }

    let name_len_offset = cursor;
    let l_read_name = read_u8(body, &mut cursor, "l_read_name")? as usize;
    if l_read_name == 0 {
        return Err(BamCacheError::malformed(
            name_len_offset,
            "read name length must include the NUL terminator",
        ));
    }

    let mapq = read_u8(body, &mut cursor, "mapq")?;
    let _bin = read_u16_le(body, &mut cursor, "bin")?;
    let n_cigar_op = read_u16_le(body, &mut cursor, "n_cigar_op")? as usize;
    let flags = Flags::new(read_u16_le(body, &mut cursor, "flag")?);
    let l_seq = read_length(body, &mut cursor, "sequence length")?;
    let next_ref_id = read_i32_le(body, &mut cursor, "next refID")?;
    let next_pos = read_i32_le(body, &mut cursor, "next pos")?;
    let tlen = read_i32_le(body, &mut cursor, "tlen")?;

    let reference = resolve_reference(ref_id, chr_names, 0, "read")?;
    let mate_reference = resolve_reference(next_ref_id, chr_names, 20, "mate")?;

    let name_offset = cursor;
    let name = match take(body, &mut cursor, l_read_name, "read name")?.split_last() {
        Some((&0, name)) => String::from_utf8_lossy(name).into_owned(),
        _ => {
            return Err(BamCacheError::malformed(
                name_offset,
                "read name not null-terminated",
            ))
        }
    };

    let cigar_offset = cursor;
    let cigar_bytes = take(body, &mut cursor, n_cigar_op * 4, "CIGAR")?;
    let cigar = parse_cigar(cigar_bytes).map_err(|packed| {
        BamCacheError::malformed(
            cigar_offset,
            format!("invalid CIGAR op code {}", packed & 0xF),
        )
    })?;

    let seq_bytes = take(body, &mut cursor, l_seq.div_ceil(2), "sequence")?;
    let sequence = decode_sequence(seq_bytes, l_seq);

    let quality_bytes = take(body, &mut cursor, l_seq, "quality")?;
    let quality = match quality_bytes.first() {
        Some(&0xFF) | None => Vec::new(),
        Some(_) => quality_bytes.to_vec(),
    };

    let tags = parse_tags(&body[cursor..]);
    let cigar = recover_long_cigar(cigar, l_seq, &tags, cigar_offset)?;

    let start = i64::from(pos);
    let end = match reference {
        Some(_) => start + reference_length(&cigar) as i64,
        None => start,
    };

    let mate = flags.is_paired().then(|| Mate {
        reference_id: mate_reference.as_ref().map(|(id, _)| *id),
        chr: mate_reference.as_ref().map(|(_, name)| Arc::clone(name)),
        position: i64::from(next_pos),
        strand: Strand::from_reverse(flags.is_mate_reverse()),
    });

    let (reference_id, chr) = match reference {
        Some((id, name)) => (Some(id), Some(name)),
        None => (None, None),
    };

    Ok(Alignment {
        name,
        reference_id,
        chr,
        start,
        end,
        mapq: (mapq != 255).then_some(mapq),
        flags,
        cigar,
        sequence,
        quality,
        tags,
        mate,
        template_length: tlen,
    })
}

/// Parse one record body (everything after `block_size`).
///
/// `offset` is where the body starts in the decompressed stream and is
/// only used for error reporting.
///
/// # Errors
///
/// [`BamCacheError::MalformedRecord`] if a field runs past the body, a
/// length is negative, a reference ID is outside `chr_names`, a CIGAR op
/// code is above 8, or the read name isn't NUL-terminated.
pub fn parse_record(body: &[u8], offset: usize, chr_names: &[Arc<str>]) -> Result<Alignment> {
    parse_record_body(body, chr_names).map_err(rebase(offset))
}

/// Decode every record from `start_offset` to the end of `data`.
///
/// All-or-nothing: the first structural violation aborts the decode and no
/// alignments are returned.
///
/// # Errors
///
/// [`BamCacheError::MalformedRecord`] for a negative block size, a block
/// running past the buffer, trailing bytes too short for a block size, or
/// any error from [`parse_record`].
pub fn decode_records(
    data: &[u8],
    start_offset: usize,
    chr_names: &[Arc<str>],
) -> Result<Vec<Alignment>> {
    if start_offset > data.len() {
        return Err(BamCacheError::malformed(
            start_offset,
            format!("record data starts past end of buffer ({} bytes)", data.len()),
        ));
    }

    let mut alignments = Vec::new();
    let mut cursor = start_offset;

    while cursor < data.len() {
        let record_offset = cursor;
        let block_size = read_length(data, &mut cursor, "block size").map_err(rebase(0))?;
        let body = take(data, &mut cursor, block_size, "record body").map_err(rebase(0))?;
        alignments.push(parse_record(body, record_offset + 4, chr_names)?);
    }

    let unmapped = alignments.iter().filter(|a| a.is_unmapped()).count();
    tracing::debug!(
        records = alignments.len(),
        unmapped,
        bytes = data.len() - start_offset,
        "decoded BAM records"
    );

    Ok(alignments)
}
