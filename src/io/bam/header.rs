//! BAM header parsing.
//!
//! The BAM header consists of:
//! 1. Magic bytes ("BAM\1")
//! 2. SAM header text
//! 3. Reference sequence dictionary
//!
//! # Format
//!
//! ```text
//! BAM Header:
//! - 4 bytes: Magic ("BAM\1")
//! - 4 bytes: SAM header text length (l_text, int32)
//! - l_text bytes: SAM header text
//! - 4 bytes: Number of reference sequences (n_ref, int32)
//! - For each reference:
//!   - 4 bytes: Reference name length (l_name, int32, includes null terminator)
//!   - l_name bytes: Reference name (null-terminated)
//!   - 4 bytes: Reference length (int32)
//! ```
//!
//! # Chromosome aliases
//!
//! Files disagree on whether chromosome names carry a `chr` prefix. The
//! header registers, for every reference, the literal name plus the
//! prefixed or stripped spelling (and `chrM`/`MT`), so queries can use
//! either convention.

use super::bytes::{read_i32_le, read_length, take};
use crate::error::{BamCacheError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// BAM magic bytes.
const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// Reference sequence information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Reference sequence name (e.g., "chr1", "chrM")
    pub name: Arc<str>,
    /// Reference sequence length in bases
    pub length: u32,
}

impl Reference {
    /// Create a new reference.
    pub fn new(name: impl Into<Arc<str>>, length: u32) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// BAM file header.
///
/// Immutable once decoded; owned by the session that decoded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// SAM header text (kept verbatim, not interpreted)
    pub text: String,
    /// Reference sequences, indexed by reference ID
    pub references: Vec<Reference>,
    /// Offset in the decompressed stream where record data begins
    pub header_byte_size: usize,
    alias_table: HashMap<String, Arc<str>>,
}

impl Header {
    /// Create a header and derive its alias table.
    pub fn new(text: String, references: Vec<Reference>, header_byte_size: usize) -> Self {
        let alias_table = build_alias_table(&references);
        Self {
            text,
            references,
            header_byte_size,
            alias_table,
        }
    }

    /// Get reference by ID.
    pub fn reference(&self, id: usize) -> Option<&Reference> {
        self.references.get(id)
    }

    /// Get reference name by ID.
    pub fn reference_name(&self, id: usize) -> Option<&str> {
        self.reference(id).map(|r| r.name.as_ref())
    }

    /// Get number of reference sequences.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Reference names in declaration order, shared with decoded alignments.
    pub fn chr_names(&self) -> Vec<Arc<str>> {
        self.references.iter().map(|r| Arc::clone(&r.name)).collect()
    }

    /// Canonical reference name for `chr`, if the header knows it under
    /// any spelling.
    pub fn canonical_name(&self, chr: &str) -> Option<&Arc<str>> {
        self.alias_table.get(chr)
    }

    /// Resolve `chr` through the alias table, passing unknown names through.
    pub fn resolve<'a>(&'a self, chr: &'a str) -> &'a str {
        self.canonical_name(chr).map_or(chr, |name| name.as_ref())
    }

    /// Reference ID for `chr` under any known spelling.
    pub fn reference_id(&self, chr: &str) -> Option<usize> {
        let name = self.canonical_name(chr)?;
        self.references.iter().position(|r| &r.name == name)
    }

    /// The full alias table (alternate spelling -> canonical name).
    pub fn alias_table(&self) -> &HashMap<String, Arc<str>> {
        &self.alias_table
    }
}

/// Alternate spellings registered for a reference name.
fn alternate_names(name: &str) -> Vec<String> {
    let mut names = Vec::with_capacity(2);

    match name.strip_prefix("chr") {
        Some(rest) if !rest.is_empty() => names.push(rest.to_string()),
        _ => names.push(format!("chr{}", name)),
    }

    match name {
        "chrM" => names.push("MT".to_string()),
        "MT" => names.push("chrM".to_string()),
        _ => {}
    }

    names
}

/// Build the alias table. Literal names are registered first so that an
/// alternate spelling never shadows a reference that really exists.
fn build_alias_table(references: &[Reference]) -> HashMap<String, Arc<str>> {
    let mut table = HashMap::with_capacity(references.len() * 3);

    for reference in references {
        table.insert(reference.name.to_string(), Arc::clone(&reference.name));
    }

    for reference in references {
        for alias in alternate_names(&reference.name) {
            table
                .entry(alias)
                .or_insert_with(|| Arc::clone(&reference.name));
        }
    }

    table
}

/// Validate the BAM magic bytes at `cursor`.
pub fn read_magic(data: &[u8], cursor: &mut usize) -> Result<()> {
    let magic = take(data, cursor, 4, "BAM magic")?;
    if magic != BAM_MAGIC {
        return Err(BamCacheError::InvalidMagic {
            actual: [magic[0], magic[1], magic[2], magic[3]],
        });
    }
    Ok(())
}

/// Read the length-prefixed SAM header text.
///
/// The text is not interpreted; invalid UTF-8 is replaced rather than
/// rejected.
pub fn read_header_text(data: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_length(data, cursor, "SAM header text length")?;
    let text = take(data, cursor, len, "SAM header text")?;

    // Some writers NUL-pad the text block.
    let text = match text.iter().position(|&b| b == 0) {
        Some(nul) => &text[..nul],
        None => text,
    };

    Ok(String::from_utf8_lossy(text).into_owned())
}

/// Read a single reference sequence.
///
/// Reference format:
/// - 4 bytes: name length (including null terminator)
/// - N bytes: name (null-terminated)
/// - 4 bytes: sequence length
pub fn read_reference(data: &[u8], cursor: &mut usize) -> Result<Reference> {
    let offset = *cursor;
    let name_len = read_length(data, cursor, "reference name length")?;
    if name_len == 0 {
        return Err(BamCacheError::malformed(
            offset,
            "reference name length must include the NUL terminator",
        ));
    }

    let name_bytes = take(data, cursor, name_len, "reference name")?;
    let name_bytes = match name_bytes.split_last() {
        Some((&0, name)) => name,
        _ => {
            return Err(BamCacheError::malformed(
                offset,
                "reference name not null-terminated",
            ))
        }
    };
    let name = std::str::from_utf8(name_bytes).map_err(|e| {
        BamCacheError::malformed(offset, format!("invalid UTF-8 in reference name: {}", e))
    })?;

    let length_offset = *cursor;
    let length = read_i32_le(data, cursor, "reference length")?;
    let length = u32::try_from(length).map_err(|_| {
        BamCacheError::malformed(length_offset, format!("negative reference length: {}", length))
    })?;

    Ok(Reference::new(name, length))
}

/// Read the reference count followed by that many references.
pub fn read_references(data: &[u8], cursor: &mut usize) -> Result<Vec<Reference>> {
    let count = read_length(data, cursor, "reference count")?;

    // Each reference needs at least 9 bytes; don't trust `count` for the
    // allocation when the buffer can't possibly hold it.
    let mut references = Vec::with_capacity(count.min(data.len() / 9));
    for _ in 0..count {
        references.push(read_reference(data, cursor)?);
    }

    Ok(references)
}

/// Decode the BAM header at the start of a decompressed stream.
///
/// Returns the header and the number of bytes it occupies, which is where
/// record data begins.
///
/// # Errors
///
/// - [`BamCacheError::InvalidMagic`] if the stream doesn't start with `BAM\1`
/// - [`BamCacheError::TruncatedInput`] if a declared length runs past the buffer
/// - [`BamCacheError::MalformedRecord`] for negative lengths or unterminated names
///
/// # Example
///
/// ```
/// use bamcache::io::bam::decode_header;
///
/// let mut data = b"BAM\x01".to_vec();
/// data.extend_from_slice(&0i32.to_le_bytes()); // l_text
/// data.extend_from_slice(&1i32.to_le_bytes()); // n_ref
/// data.extend_from_slice(&5i32.to_le_bytes());
/// data.extend_from_slice(b"chr1\0");
/// data.extend_from_slice(&1000i32.to_le_bytes());
///
/// let (header, consumed) = decode_header(&data).unwrap();
/// assert_eq!(consumed, data.len());
/// assert_eq!(header.resolve("1"), "chr1");
/// ```
pub fn decode_header(data: &[u8]) -> Result<(Header, usize)> {
    let mut cursor = 0;
    read_magic(data, &mut cursor)?;
    let text = read_header_text(data, &mut cursor)?;
    let references = read_references(data, &mut cursor)?;
    Ok((Header::new(text, references, cursor), cursor))
}
