//! 4-bit BAM sequence decoding.
//!
//! BAM stores sequences in 4-bit encoding (2 bases per byte), high nibble
//! first. Each nibble indexes the 16-symbol alphabet `=ACMGRSVTWYHKDBN`:
//! `=` (match to reference), the four bases, and IUPAC ambiguity codes.

/// BAM 4-bit to ASCII base lookup table.
const SEQ_LOOKUP: [u8; 16] = *b"=ACMGRSVTWYHKDBN";

/// Decode `length` bases from packed 4-bit data.
///
/// `data` must hold at least `ceil(length / 2)` bytes; the record decoder
/// checks that before calling. The trailing low nibble of an odd-length
/// sequence is ignored.
///
/// # Example
///
/// ```
/// use bamcache::io::bam::decode_sequence;
///
/// // Byte 0x12 encodes bases at indices 1 ('A') and 2 ('C')
/// assert_eq!(decode_sequence(&[0x12], 2), b"AC");
/// ```
pub fn decode_sequence(data: &[u8], length: usize) -> Vec<u8> {
    data.iter()
        .flat_map(|&byte| {
            [
                SEQ_LOOKUP[(byte >> 4) as usize],
                SEQ_LOOKUP[(byte & 0x0F) as usize],
            ]
        })
        .take(length)
        .collect()
}
