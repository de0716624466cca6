//! Integration tests for corrupt and truncated BAM files.
//!
//! Every structural problem must reject the whole file: no session is
//! created and so no alignment of a corrupt file can be queried.

mod common;

use bamcache::io::compression::{compress_bgzf, decompress_bgzf, BGZF_EOF};
use bamcache::{BamCacheError, BamSession, ReaderConfig};
use common::{bam_file, header_bytes, raw_bam, scenario_file, RecordSpec};

fn load(raw: &[u8]) -> Result<BamSession, BamCacheError> {
    let compressed = compress_bgzf(raw).expect("compress fixture");
    BamSession::from_bytes(&compressed, ReaderConfig::default())
}

#[test]
fn test_block_size_past_buffer() {
    let mut raw = raw_bam(
        &[("chr1", 10_000), ("chr2", 10_000)],
        &[RecordSpec::mapped("r100", 0, 100, 50)],
    );
    let mut last = RecordSpec::mapped("r150", 0, 150, 50).framed();
    let declared = last.len() as i32 + 100;
    last[..4].copy_from_slice(&declared.to_le_bytes());
    raw.extend_from_slice(&last);

    let err = load(&raw).unwrap_err();
    assert!(matches!(err, BamCacheError::MalformedRecord { .. }), "{:?}", err);
}

#[test]
fn test_wrong_magic() {
    let mut raw = header_bytes(&[("chr1", 10_000)]);
    raw[3] = 2;
    let err = load(&raw).unwrap_err();
    assert!(matches!(
        err,
        BamCacheError::InvalidMagic { actual } if &actual == b"BAM\x02"
    ));
}

#[test]
fn test_truncated_header() {
    let raw = header_bytes(&[("chr1", 10_000), ("chr2", 10_000)]);
    let err = load(&raw[..raw.len() - 6]).unwrap_err();
    assert!(matches!(err, BamCacheError::TruncatedInput { .. }), "{:?}", err);
}

#[test]
fn test_reference_id_outside_table() {
    let raw = raw_bam(&[("chr1", 10_000)], &[RecordSpec::mapped("r", 3, 100, 50)]);
    assert!(matches!(
        load(&raw),
        Err(BamCacheError::MalformedRecord { .. })
    ));
}

#[test]
fn test_invalid_cigar_op_code() {
    let record = RecordSpec {
        cigar: vec![(50, 9)],
        ..RecordSpec::mapped("r", 0, 100, 50)
    };
    let raw = raw_bam(&[("chr1", 10_000)], &[record]);
    assert!(matches!(
        load(&raw),
        Err(BamCacheError::MalformedRecord { .. })
    ));
}

#[test]
fn test_unknown_tag_type_tolerated() {
    let file = bam_file(
        &[("chr1", 10_000)],
        &[
            RecordSpec::mapped("odd", 0, 100, 50).with_tags(b"XXQ\x00\x01\x02"),
            RecordSpec::mapped("next", 0, 200, 50),
        ],
    );
    let session = BamSession::from_bytes(&file, ReaderConfig::default()).expect("loads");
    let container = session.query("chr1", 0, 1_000).expect("query");
    let alignments = container.alignments().expect("finished");
    assert_eq!(alignments.len(), 2);
    assert!(!alignments[0].tags.is_complete());
    assert_eq!(alignments[1].name, "next");
}

#[test]
fn test_corrupted_block_payload() {
    let mut file = scenario_file();
    // Flip a byte inside the first block's deflate payload.
    file[30] ^= 0xFF;
    let err = BamSession::from_bytes(&file, ReaderConfig::default()).unwrap_err();
    assert!(matches!(err, BamCacheError::CorruptBlock { .. }), "{:?}", err);
}

#[test]
fn test_truncated_block() {
    let file = scenario_file();
    let cut = file.len() - BGZF_EOF.len() - 10;
    let err = BamSession::from_bytes(&file[..cut], ReaderConfig::default()).unwrap_err();
    assert!(matches!(err, BamCacheError::TruncatedInput { .. }), "{:?}", err);
}

#[test]
fn test_plain_gzip_rejected() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&header_bytes(&[("chr1", 10_000)]))
        .expect("write");
    let gzip = encoder.finish().expect("finish");

    let err = BamSession::from_bytes(&gzip, ReaderConfig::default()).unwrap_err();
    assert!(matches!(err, BamCacheError::CorruptBlock { .. }), "{:?}", err);
}

#[test]
fn test_empty_input() {
    let err = BamSession::from_bytes(&[], ReaderConfig::default()).unwrap_err();
    assert!(err.is_data_error());
}

#[test]
fn test_fixture_round_trip() {
    let raw = raw_bam(&[("chr1", 10_000)], &[RecordSpec::mapped("r", 0, 1, 10)]);
    let compressed = compress_bgzf(&raw).expect("compress");
    assert_eq!(decompress_bgzf(&compressed).expect("decompress"), raw);
}
