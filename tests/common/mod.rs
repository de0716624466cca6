//! Builds BAM files in memory for integration tests.

#![allow(dead_code)]

use bamcache::io::compression::compress_bgzf;

/// One record to encode.
#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub name: String,
    pub ref_id: i32,
    pub pos: i32,
    pub mapq: u8,
    pub flag: u16,
    /// (length, op code) pairs
    pub cigar: Vec<(u32, u32)>,
    pub seq: String,
    pub next_ref_id: i32,
    pub next_pos: i32,
    pub tags: Vec<u8>,
}

impl RecordSpec {
    /// A mapped single-end record with an all-match CIGAR.
    pub fn mapped(name: &str, ref_id: i32, pos: i32, len: u32) -> Self {
        Self {
            name: name.to_string(),
            ref_id,
            pos,
            mapq: 60,
            flag: 0,
            cigar: vec![(len, 0)],
            seq: "ACGT".repeat(len as usize / 4 + 1)[..len as usize].to_string(),
            next_ref_id: -1,
            next_pos: -1,
            tags: Vec::new(),
        }
    }

    pub fn unmapped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ref_id: -1,
            pos: -1,
            mapq: 0,
            flag: 0x4,
            cigar: Vec::new(),
            seq: "ACGT".to_string(),
            next_ref_id: -1,
            next_pos: -1,
            tags: Vec::new(),
        }
    }

    pub fn with_flag(mut self, flag: u16) -> Self {
        self.flag = flag;
        self
    }

    pub fn with_mate(mut self, ref_id: i32, pos: i32) -> Self {
        self.next_ref_id = ref_id;
        self.next_pos = pos;
        self
    }

    pub fn with_tags(mut self, tags: &[u8]) -> Self {
        self.tags = tags.to_vec();
        self
    }

    /// Record body, without the block size.
    pub fn body(&self) -> Vec<u8> {
        let l_seq = self.seq.len();
        let mut data = Vec::new();
        data.extend_from_slice(&self.ref_id.to_le_bytes());
        data.extend_from_slice(&self.pos.to_le_bytes());
        data.push(self.name.len() as u8 + 1);
        data.push(self.mapq);
        data.extend_from_slice(&0u16.to_le_bytes()); // bin
        data.extend_from_slice(&(self.cigar.len() as u16).to_le_bytes());
        data.extend_from_slice(&self.flag.to_le_bytes());
        data.extend_from_slice(&(l_seq as i32).to_le_bytes());
        data.extend_from_slice(&self.next_ref_id.to_le_bytes());
        data.extend_from_slice(&self.next_pos.to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes()); // tlen
        data.extend_from_slice(self.name.as_bytes());
        data.push(0);
        for &(len, op) in &self.cigar {
            data.extend_from_slice(&((len << 4) | op).to_le_bytes());
        }
        data.extend_from_slice(&encode_sequence(self.seq.as_bytes()));
        data.extend(std::iter::repeat(30u8).take(l_seq));
        data.extend_from_slice(&self.tags);
        data
    }

    /// Record with its block size prefix.
    pub fn framed(&self) -> Vec<u8> {
        let body = self.body();
        let mut data = (body.len() as i32).to_le_bytes().to_vec();
        data.extend_from_slice(&body);
        data
    }
}

fn encode_sequence(bases: &[u8]) -> Vec<u8> {
    const SYMBOLS: &[u8; 16] = b"=ACMGRSVTWYHKDBN";
    let nibble = |b: u8| SYMBOLS.iter().position(|&s| s == b).unwrap_or(15) as u8;
    bases
        .chunks(2)
        .map(|pair| {
            let high = nibble(pair[0]);
            let low = pair.get(1).map_or(0, |&b| nibble(b));
            (high << 4) | low
        })
        .collect()
}

/// Uncompressed BAM header for `references`.
pub fn header_bytes(references: &[(&str, u32)]) -> Vec<u8> {
    let text = b"@HD\tVN:1.6\tSO:unsorted\n";
    let mut data = b"BAM\x01".to_vec();
    data.extend_from_slice(&(text.len() as i32).to_le_bytes());
    data.extend_from_slice(text);
    data.extend_from_slice(&(references.len() as i32).to_le_bytes());
    for (name, length) in references {
        data.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&length.to_le_bytes());
    }
    data
}

/// Uncompressed BAM stream: header followed by records.
pub fn raw_bam(references: &[(&str, u32)], records: &[RecordSpec]) -> Vec<u8> {
    let mut data = header_bytes(references);
    for record in records {
        data.extend_from_slice(&record.framed());
    }
    data
}

/// Complete BGZF-compressed BAM file.
pub fn bam_file(references: &[(&str, u32)], records: &[RecordSpec]) -> Vec<u8> {
    compress_bgzf(&raw_bam(references, records)).expect("compress fixture")
}

/// The two-chromosome file used across tests: three reads on chr1 at
/// 100, 150 and 500, each 50 bases long.
pub fn scenario_file() -> Vec<u8> {
    bam_file(
        &[("chr1", 10_000), ("chr2", 10_000)],
        &[
            RecordSpec::mapped("r100", 0, 100, 50),
            RecordSpec::mapped("r150", 0, 150, 50),
            RecordSpec::mapped("r500", 0, 500, 50),
        ],
    )
}
