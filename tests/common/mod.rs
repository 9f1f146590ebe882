#![allow(dead_code)]

use std::fs;
use std::path::Path;

use snvpair::genomics::{
    AlignedRead, CigarOp, CigarOpKind, ContigInfo, ReferenceContig, VecRecordSource,
    VecReferenceProvider,
};
use snvpair::{
    CallerConfig, Pipeline, PipelineError, PositionRecord, PositionRecordStore, RunOutput, SampleRole,
};

pub const READ_LEN: u32 = 30;
pub const QUALITY: u8 = 30;

/// `ACGT` repeated to `len` bases.
pub fn reference_bases(len: usize) -> Vec<u8> {
    b"ACGT".iter().cycle().take(len).copied().collect()
}

/// A contig together with its sequence.
#[derive(Clone)]
pub struct Contig {
    pub name: &'static str,
    pub bases: Vec<u8>,
}

impl Contig {
    pub fn new(name: &'static str, len: usize) -> Self {
        Self {
            name,
            bases: reference_bases(len),
        }
    }

    pub fn base(&self, position: u32) -> u8 {
        self.bases[position as usize - 1]
    }

    pub fn info(&self) -> ContigInfo {
        ContigInfo::new(self.name, self.bases.len() as u32)
    }

    pub fn reference(&self) -> ReferenceContig {
        ReferenceContig::new(self.name, &self.bases)
    }
}

/// Builds one sample's coordinate-sorted reads.
pub struct SampleBuilder {
    prefix: &'static str,
    reads: Vec<(usize, AlignedRead)>,
    contigs: Vec<&'static str>,
}

impl SampleBuilder {
    pub fn new(prefix: &'static str, contigs: &[Contig]) -> Self {
        Self {
            prefix,
            reads: Vec::new(),
            contigs: contigs.iter().map(|c| c.name).collect(),
        }
    }

    /// Add a `READ_LEN` match read copied from the reference, with optional
    /// substitutions at 1-based reference positions.
    pub fn read(mut self, contig: &Contig, start: u32, reverse: bool, substitutions: &[(u32, u8)]) -> Self {
        let first = start as usize - 1;
        let last = (first + READ_LEN as usize).min(contig.bases.len() + READ_LEN as usize);
        let mut sequence: Vec<u8> = (first..last)
            .map(|idx| contig.bases.get(idx).copied().unwrap_or(b'A'))
            .collect();
        for &(position, base) in substitutions {
            if let Some(slot) = (position as usize).checked_sub(start as usize).and_then(|o| sequence.get_mut(o)) {
                *slot = base;
            }
        }
        let name = format!("{}-{}", self.prefix, self.reads.len());
        let ordinal = self
            .contigs
            .iter()
            .position(|name| *name == contig.name)
            .expect("contig registered");
        let len = sequence.len();
        let read = AlignedRead::new(
            name,
            contig.name,
            start,
            vec![CigarOp::new(CigarOpKind::Match, len as u32)],
            sequence,
            vec![QUALITY; len],
            reverse,
        );
        self.reads.push((ordinal, read));
        self
    }

    /// `depth` reads over `position` with distinct starts and alternating
    /// strands, the first `alt_count` carrying `alt`. The position always
    /// sits in the middle of the read.
    pub fn pileup(mut self, contig: &Contig, position: u32, depth: u32, alt: Option<(u8, u32)>) -> Self {
        let (alt_base, alt_count) = alt.unwrap_or((b'N', 0));
        for i in 0..depth {
            let start = position - 5 - (i % 15);
            let substitutions: &[(u32, u8)] = if i < alt_count { &[(position, alt_base)] } else { &[] };
            self = self.read(contig, start, i % 2 == 1, substitutions);
        }
        self
    }

    pub fn build(self, contigs: &[Contig]) -> VecRecordSource {
        let mut reads = self.reads;
        reads.sort_by_key(|(ordinal, read)| (*ordinal, read.pos));
        VecRecordSource::new(
            contigs.iter().map(Contig::info).collect(),
            reads.into_iter().map(|(_, read)| read).collect(),
        )
    }
}

pub fn reference(contigs: &[Contig]) -> VecReferenceProvider {
    VecReferenceProvider::new(contigs.iter().map(Contig::reference).collect())
}

pub fn run(
    config: CallerConfig,
    contigs: &[Contig],
    control: SampleBuilder,
    test: SampleBuilder,
) -> Result<RunOutput, PipelineError> {
    Pipeline::new(config).run(control.build(contigs), test.build(contigs), reference(contigs))
}

/// Output columns compared by [`assert_records_snapshot`]; the p-value is left out.
pub const FIELDS: [&str; 12] = [
    "contig", "position", "id", "ref", "alt", "control_gt", "test_gt", "class", "filter",
    "control", "test", "flanking",
];

/// A record's columns in [`FIELDS`] order.
pub fn fields(record: &PositionRecord) -> Vec<String> {
    let summary = |role| record.summary(role).map_or_else(|| ".".to_string(), |s| s.to_string());
    vec![
        record.contig.to_string(),
        record.position().to_string(),
        record.id.clone().unwrap_or_else(|| ".".to_string()),
        record.reference.to_string(),
        record.alt_display(),
        record.genotype_indices(SampleRole::Control),
        record.genotype_indices(SampleRole::Test),
        record.classification().map_or_else(|| ".".to_string(), |c| c.to_string()),
        record.filter(),
        summary(SampleRole::Control),
        summary(SampleRole::Test),
        record.flanking.clone().unwrap_or_else(|| ".".to_string()),
    ]
}

/// One tab-separated line per record.
pub fn render(record: &PositionRecord) -> String {
    fields(record).join("\t") + "\n"
}

/// Compare `records` with `tests/snapshots/<name>` column by column.
///
/// `SNVPAIR_UPDATE_SNAPSHOTS` rewrites the file from `records` instead.
pub fn assert_records_snapshot(name: &str, records: &PositionRecordStore) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("snapshots").join(name);
    let actual: Vec<Vec<String>> = records.iter().map(fields).collect();
    if std::env::var_os("SNVPAIR_UPDATE_SNAPSHOTS").is_some() {
        let text: String = records.iter().map(render).collect();
        fs::write(&path, text).expect("write snapshot");
        return;
    }

    let text = fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing snapshot {}", path.display()));
    let expected: Vec<Vec<String>> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect();
    assert_eq!(expected.len(), actual.len(), "{name}: record count");
    for (n, (want, got)) in expected.iter().zip(&actual).enumerate() {
        assert_eq!(want.len(), FIELDS.len(), "{name}: record {n} column count");
        for ((field, want), got) in FIELDS.iter().zip(want).zip(got) {
            assert_eq!(want, got, "{name}: record {n} `{field}`");
        }
    }
}
