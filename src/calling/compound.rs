//! Merging of adjacent records into multi-base records.
//!
//! Records on consecutive positions that share a classification are
//! re-examined read by read. Every read spells one combined allele across
//! the run, with `_` where it does not cover a position, and the complete
//! alleles are genotyped with the same coverage rules as single positions.
//! A run becomes one [`CompoundRecord`] when either sample carries a
//! combined allele that differs from the reference at every base; its
//! constituent records then leave the store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serialize")]
use serde::Serialize;
use tracing::{debug, info};

use crate::calling::record::join_filter;
use crate::calling::{Classification, FilterCode, PositionRecordStore, RecordError};
use crate::genomics::{GenomicPosition, ReadBase, RuleTable, SampleRole, Strand};

/// Placeholder for a position a read does not cover.
const MISSING: char = '_';

/// Per-read bases of both samples at record positions.
#[derive(Debug, Clone, Default)]
pub struct ReadEvidence {
    columns: BTreeMap<GenomicPosition, [Vec<ReadBase>; 2]>,
}

impl ReadEvidence {
    /// Empty evidence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the reads seen at `key`, control then test.
    pub fn insert(&mut self, key: GenomicPosition, control: Vec<ReadBase>, test: Vec<ReadBase>) {
        self.columns.insert(key, [control, test]);
    }

    /// Reads at `key` for one sample.
    pub fn column(&self, key: &GenomicPosition, role: SampleRole) -> Option<&[ReadBase]> {
        self.columns.get(key).map(|both| both[role.index()].as_slice())
    }

    /// Drop the columns of contig `ordinal` with no neighbour on either side.
    pub fn retain_adjacent(&mut self, ordinal: u32) {
        let positions: BTreeSet<u32> = self
            .columns
            .range(GenomicPosition::new(ordinal, 0)..=GenomicPosition::new(ordinal, u32::MAX))
            .map(|(key, _)| key.position)
            .collect();
        self.columns.retain(|key, _| {
            key.ordinal != ordinal
                || positions.contains(&key.position.wrapping_sub(1))
                || positions.contains(&key.position.wrapping_add(1))
        });
    }

    /// Positions held.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether no position is held.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Reads carrying one combined allele.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct AlleleTally {
    /// Forward strand reads.
    pub forward: u32,
    /// Reverse strand reads.
    pub reverse: u32,
    /// Distinct (fragment start, strand) pairs.
    pub novel_starts: u32,
}

impl AlleleTally {
    /// Reads on both strands.
    pub fn count(&self) -> u32 {
        self.forward + self.reverse
    }

    /// Seen at least once on each strand.
    pub fn on_both_strands(&self) -> bool {
        self.forward > 0 && self.reverse > 0
    }
}

/// Combined alleles of one sample across a run of positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct CompoundEvidence {
    alleles: BTreeMap<String, AlleleTally>,
}

impl CompoundEvidence {
    /// Spell each read's allele across `columns`, one column per position.
    ///
    /// A read keeps the strand and fragment start of the first position it covers.
    pub fn from_columns<'a>(columns: impl IntoIterator<Item = &'a [ReadBase]>) -> Self {
        let mut reads: HashMap<u64, (String, Strand, u32)> = HashMap::new();
        let mut width = 0;
        for column in columns {
            for read in column {
                let (allele, _, _) = reads.entry(read.name_hash).or_insert_with(|| {
                    (MISSING.to_string().repeat(width), read.strand, read.fragment_start)
                });
                if allele.len() == width {
                    allele.push(read.base.as_char());
                }
            }
            width += 1;
            for (allele, _, _) in reads.values_mut() {
                if allele.len() < width {
                    allele.push(MISSING);
                }
            }
        }

        let mut tallies: BTreeMap<String, (AlleleTally, BTreeSet<(u32, bool)>)> = BTreeMap::new();
        for (allele, strand, start) in reads.into_values() {
            let (tally, starts) = tallies.entry(allele).or_default();
            match strand {
                Strand::Forward => tally.forward += 1,
                Strand::Reverse => tally.reverse += 1,
            }
            starts.insert((start, strand == Strand::Forward));
        }
        let alleles = tallies
            .into_iter()
            .map(|(allele, (mut tally, starts))| {
                tally.novel_starts = starts.len() as u32;
                (allele, tally)
            })
            .collect();
        Self { alleles }
    }

    /// Tally for one allele, partial alleles included.
    pub fn tally(&self, allele: &str) -> Option<&AlleleTally> {
        self.alleles.get(allele)
    }

    /// Alleles from reads covering every position of the run.
    pub fn complete(&self) -> impl Iterator<Item = (&str, &AlleleTally)> {
        self.alleles
            .iter()
            .filter(|(allele, _)| !allele.contains(MISSING))
            .map(|(allele, tally)| (allele.as_str(), tally))
    }

    /// Reads covering every position.
    pub fn coverage(&self) -> u32 {
        self.complete().map(|(_, tally)| tally.count()).sum()
    }

    /// Forward reads covering every position.
    pub fn forward_coverage(&self) -> u32 {
        self.complete().map(|(_, tally)| tally.forward).sum()
    }

    /// Reverse reads covering every position.
    pub fn reverse_coverage(&self) -> u32 {
        self.complete().map(|(_, tally)| tally.reverse).sum()
    }

    /// Whether a complete read spells `allele`.
    pub fn contains(&self, allele: &str) -> bool {
        self.complete().any(|(candidate, _)| candidate == allele)
    }

    /// Up to two complete alleles with at least `min_reads` reads, most
    /// supported first and two-strand support breaking ties. Only the
    /// reference and alleles differing from it at every base qualify.
    pub fn genotype_alleles(&self, min_reads: u32, reference: &str) -> Vec<String> {
        let mut candidates: Vec<(&str, &AlleleTally)> = self
            .complete()
            .filter(|(_, tally)| tally.count() >= min_reads)
            .filter(|(allele, _)| *allele == reference || differs_everywhere(allele, reference))
            .collect();
        candidates.sort_by(|(_, a), (_, b)| {
            b.count()
                .cmp(&a.count())
                .then(b.on_both_strands().cmp(&a.on_both_strands()))
        });
        candidates
            .into_iter()
            .take(2)
            .map(|(allele, _)| allele.to_string())
            .collect()
    }
}

/// Forward and reverse read counts per allele, e.g. `CG12[]10[];TA5[]4[]`.
impl fmt::Display for CompoundEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, (allele, tally)) in self.alleles.iter().enumerate() {
            if n > 0 {
                f.write_str(";")?;
            }
            write!(f, "{allele}{}[]{}[]", tally.forward, tally.reverse)?;
        }
        Ok(())
    }
}

fn differs_everywhere(allele: &str, reference: &str) -> bool {
    allele.len() == reference.len() && allele.bytes().zip(reference.bytes()).all(|(a, r)| a != r)
}

/// A run of adjacent positions reported as one multi-base variant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct CompoundRecord {
    /// Contig name.
    pub contig: Arc<str>,
    /// First position of the run.
    pub key: GenomicPosition,
    /// Assigned mutation id.
    pub id: Option<String>,
    /// Reference bases across the run.
    pub reference: String,
    /// Combined alternate alleles, control's first.
    pub alts: Vec<String>,
    /// Control allele indices into reference then alts, sorted.
    pub control_genotype: Option<[usize; 2]>,
    /// Test allele indices into reference then alts, sorted.
    pub test_genotype: Option<[usize; 2]>,
    /// Control combined alleles.
    pub control: CompoundEvidence,
    /// Test combined alleles.
    pub test: CompoundEvidence,
    classification: Option<Classification>,
    annotations: Vec<FilterCode>,
}

impl CompoundRecord {
    /// Genotype both samples over their combined alleles; `None` unless an
    /// allele differing from `reference` at every base is called.
    pub fn build(
        contig: Arc<str>,
        key: GenomicPosition,
        reference: String,
        evidence: [CompoundEvidence; 2],
        rules: [&RuleTable; 2],
    ) -> Option<Self> {
        let called: [Vec<String>; 2] = SampleRole::BOTH.map(|role| {
            let sample = &evidence[role.index()];
            let min_reads = rules[role.index()].min_variant_reads(sample.coverage());
            sample.genotype_alleles(min_reads, &reference)
        });

        let mut alts: Vec<String> = Vec::new();
        for allele in called.iter().flatten() {
            if *allele != reference && !alts.contains(allele) {
                alts.push(allele.clone());
            }
        }
        if alts.is_empty() {
            return None;
        }

        let index = |allele: &String| alts.iter().position(|alt| alt == allele).map_or(0, |i| i + 1);
        let [control_genotype, test_genotype] = called.map(|alleles| match alleles.as_slice() {
            [] => None,
            [only] => Some([index(only); 2]),
            [first, second, ..] => {
                let mut genotype = [index(first), index(second)];
                genotype.sort_unstable();
                Some(genotype)
            }
        });
        let [control, test] = evidence;
        let classification = classify_compound(control_genotype, test_genotype, &alts, &control);
        Some(Self {
            contig,
            key,
            id: None,
            reference,
            alts,
            control_genotype,
            test_genotype,
            control,
            test,
            classification,
            annotations: Vec::new(),
        })
    }

    /// First position.
    pub fn position(&self) -> u32 {
        self.key.position
    }

    /// Last position.
    pub fn end(&self) -> u32 {
        self.key.position + self.reference.len().saturating_sub(1) as u32
    }

    /// Allele indices for one sample.
    pub fn genotype(&self, role: SampleRole) -> Option<[usize; 2]> {
        match role {
            SampleRole::Control => self.control_genotype,
            SampleRole::Test => self.test_genotype,
        }
    }

    /// Combined alleles for one sample.
    pub fn evidence(&self, role: SampleRole) -> &CompoundEvidence {
        match role {
            SampleRole::Control => &self.control,
            SampleRole::Test => &self.test,
        }
    }

    /// Alternate alleles in one sample's genotype.
    pub fn genotype_alts(&self, role: SampleRole) -> Vec<&str> {
        let mut alts: Vec<&str> = Vec::new();
        for index in self.genotype(role).into_iter().flatten() {
            if let Some(alt) = index.checked_sub(1).and_then(|i| self.alts.get(i)) {
                if !alts.contains(&alt.as_str()) {
                    alts.push(alt);
                }
            }
        }
        alts
    }

    /// Classification decided from the combined genotypes.
    pub fn classification(&self) -> Option<Classification> {
        self.classification
    }

    /// Append a filter code; repeated codes are recorded once.
    pub fn annotate(&mut self, code: FilterCode) {
        if !self.annotations.contains(&code) {
            self.annotations.push(code);
        }
    }

    /// Appended filter codes in order.
    pub fn annotations(&self) -> &[FilterCode] {
        &self.annotations
    }

    /// Whether a code with the same tag is present.
    pub fn has_annotation(&self, tag: &str) -> bool {
        self.annotations.iter().any(|code| code.tag() == tag)
    }

    /// No filter code was appended.
    pub fn passes(&self) -> bool {
        self.annotations.is_empty()
    }

    /// `PASS` or the `;`-joined filter codes.
    pub fn filter(&self) -> String {
        join_filter(&self.annotations)
    }

    /// Comma-joined alternate alleles.
    pub fn alt_display(&self) -> String {
        self.alts.join(",")
    }

    /// `a/b` allele indices for one sample, `./.` when uncalled.
    pub fn genotype_indices(&self, role: SampleRole) -> String {
        self.genotype(role)
            .map_or_else(|| "./.".to_string(), |[a, b]| format!("{a}/{b}"))
    }
}

fn classify_compound(
    control: Option<[usize; 2]>,
    test: Option<[usize; 2]>,
    alts: &[String],
    control_evidence: &CompoundEvidence,
) -> Option<Classification> {
    let germline_if = |germline: bool| {
        Some(if germline {
            Classification::Germline
        } else {
            Classification::Somatic
        })
    };
    match (control, test) {
        (Some(control), Some(test)) => {
            if control == test {
                return (control != [0, 0]).then_some(Classification::Germline);
            }
            let control_hom = control[0] == control[1];
            let test_hom = test[0] == test[1];
            if control_hom == test_hom {
                return Some(Classification::Somatic);
            }
            if control_hom {
                germline_if(control[0] != 0 && test == [0, control[0]])
            } else {
                germline_if(control.contains(&test[0]))
            }
        }
        (Some(control), None) => (control != [0, 0]).then_some(Classification::Germline),
        (None, Some(test)) => {
            if test == [0, 0] || control_evidence.coverage() == 0 {
                return None;
            }
            let all_seen = test
                .iter()
                .filter_map(|&index| index.checked_sub(1).and_then(|i| alts.get(i)))
                .all(|alt| control_evidence.contains(alt));
            germline_if(all_seen)
        }
        (None, None) => None,
    }
}

/// Replace each run of adjacent, equally classified records in `store`
/// with a compound record when one can be built. Returns the number of
/// compound records added.
pub fn merge_compounds(
    store: &mut PositionRecordStore,
    evidence: &ReadEvidence,
    rules: [&RuleTable; 2],
) -> Result<usize, RecordError> {
    let mut runs: Vec<Vec<GenomicPosition>> = Vec::new();
    let mut run: Vec<GenomicPosition> = Vec::new();
    let mut previous: Option<(GenomicPosition, Option<Classification>)> = None;
    for record in store.iter() {
        let joins = previous.is_some_and(|(key, classification)| {
            key.ordinal == record.key.ordinal
                && key.position + 1 == record.key.position
                && classification == record.classification()
        });
        if !joins && run.len() > 1 {
            runs.push(std::mem::take(&mut run));
        } else if !joins {
            run.clear();
        }
        run.push(record.key);
        previous = Some((record.key, record.classification()));
    }
    if run.len() > 1 {
        runs.push(run);
    }

    let mut merged = 0;
    for run in runs {
        let covered = run.iter().all(|key| evidence.column(key, SampleRole::Control).is_some());
        if !covered {
            debug!(start = run[0].position, length = run.len(), "adjacent run lacks evidence in a sample");
            continue;
        }
        let Some(first) = store.get(&run[0]) else {
            continue;
        };
        let contig = Arc::clone(&first.contig);
        let reference: String = run
            .iter()
            .filter_map(|key| store.get(key))
            .map(|record| record.reference.as_char())
            .collect();
        let samples = SampleRole::BOTH.map(|role| {
            CompoundEvidence::from_columns(run.iter().filter_map(|key| evidence.column(key, role)))
        });
        let Some(compound) = CompoundRecord::build(contig, run[0], reference, samples, rules) else {
            continue;
        };
        for key in &run {
            store.remove(key);
        }
        store.insert_compound(compound)?;
        merged += 1;
    }
    if merged > 0 {
        info!(compounds = merged, "merged adjacent records");
    }
    Ok(merged)
}
