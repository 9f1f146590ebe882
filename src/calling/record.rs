use std::collections::btree_map::{self, BTreeMap};
use std::sync::Arc;

#[cfg(feature = "serialize")]
use serde::Serialize;
use thiserror::Error;

use crate::calling::{Classification, CompoundRecord, FilterCode};
use crate::genomics::{Base, Genotype, GenomicPosition, NucleotideSummary, SampleRole};

/// Sentinel reported when no filter code was appended.
pub const PASS: &str = "PASS";

/// Errors raised when mutating records out of lifecycle order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// Classification was already assigned.
    #[error("{contig}:{position} is already classified")]
    AlreadyClassified {
        /// Contig name.
        contig: Arc<str>,
        /// 1-based position.
        position: u32,
    },
    /// A record for this position was already stored.
    #[error("{contig}:{position} already has a record")]
    Duplicate {
        /// Contig name.
        contig: Arc<str>,
        /// 1-based position.
        position: u32,
    },
}

/// A finalized position whose evidence disagreed with the reference or between samples.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct PositionRecord {
    /// Contig name.
    pub contig: Arc<str>,
    /// Ordered key.
    pub key: GenomicPosition,
    /// Identifier (known-variant id or assigned mutation id).
    pub id: Option<String>,
    /// Reference base.
    pub reference: Base,
    /// Alternate alleles, control's first.
    pub alts: Vec<Base>,
    /// Control genotype, if callable.
    pub control_genotype: Option<Genotype>,
    /// Test genotype, if callable.
    pub test_genotype: Option<Genotype>,
    /// Two-tailed Fisher p-value for somatic calls.
    pub probability: Option<f64>,
    /// Frozen control evidence.
    pub control: Option<NucleotideSummary>,
    /// Frozen test evidence.
    pub test: Option<NucleotideSummary>,
    /// Reference context around the position with the first alt substituted.
    pub flanking: Option<String>,
    classification: Option<Classification>,
    classified: bool,
    annotations: Vec<FilterCode>,
}

impl PositionRecord {
    /// Unclassified record without genotypes.
    pub fn new(contig: impl Into<Arc<str>>, key: GenomicPosition, reference: Base) -> Self {
        Self {
            contig: contig.into(),
            key,
            id: None,
            reference,
            alts: Vec::new(),
            control_genotype: None,
            test_genotype: None,
            probability: None,
            control: None,
            test: None,
            flanking: None,
            classification: None,
            classified: false,
            annotations: Vec::new(),
        }
    }

    /// Attach a sample's genotype and evidence.
    pub fn with_sample(
        mut self,
        role: SampleRole,
        genotype: Option<Genotype>,
        summary: Option<NucleotideSummary>,
    ) -> Self {
        match role {
            SampleRole::Control => {
                self.control_genotype = genotype;
                self.control = summary;
            }
            SampleRole::Test => {
                self.test_genotype = genotype;
                self.test = summary;
            }
        }
        self.alts = self.derive_alts();
        self
    }

    /// Genotype alts, or each sample's largest raw variant when neither sample has a genotype.
    fn derive_alts(&self) -> Vec<Base> {
        if self.control_genotype.is_some() || self.test_genotype.is_some() {
            return alt_union(self.reference, self.control_genotype, self.test_genotype);
        }
        let mut alts = Vec::new();
        for summary in [&self.control, &self.test].into_iter().flatten() {
            if let Some(alt) = summary.largest_variant(self.reference) {
                if !alts.contains(&alt) {
                    alts.push(alt);
                }
            }
        }
        alts
    }

    /// 1-based position.
    pub fn position(&self) -> u32 {
        self.key.position
    }

    /// Genotype for one sample.
    pub fn genotype(&self, role: SampleRole) -> Option<&Genotype> {
        match role {
            SampleRole::Control => self.control_genotype.as_ref(),
            SampleRole::Test => self.test_genotype.as_ref(),
        }
    }

    /// Evidence for one sample.
    pub fn summary(&self, role: SampleRole) -> Option<&NucleotideSummary> {
        match role {
            SampleRole::Control => self.control.as_ref(),
            SampleRole::Test => self.test.as_ref(),
        }
    }

    /// Assigned classification, if any.
    pub fn classification(&self) -> Option<Classification> {
        self.classification
    }

    /// Whether the classifier has run on this record.
    pub fn is_classified(&self) -> bool {
        self.classified
    }

    /// Assign the classification outcome; a second assignment is rejected.
    pub fn classify(&mut self, classification: Option<Classification>) -> Result<(), RecordError> {
        if self.classified {
            return Err(RecordError::AlreadyClassified {
                contig: Arc::clone(&self.contig),
                position: self.key.position,
            });
        }
        self.classification = classification;
        self.classified = true;
        Ok(())
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

    /// Comma-joined alternate alleles, or `.` when there are none.
    pub fn alt_display(&self) -> String {
        if self.alts.is_empty() {
            ".".to_string()
        } else {
            self.alts
                .iter()
                .map(Base::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }
    }

    /// VCF-style allele indices for one sample, `./.` when uncalled.
    pub fn genotype_indices(&self, role: SampleRole) -> String {
        self.genotype(role)
            .and_then(|gt| gt.indices(self.reference, &self.alts))
            .unwrap_or_else(|| "./.".to_string())
    }
}

pub(crate) fn join_filter(codes: &[FilterCode]) -> String {
    if codes.is_empty() {
        return PASS.to_string();
    }
    codes.iter().map(ToString::to_string).collect::<Vec<_>>().join(";")
}

fn alt_union(reference: Base, control: Option<Genotype>, test: Option<Genotype>) -> Vec<Base> {
    let mut alts = Vec::new();
    for genotype in [control, test].into_iter().flatten() {
        for alt in genotype.alt_alleles(reference) {
            if !alts.contains(&alt) {
                alts.push(alt);
            }
        }
    }
    alts
}

/// A stored single-position or compound record.
#[derive(Debug, Clone, Copy)]
pub enum StoredRecord<'a> {
    /// One position.
    Single(&'a PositionRecord),
    /// A merged run of adjacent positions.
    Compound(&'a CompoundRecord),
}

impl StoredRecord<'_> {
    /// Key of the record's first position.
    pub fn key(&self) -> GenomicPosition {
        match self {
            StoredRecord::Single(record) => record.key,
            StoredRecord::Compound(record) => record.key,
        }
    }
}

/// Final ordered collection of records.
#[derive(Debug, Clone, Default)]
pub struct PositionRecordStore {
    records: BTreeMap<GenomicPosition, PositionRecord>,
    compounds: BTreeMap<GenomicPosition, CompoundRecord>,
}

impl PositionRecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; a second record at the same position is rejected.
    pub fn insert(&mut self, record: PositionRecord) -> Result<(), RecordError> {
        match self.records.entry(record.key) {
            btree_map::Entry::Occupied(_) => Err(RecordError::Duplicate {
                contig: Arc::clone(&record.contig),
                position: record.key.position,
            }),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Record at a position.
    pub fn get(&self, key: &GenomicPosition) -> Option<&PositionRecord> {
        self.records.get(key)
    }

    /// Take the record at a position out of the store.
    pub fn remove(&mut self, key: &GenomicPosition) -> Option<PositionRecord> {
        self.records.remove(key)
    }

    /// Insert a compound record; its first position must be free of records.
    pub fn insert_compound(&mut self, record: CompoundRecord) -> Result<(), RecordError> {
        if self.records.contains_key(&record.key) || self.compounds.contains_key(&record.key) {
            return Err(RecordError::Duplicate {
                contig: Arc::clone(&record.contig),
                position: record.key.position,
            });
        }
        self.compounds.insert(record.key, record);
        Ok(())
    }

    /// Number of single-position records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of compound records.
    pub fn compound_len(&self) -> usize {
        self.compounds.len()
    }

    /// Whether the store holds no record of either kind.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.compounds.is_empty()
    }

    /// Records in genomic order.
    pub fn iter(&self) -> impl Iterator<Item = &PositionRecord> {
        self.records.values()
    }

    /// Mutable records in genomic order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PositionRecord> {
        self.records.values_mut()
    }

    /// Compound records in genomic order.
    pub fn compounds(&self) -> impl Iterator<Item = &CompoundRecord> {
        self.compounds.values()
    }

    /// Mutable compound records in genomic order.
    pub fn compounds_mut(&mut self) -> impl Iterator<Item = &mut CompoundRecord> {
        self.compounds.values_mut()
    }

    /// Records of both kinds in genomic order.
    pub fn entries(&self) -> Vec<StoredRecord<'_>> {
        let mut entries: Vec<StoredRecord<'_>> = self
            .records
            .values()
            .map(StoredRecord::Single)
            .chain(self.compounds.values().map(StoredRecord::Compound))
            .collect();
        entries.sort_by_key(StoredRecord::key);
        entries
    }

    /// Give every record without an id `<prefix><n>`, numbered across both
    /// kinds in genomic order from 1.
    pub fn assign_ids(&mut self, prefix: &str) {
        let mut keys: Vec<(GenomicPosition, bool)> = self
            .records
            .keys()
            .map(|&key| (key, false))
            .chain(self.compounds.keys().map(|&key| (key, true)))
            .collect();
        keys.sort_unstable();
        for (n, (key, compound)) in keys.into_iter().enumerate() {
            let id = if compound {
                self.compounds.get_mut(&key).map(|record| &mut record.id)
            } else {
                self.records.get_mut(&key).map(|record| &mut record.id)
            };
            if let Some(id) = id.filter(|id| id.is_none()) {
                *id = Some(format!("{prefix}{}", n + 1));
            }
        }
    }

    /// Hand the single-position records to an external writer.
    pub fn into_records(self) -> Vec<PositionRecord> {
        self.records.into_values().collect()
    }
}
