//! Ordered, cumulative filter pipeline.
//!
//! Each check may append one [`FilterCode`] to a record; nothing is ever
//! removed, so a record that picked up a code can no longer report `PASS`.
//! The checks run in this order: coverage, no call, mutant reads, novel
//! starts, strand bias, end of read, mutation in control, mutation in
//! unfiltered control, germline in another patient. Cross-reference misses
//! add nothing.
//!
//! Compound records get the subset that combined-allele evidence supports:
//! coverage, mutant reads, novel starts, strand bias and mutation in control.

use std::fmt;

#[cfg(feature = "serialize")]
use serde::Serialize;

use crate::calling::{
    Classification, CompoundRecord, GermlineIndex, KnownVariantIndex, PositionRecord,
};
use crate::config::AnnotationConfig;
use crate::genomics::{Base, BaseTally, NucleotideSummary, SampleRole};

/// Reason a record failed a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum FilterCode {
    /// Somatic call with control coverage below the somatic floor.
    ControlCoverageSomatic,
    /// Control coverage below the floor.
    ControlCoverage,
    /// Test coverage below the floor.
    TestCoverage,
    /// Neither sample has a genotype; the alts come from raw evidence.
    NoCall,
    /// Too few reads carry the alt.
    MutantReads,
    /// Too few distinct fragment starts carry the alt.
    NovelStarts,
    /// Alt confined to one strand although coverage is on both.
    StrandBiasAlt,
    /// Alt confined to one strand and coverage is too.
    StrandBiasCoverage,
    /// Alt support clusters near read ends; holds the end-of-read alt count.
    EndOfRead(u32),
    /// Somatic alt also present in the control's passing reads.
    MutationInNormal,
    /// Somatic alt present in the control once unfiltered reads are included.
    MutationInUnfilteredNormal,
    /// Somatic alt carried as germline by other patients.
    GermlineInOtherPatient,
}

impl FilterCode {
    /// Tag without any payload, used for configuration and lookups.
    pub fn tag(&self) -> &'static str {
        match self {
            FilterCode::ControlCoverageSomatic => "COVN12",
            FilterCode::ControlCoverage => "COVN8",
            FilterCode::TestCoverage => "COVT",
            FilterCode::NoCall => "NCIT",
            FilterCode::MutantReads => "MR",
            FilterCode::NovelStarts => "NNS",
            FilterCode::StrandBiasAlt => "SBIASALT",
            FilterCode::StrandBiasCoverage => "SBIASCOV",
            FilterCode::EndOfRead(_) => "5BP",
            FilterCode::MutationInNormal => "MIN",
            FilterCode::MutationInUnfilteredNormal => "MIUN",
            FilterCode::GermlineInOtherPatient => "GERM",
        }
    }
}

impl fmt::Display for FilterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterCode::EndOfRead(count) => write!(f, "5BP={count}"),
            other => f.write_str(other.tag()),
        }
    }
}

fn both_strands_represented(forward: u32, reverse: u32, min_percentage: f64) -> bool {
    let total = forward + reverse;
    if total == 0 {
        return false;
    }
    100.0 * f64::from(forward.min(reverse)) / f64::from(total) >= min_percentage
}

fn min_alt_support(coverage: u32, config: &AnnotationConfig) -> f64 {
    f64::from(config.min_in_control_count).max(f64::from(coverage) * config.min_in_control_percentage / 100.0)
}

/// Applies the filter pipeline to classified records.
#[derive(Clone, Copy)]
pub struct Annotator<'a> {
    config: &'a AnnotationConfig,
    germline: Option<&'a dyn GermlineIndex>,
    known: Option<&'a dyn KnownVariantIndex>,
}

impl fmt::Debug for Annotator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotator")
            .field("config", self.config)
            .field("germline", &self.germline.is_some())
            .field("known", &self.known.is_some())
            .finish()
    }
}

impl<'a> Annotator<'a> {
    /// Annotator without cross-reference indices.
    pub fn new(config: &'a AnnotationConfig) -> Self {
        Self {
            config,
            germline: None,
            known: None,
        }
    }

    /// Consult a per-patient germline index.
    pub fn with_germline_index(mut self, index: &'a dyn GermlineIndex) -> Self {
        self.germline = Some(index);
        self
    }

    /// Consult a known-variant index for record ids.
    pub fn with_known_variants(mut self, index: &'a dyn KnownVariantIndex) -> Self {
        self.known = Some(index);
        self
    }

    fn allowed(&self, code: FilterCode) -> bool {
        !self.config.skip.iter().any(|tag| tag == code.tag())
    }

    fn add(&self, record: &mut PositionRecord, code: FilterCode) {
        if self.allowed(code) {
            record.annotate(code);
        }
    }

    /// Run the checks that apply to a compound record.
    pub fn annotate_compound(&self, record: &mut CompoundRecord) {
        let somatic = record.classification() == Some(Classification::Somatic);
        let mut codes = self.coverage_codes(somatic, record.control.coverage(), record.test.coverage());

        let role = match record.classification() {
            Some(Classification::Somatic) => SampleRole::Test,
            Some(Classification::Germline) if record.control_genotype.is_some() => SampleRole::Control,
            _ if record.test_genotype.is_some() => SampleRole::Test,
            _ => SampleRole::Control,
        };
        let evidence = record.evidence(role);
        let alt_tallies: Vec<_> = record
            .genotype_alts(role)
            .into_iter()
            .filter_map(|alt| evidence.tally(alt).copied())
            .collect();
        if alt_tallies.iter().any(|t| t.count() < self.config.mutant_reads) {
            codes.push(FilterCode::MutantReads);
        }
        if alt_tallies.iter().any(|t| t.novel_starts < self.config.novel_starts) {
            codes.push(FilterCode::NovelStarts);
        }
        codes.extend(self.strand_bias_code(
            alt_tallies.iter().map(|t| (t.forward, t.reverse)),
            (evidence.forward_coverage(), evidence.reverse_coverage()),
        ));

        if somatic {
            let control = &record.control;
            let support = min_alt_support(control.coverage(), self.config);
            let seen_in_control = record.alts.iter().any(|alt| {
                control
                    .tally(alt)
                    .is_some_and(|t| t.count() > 0 && f64::from(t.count()) >= support)
            });
            if seen_in_control {
                codes.push(FilterCode::MutationInNormal);
            }
        }

        for code in codes {
            if self.allowed(code) {
                record.annotate(code);
            }
        }
    }

    /// Run every check on `record`.
    pub fn annotate(&self, record: &mut PositionRecord) {
        self.lookup_known(record);
        self.check_coverage(record);
        if record.control_genotype.is_none() && record.test_genotype.is_none() {
            self.add(record, FilterCode::NoCall);
        }

        let role = relevant_sample(record);
        let alts = relevant_alts(record, role);
        if let Some(summary) = record.summary(role).cloned() {
            let alt_tallies: Vec<_> = alts
                .iter()
                .map(|&alt| *summary.tally(alt))
                .filter(|tally| tally.count() > 0)
                .collect();

            if alt_tallies.iter().any(|t| t.count() < self.config.mutant_reads) {
                self.add(record, FilterCode::MutantReads);
            }
            if alt_tallies.iter().any(|t| t.novel_starts < self.config.novel_starts) {
                self.add(record, FilterCode::NovelStarts);
            }
            self.check_strand_bias(record, &summary, &alt_tallies);
            self.check_end_of_read(record, &alt_tallies);
        }

        if record.classification() == Some(Classification::Somatic) {
            self.check_mutation_in_control(record, &alts);
            self.check_germline(record, &alts);
        }
    }

    fn lookup_known(&self, record: &mut PositionRecord) {
        let Some(known) = self.known else {
            return;
        };
        if record.id.is_some() {
            return;
        }
        let id = record
            .alts
            .iter()
            .find_map(|&alt| known.lookup(&record.contig, record.position(), alt))
            .map(str::to_string);
        if id.is_some() {
            record.id = id;
        }
    }

    fn check_coverage(&self, record: &mut PositionRecord) {
        let control = record.control.as_ref().map_or(0, NucleotideSummary::coverage);
        let test = record.test.as_ref().map_or(0, NucleotideSummary::coverage);
        let somatic = record.classification() == Some(Classification::Somatic);
        for code in self.coverage_codes(somatic, control, test) {
            self.add(record, code);
        }
    }

    fn coverage_codes(&self, somatic: bool, control: u32, test: u32) -> Vec<FilterCode> {
        let mut codes = Vec::new();
        if somatic && control < self.config.control_coverage_somatic {
            codes.push(FilterCode::ControlCoverageSomatic);
        } else if control < self.config.control_coverage {
            codes.push(FilterCode::ControlCoverage);
        }
        if test < self.config.test_coverage {
            codes.push(FilterCode::TestCoverage);
        }
        codes
    }

    fn check_strand_bias(
        &self,
        record: &mut PositionRecord,
        summary: &NucleotideSummary,
        alt_tallies: &[BaseTally],
    ) {
        let code = self.strand_bias_code(
            alt_tallies.iter().map(|t| (t.forward.count, t.reverse.count)),
            (summary.forward_coverage(), summary.reverse_coverage()),
        );
        if let Some(code) = code {
            self.add(record, code);
        }
    }

    /// Strand bias code for alts given as (forward, reverse) read counts.
    fn strand_bias_code(
        &self,
        mut alt_strands: impl Iterator<Item = (u32, u32)>,
        (forward, reverse): (u32, u32),
    ) -> Option<FilterCode> {
        let biased = alt_strands.any(|(forward, reverse)| {
            !both_strands_represented(forward, reverse, self.config.strand_bias_alt_percentage)
        });
        if !biased {
            return None;
        }
        Some(
            if both_strands_represented(forward, reverse, self.config.strand_bias_coverage_percentage) {
                FilterCode::StrandBiasAlt
            } else {
                FilterCode::StrandBiasCoverage
            },
        )
    }

    fn check_end_of_read(&self, record: &mut PositionRecord, alt_tallies: &[BaseTally]) {
        let mut worst = 0;
        for tally in alt_tallies {
            let middle_forward = tally.forward.count - tally.forward.end_of_read;
            let middle_reverse = tally.reverse.count - tally.reverse.end_of_read;
            let balanced_middle = middle_forward + middle_reverse >= self.config.end_of_read_middle
                && middle_forward > 0
                && middle_reverse > 0;
            if !balanced_middle {
                worst = worst.max(tally.end_of_read());
            }
        }
        if worst > 0 {
            self.add(record, FilterCode::EndOfRead(worst));
        }
    }

    fn check_mutation_in_control(&self, record: &mut PositionRecord, alts: &[Base]) {
        let Some(control) = record.control.clone() else {
            return;
        };
        let seen_in_control = alts.iter().any(|&alt| {
            let count = control.tally(alt).count();
            count > 0 && f64::from(count) >= min_alt_support(control.coverage(), self.config)
        });
        if seen_in_control {
            self.add(record, FilterCode::MutationInNormal);
            return;
        }

        let combined_coverage = control.coverage() + control.unfiltered_coverage();
        let seen_unfiltered = alts.iter().any(|&alt| {
            let count = control.tally(alt).count() + control.unfiltered(alt);
            count > 0 && f64::from(count) >= min_alt_support(combined_coverage, self.config)
        });
        if seen_unfiltered {
            self.add(record, FilterCode::MutationInUnfilteredNormal);
        }
    }

    fn check_germline(&self, record: &mut PositionRecord, alts: &[Base]) {
        let Some(index) = self.germline else {
            return;
        };
        let carried = alts.iter().any(|&alt| {
            index.carriers(&record.contig, record.position(), alt, self.config.patient) >= self.config.germline_patients
        });
        if carried {
            self.add(record, FilterCode::GermlineInOtherPatient);
        }
    }
}

/// Sample whose evidence the read-level filters inspect.
pub fn relevant_sample(record: &PositionRecord) -> SampleRole {
    match record.classification() {
        Some(Classification::Somatic) => SampleRole::Test,
        Some(Classification::Germline) if record.control_genotype.is_some() => SampleRole::Control,
        _ if record.test_genotype.is_some() => SampleRole::Test,
        _ if record.control_genotype.is_some() => SampleRole::Control,
        _ => SampleRole::Test,
    }
}

fn relevant_alts(record: &PositionRecord, role: SampleRole) -> Vec<Base> {
    match record.genotype(role) {
        Some(genotype) => genotype.alt_alleles(record.reference),
        None => record.alts.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calling::PatientBitsetIndex;
    use crate::calling::KnownVariants;
    use crate::calling::CompoundEvidence;
    use crate::genomics::{
        Accumulator, Genotype, GenomicPosition, ReadBase, ReadContext, RuleTable, Strand,
    };
    use std::sync::Arc;

    struct Evidence {
        base: u8,
        strand: Strand,
        start: u32,
        end: u32,
    }

    fn middle(base: u8, strand: Strand, start: u32) -> Evidence {
        Evidence {
            base,
            strand,
            start,
            end: start + 100,
        }
    }

    fn summarize(position: u32, evidence: &[Evidence]) -> NucleotideSummary {
        let mut acc = Accumulator::new(position);
        for (idx, e) in evidence.iter().enumerate() {
            let ctx = ReadContext {
                strand: e.strand,
                start: e.start,
                end: e.end,
                name_hash: idx as u64,
            };
            acc.observe(e.base, 30, &ctx);
        }
        acc.summarize()
    }

    fn reference_reads(count: u32) -> Vec<Evidence> {
        (0..count)
            .map(|i| {
                let strand = if i % 2 == 0 { Strand::Forward } else { Strand::Reverse };
                middle(b'A', strand, 50 + i)
            })
            .collect()
    }

    fn somatic_record(test_alt: Vec<Evidence>) -> PositionRecord {
        let control = summarize(100, &reference_reads(20));
        let mut test_reads = reference_reads(20);
        test_reads.extend(test_alt);
        let test = summarize(100, &test_reads);
        let mut record = PositionRecord::new("chr1", GenomicPosition::new(0, 100), Base::A)
            .with_sample(SampleRole::Control, Some(Genotype::homozygous(Base::A)), Some(control))
            .with_sample(SampleRole::Test, Some(Genotype::heterozygous(Base::A, Base::G)), Some(test));
        record
            .classify(Some(Classification::Somatic))
            .expect("fresh record");
        record
    }

    fn balanced_alt(count: u32) -> Vec<Evidence> {
        (0..count)
            .map(|i| {
                let strand = if i % 2 == 0 { Strand::Forward } else { Strand::Reverse };
                middle(b'G', strand, 60 + i)
            })
            .collect()
    }

    #[test]
    fn clean_somatic_call_passes() {
        let config = AnnotationConfig::default();
        let mut record = somatic_record(balanced_alt(8));
        Annotator::new(&config).annotate(&mut record);
        assert!(record.passes(), "unexpected codes: {}", record.filter());
    }

    #[test]
    fn few_mutant_reads_and_starts_are_flagged() {
        let config = AnnotationConfig::default();
        let mut alt = balanced_alt(2);
        alt.push(middle(b'G', Strand::Forward, 60));
        alt.push(middle(b'G', Strand::Forward, 60));
        let mut record = somatic_record(alt);
        Annotator::new(&config).annotate(&mut record);
        assert!(record.has_annotation("MR"));
        assert!(record.has_annotation("NNS"));
        assert!(!record.passes());
    }

    #[test]
    fn forward_only_alt_is_strand_biased() {
        let config = AnnotationConfig::default();
        let alt = (0..8).map(|i| middle(b'G', Strand::Forward, 60 + i)).collect();
        let mut record = somatic_record(alt);
        Annotator::new(&config).annotate(&mut record);
        assert!(record.has_annotation("SBIASALT"));
        assert!(!record.has_annotation("SBIASCOV"));
    }

    #[test]
    fn end_of_read_clustering_reports_count() {
        let config = AnnotationConfig::default();
        let alt: Vec<Evidence> = (0..6)
            .map(|i| {
                let strand = if i % 2 == 0 { Strand::Forward } else { Strand::Reverse };
                // Alignment ends at the variant position.
                Evidence {
                    base: b'G',
                    strand,
                    start: 20 + i,
                    end: 100,
                }
            })
            .collect();
        let mut record = somatic_record(alt);
        Annotator::new(&config).annotate(&mut record);
        assert_eq!(record.annotations().last(), Some(&FilterCode::EndOfRead(6)));
    }

    #[test]
    fn alt_in_control_unfiltered_reads_is_flagged() {
        let config = AnnotationConfig::default();
        let mut record = somatic_record(balanced_alt(8));
        let mut control = record.control.clone().expect("control evidence");
        control.unfiltered[Base::G.index()] = 3;
        record.control = Some(control);
        Annotator::new(&config).annotate(&mut record);
        assert_eq!(record.filter(), "MIUN");
    }

    #[test]
    fn alt_in_control_passing_reads_takes_precedence() {
        let config = AnnotationConfig::default();
        let mut record = somatic_record(balanced_alt(8));
        let mut control = record.control.clone().expect("control evidence");
        control.bases[Base::G.index()].forward.count = 2;
        control.unfiltered[Base::G.index()] = 3;
        record.control = Some(control);
        Annotator::new(&config).annotate(&mut record);
        assert!(record.has_annotation("MIN"));
        assert!(!record.has_annotation("MIUN"));
    }

    #[test]
    fn germline_in_other_patient_and_known_id() {
        let config = AnnotationConfig::default().with_patient(0);
        let mut index = PatientBitsetIndex::new(3);
        index.insert("chr1", 100, Base::G, 0);
        index.insert("chr1", 100, Base::G, 2);
        let mut known = KnownVariants::new();
        known.insert("chr1", 100, Base::G, "rs99");

        let mut record = somatic_record(balanced_alt(8));
        Annotator::new(&config)
            .with_germline_index(&index)
            .with_known_variants(&known)
            .annotate(&mut record);
        assert_eq!(record.filter(), "GERM");
        assert_eq!(record.id.as_deref(), Some("rs99"));
    }

    #[test]
    fn skipped_codes_are_not_added() {
        let mut config = AnnotationConfig::default();
        config.skip = vec!["SBIASALT".to_string()];
        let alt = (0..8).map(|i| middle(b'G', Strand::Forward, 60 + i)).collect();
        let mut record = somatic_record(alt);
        Annotator::new(&config).annotate(&mut record);
        assert!(record.passes());
    }

    #[test]
    fn low_coverage_codes() {
        let config = AnnotationConfig::default();
        let control = summarize(100, &reference_reads(10));
        let test = summarize(100, &balanced_alt(6));
        let mut record = PositionRecord::new("chr1", GenomicPosition::new(0, 100), Base::A)
            .with_sample(SampleRole::Control, Some(Genotype::homozygous(Base::A)), Some(control))
            .with_sample(SampleRole::Test, Some(Genotype::homozygous(Base::G)), Some(test));
        record.classify(Some(Classification::Somatic)).expect("fresh record");
        Annotator::new(&config).annotate(&mut record);
        assert_eq!(record.annotations().first(), Some(&FilterCode::ControlCoverageSomatic));
        assert!(record.has_annotation("COVT"));
    }

    #[test]
    fn genotype_less_record_is_not_pass_and_still_looked_up() {
        let config = AnnotationConfig::default();
        let mut test_reads = reference_reads(20);
        test_reads.extend(balanced_alt(2));
        let mut known = KnownVariants::new();
        known.insert("chr1", 100, Base::G, "rs7");

        let mut record = PositionRecord::new("chr1", GenomicPosition::new(0, 100), Base::A)
            .with_sample(SampleRole::Control, None, Some(summarize(100, &reference_reads(20))))
            .with_sample(SampleRole::Test, None, Some(summarize(100, &test_reads)));
        record.classify(None).expect("fresh record");
        Annotator::new(&config).with_known_variants(&known).annotate(&mut record);

        assert_eq!(record.alts, vec![Base::G]);
        assert!(record.has_annotation("NCIT"));
        assert!(record.has_annotation("MR"));
        assert!(!record.passes());
        assert_eq!(record.id.as_deref(), Some("rs7"));
    }

    /// Add `count` reads spelling `allele` across two columns.
    fn spell(columns: &mut [Vec<ReadBase>; 2], allele: &[u8; 2], first: u64, count: u64, both_strands: bool) {
        for hash in first..first + count {
            let strand = if both_strands && hash % 2 == 1 { Strand::Reverse } else { Strand::Forward };
            for (column, &byte) in columns.iter_mut().zip(allele) {
                column.push(ReadBase {
                    name_hash: hash,
                    base: Base::from_ascii(byte).expect("base"),
                    strand,
                    fragment_start: hash as u32,
                });
            }
        }
    }

    fn compound_record(control: [Vec<ReadBase>; 2], test: [Vec<ReadBase>; 2]) -> CompoundRecord {
        let evidence =
            [control, test].map(|columns| CompoundEvidence::from_columns(columns.iter().map(Vec::as_slice)));
        CompoundRecord::build(
            Arc::from("chr1"),
            GenomicPosition::new(0, 50),
            "CG".to_string(),
            evidence,
            [&RuleTable::default_control(), &RuleTable::default_test()],
        )
        .expect("compound")
    }

    #[test]
    fn clean_compound_somatic_call_passes() {
        let config = AnnotationConfig::default();
        let mut control = [Vec::new(), Vec::new()];
        spell(&mut control, b"CG", 0, 30, true);
        let mut test = [Vec::new(), Vec::new()];
        spell(&mut test, b"CG", 100, 20, true);
        spell(&mut test, b"TA", 200, 10, true);

        let mut record = compound_record(control, test);
        Annotator::new(&config).annotate_compound(&mut record);
        assert_eq!(record.classification(), Some(Classification::Somatic));
        assert!(record.passes(), "unexpected codes: {}", record.filter());
    }

    #[test]
    fn compound_alt_on_one_strand_and_in_control_is_flagged() {
        let config = AnnotationConfig::default();
        let mut control = [Vec::new(), Vec::new()];
        spell(&mut control, b"CG", 0, 30, true);
        spell(&mut control, b"TA", 30, 3, true);
        let mut test = [Vec::new(), Vec::new()];
        spell(&mut test, b"CG", 100, 20, true);
        spell(&mut test, b"TA", 200, 10, false);

        let mut record = compound_record(control, test);
        Annotator::new(&config).annotate_compound(&mut record);
        assert_eq!(record.genotype_indices(SampleRole::Control), "0/0");
        assert_eq!(record.filter(), "SBIASALT;MIN");
    }
}
