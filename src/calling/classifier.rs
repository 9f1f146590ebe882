use std::fmt;

#[cfg(feature = "serialize")]
use serde::Serialize;
use tracing::debug;

use crate::calling::PositionRecord;
use crate::genomics::{Base, Genotype, NucleotideSummary};

/// Origin assigned to a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum Classification {
    /// Acquired in the test sample only.
    Somatic,
    /// Present in both samples.
    Germline,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Somatic => f.write_str("SOMATIC"),
            Classification::Germline => f.write_str("GERMLINE"),
        }
    }
}

/// Compare two callable genotypes.
pub fn compare_genotypes(reference: Base, control: &Genotype, test: &Genotype) -> Option<Classification> {
    if control == test {
        return (!control.is_homozygous_reference(reference)).then_some(Classification::Germline);
    }

    if control.is_homozygous() == test.is_homozygous() {
        return Some(Classification::Somatic);
    }

    let germline = if control.is_homozygous() {
        // Test is ref/x where the control carries x twice.
        let [allele, _] = control.alleles();
        allele != reference && test.contains(reference) && test.contains(allele)
    } else {
        // Loss of heterozygosity keeps one of the control alleles.
        let [allele, _] = test.alleles();
        control.contains(allele)
    };

    Some(if germline {
        Classification::Germline
    } else {
        Classification::Somatic
    })
}

fn classify_control_only(
    reference: Base,
    control: &Genotype,
    test: Option<&NucleotideSummary>,
) -> Option<Classification> {
    if control.is_homozygous_reference(reference) {
        return None;
    }
    let contradicted = test.is_some_and(|summary| {
        summary.coverage() > 0
            && !control
                .alt_alleles(reference)
                .into_iter()
                .any(|alt| summary.contains(alt))
    });
    (!contradicted).then_some(Classification::Germline)
}

fn classify_test_only(
    reference: Base,
    test: &Genotype,
    control: Option<&NucleotideSummary>,
) -> Option<Classification> {
    if test.is_homozygous_reference(reference) {
        return None;
    }
    let control = control.filter(|summary| summary.coverage() > 0)?;
    let all_seen = test
        .alt_alleles(reference)
        .into_iter()
        .all(|alt| control.contains(alt));
    Some(if all_seen {
        Classification::Germline
    } else {
        Classification::Somatic
    })
}

/// Classify a record from its genotypes, falling back to raw evidence when one is missing.
pub fn classify(record: &PositionRecord) -> Option<Classification> {
    let reference = record.reference;
    match (record.control_genotype.as_ref(), record.test_genotype.as_ref()) {
        (Some(control), Some(test)) => compare_genotypes(reference, control, test),
        (Some(control), None) => classify_control_only(reference, control, record.test.as_ref()),
        (None, Some(test)) => classify_test_only(reference, test, record.control.as_ref()),
        (None, None) => {
            debug!(contig = %record.contig, position = record.position(), "no genotype in either sample");
            None
        }
    }
}
