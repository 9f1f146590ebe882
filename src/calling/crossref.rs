//! Read-only cross-reference lookups consulted during annotation.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;

use bitvec::prelude::*;

use crate::genomics::{Base, SourceError};

/// Germline variants observed across a patient cohort.
pub trait GermlineIndex: Send + Sync {
    /// Number of patients carrying `alt` at the position, not counting `exclude`.
    fn carriers(&self, contig: &str, position: u32, alt: Base, exclude: Option<usize>) -> usize;
}

/// Known-variant identifiers such as dbSNP rs numbers.
pub trait KnownVariantIndex: Send + Sync {
    /// Identifier for `alt` at the position, if known.
    fn lookup(&self, contig: &str, position: u32, alt: Base) -> Option<&str>;
}

type SiteKey = (Arc<str>, u32, Base);

struct SiteLine {
    line: usize,
    contig: String,
    position: u32,
    alt: Base,
    value: String,
}

/// Tab-separated `contig position alt value` lines; blank and `#` lines are skipped.
fn parse_sites<R: BufRead>(reader: R) -> Result<Vec<SiteLine>, SourceError> {
    let mut sites = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line_number = idx + 1;
        let error = |message: String| SourceError::Parse {
            line: line_number,
            message,
        };
        let fields: Vec<&str> = trimmed.split('\t').collect();
        let [contig, position, alt, value] = fields.as_slice() else {
            return Err(error(format!("expected 4 tab-separated fields, found {}", fields.len())));
        };
        let position = position
            .parse::<u32>()
            .map_err(|_| error(format!("invalid position '{position}'")))?;
        let alt = match alt.as_bytes() {
            [byte] => Base::from_ascii(byte.to_ascii_uppercase()),
            _ => None,
        }
        .ok_or_else(|| error(format!("invalid alt allele '{alt}'")))?;
        sites.push(SiteLine {
            line: line_number,
            contig: contig.to_string(),
            position,
            alt,
            value: value.to_string(),
        });
    }
    Ok(sites)
}

/// Germline index storing one bit per patient for every variant site.
#[derive(Debug, Clone)]
pub struct PatientBitsetIndex {
    patients: usize,
    sites: HashMap<SiteKey, BitVec<u64, Lsb0>>,
}

impl PatientBitsetIndex {
    /// Empty index for a cohort of `patients`.
    pub fn new(patients: usize) -> Self {
        Self {
            patients,
            sites: HashMap::new(),
        }
    }

    /// Load `contig position alt patients` lines, `patients` being a comma-separated
    /// list of 0-based slots. The cohort is sized by the largest slot seen.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, SourceError> {
        let mut carriers = Vec::new();
        for site in parse_sites(reader)? {
            for patient in site.value.split(',') {
                let patient = patient.trim().parse::<usize>().map_err(|_| SourceError::Parse {
                    line: site.line,
                    message: format!("invalid patient '{patient}'"),
                })?;
                carriers.push((site.contig.clone(), site.position, site.alt, patient));
            }
        }
        let patients = carriers.iter().map(|&(_, _, _, patient)| patient + 1).max().unwrap_or(0);
        let mut index = Self::new(patients);
        for (contig, position, alt, patient) in carriers {
            index.insert(&contig, position, alt, patient);
        }
        Ok(index)
    }

    /// Cohort size.
    pub fn patients(&self) -> usize {
        self.patients
    }

    /// Mark `patient` as carrying `alt` at the position. Out-of-range patients are ignored.
    pub fn insert(&mut self, contig: &str, position: u32, alt: Base, patient: usize) {
        if patient >= self.patients {
            return;
        }
        let patients = self.patients;
        let bits = self
            .sites
            .entry((Arc::from(contig), position, alt))
            .or_insert_with(|| bitvec![u64, Lsb0; 0; patients]);
        bits.set(patient, true);
    }
}

impl GermlineIndex for PatientBitsetIndex {
    fn carriers(&self, contig: &str, position: u32, alt: Base, exclude: Option<usize>) -> usize {
        let key: SiteKey = (Arc::from(contig), position, alt);
        let Some(bits) = self.sites.get(&key) else {
            return 0;
        };
        let excluded = exclude
            .and_then(|patient| bits.get(patient).map(|bit| *bit))
            .unwrap_or(false);
        bits.count_ones() - usize::from(excluded)
    }
}

/// In-memory known-variant table.
#[derive(Debug, Clone, Default)]
pub struct KnownVariants {
    entries: HashMap<SiteKey, String>,
}

impl KnownVariants {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `contig position alt id` lines.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, SourceError> {
        let mut known = Self::new();
        for site in parse_sites(reader)? {
            known.insert(&site.contig, site.position, site.alt, site.value);
        }
        Ok(known)
    }

    /// Register an identifier for `alt` at the position.
    pub fn insert(&mut self, contig: &str, position: u32, alt: Base, id: impl Into<String>) {
        self.entries.insert((Arc::from(contig), position, alt), id.into());
    }
}

impl KnownVariantIndex for KnownVariants {
    fn lookup(&self, contig: &str, position: u32, alt: Base) -> Option<&str> {
        self.entries
            .get(&(Arc::from(contig), position, alt))
            .map(String::as_str)
    }
}
