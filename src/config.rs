//! Run configuration.
//!
//! Every knob has a default matching the production caller; builders
//! override individual values and [`CallerConfig::validate`] rejects
//! inconsistent settings before any thread starts.

use thiserror::Error;

use crate::genomics::{CallerThresholds, RuleError, RuleTable, SampleRole};

/// Errors detected before (or instead of) running the pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A rule table failed validation.
    #[error("invalid {role} rules: {source}")]
    InvalidRules {
        /// Sample role the table belongs to.
        role: SampleRole,
        /// Validation failure.
        #[source]
        source: RuleError,
    },
    /// A numeric parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidParameter(String),
    /// No read passed the record predicate after the configured number of reads.
    #[error("no {role} read passed the record predicate in the first {records} reads; check the filter")]
    IneffectivePredicate {
        /// Sample whose predicate rejected everything.
        role: SampleRole,
        /// Reads examined.
        records: u64,
    },
}

impl ConfigError {
    fn parameter(msg: impl Into<String>) -> Self {
        ConfigError::InvalidParameter(msg.into())
    }
}

fn check_percentage(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::parameter(format!("{name} must be within [0, 100], got {value}")))
    }
}

/// Thresholds of the annotation filters.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationConfig {
    /// Minimum alt reads in the relevant sample.
    pub mutant_reads: u32,
    /// Minimum distinct alt fragment starts.
    pub novel_starts: u32,
    /// Minimum minor-strand share (percent) of alt reads.
    pub strand_bias_alt_percentage: f64,
    /// Minimum minor-strand share (percent) of coverage for the bias to be the alt's own.
    pub strand_bias_coverage_percentage: f64,
    /// Middle-of-read alt reads needed to ignore end-of-read clustering.
    pub end_of_read_middle: u32,
    /// Absolute floor of alt reads in the control for `MIN`/`MIUN`.
    pub min_in_control_count: u32,
    /// Percentage floor of alt reads in the control for `MIN`/`MIUN`.
    pub min_in_control_percentage: f64,
    /// Control coverage required for somatic calls.
    pub control_coverage_somatic: u32,
    /// Control coverage required otherwise.
    pub control_coverage: u32,
    /// Test coverage required.
    pub test_coverage: u32,
    /// Other carriers needed for `GERM`.
    pub germline_patients: usize,
    /// This patient's slot in the germline index.
    pub patient: Option<usize>,
    /// Filter tags (e.g. `SBIASALT`) that are never added.
    pub skip: Vec<String>,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            mutant_reads: 5,
            novel_starts: 4,
            strand_bias_alt_percentage: 5.0,
            strand_bias_coverage_percentage: 5.0,
            end_of_read_middle: 5,
            min_in_control_count: 2,
            min_in_control_percentage: 3.0,
            control_coverage_somatic: 12,
            control_coverage: 8,
            test_coverage: 8,
            germline_patients: 1,
            patient: None,
            skip: Vec::new(),
        }
    }
}

impl AnnotationConfig {
    /// Set the mutant-read threshold.
    pub fn with_mutant_reads(mut self, reads: u32) -> Self {
        self.mutant_reads = reads;
        self
    }

    /// Set the novel-start threshold.
    pub fn with_novel_starts(mut self, starts: u32) -> Self {
        self.novel_starts = starts;
        self
    }

    /// Identify this patient in the germline index.
    pub fn with_patient(mut self, patient: usize) -> Self {
        self.patient = Some(patient);
        self
    }

    /// Never add the given filter tags.
    pub fn with_skipped(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.skip.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Significance tester settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignificanceConfig {
    /// Worker threads.
    pub workers: usize,
    /// Tables with more reads than this are skipped.
    pub max_combined_coverage: u64,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_combined_coverage: 100_000,
        }
    }
}

impl SignificanceConfig {
    /// Set the pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the coverage guard.
    pub fn with_max_combined_coverage(mut self, coverage: u64) -> Self {
        self.max_combined_coverage = coverage;
        self
    }
}

/// Full configuration of a calling run.
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Rules for the control sample.
    pub control_rules: RuleTable,
    /// Rules for the test sample.
    pub test_rules: RuleTable,
    /// Two-pass caller thresholds.
    pub thresholds: CallerThresholds,
    /// Bases below this Phred quality only reach the unfiltered tally.
    pub min_base_quality: u8,
    /// Combined coverage below which a position is never promoted.
    pub initial_coverage_limit: u32,
    /// Keep duplicate-flagged reads.
    pub include_duplicates: bool,
    /// Capacity of each producer→consumer queue.
    pub queue_capacity: usize,
    /// Consumers nudge the cleaner every this many reads.
    pub sweep_interval: usize,
    /// Abort when this many reads were read and none passed the predicate.
    pub max_records_failing_filter: Option<u64>,
    /// Annotation thresholds.
    pub annotation: AnnotationConfig,
    /// Significance tester settings.
    pub significance: SignificanceConfig,
    /// Prefix for ids given to records without a known-variant id.
    pub mutation_id_prefix: Option<String>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            control_rules: RuleTable::default_control(),
            test_rules: RuleTable::default_test(),
            thresholds: CallerThresholds::default(),
            min_base_quality: 10,
            initial_coverage_limit: 3,
            include_duplicates: false,
            queue_capacity: 10_000,
            sweep_interval: 1_000,
            max_records_failing_filter: Some(1_000_000),
            annotation: AnnotationConfig::default(),
            significance: SignificanceConfig::default(),
            mutation_id_prefix: None,
        }
    }
}

impl CallerConfig {
    /// Replace a sample's rule table.
    pub fn with_rules(mut self, role: SampleRole, rules: RuleTable) -> Self {
        match role {
            SampleRole::Control => self.control_rules = rules,
            SampleRole::Test => self.test_rules = rules,
        }
        self
    }

    /// Rule table for a sample.
    pub fn rules(&self, role: SampleRole) -> &RuleTable {
        match role {
            SampleRole::Control => &self.control_rules,
            SampleRole::Test => &self.test_rules,
        }
    }

    /// Set the two-pass thresholds.
    pub fn with_thresholds(mut self, thresholds: CallerThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the base-quality floor.
    pub fn with_min_base_quality(mut self, quality: u8) -> Self {
        self.min_base_quality = quality;
        self
    }

    /// Set the combined-coverage floor for promotion.
    pub fn with_initial_coverage_limit(mut self, limit: u32) -> Self {
        self.initial_coverage_limit = limit;
        self
    }

    /// Keep or drop duplicate reads.
    pub fn with_duplicates(mut self, include: bool) -> Self {
        self.include_duplicates = include;
        self
    }

    /// Set the per-sample queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set how often consumers nudge the cleaner.
    pub fn with_sweep_interval(mut self, interval: usize) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set or disable the ineffective-predicate guard.
    pub fn with_max_records_failing_filter(mut self, records: Option<u64>) -> Self {
        self.max_records_failing_filter = records;
        self
    }

    /// Set annotation thresholds.
    pub fn with_annotation(mut self, annotation: AnnotationConfig) -> Self {
        self.annotation = annotation;
        self
    }

    /// Set significance tester settings.
    pub fn with_significance(mut self, significance: SignificanceConfig) -> Self {
        self.significance = significance;
        self
    }

    /// Number records lacking a known id as `<prefix><n>`.
    pub fn with_mutation_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mutation_id_prefix = Some(prefix.into());
        self
    }

    /// Check cross-field consistency.
    pub fn validate(self) -> Result<Self, ConfigError> {
        for role in SampleRole::BOTH {
            RuleTable::new(self.rules(role).rules().to_vec())
                .map_err(|source| ConfigError::InvalidRules { role, source })?;
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::parameter("queue capacity must be > 0"));
        }
        if self.sweep_interval == 0 {
            return Err(ConfigError::parameter("sweep interval must be > 0"));
        }
        if self.significance.workers == 0 {
            return Err(ConfigError::parameter("significance workers must be > 0"));
        }
        if self.max_records_failing_filter == Some(0) {
            return Err(ConfigError::parameter("max records failing filter must be > 0"));
        }
        check_percentage("weighted vote percentage", self.thresholds.weighted_vote_percentage)?;
        check_percentage("lenient vote percentage", self.thresholds.lenient_vote_percentage)?;
        if !(0.0..=1.0).contains(&self.thresholds.lenient_rule_fraction) {
            return Err(ConfigError::parameter("lenient rule fraction must be within [0, 1]"));
        }
        if self.thresholds.lenient_vote_percentage > self.thresholds.weighted_vote_percentage {
            return Err(ConfigError::parameter(
                "lenient vote percentage must not exceed the strict percentage",
            ));
        }
        check_percentage("strand bias alt percentage", self.annotation.strand_bias_alt_percentage)?;
        check_percentage(
            "strand bias coverage percentage",
            self.annotation.strand_bias_coverage_percentage,
        )?;
        check_percentage("min in control percentage", self.annotation.min_in_control_percentage)?;
        Ok(self)
    }
}
