//! # snvpair
//!
//! Paired control/test variant calling over streaming pileups.
//!
//! Two coordinate-sorted read streams (a *control* and a *test* sample) are
//! piled up against a reference one chromosome at a time. Per-position
//! evidence lives only inside a sliding window bounded by the slowest
//! sample's in-flight alignment start, so memory tracks read length and
//! depth rather than chromosome length.
//!
//! ## Pipeline
//!
//! 1. **Producers** stream each sample's valid reads into bounded queues
//! 2. **Consumers** walk each read's CIGAR into a concurrent accumulator table
//! 3. **Cleaner** finalizes positions behind both watermarks and promotes
//!    disagreeing positions to records via the two-pass rule genotype caller
//! 4. **Classifier**, **Annotator** and **Significance Tester** turn the
//!    records into SOMATIC / GERMLINE calls with filter codes and p-values;
//!    adjacent calls of one class are first merged into compound records
//!
//! ## Usage Example
//!
//! ```ignore
//! use snvpair::{CallerConfig, Pipeline};
//! use snvpair::genomics::{VecRecordSource, VecReferenceProvider};
//!
//! let pipeline = Pipeline::new(CallerConfig::default().validate()?);
//! let output = pipeline.run(control, test, reference)?;
//! for record in output.records.iter() {
//!     println!("{}:{} {}", record.contig, record.position(), record.filter());
//! }
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod calling;  // Classification, annotation, significance, records
pub mod config;   // Run configuration and validation
pub mod genomics; // Reads, accumulators, rules, genotype caller, sources
pub mod pipeline; // Producer/consumer/cleaner orchestration

pub use calling::{
    Classification, CompoundRecord, FilterCode, PositionRecord, PositionRecordStore,
};
pub use config::{AnnotationConfig, CallerConfig, ConfigError, SignificanceConfig};
pub use genomics::{Base, Genotype, Rule, RuleTable, SampleRole};
pub use pipeline::{Pipeline, PipelineError, RunOutput, RunSummary};
