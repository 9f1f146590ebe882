//! Post-accumulation stages: classification, compound merging, annotation,
//! significance and the final record store.

mod annotation;
mod classifier;
mod compound;
mod crossref;
mod record;
mod significance;

pub use annotation::{relevant_sample, Annotator, FilterCode};
pub use classifier::{classify, compare_genotypes, Classification};
pub use compound::{merge_compounds, AlleleTally, CompoundEvidence, CompoundRecord, ReadEvidence};
pub use crossref::{GermlineIndex, KnownVariantIndex, KnownVariants, PatientBitsetIndex};
pub use record::{PositionRecord, PositionRecordStore, RecordError, StoredRecord, PASS};
pub use significance::{
    fisher_exact_two_tailed, ContingencyTable, SignificanceStats, SignificanceTester,
};
