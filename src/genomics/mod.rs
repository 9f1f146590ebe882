//! Genomics primitives: reads, per-position evidence, coverage rules, the
//! two-pass genotype caller and the collaborator contracts for read and
//! reference input.

mod accumulator;
mod genotype;
mod io;
mod rules;
mod types;

pub use accumulator::{
    Accumulator, BaseTally, NucleotideSummary, ReadBase, ReadContext, StrandTally,
    END_OF_READ_DISTANCE,
};
pub use genotype::{CallerThresholds, Genotype, GenotypeCaller, Pass, SampleCall};
pub use io::{
    BamRecordSource, FastaReference, MinMappingQuality, RecordPredicate, RecordSource,
    ReferenceContig, ReferenceProvider, SourceError, TextAlignmentSource, VecRecordSource,
    VecReferenceProvider,
};
pub use rules::{Rule, RuleError, RuleTable};
pub use types::{
    AlignedRead, Base, CigarOp, CigarOpKind, ContigDictionary, ContigInfo, GenomicPosition,
    ReadFlags, SampleRole, Strand,
};
