//! Per-role counters returned to the orchestrator.

#[cfg(feature = "serialize")]
use serde::Serialize;

/// Counters of one producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct ProducerStats {
    /// Reads pulled from the source.
    pub records_read: u64,
    /// Reads dropped for being unmapped, secondary, QC-failed or duplicates.
    pub discarded: u64,
    /// Reads on contigs the reference skipped or ended before.
    pub skipped_contig: u64,
    /// Queued reads that passed the record predicate.
    pub passed_filter: u64,
    /// Queued reads that failed it.
    pub failed_filter: u64,
}

impl ProducerStats {
    /// Reads handed to the consumer.
    pub fn queued(&self) -> u64 {
        self.passed_filter + self.failed_filter
    }
}

/// Counters of one consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct ConsumerStats {
    /// Reads applied to the table.
    pub reads: u64,
    /// Aligned bases applied.
    pub bases: u64,
    /// Aligned bases past the end of the contig.
    pub beyond_contig: u64,
    /// Accumulator entries created.
    pub accumulators_created: u64,
}

/// Counters of the cleaner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct CleanerStats {
    /// Reference contigs completed.
    pub contigs: u64,
    /// Accumulator entries removed from either table.
    pub accumulators_finalized: u64,
    /// Positions under the combined coverage floor.
    pub below_coverage: u64,
    /// Positions whose reference base is not A, C, G or T.
    pub ambiguous_reference: u64,
    /// Positions the genotype caller kept before mate removal.
    pub candidates: u64,
    /// Candidates no longer kept after mate removal.
    pub lost_after_mate_removal: u64,
    /// Observations dropped as overlapping mates.
    pub mates_removed: u64,
    /// Records added to the store.
    pub records: u64,
    /// Largest number of live accumulators seen across both samples.
    pub peak_window: u64,
}
