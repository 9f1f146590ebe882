//! Finalization of accumulators behind both watermarks.

use crossbeam_channel::Receiver;
use tracing::{debug, info, trace, warn};

use crate::calling::{PositionRecord, PositionRecordStore, ReadEvidence};
use crate::config::CallerConfig;
use crate::genomics::{
    Accumulator, Base, GenomicPosition, GenotypeCaller, NucleotideSummary, Pass, SampleRole,
};
use crate::pipeline::shared::{LoadedContig, RunShared};
use crate::pipeline::stats::CleanerStats;
use crate::pipeline::window::WindowTracker;
use crate::pipeline::PipelineError;

/// Reference bases shown on each side of a record.
const FLANK: u32 = 5;

/// Messages from consumers to the cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CleanerSignal {
    /// A consumer moved its watermark; a sweep may free entries.
    Advanced,
    /// A consumer applied every read of the current contig.
    ContigDone(SampleRole),
}

pub(crate) struct Cleaner<'s, 'r, 'c> {
    signals: Receiver<CleanerSignal>,
    shared: &'s RunShared<'r>,
    config: &'c CallerConfig,
    callers: [GenotypeCaller<'c>; 2],
    window: WindowTracker,
    store: PositionRecordStore,
    evidence: ReadEvidence,
    stats: CleanerStats,
}

/// Everything the cleaner hands back once the last contig is closed.
pub(crate) struct CleanerOutput {
    pub(crate) records: PositionRecordStore,
    pub(crate) evidence: ReadEvidence,
    pub(crate) stats: CleanerStats,
}

impl<'s, 'r, 'c> Cleaner<'s, 'r, 'c> {
    pub(crate) fn new(
        signals: Receiver<CleanerSignal>,
        shared: &'s RunShared<'r>,
        config: &'c CallerConfig,
    ) -> Self {
        let callers = SampleRole::BOTH.map(|role| GenotypeCaller::new(config.rules(role), config.thresholds));
        Self {
            signals,
            shared,
            config,
            callers,
            window: WindowTracker::new(),
            store: PositionRecordStore::new(),
            evidence: ReadEvidence::new(),
            stats: CleanerStats::default(),
        }
    }

    pub(crate) fn run(mut self) -> Result<CleanerOutput, PipelineError> {
        let mut current = self.shared.current();
        while let Some(contig) = current {
            self.process_contig(&contig)?;
            current = self.shared.rendezvous()?;
        }
        // Every table was verified empty at the last barrier; this catches
        // anything inserted after it.
        self.shared.check_no_leaks("<end of run>")?;
        self.stats.peak_window = self.window.peak() as u64;
        info!(
            contigs = self.stats.contigs,
            finalized = self.stats.accumulators_finalized,
            records = self.stats.records,
            peak_window = self.stats.peak_window,
            "cleaner finished"
        );
        Ok(CleanerOutput {
            records: self.store,
            evidence: self.evidence,
            stats: self.stats,
        })
    }

    fn process_contig(&mut self, contig: &LoadedContig) -> Result<(), PipelineError> {
        let mut previous = 1u32;
        let mut done = [false; 2];
        while !done.iter().all(|&finished| finished) {
            let signal = self.signals.recv().map_err(|_| PipelineError::Aborted)?;
            if self.shared.is_aborted() {
                return Err(PipelineError::Aborted);
            }
            match signal {
                CleanerSignal::Advanced => self.sweep(contig, &mut previous)?,
                CleanerSignal::ContigDone(role) => done[role.index()] = true,
            }
        }
        self.flush(contig)?;
        self.evidence.retain_adjacent(contig.ordinal);
        self.stats.contigs += 1;
        info!(
            contig = contig.name(),
            records = self.store.len(),
            window = self.window.finish_contig(),
            "contig finalized"
        );
        Ok(())
    }

    /// Finalize `[previous, cross-sample watermark)`.
    fn sweep(&mut self, contig: &LoadedContig, previous: &mut u32) -> Result<(), PipelineError> {
        let end = self
            .shared
            .cross_sample(contig.ordinal)
            .min(contig.len().saturating_add(1));
        if end <= *previous {
            return Ok(());
        }
        self.window.observe(self.shared.live_entries());
        let mut finalized = 0;
        for position in *previous..end {
            finalized += self.finalize(contig, position)?;
        }
        self.window.release(finalized);
        trace!(from = *previous, to = end, finalized, live = self.window.current(), "sweep");
        *previous = end;
        Ok(())
    }

    /// Finalize every remaining entry of the contig in position order.
    fn flush(&mut self, contig: &LoadedContig) -> Result<(), PipelineError> {
        self.window.observe(self.shared.live_entries());
        let mut positions: Vec<u32> = SampleRole::BOTH
            .iter()
            .flat_map(|&role| self.shared.table(role).sorted_positions())
            .collect();
        positions.sort_unstable();
        positions.dedup();
        for position in positions {
            self.finalize(contig, position)?;
        }
        Ok(())
    }

    fn finalize(&mut self, contig: &LoadedContig, position: u32) -> Result<usize, PipelineError> {
        let control = self.shared.table(SampleRole::Control).remove(position);
        let test = self.shared.table(SampleRole::Test).remove(position);
        let removed = usize::from(control.is_some()) + usize::from(test.is_some());
        if removed == 0 {
            return Ok(0);
        }
        self.stats.accumulators_finalized += removed as u64;
        if let Some(record) = self.promote(contig, position, [control, test])? {
            self.store.insert(record)?;
            self.stats.records += 1;
        }
        Ok(removed)
    }

    /// Turn a finalized position into a record when the evidence disagrees
    /// with the reference or between samples and a caller keeps it.
    fn promote(
        &mut self,
        contig: &LoadedContig,
        position: u32,
        mut accumulators: [Option<Accumulator>; 2],
    ) -> Result<Option<PositionRecord>, PipelineError> {
        let reference_byte =
            contig
                .reference
                .base_at(position)
                .ok_or_else(|| PipelineError::PositionOutOfBounds {
                    contig: contig.name().to_string(),
                    position,
                    length: contig.len(),
                })?;

        let coverage: u32 = accumulators.iter().flatten().map(Accumulator::coverage).sum();
        if coverage < self.config.initial_coverage_limit {
            self.stats.below_coverage += 1;
            return Ok(None);
        }
        let Some(reference) = Base::from_ascii(reference_byte) else {
            self.stats.ambiguous_reference += 1;
            warn!(contig = contig.name(), position, reference = %(reference_byte as char), "skipping ambiguous reference base");
            return Ok(None);
        };

        let summaries = summarize(&accumulators);
        if !disagrees(reference, &summaries) || self.keepers(reference, &summaries).iter().all(Option::is_none) {
            return Ok(None);
        }
        self.stats.candidates += 1;

        for accumulator in accumulators.iter_mut().flatten() {
            self.stats.mates_removed += accumulator.remove_overlapping_mates() as u64;
        }
        let summaries = summarize(&accumulators);
        let keepers = self.keepers(reference, &summaries);

        let key = GenomicPosition::new(contig.ordinal, position);
        let mut record = PositionRecord::new(contig.reference.name.clone(), key, reference);
        let [control, test] = summaries;
        if keepers.iter().all(Option::is_none) {
            self.stats.lost_after_mate_removal += 1;
            debug!(contig = contig.name(), position, "position lost after overlapping mate removal");
            record = record
                .with_sample(SampleRole::Control, None, control)
                .with_sample(SampleRole::Test, None, test);
        } else {
            for (role, summary) in SampleRole::BOTH.into_iter().zip([control, test]) {
                let pass = keepers[role.index()].unwrap_or(Pass::Strict);
                let genotype = summary
                    .as_ref()
                    .and_then(|summary| self.callers[role.index()].genotype(summary, reference, pass));
                record = record.with_sample(role, genotype, summary);
            }
        }
        record.flanking = Some(flanking(contig, position, record.alts.first().copied().unwrap_or(reference)));
        if let [Some(control), Some(test)] = &accumulators {
            self.evidence.insert(key, control.read_bases(), test.read_bases());
        }
        Ok(Some(record))
    }

    fn keepers(&self, reference: Base, summaries: &[Option<NucleotideSummary>; 2]) -> [Option<Pass>; 2] {
        SampleRole::BOTH.map(|role| {
            summaries[role.index()]
                .as_ref()
                .and_then(|summary| self.callers[role.index()].keeper_pass(summary, reference))
        })
    }
}

fn summarize(accumulators: &[Option<Accumulator>; 2]) -> [Option<NucleotideSummary>; 2] {
    [
        accumulators[0].as_ref().map(Accumulator::summarize),
        accumulators[1].as_ref().map(Accumulator::summarize),
    ]
}

/// A non-reference base in either sample, or different base sets between them.
fn disagrees(reference: Base, summaries: &[Option<NucleotideSummary>; 2]) -> bool {
    let bases: Vec<Vec<Base>> = summaries
        .iter()
        .map(|summary| {
            summary
                .as_ref()
                .map(NucleotideSummary::distinct_bases)
                .unwrap_or_default()
        })
        .collect();
    bases.iter().flatten().any(|&base| base != reference) || bases[0] != bases[1]
}

/// Reference context `FLANK` bases either side with `middle` at the position;
/// positions off either end of the contig read as `-`.
fn flanking(contig: &LoadedContig, position: u32, middle: Base) -> String {
    let first = i64::from(position) - i64::from(FLANK);
    let last = i64::from(position) + i64::from(FLANK);
    (first..=last)
        .map(|pos| {
            if pos == i64::from(position) {
                middle.as_char()
            } else {
                u32::try_from(pos)
                    .ok()
                    .and_then(|pos| contig.reference.base_at(pos))
                    .map_or('-', char::from)
            }
        })
        .collect()
}
