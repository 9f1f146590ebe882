use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info};

use crate::genomics::SampleRole;
use crate::pipeline::cleaner::CleanerSignal;
use crate::pipeline::producer::{QueueItem, TaggedRead};
use crate::pipeline::shared::{LoadedContig, RunShared};
use crate::pipeline::stats::ConsumerStats;
use crate::pipeline::PipelineError;

pub(crate) struct Consumer<'s, 'r> {
    role: SampleRole,
    receiver: Receiver<QueueItem>,
    signals: Sender<CleanerSignal>,
    shared: &'s RunShared<'r>,
    min_base_quality: u8,
    sweep_interval: usize,
    since_signal: usize,
    stats: ConsumerStats,
}

impl<'s, 'r> Consumer<'s, 'r> {
    pub(crate) fn new(
        role: SampleRole,
        receiver: Receiver<QueueItem>,
        signals: Sender<CleanerSignal>,
        shared: &'s RunShared<'r>,
        min_base_quality: u8,
        sweep_interval: usize,
    ) -> Self {
        Self {
            role,
            receiver,
            signals,
            shared,
            min_base_quality,
            sweep_interval,
            since_signal: 0,
            stats: ConsumerStats::default(),
        }
    }

    pub(crate) fn role(&self) -> SampleRole {
        self.role
    }

    pub(crate) fn run(mut self) -> Result<ConsumerStats, PipelineError> {
        let Some(mut contig) = self.shared.current() else {
            return Ok(self.stats);
        };
        loop {
            // A closed queue before the last barrier means the producer failed.
            match self.receiver.recv().map_err(|_| PipelineError::Aborted)? {
                QueueItem::Read(tagged) => {
                    self.apply(&contig, &tagged);
                    self.nudge_cleaner()?;
                }
                QueueItem::EndOfContig => {
                    self.shared.watermark(self.role).advance(contig.ordinal, u32::MAX);
                    self.signals
                        .send(CleanerSignal::ContigDone(self.role))
                        .map_err(|_| PipelineError::Aborted)?;
                    match self.shared.rendezvous()? {
                        Some(next) => contig = next,
                        None => break,
                    }
                }
            }
        }
        info!(
            reads = self.stats.reads,
            bases = self.stats.bases,
            created = self.stats.accumulators_created,
            "consumer finished"
        );
        Ok(self.stats)
    }

    /// Walk the CIGAR and add every aligned base to the table, then publish
    /// the read's start as this sample's watermark.
    fn apply(&mut self, contig: &LoadedContig, tagged: &TaggedRead) {
        let read = &tagged.read;
        let table = self.shared.table(self.role);
        let mut ref_offset = 0u32;
        let mut read_offset = 0usize;

        for op in &read.cigar {
            match (op.kind.consumes_reference(), op.kind.consumes_read()) {
                (true, true) => {
                    for i in 0..op.len {
                        let position = read.pos + ref_offset + i;
                        let offset = read_offset + i as usize;
                        if position == 0 || position > contig.len() {
                            self.stats.beyond_contig += 1;
                            continue;
                        }
                        let Some(base) = read.base_at(offset) else {
                            continue;
                        };
                        let quality = read.quality_at(offset).unwrap_or(0);
                        let qualifies = tagged.passes_filter && quality >= self.min_base_quality;
                        let created = table.update(position, |acc| {
                            if qualifies {
                                acc.observe(base, quality, &tagged.context);
                            } else {
                                acc.observe_unfiltered(base);
                            }
                        });
                        if created {
                            self.stats.accumulators_created += 1;
                        }
                        self.stats.bases += 1;
                    }
                    ref_offset += op.len;
                    read_offset += op.len as usize;
                }
                (true, false) => ref_offset += op.len,
                (false, true) => read_offset += op.len as usize,
                (false, false) => {}
            }
        }

        if ref_offset > 0 && read.pos + ref_offset - 1 > contig.len() {
            debug!(read = %read.name, contig = contig.name(), end = read.pos + ref_offset - 1, "read extends past contig end");
        }
        self.stats.reads += 1;
        self.shared.watermark(self.role).advance(contig.ordinal, read.pos);
    }

    fn nudge_cleaner(&mut self) -> Result<(), PipelineError> {
        self.since_signal += 1;
        if self.since_signal < self.sweep_interval {
            return Ok(());
        }
        self.since_signal = 0;
        match self.signals.try_send(CleanerSignal::Advanced) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::Aborted),
        }
    }
}
