use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::genomics::{
    AlignedRead, GenomicPosition, ReadContext, RecordPredicate, RecordSource, SampleRole,
};
use crate::pipeline::shared::{LoadedContig, RunShared};
use crate::pipeline::stats::ProducerStats;
use crate::pipeline::PipelineError;

const PROGRESS_INTERVAL: u64 = 1_000_000;

/// A read with the per-read facts consumers need, computed once.
#[derive(Debug)]
pub(crate) struct TaggedRead {
    pub(crate) read: AlignedRead,
    pub(crate) context: ReadContext,
    pub(crate) passes_filter: bool,
}

#[derive(Debug)]
pub(crate) enum QueueItem {
    Read(TaggedRead),
    /// No more reads for the current contig.
    EndOfContig,
}

/// First 8 bytes of the BLAKE3 digest of a read name; mates collide by construction.
pub(crate) fn name_hash(name: &str) -> u64 {
    let digest = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

pub(crate) struct Producer<'s, 'r, S> {
    role: SampleRole,
    source: S,
    predicate: Option<Arc<dyn RecordPredicate>>,
    sender: Sender<QueueItem>,
    shared: &'s RunShared<'r>,
    include_duplicates: bool,
    max_records_failing_filter: Option<u64>,
    pending: Option<AlignedRead>,
    last: Option<GenomicPosition>,
    stats: ProducerStats,
}

impl<'s, 'r, S: RecordSource> Producer<'s, 'r, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        role: SampleRole,
        source: S,
        predicate: Option<Arc<dyn RecordPredicate>>,
        sender: Sender<QueueItem>,
        shared: &'s RunShared<'r>,
        include_duplicates: bool,
        max_records_failing_filter: Option<u64>,
    ) -> Self {
        Self {
            role,
            source,
            predicate,
            sender,
            shared,
            include_duplicates,
            max_records_failing_filter,
            pending: None,
            last: None,
            stats: ProducerStats::default(),
        }
    }

    /// Stream every contig the reference yields; dropping `self` closes the queue.
    pub(crate) fn run(mut self) -> Result<ProducerStats, PipelineError> {
        let mut current = self.shared.current();
        while let Some(contig) = current {
            self.stream_contig(&contig)?;
            self.send(QueueItem::EndOfContig)?;
            debug!(contig = contig.name(), "end of contig");
            current = self.shared.rendezvous()?;
        }
        let leftover = self.drain_unreferenced()?;
        if leftover > 0 {
            warn!(reads = leftover, "skipped reads on contigs after the last reference contig");
        }
        info!(
            records = self.stats.records_read,
            queued = self.stats.queued(),
            discarded = self.stats.discarded,
            skipped = self.stats.skipped_contig,
            "producer finished"
        );
        Ok(self.stats)
    }

    fn stream_contig(&mut self, contig: &LoadedContig) -> Result<(), PipelineError> {
        loop {
            if self.shared.is_aborted() {
                return Err(PipelineError::Aborted);
            }
            let (read, ordinal) = match self.pending.take() {
                Some(read) => {
                    let ordinal = self.ordinal_of(&read)?;
                    (read, ordinal)
                }
                None => match self.next_usable()? {
                    Some(next) => next,
                    None => return Ok(()),
                },
            };

            if ordinal < contig.ordinal {
                self.stats.skipped_contig += 1;
                continue;
            }
            if ordinal > contig.ordinal {
                self.pending = Some(read);
                return Ok(());
            }
            let tagged = self.tag(read);
            self.send(QueueItem::Read(tagged))?;
        }
    }

    /// Count and discard every read left once the reference is exhausted.
    fn drain_unreferenced(&mut self) -> Result<u64, PipelineError> {
        let mut skipped = u64::from(self.pending.take().is_some());
        while self.next_usable()?.is_some() {
            if self.shared.is_aborted() {
                return Err(PipelineError::Aborted);
            }
            skipped += 1;
        }
        self.stats.skipped_contig += skipped;
        Ok(skipped)
    }

    /// Next read that survives the flag checks, with its contig ordinal.
    fn next_usable(&mut self) -> Result<Option<(AlignedRead, u32)>, PipelineError> {
        loop {
            let Some(read) = self
                .source
                .next_read()
                .map_err(|source| PipelineError::Source {
                    sample: self.role,
                    source,
                })?
            else {
                return Ok(None);
            };
            self.stats.records_read += 1;
            if self.stats.records_read % PROGRESS_INTERVAL == 0 {
                info!(records = self.stats.records_read, contig = %read.chrom, position = read.pos, "reading");
            }
            if !read.flags.is_usable(self.include_duplicates) {
                self.stats.discarded += 1;
                continue;
            }

            let ordinal = self.ordinal_of(&read)?;
            let key = GenomicPosition::new(ordinal, read.pos);
            if self.last.is_some_and(|last| key < last) {
                return Err(PipelineError::UnsortedInput {
                    sample: self.role,
                    read: read.name.to_string(),
                    contig: read.chrom.to_string(),
                    position: read.pos,
                });
            }
            self.last = Some(key);
            return Ok(Some((read, ordinal)));
        }
    }

    fn ordinal_of(&self, read: &AlignedRead) -> Result<u32, PipelineError> {
        self.shared
            .dictionary()
            .ordinal(&read.chrom)
            .ok_or_else(|| PipelineError::UnknownContig {
                sample: self.role,
                read: read.name.to_string(),
                contig: read.chrom.to_string(),
            })
    }

    fn tag(&mut self, read: AlignedRead) -> TaggedRead {
        let passes_filter = self
            .predicate
            .as_ref()
            .map_or(true, |predicate| predicate.accepts(&read));
        if passes_filter {
            self.stats.passed_filter += 1;
        } else {
            self.stats.failed_filter += 1;
        }
        let context = ReadContext {
            strand: read.strand(),
            start: read.pos,
            end: read.end(),
            name_hash: name_hash(&read.name),
        };
        TaggedRead {
            read,
            context,
            passes_filter,
        }
    }

    fn send(&mut self, item: QueueItem) -> Result<(), PipelineError> {
        self.check_predicate()?;
        self.sender.send(item).map_err(|_| PipelineError::Aborted)
    }

    /// A predicate that has rejected every one of many reads is treated as misconfigured.
    fn check_predicate(&self) -> Result<(), PipelineError> {
        let Some(limit) = self.max_records_failing_filter else {
            return Ok(());
        };
        if self.predicate.is_some() && self.stats.passed_filter == 0 && self.stats.failed_filter >= limit {
            return Err(ConfigError::IneffectivePredicate {
                role: self.role,
                records: self.stats.failed_filter,
            }
            .into());
        }
        Ok(())
    }
}
