use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::genomics::{ContigDictionary, ReferenceContig, ReferenceProvider, SampleRole};
use crate::pipeline::barrier::{Arrival, PhaseBarrier};
use crate::pipeline::table::AccumulatorTable;
use crate::pipeline::watermark::{self, Watermark};
use crate::pipeline::PipelineError;

/// Producers, consumers and the cleaner.
pub(crate) const PARTIES: usize = 5;

/// Reference contig currently being processed.
#[derive(Debug)]
pub(crate) struct LoadedContig {
    pub(crate) ordinal: u32,
    pub(crate) reference: ReferenceContig,
}

impl LoadedContig {
    pub(crate) fn name(&self) -> &str {
        &self.reference.name
    }

    pub(crate) fn len(&self) -> u32 {
        self.reference.len()
    }
}

/// State shared by every thread of one run.
pub(crate) struct RunShared<'r> {
    barrier: PhaseBarrier,
    current: RwLock<Option<Arc<LoadedContig>>>,
    reference: Mutex<Box<dyn ReferenceProvider + Send + 'r>>,
    dictionary: ContigDictionary,
    tables: [AccumulatorTable; 2],
    watermarks: [Watermark; 2],
    aborted: AtomicBool,
}

impl<'r> RunShared<'r> {
    pub(crate) fn new(
        dictionary: ContigDictionary,
        reference: Box<dyn ReferenceProvider + Send + 'r>,
    ) -> Self {
        Self {
            barrier: PhaseBarrier::new(PARTIES),
            current: RwLock::new(None),
            reference: Mutex::new(reference),
            dictionary,
            tables: [AccumulatorTable::new(), AccumulatorTable::new()],
            watermarks: [Watermark::new(), Watermark::new()],
            aborted: AtomicBool::new(false),
        }
    }

    pub(crate) fn dictionary(&self) -> &ContigDictionary {
        &self.dictionary
    }

    pub(crate) fn table(&self, role: SampleRole) -> &AccumulatorTable {
        &self.tables[role.index()]
    }

    pub(crate) fn watermark(&self, role: SampleRole) -> &Watermark {
        &self.watermarks[role.index()]
    }

    /// Exclusive end of the positions both samples have moved past.
    pub(crate) fn cross_sample(&self, ordinal: u32) -> u32 {
        watermark::cross_sample(&self.watermarks, ordinal)
    }

    /// Live entries across both tables.
    pub(crate) fn live_entries(&self) -> usize {
        self.tables.iter().map(AccumulatorTable::len).sum()
    }

    pub(crate) fn current(&self) -> Option<Arc<LoadedContig>> {
        self.current.read().clone()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Flag the run as failed and release every thread parked at the barrier.
    pub(crate) fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            debug!("aborting run");
        }
        self.barrier.abort();
    }

    /// Wait for every role to finish the current contig.
    ///
    /// The last thread to arrive loads the next reference contig before
    /// anyone resumes. `None` means the reference is exhausted.
    pub(crate) fn rendezvous(&self) -> Result<Option<Arc<LoadedContig>>, PipelineError> {
        match self.barrier.arrive().map_err(|_| PipelineError::Aborted)? {
            Arrival::Leader(generation) => match self.advance() {
                Ok(()) => self.barrier.release(generation),
                Err(err) => {
                    self.abort();
                    return Err(err);
                }
            },
            Arrival::Follower => {}
        }
        if self.is_aborted() {
            return Err(PipelineError::Aborted);
        }
        Ok(self.current())
    }

    /// Phase transition: verify nothing leaked, load the next contig and
    /// move both watermarks onto it.
    pub(crate) fn advance(&self) -> Result<(), PipelineError> {
        let previous = self.current();
        if let Some(contig) = &previous {
            self.check_no_leaks(contig.name())?;
        }

        let next = self
            .reference
            .lock()
            .next_contig()
            .map_err(PipelineError::Reference)?;
        let loaded = match next {
            Some(reference) => Some(Arc::new(self.load(reference, previous.as_deref())?)),
            None => {
                debug!("reference exhausted");
                None
            }
        };
        *self.current.write() = loaded;
        Ok(())
    }

    fn load(
        &self,
        reference: ReferenceContig,
        previous: Option<&LoadedContig>,
    ) -> Result<LoadedContig, PipelineError> {
        let ordinal = self.dictionary.ordinal(&reference.name).ok_or_else(|| {
            PipelineError::ContigNotInDictionary {
                contig: reference.name.to_string(),
            }
        })?;
        if let Some(previous) = previous.filter(|previous| ordinal <= previous.ordinal) {
            return Err(PipelineError::ReferenceOutOfOrder {
                contig: reference.name.to_string(),
                previous: previous.name().to_string(),
            });
        }
        let declared = self.dictionary.get(ordinal).map_or(0, |info| info.length);
        if declared != reference.len() {
            return Err(PipelineError::ContigLengthMismatch {
                contig: reference.name.to_string(),
                declared,
                actual: reference.len(),
            });
        }

        for mark in &self.watermarks {
            mark.reset_to(ordinal);
        }
        info!(contig = %reference.name, ordinal, length = reference.len(), "loaded reference contig");
        Ok(LoadedContig { ordinal, reference })
    }

    /// Every accumulator of a finished contig must have been finalized.
    pub(crate) fn check_no_leaks(&self, contig: &str) -> Result<(), PipelineError> {
        for role in SampleRole::BOTH {
            let table = self.table(role);
            if !table.is_empty() {
                return Err(PipelineError::LeakedAccumulators {
                    sample: role,
                    contig: contig.to_string(),
                    count: table.len(),
                });
            }
        }
        Ok(())
    }
}

/// Breaks the barrier if the owning thread unwinds, so its peers cannot
/// stay parked forever.
pub(crate) struct AbortOnPanic<'s, 'r>(pub(crate) &'s RunShared<'r>);

impl Drop for AbortOnPanic<'_, '_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}
