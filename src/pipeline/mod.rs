//! Concurrent accumulation pipeline.
//!
//! Five threads cooperate per run: one producer and one consumer per
//! sample plus a shared cleaner. Producers stream reads into bounded
//! queues, consumers pile them up into per-sample accumulator tables and
//! publish watermarks, and the cleaner finalizes every position both
//! watermarks have passed. All five meet at a phase barrier at the end of
//! each reference contig, where the last arrival loads the next contig.
//!
//! After the threads join, records are classified, adjacent calls merged
//! into compound records, then everything is annotated and scored on the
//! calling thread (significance uses its own small pool).

mod barrier;
mod cleaner;
mod consumer;
mod producer;
mod shared;
mod stats;
mod table;
mod watermark;
mod window;

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use thiserror::Error;
use tracing::{info, info_span};

use crate::calling::{
    classify, merge_compounds, Annotator, Classification, GermlineIndex, KnownVariantIndex,
    PositionRecordStore, ReadEvidence, RecordError, SignificanceStats, SignificanceTester,
};
use crate::config::{CallerConfig, ConfigError};
use crate::genomics::{
    ContigDictionary, RecordPredicate, RecordSource, ReferenceProvider, SampleRole, SourceError,
};

use cleaner::{Cleaner, CleanerOutput};
use consumer::Consumer;
use producer::Producer;
use shared::{AbortOnPanic, RunShared};

pub use stats::{CleanerStats, ConsumerStats, ProducerStats};

/// Capacity of the consumer→cleaner signal channel.
const SIGNAL_CAPACITY: usize = 64;

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Read source failure.
    #[error("failed to read {sample} alignments: {source}")]
    Source {
        /// Failing sample.
        sample: SampleRole,
        /// Underlying error.
        #[source]
        source: SourceError,
    },

    /// Reference provider failure.
    #[error("failed to read reference: {0}")]
    Reference(#[source] SourceError),

    /// The two read sources declare different contigs.
    #[error("control and test contig dictionaries differ at entry {index}")]
    ContigDictionaryMismatch {
        /// First differing entry.
        index: usize,
    },

    /// The reference names a contig the read sources do not declare.
    #[error("reference contig {contig} is not declared by the read sources")]
    ContigNotInDictionary {
        /// Reference contig name.
        contig: String,
    },

    /// The reference yields contigs out of dictionary order.
    #[error("reference contig {contig} follows {previous} but precedes it in the read sources")]
    ReferenceOutOfOrder {
        /// Offending contig.
        contig: String,
        /// Contig loaded before it.
        previous: String,
    },

    /// Reference and read sources disagree on a contig's length.
    #[error("reference contig {contig} has {actual} bases but the read sources declare {declared}")]
    ContigLengthMismatch {
        /// Contig name.
        contig: String,
        /// Length in the read sources.
        declared: u32,
        /// Length of the reference sequence.
        actual: u32,
    },

    /// A read names a contig missing from the dictionary.
    #[error("{sample} read {read} is on undeclared contig {contig}")]
    UnknownContig {
        /// Sample of the read.
        sample: SampleRole,
        /// Read name.
        read: String,
        /// Contig name.
        contig: String,
    },

    /// A read starts before its predecessor.
    #[error("{sample} input is not coordinate-sorted: read {read} at {contig}:{position}")]
    UnsortedInput {
        /// Sample of the read.
        sample: SampleRole,
        /// Read name.
        read: String,
        /// Contig name.
        contig: String,
        /// Alignment start.
        position: u32,
    },

    /// A finalized position lies outside the loaded reference.
    #[error("position {position} lies outside reference contig {contig} of length {length}")]
    PositionOutOfBounds {
        /// Contig name.
        contig: String,
        /// Offending position.
        position: u32,
        /// Reference length.
        length: u32,
    },

    /// Accumulators survived the end of their contig.
    #[error("{count} {sample} accumulators were never finalized on {contig}")]
    LeakedAccumulators {
        /// Sample owning the entries.
        sample: SampleRole,
        /// Contig being closed.
        contig: String,
        /// Surviving entries.
        count: usize,
    },

    /// Record store invariant violated.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// A worker thread panicked.
    #[error("{worker} thread panicked")]
    WorkerPanicked {
        /// Role of the thread.
        worker: &'static str,
    },

    /// The run was cancelled because another thread failed.
    #[error("run aborted after another thread failed")]
    Aborted,
}

/// Counters gathered over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Producer counters, control then test.
    pub producers: [ProducerStats; 2],
    /// Consumer counters, control then test.
    pub consumers: [ConsumerStats; 2],
    /// Cleaner counters.
    pub cleaner: CleanerStats,
    /// Records classified SOMATIC, compound records included.
    pub somatic: usize,
    /// Records classified GERMLINE.
    pub germline: usize,
    /// Records left unclassified.
    pub unclassified: usize,
    /// Compound records merged from adjacent positions.
    pub compound: usize,
    /// Records without any filter code.
    pub passing: usize,
    /// Significance tester counters.
    pub significance: SignificanceStats,
}

impl RunSummary {
    /// Accumulator entries created by both consumers.
    pub fn accumulators_created(&self) -> u64 {
        self.consumers.iter().map(|stats| stats.accumulators_created).sum()
    }

    /// Accumulator entries removed by the cleaner.
    pub fn accumulators_finalized(&self) -> u64 {
        self.cleaner.accumulators_finalized
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutput {
    /// Final records in genomic order.
    pub records: PositionRecordStore,
    /// Run counters.
    pub summary: RunSummary,
}

/// Paired control/test calling pipeline.
#[derive(Clone)]
pub struct Pipeline {
    config: CallerConfig,
    predicates: [Option<Arc<dyn RecordPredicate>>; 2],
    germline: Option<Arc<dyn GermlineIndex>>,
    known_variants: Option<Arc<dyn KnownVariantIndex>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("control_predicate", &self.predicates[0].is_some())
            .field("test_predicate", &self.predicates[1].is_some())
            .field("germline", &self.germline.is_some())
            .field("known_variants", &self.known_variants.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Pipeline without predicates or cross-reference indexes.
    pub fn new(config: CallerConfig) -> Self {
        Self {
            config,
            predicates: [None, None],
            germline: None,
            known_variants: None,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &CallerConfig {
        &self.config
    }

    /// Reads of `role` failing `predicate` only reach the unfiltered tallies.
    pub fn with_predicate(mut self, role: SampleRole, predicate: Arc<dyn RecordPredicate>) -> Self {
        self.predicates[role.index()] = Some(predicate);
        self
    }

    /// Consult `index` for the `GERM` filter.
    pub fn with_germline_index(mut self, index: Arc<dyn GermlineIndex>) -> Self {
        self.germline = Some(index);
        self
    }

    /// Consult `index` for record identifiers.
    pub fn with_known_variants(mut self, index: Arc<dyn KnownVariantIndex>) -> Self {
        self.known_variants = Some(index);
        self
    }

    /// Run the full pipeline over one control and one test source.
    pub fn run<C, T, R>(&self, control: C, test: T, reference: R) -> Result<RunOutput, PipelineError>
    where
        C: RecordSource + Send,
        T: RecordSource + Send,
        R: ReferenceProvider + Send,
    {
        let config = self.config.clone().validate()?;
        let dictionary = ContigDictionary::new(control.contigs().to_vec());
        if let Some(index) = dictionary.first_mismatch(test.contigs()) {
            return Err(PipelineError::ContigDictionaryMismatch { index });
        }
        info!(contigs = dictionary.len(), "starting run");

        let shared = RunShared::new(dictionary, Box::new(reference));
        shared.advance()?;

        let (control_tx, control_rx) = bounded(config.queue_capacity);
        let (test_tx, test_rx) = bounded(config.queue_capacity);
        let (signal_tx, signal_rx) = bounded(SIGNAL_CAPACITY);

        let control_producer = Producer::new(
            SampleRole::Control,
            control,
            self.predicates[SampleRole::Control.index()].clone(),
            control_tx,
            &shared,
            config.include_duplicates,
            config.max_records_failing_filter,
        );
        let test_producer = Producer::new(
            SampleRole::Test,
            test,
            self.predicates[SampleRole::Test.index()].clone(),
            test_tx,
            &shared,
            config.include_duplicates,
            config.max_records_failing_filter,
        );
        let consumers = [(SampleRole::Control, control_rx), (SampleRole::Test, test_rx)].map(
            |(role, receiver)| {
                Consumer::new(
                    role,
                    receiver,
                    signal_tx.clone(),
                    &shared,
                    config.min_base_quality,
                    config.sweep_interval,
                )
            },
        );
        // Consumers own the only senders, so the cleaner sees a disconnect if both fail.
        drop(signal_tx);
        let cleaner = Cleaner::new(signal_rx, &shared, &config);

        let (producer_results, consumer_results, cleaner_result) = thread::scope(|scope| {
            let shared = &shared;
            let control_producer = scope.spawn(move || {
                let _span = info_span!("producer", sample = %SampleRole::Control).entered();
                let _guard = AbortOnPanic(shared);
                supervised(shared, control_producer.run())
            });
            let test_producer = scope.spawn(move || {
                let _span = info_span!("producer", sample = %SampleRole::Test).entered();
                let _guard = AbortOnPanic(shared);
                supervised(shared, test_producer.run())
            });
            let consumers = consumers.map(move |consumer| {
                scope.spawn(move || {
                    let _span = info_span!("consumer", sample = %consumer.role()).entered();
                    let _guard = AbortOnPanic(shared);
                    supervised(shared, consumer.run())
                })
            });
            let cleaner = scope.spawn(move || {
                let _span = info_span!("cleaner").entered();
                let _guard = AbortOnPanic(shared);
                supervised(shared, cleaner.run())
            });

            (
                [join(control_producer, "producer"), join(test_producer, "producer")],
                consumers.map(|handle| join(handle, "consumer")),
                join(cleaner, "cleaner"),
            )
        });

        if producer_results.iter().any(Result::is_err)
            || consumer_results.iter().any(Result::is_err)
            || cleaner_result.is_err()
        {
            return Err(first_error(producer_results, consumer_results, cleaner_result));
        }

        let mut summary = RunSummary::default();
        for (slot, result) in summary.producers.iter_mut().zip(producer_results) {
            *slot = result?;
        }
        for (slot, result) in summary.consumers.iter_mut().zip(consumer_results) {
            *slot = result?;
        }
        let CleanerOutput {
            mut records,
            evidence,
            stats,
        } = cleaner_result?;
        summary.cleaner = stats;

        self.finish(&config, &mut records, &evidence, &mut summary)?;
        info!(
            records = records.len(),
            compound = summary.compound,
            somatic = summary.somatic,
            germline = summary.germline,
            passing = summary.passing,
            "run complete"
        );
        Ok(RunOutput { records, summary })
    }

    /// Classify, merge, annotate, score and number the finalized records.
    fn finish(
        &self,
        config: &CallerConfig,
        records: &mut PositionRecordStore,
        evidence: &ReadEvidence,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let mut annotator = Annotator::new(&config.annotation);
        if let Some(index) = &self.germline {
            annotator = annotator.with_germline_index(index.as_ref());
        }
        if let Some(index) = &self.known_variants {
            annotator = annotator.with_known_variants(index.as_ref());
        }

        for record in records.iter_mut() {
            let classification = classify(record);
            record.classify(classification)?;
        }
        let rules = SampleRole::BOTH.map(|role| config.rules(role));
        summary.compound = merge_compounds(records, evidence, rules)?;

        let mut tally = |classification: Option<Classification>, passes: bool| {
            match classification {
                Some(Classification::Somatic) => summary.somatic += 1,
                Some(Classification::Germline) => summary.germline += 1,
                None => summary.unclassified += 1,
            }
            if passes {
                summary.passing += 1;
            }
        };
        for record in records.iter_mut() {
            annotator.annotate(record);
            tally(record.classification(), record.passes());
        }
        for record in records.compounds_mut() {
            annotator.annotate_compound(record);
            tally(record.classification(), record.passes());
        }

        summary.significance = SignificanceTester::new(config.significance).run(records.iter_mut());
        if let Some(prefix) = &config.mutation_id_prefix {
            records.assign_ids(prefix);
        }
        Ok(())
    }
}

/// Break the barrier for everyone else when a role fails.
fn supervised<T>(shared: &RunShared<'_>, result: Result<T, PipelineError>) -> Result<T, PipelineError> {
    if result.is_err() {
        shared.abort();
    }
    result
}

fn join<T>(
    handle: thread::ScopedJoinHandle<'_, Result<T, PipelineError>>,
    worker: &'static str,
) -> Result<T, PipelineError> {
    handle
        .join()
        .map_err(|_| PipelineError::WorkerPanicked { worker })
        .and_then(|result| result)
}

/// The root cause: the first error that is not a knock-on abort.
fn first_error<P, C, K>(
    producers: [Result<P, PipelineError>; 2],
    consumers: [Result<C, PipelineError>; 2],
    cleaner: Result<K, PipelineError>,
) -> PipelineError {
    let errors = producers
        .into_iter()
        .filter_map(Result::err)
        .chain(consumers.into_iter().filter_map(Result::err))
        .chain(cleaner.err());
    let mut aborted = None;
    for error in errors {
        match error {
            PipelineError::Aborted => aborted = Some(error),
            error => return error,
        }
    }
    aborted.unwrap_or(PipelineError::Aborted)
}
