use std::thread;

use crossbeam_channel::unbounded;
use statrs::function::factorial::ln_factorial;
use tracing::{debug, warn};

use crate::calling::{Classification, PositionRecord};
use crate::config::SignificanceConfig;

/// Relative slack when comparing table probabilities to the observed one.
const RELATIVE_TOLERANCE: f64 = 1e-7;

/// 2×2 table of (control ref, control alt, test ref, test alt) read counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContingencyTable {
    /// Control reads supporting the reference.
    pub control_ref: u32,
    /// Control reads supporting the alt.
    pub control_alt: u32,
    /// Test reads supporting the reference.
    pub test_ref: u32,
    /// Test reads supporting the alt.
    pub test_alt: u32,
}

impl ContingencyTable {
    /// Construct a table.
    pub fn new(control_ref: u32, control_alt: u32, test_ref: u32, test_alt: u32) -> Self {
        Self {
            control_ref,
            control_alt,
            test_ref,
            test_alt,
        }
    }

    /// Sum of all four cells.
    pub fn total(&self) -> u64 {
        u64::from(self.control_ref) + u64::from(self.control_alt) + u64::from(self.test_ref) + u64::from(self.test_alt)
    }

    /// Build the table for a record's acquired alt: the first test alt the
    /// control genotype lacks, else the record's first alt.
    pub fn from_record(record: &PositionRecord) -> Option<Self> {
        let acquired = record.test_genotype.and_then(|test| {
            test.alt_alleles(record.reference)
                .into_iter()
                .find(|&alt| !record.control_genotype.is_some_and(|control| control.contains(alt)))
        });
        let alt = acquired.or_else(|| record.alts.first().copied())?;
        let control = record.control.as_ref()?;
        let test = record.test.as_ref()?;
        Some(Self::new(
            control.tally(record.reference).count(),
            control.tally(alt).count(),
            test.tally(record.reference).count(),
            test.tally(alt).count(),
        ))
    }

    /// Two-tailed Fisher's exact p-value.
    pub fn fisher_two_tailed(&self) -> f64 {
        fisher_exact_two_tailed(self.control_ref, self.control_alt, self.test_ref, self.test_alt)
    }
}

/// Two-tailed Fisher's exact test for the table `[[a, b], [c, d]]`.
///
/// Sums the hypergeometric probabilities of every table with the same
/// margins that is no more likely than the observed one.
pub fn fisher_exact_two_tailed(a: u32, b: u32, c: u32, d: u32) -> f64 {
    let (a, b, c, d) = (u64::from(a), u64::from(b), u64::from(c), u64::from(d));
    let row1 = a + b;
    let row2 = c + d;
    let col1 = a + c;
    let col2 = b + d;
    let n = row1 + row2;
    if n == 0 {
        return 1.0;
    }

    let margins = ln_factorial(row1) + ln_factorial(row2) + ln_factorial(col1) + ln_factorial(col2) - ln_factorial(n);
    let ln_p = |x: u64| {
        margins - ln_factorial(x) - ln_factorial(row1 - x) - ln_factorial(col1 - x) - ln_factorial(row2 + x - col1)
    };

    let observed = ln_p(a).exp();
    let low = col1.saturating_sub(row2);
    let high = row1.min(col1);
    let p: f64 = (low..=high)
        .map(|x| ln_p(x).exp())
        .filter(|&p| p <= observed * (1.0 + RELATIVE_TOLERANCE))
        .sum();
    p.min(1.0)
}

/// Counts reported by a significance run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignificanceStats {
    /// Records that received a probability.
    pub tested: usize,
    /// Records skipped for excessive combined coverage.
    pub skipped: usize,
}

/// Computes p-values for somatic records on a small worker pool.
#[derive(Debug, Clone, Copy)]
pub struct SignificanceTester {
    config: SignificanceConfig,
}

impl SignificanceTester {
    /// Tester with the given pool size and coverage guard.
    pub fn new(config: SignificanceConfig) -> Self {
        Self { config }
    }

    /// Fill `probability` on every somatic record with a determined alt.
    ///
    /// Records are handed out through a shared queue; each is owned by the
    /// one worker that received it.
    pub fn run<'r, I>(&self, records: I) -> SignificanceStats
    where
        I: IntoIterator<Item = &'r mut PositionRecord>,
    {
        let (sender, receiver) = unbounded::<(&'r mut PositionRecord, ContingencyTable)>();
        let mut queued = 0usize;
        let mut skipped = 0usize;
        for record in records {
            if record.classification() != Some(Classification::Somatic) {
                continue;
            }
            let Some(table) = ContingencyTable::from_record(record) else {
                continue;
            };
            if table.total() > self.config.max_combined_coverage {
                warn!(
                    contig = %record.contig,
                    position = record.position(),
                    coverage = table.total(),
                    "skipping significance test for high combined coverage"
                );
                skipped += 1;
                continue;
            }
            // Receiver is alive until the scope below ends.
            if sender.send((record, table)).is_ok() {
                queued += 1;
            }
        }
        drop(sender);

        let workers = self.config.workers.max(1);
        thread::scope(|scope| {
            for worker in 0..workers {
                let receiver = receiver.clone();
                scope.spawn(move || {
                    let mut done = 0usize;
                    for (record, table) in receiver.iter() {
                        record.probability = Some(table.fisher_two_tailed());
                        done += 1;
                    }
                    debug!(worker, done, "significance worker finished");
                });
            }
        });

        SignificanceStats {
            tested: queued,
            skipped,
        }
    }
}
