//! Per-position evidence for one sample.
//!
//! An [`Accumulator`] keeps every qualifying base observation at a position
//! so that overlapping mates can be collapsed before the evidence is frozen
//! into a [`NucleotideSummary`]. The summary is what the genotype caller,
//! annotator and significance tester work from.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::genomics::{Base, Strand};

const NUM_BASES: usize = 4; // A, C, G, T

/// Distance from either alignment end within which a base counts as end-of-read.
pub const END_OF_READ_DISTANCE: u32 = 5;

/// Per-read facts shared by every position the read touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadContext {
    /// Alignment strand.
    pub strand: Strand,
    /// 1-based alignment start.
    pub start: u32,
    /// 1-based inclusive alignment end.
    pub end: u32,
    /// Hash of the read name; mates share it.
    pub name_hash: u64,
}

impl ReadContext {
    /// Physical fragment start: the 5' end of the read on its strand.
    pub fn fragment_start(&self) -> u32 {
        match self.strand {
            Strand::Forward => self.start,
            Strand::Reverse => self.end,
        }
    }

    fn is_end_of_read(&self, position: u32) -> bool {
        position < self.start + END_OF_READ_DISTANCE || position + END_OF_READ_DISTANCE > self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observation {
    base: Base,
    quality: u8,
    strand: Strand,
    fragment_start: u32,
    end_of_read: bool,
    name_hash: u64,
}

/// One read's base at a position, keyed by the read name hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBase {
    /// Hash of the read name.
    pub name_hash: u64,
    /// Called base.
    pub base: Base,
    /// Alignment strand.
    pub strand: Strand,
    /// Physical fragment start.
    pub fragment_start: u32,
}

/// Evidence gathered at one reference position for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    /// 1-based position of the pileup.
    pub position: u32,
    observations: Vec<Observation>,
    unfiltered: [u32; NUM_BASES],
    n_count: u32,
}

impl Accumulator {
    /// Empty accumulator for `position`.
    pub fn new(position: u32) -> Self {
        Self {
            position,
            observations: Vec::new(),
            unfiltered: [0; NUM_BASES],
            n_count: 0,
        }
    }

    /// Record a base from a read that passed the predicate with sufficient base quality.
    pub fn observe(&mut self, base: u8, quality: u8, read: &ReadContext) {
        match Base::from_ascii(base) {
            Some(base) => self.observations.push(Observation {
                base,
                quality,
                strand: read.strand,
                fragment_start: read.fragment_start(),
                end_of_read: read.is_end_of_read(self.position),
                name_hash: read.name_hash,
            }),
            None => self.n_count += 1,
        }
    }

    /// Record a base that failed the predicate or the base-quality floor.
    pub fn observe_unfiltered(&mut self, base: u8) {
        if let Some(base) = Base::from_ascii(base) {
            self.unfiltered[base.index()] += 1;
        }
    }

    /// Qualifying bases plus `N` calls.
    pub fn coverage(&self) -> u32 {
        self.observations.len() as u32 + self.n_count
    }

    /// Whether nothing at all was recorded.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.n_count == 0 && self.unfiltered.iter().all(|&c| c == 0)
    }

    /// Collapse observations contributed by both mates of one fragment.
    ///
    /// Agreeing mates keep a single observation; disagreeing mates are both
    /// dropped. Returns the number of observations removed.
    pub fn remove_overlapping_mates(&mut self) -> usize {
        let mut seen: HashMap<u64, (Base, usize)> = HashMap::with_capacity(self.observations.len());
        for obs in &self.observations {
            seen.entry(obs.name_hash)
                .and_modify(|(base, conflicts)| {
                    if *base != obs.base {
                        *conflicts = usize::MAX;
                    } else if *conflicts != usize::MAX {
                        *conflicts += 1;
                    }
                })
                .or_insert((obs.base, 0));
        }
        if seen.values().all(|&(_, extra)| extra == 0) {
            return 0;
        }

        let before = self.observations.len();
        let mut kept: HashMap<u64, bool> = HashMap::new();
        self.observations.retain(|obs| match seen.get(&obs.name_hash) {
            Some(&(_, usize::MAX)) => false,
            Some(&(_, 0)) | None => true,
            Some(_) => !std::mem::replace(kept.entry(obs.name_hash).or_insert(false), true),
        });
        before - self.observations.len()
    }

    /// Qualifying bases read by read, in arrival order.
    pub fn read_bases(&self) -> Vec<ReadBase> {
        self.observations
            .iter()
            .map(|obs| ReadBase {
                name_hash: obs.name_hash,
                base: obs.base,
                strand: obs.strand,
                fragment_start: obs.fragment_start,
            })
            .collect()
    }

    /// Freeze the evidence into per-base tallies.
    pub fn summarize(&self) -> NucleotideSummary {
        let mut summary = NucleotideSummary {
            unfiltered: self.unfiltered,
            n_count: self.n_count,
            ..NucleotideSummary::default()
        };
        let mut starts: [BTreeSet<(u32, bool)>; NUM_BASES] = Default::default();
        for obs in &self.observations {
            let tally = &mut summary.bases[obs.base.index()];
            let strand = match obs.strand {
                Strand::Forward => &mut tally.forward,
                Strand::Reverse => &mut tally.reverse,
            };
            strand.count += 1;
            strand.quality_sum += u32::from(obs.quality);
            if obs.end_of_read {
                strand.end_of_read += 1;
            }
            starts[obs.base.index()].insert((obs.fragment_start, obs.strand == Strand::Forward));
        }
        for (tally, set) in summary.bases.iter_mut().zip(starts.iter()) {
            tally.novel_starts = set.len() as u32;
        }
        summary
    }
}

/// Counts for one base on one strand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct StrandTally {
    /// Observations.
    pub count: u32,
    /// Sum of Phred base qualities.
    pub quality_sum: u32,
    /// Observations within [`END_OF_READ_DISTANCE`] of a read end.
    pub end_of_read: u32,
}

/// Both-strand counts for one base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct BaseTally {
    /// Forward strand evidence.
    pub forward: StrandTally,
    /// Reverse strand evidence.
    pub reverse: StrandTally,
    /// Distinct (fragment start, strand) pairs.
    pub novel_starts: u32,
}

impl BaseTally {
    /// Observations on both strands.
    pub fn count(&self) -> u32 {
        self.forward.count + self.reverse.count
    }

    /// Quality sum on both strands.
    pub fn quality_sum(&self) -> u32 {
        self.forward.quality_sum + self.reverse.quality_sum
    }

    /// End-of-read observations on both strands.
    pub fn end_of_read(&self) -> u32 {
        self.forward.end_of_read + self.reverse.end_of_read
    }

    /// Seen at least once on each strand.
    pub fn on_both_strands(&self) -> bool {
        self.forward.count > 0 && self.reverse.count > 0
    }
}

/// Frozen per-sample evidence at one position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct NucleotideSummary {
    /// Tallies indexed by [`Base::index`].
    pub bases: [BaseTally; NUM_BASES],
    /// Bases from predicate-failing reads or below the base-quality floor.
    pub unfiltered: [u32; NUM_BASES],
    /// `N` calls from qualifying reads.
    pub n_count: u32,
}

impl NucleotideSummary {
    /// Tally for one base.
    pub fn tally(&self, base: Base) -> &BaseTally {
        &self.bases[base.index()]
    }

    /// Qualifying bases plus `N` calls.
    pub fn coverage(&self) -> u32 {
        self.bases.iter().map(BaseTally::count).sum::<u32>() + self.n_count
    }

    /// Forward-strand coverage over called bases.
    pub fn forward_coverage(&self) -> u32 {
        self.bases.iter().map(|b| b.forward.count).sum()
    }

    /// Reverse-strand coverage over called bases.
    pub fn reverse_coverage(&self) -> u32 {
        self.bases.iter().map(|b| b.reverse.count).sum()
    }

    /// Quality sum over all called bases.
    pub fn total_quality(&self) -> u32 {
        self.bases.iter().map(BaseTally::quality_sum).sum()
    }

    /// Unfiltered tally for one base.
    pub fn unfiltered(&self, base: Base) -> u32 {
        self.unfiltered[base.index()]
    }

    /// Total unfiltered bases.
    pub fn unfiltered_coverage(&self) -> u32 {
        self.unfiltered.iter().sum()
    }

    /// Whether `base` was observed in qualifying reads.
    pub fn contains(&self, base: Base) -> bool {
        self.tally(base).count() > 0
    }

    /// Observed bases in index order.
    pub fn distinct_bases(&self) -> Vec<Base> {
        Base::ALL.into_iter().filter(|&b| self.contains(b)).collect()
    }

    /// Non-reference base with the most observations; ties go to the later base.
    pub fn largest_variant(&self, reference: Base) -> Option<Base> {
        Base::ALL
            .into_iter()
            .filter(|&b| b != reference && self.contains(b))
            .fold(None, |best: Option<Base>, b| match best {
                Some(current) if self.tally(current).count() > self.tally(b).count() => Some(current),
                _ => Some(b),
            })
    }
}

fn mean_quality(tally: &StrandTally) -> String {
    if tally.count == 0 {
        return "0".to_string();
    }
    let mean = (f64::from(tally.quality_sum) / f64::from(tally.count) * 10.0).round() / 10.0;
    if mean.fract() == 0.0 {
        format!("{}", mean as u64)
    } else {
        format!("{mean:.1}")
    }
}

/// Compact form such as `A5[30.2]3[31];G2[35]0[0]`: count and mean quality,
/// forward then reverse, for each observed base.
impl fmt::Display for NucleotideSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for base in Base::ALL {
            let tally = self.tally(base);
            if tally.count() == 0 {
                continue;
            }
            if !first {
                f.write_str(";")?;
            }
            first = false;
            write!(
                f,
                "{}{}[{}]{}[{}]",
                base,
                tally.forward.count,
                mean_quality(&tally.forward),
                tally.reverse.count,
                mean_quality(&tally.reverse)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(strand: Strand, start: u32, end: u32, name_hash: u64) -> ReadContext {
        ReadContext {
            strand,
            start,
            end,
            name_hash,
        }
    }

    #[test]
    fn n_bases_count_toward_coverage_only() {
        let mut acc = Accumulator::new(10);
        acc.observe(b'N', 30, &read(Strand::Forward, 1, 50, 1));
        acc.observe(b'A', 30, &read(Strand::Forward, 1, 50, 2));
        let summary = acc.summarize();
        assert_eq!(acc.coverage(), 2);
        assert_eq!(summary.coverage(), 2);
        assert_eq!(summary.distinct_bases(), vec![Base::A]);
    }

    #[test]
    fn novel_starts_deduplicate_fragment_and_strand() {
        let mut acc = Accumulator::new(20);
        acc.observe(b'G', 30, &read(Strand::Forward, 10, 40, 1));
        acc.observe(b'G', 30, &read(Strand::Forward, 10, 40, 2));
        acc.observe(b'G', 30, &read(Strand::Reverse, 1, 30, 3));
        acc.observe(b'G', 30, &read(Strand::Reverse, 5, 30, 4));
        let tally = *acc.summarize().tally(Base::G);
        assert_eq!(tally.count(), 4);
        // Reverse reads share the alignment end 30.
        assert_eq!(tally.novel_starts, 2);
    }

    #[test]
    fn end_of_read_flags_both_ends() {
        let mut near_start = Accumulator::new(14);
        near_start.observe(b'C', 30, &read(Strand::Forward, 10, 60, 1));
        let mut middle = Accumulator::new(15);
        middle.observe(b'C', 30, &read(Strand::Forward, 10, 60, 1));
        let mut near_end = Accumulator::new(56);
        near_end.observe(b'C', 30, &read(Strand::Forward, 10, 60, 1));

        assert_eq!(near_start.summarize().tally(Base::C).end_of_read(), 1);
        assert_eq!(middle.summarize().tally(Base::C).end_of_read(), 0);
        assert_eq!(near_end.summarize().tally(Base::C).end_of_read(), 1);
    }

    #[test]
    fn overlapping_mates_collapse_or_drop() {
        let mut acc = Accumulator::new(100);
        acc.observe(b'T', 30, &read(Strand::Forward, 50, 150, 7));
        acc.observe(b'T', 32, &read(Strand::Reverse, 60, 160, 7));
        acc.observe(b'A', 30, &read(Strand::Forward, 50, 150, 8));
        acc.observe(b'C', 30, &read(Strand::Reverse, 60, 160, 8));
        acc.observe(b'A', 30, &read(Strand::Forward, 70, 170, 9));

        assert_eq!(acc.remove_overlapping_mates(), 3);
        let summary = acc.summarize();
        assert_eq!(summary.tally(Base::T).count(), 1);
        assert_eq!(summary.tally(Base::A).count(), 1);
        assert_eq!(summary.tally(Base::C).count(), 0);
        assert_eq!(acc.remove_overlapping_mates(), 0);
    }

    #[test]
    fn read_bases_follow_mate_removal() {
        let mut acc = Accumulator::new(100);
        acc.observe(b'T', 30, &read(Strand::Forward, 50, 150, 7));
        acc.observe(b'T', 30, &read(Strand::Reverse, 60, 160, 7));
        acc.observe(b'N', 30, &read(Strand::Forward, 50, 150, 8));
        acc.observe(b'G', 30, &read(Strand::Reverse, 70, 170, 9));
        acc.remove_overlapping_mates();

        let bases = acc.read_bases();
        assert_eq!(bases.len(), 2);
        assert_eq!(bases[0].name_hash, 7);
        assert_eq!(bases[0].fragment_start, 50);
        assert_eq!(bases[1].base, Base::G);
        assert_eq!(bases[1].fragment_start, 170);
    }

    #[test]
    fn unfiltered_tally_is_separate_from_coverage() {
        let mut acc = Accumulator::new(1);
        acc.observe_unfiltered(b'G');
        acc.observe_unfiltered(b'N');
        let summary = acc.summarize();
        assert_eq!(summary.coverage(), 0);
        assert_eq!(summary.unfiltered(Base::G), 1);
        assert_eq!(summary.unfiltered_coverage(), 1);
        assert!(!acc.is_empty());
    }

    #[test]
    fn largest_variant_prefers_later_base_on_ties() {
        let mut acc = Accumulator::new(5);
        for (hash, base) in [(1, b'C'), (2, b'T'), (3, b'A'), (4, b'A')] {
            acc.observe(base, 30, &read(Strand::Forward, 1, 40, hash));
        }
        let summary = acc.summarize();
        assert_eq!(summary.largest_variant(Base::A), Some(Base::T));
        assert_eq!(summary.largest_variant(Base::C), Some(Base::A));
    }

    #[test]
    fn display_lists_observed_bases_by_strand() {
        let mut acc = Accumulator::new(30);
        acc.observe(b'A', 30, &read(Strand::Forward, 1, 90, 1));
        acc.observe(b'A', 31, &read(Strand::Forward, 1, 90, 2));
        acc.observe(b'A', 31, &read(Strand::Reverse, 1, 90, 3));
        acc.observe(b'G', 35, &read(Strand::Forward, 1, 90, 4));
        assert_eq!(acc.summarize().to_string(), "A2[30.5]1[31];G1[35]0[0]");
    }
}
