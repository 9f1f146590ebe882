use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::genomics::GenomicPosition;

fn pack(ordinal: u32, position: u32) -> u64 {
    (u64::from(ordinal) << 32) | u64::from(position)
}

fn unpack(value: u64) -> GenomicPosition {
    GenomicPosition::new((value >> 32) as u32, value as u32)
}

/// Highest alignment start a consumer has fully applied.
///
/// Contig ordinal and position share one atomic word, so the value only
/// ever grows across the whole run and a late update for an earlier
/// contig can never move it backwards.
#[derive(Debug, Default)]
pub(crate) struct Watermark(AtomicU64);

impl Watermark {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn advance(&self, ordinal: u32, position: u32) {
        self.0.fetch_max(pack(ordinal, position), Ordering::AcqRel);
    }

    /// Move to the start of `ordinal`.
    pub(crate) fn reset_to(&self, ordinal: u32) {
        self.advance(ordinal, 0);
    }

    pub(crate) fn get(&self) -> GenomicPosition {
        unpack(self.0.load(Ordering::Acquire))
    }

    /// Watermark seen from `ordinal`: 0 before the contig starts, `u32::MAX` once past it.
    pub(crate) fn position_in(&self, ordinal: u32) -> u32 {
        let current = self.get();
        match current.ordinal.cmp(&ordinal) {
            CmpOrdering::Less => 0,
            CmpOrdering::Equal => current.position,
            CmpOrdering::Greater => u32::MAX,
        }
    }
}

/// Positions strictly below the returned value can no longer receive evidence.
pub(crate) fn cross_sample(watermarks: &[Watermark; 2], ordinal: u32) -> u32 {
    watermarks
        .iter()
        .map(|mark| mark.position_in(ordinal))
        .min()
        .unwrap_or(0)
        .saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn never_moves_backwards() {
        let mark = Watermark::new();
        mark.advance(0, 100);
        mark.advance(0, 40);
        assert_eq!(mark.get(), GenomicPosition::new(0, 100));

        mark.reset_to(1);
        assert_eq!(mark.get(), GenomicPosition::new(1, 0));
        mark.advance(0, u32::MAX);
        assert_eq!(mark.get(), GenomicPosition::new(1, 0));
    }

    #[test]
    fn position_is_relative_to_contig() {
        let mark = Watermark::new();
        mark.advance(2, 500);
        assert_eq!(mark.position_in(1), u32::MAX);
        assert_eq!(mark.position_in(2), 500);
        assert_eq!(mark.position_in(3), 0);
    }

    #[test]
    fn cross_sample_trails_slowest() {
        let marks = [Watermark::new(), Watermark::new()];
        marks[0].advance(0, 120);
        marks[1].advance(0, 80);
        assert_eq!(cross_sample(&marks, 0), 79);

        marks[1].advance(0, u32::MAX);
        assert_eq!(cross_sample(&marks, 0), 119);
        assert_eq!(cross_sample(&marks, 1), 0);
    }

    #[test]
    fn concurrent_updates_keep_maximum() {
        let mark = Arc::new(Watermark::new());
        let handles: Vec<_> = (0..4u32)
            .map(|worker| {
                let mark = Arc::clone(&mark);
                thread::spawn(move || {
                    let mut last = GenomicPosition::new(0, 0);
                    for pos in 0..1_000u32 {
                        mark.advance(0, pos * 4 + worker);
                        let seen = mark.get();
                        assert!(seen >= last);
                        last = seen;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }
        assert_eq!(mark.get(), GenomicPosition::new(0, 3_999));
    }
}
