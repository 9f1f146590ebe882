use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::genomics::Accumulator;

/// Live accumulators of one sample, keyed by position on the current contig.
///
/// The sample's consumer is the only writer; the cleaner is the only remover.
#[derive(Debug, Default)]
pub(crate) struct AccumulatorTable {
    entries: DashMap<u32, Accumulator>,
}

impl AccumulatorTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Apply `update` to the accumulator at `position`, creating it if
    /// needed. Returns whether an entry was created.
    pub(crate) fn update<F>(&self, position: u32, update: F) -> bool
    where
        F: FnOnce(&mut Accumulator),
    {
        match self.entries.entry(position) {
            Entry::Occupied(mut entry) => {
                update(entry.get_mut());
                false
            }
            Entry::Vacant(entry) => {
                let mut accumulator = Accumulator::new(position);
                update(&mut accumulator);
                entry.insert(accumulator);
                true
            }
        }
    }

    pub(crate) fn remove(&self, position: u32) -> Option<Accumulator> {
        self.entries.remove(&position).map(|(_, accumulator)| accumulator)
    }

    /// Every live position in ascending order.
    pub(crate) fn sorted_positions(&self) -> Vec<u32> {
        let mut positions: Vec<u32> = self.entries.iter().map(|entry| *entry.key()).collect();
        positions.sort_unstable();
        positions
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_once_and_removes_once() {
        let table = AccumulatorTable::new();
        assert!(table.update(7, |acc| acc.observe_unfiltered(b'A')));
        assert!(!table.update(7, |acc| acc.observe_unfiltered(b'C')));
        assert!(table.update(3, |_| {}));

        assert_eq!(table.sorted_positions(), vec![3, 7]);
        assert!(table.remove(7).is_some());
        assert!(table.remove(7).is_none());
        assert_eq!(table.len(), 1);
    }
}
