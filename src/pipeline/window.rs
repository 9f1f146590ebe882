//! Sliding-window accounting.

/// Tracks how many accumulators are live across both samples.
///
/// The peak is the evidence that memory follows read length and depth
/// rather than contig length.
#[derive(Debug, Default)]
pub(crate) struct WindowTracker {
    current: usize,
    peak: usize,
    contig_peak: usize,
}

impl WindowTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a sample of the live entry count.
    pub(crate) fn observe(&mut self, live: usize) {
        self.current = live;
        self.peak = self.peak.max(live);
        self.contig_peak = self.contig_peak.max(live);
    }

    /// Entries finalized since the last sample.
    pub(crate) fn release(&mut self, finalized: usize) {
        self.current = self.current.saturating_sub(finalized);
    }

    /// Peak for the contig just finished; starts a fresh contig.
    pub(crate) fn finish_contig(&mut self) -> usize {
        let peak = self.contig_peak;
        self.contig_peak = 0;
        self.current = 0;
        peak
    }

    pub(crate) fn current(&self) -> usize {
        self.current
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak
    }
}
