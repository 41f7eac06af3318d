//! Per-block confidence tracking.
//!
//! Each undecided block carries a counter of consecutive poll rounds in
//! which it met the confidence quorum. The counter resets to zero on any
//! round that misses the quorum and on preference switches away from the
//! block's branch. Once the counter reaches `beta`, the `decided` latch
//! flips and stays set.

/// Consecutive-success counter for one block's chain of finality rounds.
///
/// All comparisons are integer vote counts; there is no fractional
/// arithmetic anywhere in the confidence path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confidence {
    successes: u32,
    decided: bool,
}

impl Confidence {
    /// Fresh counter: zero successes, undecided.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a round that met the confidence quorum. Latches `decided`
    /// once `beta` consecutive successes accumulate, and returns the
    /// latch state.
    pub fn record_success(&mut self, beta: u32) -> bool {
        self.successes = self.successes.saturating_add(1);
        if self.successes >= beta {
            self.decided = true;
        }
        self.decided
    }

    /// Records a round that missed the quorum (or a preference switch
    /// away from this branch). Resets the streak; the `decided` latch is
    /// never cleared.
    pub fn record_failure(&mut self) {
        self.successes = 0;
    }

    /// Current streak length.
    pub fn successes(&self) -> u32 {
        self.successes
    }

    /// True once `beta` consecutive successes have been observed.
    pub fn is_decided(&self) -> bool {
        self.decided
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decides_after_beta_consecutive_successes() {
        let mut c = Confidence::new();
        assert!(!c.record_success(3));
        assert!(!c.record_success(3));
        assert!(c.record_success(3));
        assert!(c.is_decided());
        assert_eq!(c.successes(), 3);
    }

    #[test]
    fn failure_resets_streak() {
        let mut c = Confidence::new();
        c.record_success(3);
        c.record_success(3);
        c.record_failure();
        assert_eq!(c.successes(), 0);
        assert!(!c.is_decided());

        // The streak starts over from scratch.
        c.record_success(3);
        c.record_success(3);
        assert!(!c.is_decided());
        c.record_success(3);
        assert!(c.is_decided());
    }

    #[test]
    fn beta_one_decides_immediately() {
        let mut c = Confidence::new();
        assert!(c.record_success(1));
        assert!(c.is_decided());
    }

    #[test]
    fn decided_latch_survives_reset() {
        let mut c = Confidence::new();
        c.record_success(1);
        assert!(c.is_decided());
        c.record_failure();
        assert!(c.is_decided(), "the latch never unlatches");
        assert_eq!(c.successes(), 0);
    }
}
