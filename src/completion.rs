//! One-shot "season complete" latch.

use crate::model::Step;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Latch {
    #[default]
    Watching,
    Latched,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionDetector {
    state: Latch,
}

impl CompletionDetector {
    /// A detector that already fired for the current season.
    pub fn latched() -> Self {
        Self {
            state: Latch::Latched,
        }
    }

    pub fn is_latched(&self) -> bool {
        self.state == Latch::Latched
    }

    /// Returns `true` exactly once per season: the first evaluation that sees a non-empty,
    /// fully simulated calendar while no run is in progress.
    pub fn evaluate(&mut self, calendar: &[Step], run_active: bool) -> bool {
        if self.state == Latch::Latched || run_active {
            return false;
        }
        if calendar.is_empty() || !calendar.iter().all(|s| s.simulated) {
            return false;
        }
        self.state = Latch::Latched;
        true
    }

    pub fn reset(&mut self) {
        self.state = Latch::Watching;
    }
}
