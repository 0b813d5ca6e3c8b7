use serde::{Deserialize, Serialize};

use crate::learning::action::DriveAction;
use crate::signal::Phase;

/// Per-agent, per-episode counts of decisions taken in front of a signal.
///
/// Every control tick with a signal ahead is one decision, so a driver
/// waiting ten ticks at a red light adds ten to `red_decisions`. The
/// once-per-signal encounter counts live in
/// [`EpisodeRecord`](crate::telemetry::episode::EpisodeRecord).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecorder {
    /// Decision ticks facing each phase.
    pub green_decisions: u32,
    pub amber_decisions: u32,
    pub red_decisions: u32,
    /// Decision ticks on which the driver chose a go action.
    pub green_runs: u32,
    pub amber_runs: u32,
    pub red_runs: u32,
}

impl DecisionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faced(&mut self, phase: Phase) {
        match phase {
            Phase::Green => self.green_decisions += 1,
            Phase::Amber => self.amber_decisions += 1,
            Phase::Red => self.red_decisions += 1,
        }
    }

    pub fn ran(&mut self, phase: Phase) {
        match phase {
            Phase::Green => self.green_runs += 1,
            Phase::Amber => self.amber_runs += 1,
            Phase::Red => self.red_runs += 1,
        }
    }

    /// Record a decision made while facing `phase`.
    pub fn record_decision(&mut self, phase: Phase, action: DriveAction) {
        self.faced(phase);
        if action.is_go() {
            self.ran(phase);
        }
    }

    /// Go decisions taken against an amber or red light.
    pub fn violations(&self) -> u32 {
        self.amber_runs + self.red_runs
    }
}
