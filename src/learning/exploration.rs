use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::UInt;
use crate::learning::q_table::QTable;

/// Exponential exploration schedule: epsilon falls from `initial` to `floor`
/// over exactly `horizon` completed episodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSchedule {
    pub initial: f64,
    pub floor: f64,
    pub horizon: UInt,
}

impl ExplorationSchedule {
    pub fn new(initial: f64, floor: f64, horizon: UInt) -> Self {
        ExplorationSchedule {
            initial,
            floor,
            horizon,
        }
    }

    /// Per-episode multiplicative rate `(floor / initial)^(1 / horizon)`.
    pub fn rate(&self) -> f64 {
        if self.initial <= 0.0 || self.floor >= self.initial {
            return 1.0;
        }
        if self.horizon == 0 {
            return 0.0;
        }
        (self.floor / self.initial).powf(1.0 / self.horizon as f64)
    }

    /// Anneal `table` by one completed episode. Returns the new epsilon.
    pub fn anneal<S, A>(&self, table: &mut QTable<S, A>) -> f64
    where
        S: Eq + Hash + Clone + Debug + Ord + Serialize + DeserializeOwned,
        A: Eq + Copy + Debug,
    {
        table.decay_epsilon(self.rate(), self.floor);
        table.epsilon()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::action::DriveAction;
    use crate::learning::agent_state::DrivingState;

    fn table(epsilon: f64) -> QTable<DrivingState, DriveAction> {
        QTable::new(DriveAction::all(), 0.1, 0.9, epsilon).unwrap()
    }

    #[test]
    fn test_reaches_floor_after_horizon() {
        let schedule = ExplorationSchedule::new(0.99, 0.10, 100);
        let mut tbl = table(0.99);
        for _ in 0..99 {
            schedule.anneal(&mut tbl);
        }
        assert!(tbl.epsilon() > 0.10);
        schedule.anneal(&mut tbl);
        assert!((tbl.epsilon() - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_stays_at_floor() {
        let schedule = ExplorationSchedule::new(1.0, 0.01, 10);
        let mut tbl = table(1.0);
        for _ in 0..10 {
            schedule.anneal(&mut tbl);
        }
        let settled = tbl.epsilon();
        for _ in 0..50 {
            assert_eq!(schedule.anneal(&mut tbl), settled);
        }
        assert!((settled - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_schedules() {
        assert_eq!(ExplorationSchedule::new(0.5, 0.5, 10).rate(), 1.0);
        assert_eq!(ExplorationSchedule::new(0.0, 0.0, 10).rate(), 1.0);
        assert_eq!(ExplorationSchedule::new(1.0, 0.1, 0).rate(), 0.0);
        let mut tbl = table(1.0);
        ExplorationSchedule::new(1.0, 0.1, 0).anneal(&mut tbl);
        assert_eq!(tbl.epsilon(), 0.1);
    }

    #[test]
    fn test_longer_horizon_keeps_more_exploration() {
        let short = ExplorationSchedule::new(1.0, 0.01, 200);
        let long = ExplorationSchedule::new(1.0, 0.10, 300);
        let (mut a, mut b) = (table(1.0), table(1.0));
        for _ in 0..150 {
            short.anneal(&mut a);
            long.anneal(&mut b);
        }
        assert!(b.epsilon() > a.epsilon());
    }
}
