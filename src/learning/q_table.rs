use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::hash::Hash;
use std::path::Path;

use log::{debug, info};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::learning::serde_utils;

/// Tabular action-value store with an epsilon-greedy policy.
///
/// States are created lazily: a state that has never been touched behaves as
/// an all-zero value vector.
#[derive(Debug, Clone, PartialEq)]
pub struct QTable<S, A>
where
    S: Eq + Hash + Clone + Debug,
    A: Eq + Copy + Debug,
{
    actions: Vec<A>,
    alpha: f64,
    gamma: f64,
    epsilon: f64,
    tab: HashMap<S, Vec<f64>>,
}

/// On-disk layout: the visited states with their value vectors, plus epsilon.
/// States absent from `q` are all-zero when restored.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize + Ord",
    deserialize = "S: DeserializeOwned + Eq + Hash"
))]
struct PersistedTable<S> {
    epsilon: f64,
    #[serde(with = "serde_utils")]
    q: HashMap<S, Vec<f64>>,
}

impl<S, A> QTable<S, A>
where
    S: Eq + Hash + Clone + Debug + Ord + Serialize + DeserializeOwned,
    A: Eq + Copy + Debug,
{
    pub fn new(
        actions: Vec<A>,
        alpha: f64,
        gamma: f64,
        epsilon: f64,
    ) -> Result<Self, TableError> {
        if actions.is_empty() {
            return Err(TableError::NoActions);
        }
        Ok(QTable {
            actions,
            alpha,
            gamma,
            epsilon,
            tab: HashMap::new(),
        })
    }

    pub fn actions(&self) -> &[A] {
        &self.actions
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon;
    }

    /// Number of states visited so far.
    pub fn len(&self) -> usize {
        self.tab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tab.is_empty()
    }

    pub fn q_values(&self, state: &S) -> Option<&[f64]> {
        self.tab.get(state).map(Vec::as_slice)
    }

    pub fn value(&self, state: &S, action: A) -> f64 {
        match (self.tab.get(state), self.action_index(action)) {
            (Some(values), Some(idx)) => values[idx],
            _ => 0.0,
        }
    }

    /// Overwrite the value vector of `state`.
    pub fn set_values(&mut self, state: S, values: Vec<f64>) -> Result<(), TableError> {
        if values.len() != self.actions.len() {
            return Err(TableError::ActionCountMismatch {
                expected: self.actions.len(),
                found: values.len(),
            });
        }
        self.tab.insert(state, values);
        Ok(())
    }

    fn action_index(&self, action: A) -> Option<usize> {
        self.actions.iter().position(|a| *a == action)
    }

    fn values_mut(&mut self, state: &S) -> &mut Vec<f64> {
        let n = self.actions.len();
        self.tab
            .entry(state.clone())
            .or_insert_with(|| vec![0.0; n])
    }

    fn random_action<R: Rng + ?Sized>(&self, rng: &mut R) -> A {
        // Non-empty, checked in `new`.
        self.actions[rng.random_range(0..self.actions.len())]
    }

    /// Epsilon-greedy selection. Unseen states always explore; ties among the
    /// best actions are broken uniformly at random.
    pub fn choose_action<R: Rng + ?Sized>(&self, state: &S, rng: &mut R) -> A {
        let explore = rng.random::<f64>() < self.epsilon;
        let values = match self.tab.get(state) {
            Some(values) if !explore => values,
            _ => return self.random_action(rng),
        };
        let max_q = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let best: Vec<A> = self
            .actions
            .iter()
            .zip(values)
            .filter(|(_, q)| **q == max_q)
            .map(|(a, _)| *a)
            .collect();
        match best.choose(rng) {
            Some(action) => *action,
            None => self.random_action(rng),
        }
    }

    /// `Q(s,a) += alpha * (r + gamma * max_a' Q(s',a') - Q(s,a))`
    pub fn update(&mut self, state: &S, action: A, reward: f64, next_state: &S) {
        let Some(idx) = self.action_index(action) else {
            debug!("Ignoring update for unknown action {action:?}");
            return;
        };
        let future = self
            .values_mut(next_state)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let (alpha, gamma) = (self.alpha, self.gamma);
        let values = self.values_mut(state);
        let old = values[idx];
        values[idx] = old + alpha * (reward + gamma * future - old);
        debug!(
            "Q[{state:?}][{action:?}] {old:.4} -> {:.4} (r = {reward:.3})",
            values[idx]
        );
    }

    /// `epsilon <- max(floor, epsilon * rate)`
    pub fn decay_epsilon(&mut self, rate: f64, floor: f64) {
        self.epsilon = floor.max(self.epsilon * rate);
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TableError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let persisted = PersistedTable {
            epsilon: self.epsilon,
            q: self.tab.clone(),
        };
        let json = serde_json::to_string(&persisted).map_err(TableError::Encode)?;
        fs::write(path, json)?;
        info!(
            "Saved {} states (epsilon = {:.4}) to {}",
            self.tab.len(),
            self.epsilon,
            path.display()
        );
        Ok(())
    }

    /// Restore a table written by [`QTable::save`]. A missing file leaves the
    /// table untouched and returns `Ok(false)`.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<bool, TableError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No table at {}, starting fresh", path.display());
            return Ok(false);
        }
        let text = fs::read_to_string(path)?;
        let persisted: PersistedTable<S> =
            serde_json::from_str(&text).map_err(|source| TableError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(values) = persisted.q.values().find(|v| v.len() != self.actions.len()) {
            return Err(TableError::ActionCountMismatch {
                expected: self.actions.len(),
                found: values.len(),
            });
        }
        self.tab = persisted.q;
        self.epsilon = persisted.epsilon;
        info!(
            "Loaded {} states (epsilon = {:.4}) from {}",
            self.tab.len(),
            self.epsilon,
            path.display()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::action::DriveAction;
    use crate::learning::agent_state::DrivingState;
    use crate::signal::Phase;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::path::PathBuf;
    use strum::IntoEnumIterator;

    type Table = QTable<DrivingState, DriveAction>;

    fn table(epsilon: f64) -> Table {
        QTable::new(DriveAction::all(), 0.1, 0.9, epsilon).unwrap()
    }

    fn state(phase: Phase, distance_bin: u8) -> DrivingState {
        DrivingState::new(phase, distance_bin, 1, 2)
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("redlight-{}-{name}", std::process::id()))
            .join("table.json")
    }

    #[test]
    fn test_uniform_exploration() {
        let mut tbl = table(1.0);
        let s = state(Phase::Green, 0);
        tbl.set_values(s, vec![0.0; 5]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let n = 50_000;
        let mut counts: HashMap<DriveAction, usize> = HashMap::new();
        for _ in 0..n {
            *counts.entry(tbl.choose_action(&s, &mut rng)).or_default() += 1;
        }
        for action in DriveAction::iter() {
            let freq = counts.get(&action).copied().unwrap_or(0) as f64 / n as f64;
            assert!((freq - 0.2).abs() < 0.02, "{action:?}: {freq}");
        }
    }

    #[test]
    fn test_greedy_picks_unique_max() {
        let mut tbl = table(0.0);
        let s = state(Phase::Red, 1);
        tbl.set_values(s, vec![1.0, 5.0, 2.0, -1.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(tbl.choose_action(&s, &mut rng), DriveAction::Slow);
        }
    }

    #[test]
    fn test_greedy_breaks_ties_among_best() {
        let mut tbl = table(0.0);
        let s = state(Phase::Amber, 2);
        tbl.set_values(s, vec![3.0, 0.0, 3.0, 0.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let picks: Vec<_> = (0..200).map(|_| tbl.choose_action(&s, &mut rng)).collect();
        assert!(picks.iter().all(|a| matches!(a, DriveAction::Stop | DriveAction::GoCompliant)));
        assert!(picks.contains(&DriveAction::Stop));
        assert!(picks.contains(&DriveAction::GoCompliant));
    }

    #[test]
    fn test_unseen_state_explores() {
        let tbl = table(0.0);
        let mut rng = StdRng::seed_from_u64(11);
        let s = state(Phase::Green, 3);
        let picks: Vec<_> = (0..200).map(|_| tbl.choose_action(&s, &mut rng)).collect();
        assert!(picks.iter().collect::<std::collections::HashSet<_>>().len() > 1);
        assert!(tbl.is_empty());
    }

    #[test]
    fn test_update_touches_single_entry() {
        let mut tbl = table(0.0);
        let s = state(Phase::Green, 0);
        let other = state(Phase::Red, 0);
        let next = state(Phase::Green, 1);
        tbl.set_values(other, vec![0.5, 0.4, 0.3, 0.2, 0.1]).unwrap();
        tbl.set_values(next, vec![0.0, 2.0, 0.0, 0.0, 0.0]).unwrap();

        tbl.update(&s, DriveAction::GoCompliant, 1.0, &next);

        // 0 + 0.1 * (1 + 0.9 * 2 - 0)
        let expected = 0.1 * (1.0 + 0.9 * 2.0);
        assert!((tbl.value(&s, DriveAction::GoCompliant) - expected).abs() < 1e-12);
        let row = tbl.q_values(&s).unwrap();
        for (idx, q) in row.iter().enumerate() {
            if idx != 2 {
                assert_eq!(*q, 0.0);
            }
        }
        assert_eq!(tbl.q_values(&other).unwrap(), &[0.5, 0.4, 0.3, 0.2, 0.1]);
        assert_eq!(tbl.q_values(&next).unwrap(), &[0.0, 2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_update_creates_zero_entries() {
        let mut tbl = table(0.5);
        let s = state(Phase::Amber, 1);
        let next = state(Phase::Red, 0);
        tbl.update(&s, DriveAction::Stop, -1.0, &next);
        assert_eq!(tbl.len(), 2);
        assert_eq!(tbl.q_values(&next).unwrap(), &[0.0; 5]);
        assert!((tbl.value(&s, DriveAction::Stop) + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_decay_epsilon_stops_at_floor() {
        let mut tbl = table(0.2);
        tbl.decay_epsilon(0.5, 0.05);
        assert!((tbl.epsilon() - 0.1).abs() < 1e-12);
        tbl.decay_epsilon(0.5, 0.05);
        tbl.decay_epsilon(0.5, 0.05);
        assert_eq!(tbl.epsilon(), 0.05);
        tbl.decay_epsilon(0.5, 0.05);
        assert_eq!(tbl.epsilon(), 0.05);
    }

    #[test]
    fn test_save_load_round_trip() {
        let path = temp_path("roundtrip");
        let mut tbl = table(0.37);
        let mut rng = StdRng::seed_from_u64(5);
        for phase in [Phase::Green, Phase::Amber, Phase::Red] {
            for d in 0..4 {
                let values = (0..5).map(|_| rng.random::<f64>() * 10.0 - 5.0).collect();
                tbl.set_values(state(phase, d), values).unwrap();
            }
        }
        tbl.save(&path).unwrap();

        let mut restored = table(1.0);
        assert!(restored.load(&path).unwrap());
        assert_eq!(restored.epsilon(), 0.37);
        assert_eq!(restored.len(), tbl.len());
        for phase in [Phase::Green, Phase::Amber, Phase::Red] {
            for d in 0..4 {
                let s = state(phase, d);
                assert_eq!(restored.q_values(&s), tbl.q_values(&s));
            }
        }
        // Unvisited states still default to zero.
        assert_eq!(restored.value(&DrivingState::free_road(0), DriveAction::Stop), 0.0);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_missing_is_noop() {
        let mut tbl = table(0.8);
        let loaded = tbl.load(temp_path("missing").with_file_name("nope.json")).unwrap();
        assert!(!loaded);
        assert_eq!(tbl.epsilon(), 0.8);
        assert!(tbl.is_empty());
    }

    #[test]
    fn test_load_malformed_fails() {
        let path = temp_path("malformed");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        let mut tbl = table(0.8);
        assert!(matches!(tbl.load(&path), Err(TableError::Malformed { .. })));
        assert_eq!(tbl.epsilon(), 0.8);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_empty_action_list_is_rejected() {
        let result: Result<Table, _> = QTable::new(Vec::new(), 0.1, 0.9, 0.5);
        assert!(matches!(result, Err(TableError::NoActions)));
    }

    #[test]
    fn test_load_rejects_wrong_action_count() {
        let path = temp_path("mismatch");
        let mut tbl: QTable<DrivingState, DriveAction> =
            QTable::new(vec![DriveAction::Stop, DriveAction::GoCompliant], 0.1, 0.9, 0.5)
                .unwrap();
        tbl.update(&state(Phase::Red, 0), DriveAction::Stop, 1.0, &state(Phase::Red, 1));
        tbl.save(&path).unwrap();

        let mut full = table(0.5);
        assert!(matches!(
            full.load(&path),
            Err(TableError::ActionCountMismatch { expected: 5, found: 2 })
        ));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
