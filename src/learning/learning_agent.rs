use std::path::Path;

use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::agent::{Archetype, DrivingStyle, RewardSignals, SpeedCommand};
use crate::config::RlConfig;
use crate::error::TableError;
use crate::learning::action::DriveAction;
use crate::learning::agent_state::{DrivingState, VehicleView};
use crate::learning::q_table::QTable;
use crate::simulator::{SimResult, Simulator};
use crate::telemetry::recorder::DecisionRecorder;
use crate::Model;

/// The decision taken on the previous tick, kept for bootstrapping.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LastStep {
    state: DrivingState,
    action: DriveAction,
    speed: f64,
    signal_ahead: bool,
}

/// A vehicle controlled by a tabular Q-learning policy.
///
/// The value table lives as long as the driver and persists across episodes.
/// The previous step and the decision recorder are episode-scoped and reset
/// by [`LearningDriver::begin_episode`].
#[derive(Debug)]
pub struct LearningDriver {
    vehicle_id: String,
    style: Archetype,
    table: Model,
    initial_epsilon: f64,
    rng: StdRng,
    last: Option<LastStep>,
    recorder: DecisionRecorder,
    episode_reward: f64,
}

impl LearningDriver {
    pub fn new(
        vehicle_id: &str,
        style: Archetype,
        rl: &RlConfig,
        seed: u64,
    ) -> Result<Self, TableError> {
        Ok(LearningDriver {
            vehicle_id: vehicle_id.into(),
            style,
            table: QTable::new(DriveAction::all(), rl.alpha, rl.gamma, rl.initial_epsilon)?,
            initial_epsilon: rl.initial_epsilon,
            rng: StdRng::seed_from_u64(seed),
            last: None,
            recorder: DecisionRecorder::new(),
            episode_reward: 0.0,
        })
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn style(&self) -> &Archetype {
        &self.style
    }

    pub fn name(&self) -> &'static str {
        self.style.name()
    }

    pub fn table(&self) -> &Model {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Model {
        &mut self.table
    }

    pub fn epsilon(&self) -> f64 {
        self.table.epsilon()
    }

    pub fn recorder(&self) -> &DecisionRecorder {
        &self.recorder
    }

    pub fn episode_reward(&self) -> f64 {
        self.episode_reward
    }

    /// Forget the previous step and start a fresh recorder, so no TD update
    /// bootstraps across the episode boundary.
    pub fn begin_episode(&mut self, vehicle_id: &str) {
        self.vehicle_id = vehicle_id.into();
        self.last = None;
        self.recorder = DecisionRecorder::new();
        self.episode_reward = 0.0;
    }

    /// Close the episode, returning its decision counts.
    pub fn end_episode(&mut self) -> DecisionRecorder {
        self.last = None;
        std::mem::take(&mut self.recorder)
    }

    /// Apply one completed episode of exploration annealing.
    pub fn anneal(&mut self) -> f64 {
        self.style
            .schedule(self.initial_epsilon)
            .anneal(&mut self.table)
    }

    /// One control tick: observe, learn from the previous step, pick and send
    /// the next command.
    pub fn update(&mut self, sim: &mut dyn Simulator) -> SimResult<DriveAction> {
        let view = VehicleView::collect(sim, &self.vehicle_id)?;
        let (action, command) = self.step(&view);
        command.send(sim, &self.vehicle_id)?;
        Ok(action)
    }

    /// Decision logic of [`LearningDriver::update`], independent of the
    /// simulator.
    pub fn step(&mut self, view: &VehicleView) -> (DriveAction, SpeedCommand) {
        let state = self.style.encode_state(view);
        let decel = self
            .last
            .map_or(0.0, |last| (last.speed - view.speed).max(0.0));

        if let Some(last) = self.last {
            let signals = RewardSignals {
                decel,
                epsilon: self.table.epsilon(),
            };
            let reward = self
                .style
                .compute_reward(&last.state, last.action, &state, &signals);
            self.table.update(&last.state, last.action, reward, &state);
            self.episode_reward += reward;
            if last.signal_ahead {
                self.recorder.record_decision(last.state.phase, last.action);
            }
        }

        let action = self.table.choose_action(&state, &mut self.rng);
        let command = self.style.command(action, view.allowed_speed);
        debug!(
            "{} ({}): {state:?} -> {action} ({command:?})",
            self.vehicle_id,
            self.style.name()
        );
        self.last = Some(LastStep {
            state,
            action,
            speed: view.speed,
            signal_ahead: view.signal.is_some(),
        });
        (action, command)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TableError> {
        self.table.save(path)
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<bool, TableError> {
        self.table.load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StyleConfig;
    use crate::signal::Phase;
    use crate::simulator::stub::{Command, StubSim};
    use crate::learning::agent_state::SignalView;

    fn driver(style: Archetype, epsilon: f64) -> LearningDriver {
        let rl = RlConfig {
            initial_epsilon: epsilon,
            ..RlConfig::default()
        };
        LearningDriver::new("v1", style, &rl, 9).unwrap()
    }

    fn red_view(speed: f64, distance: f64) -> VehicleView {
        VehicleView {
            speed,
            allowed_speed: 10.0,
            signal: Some(SignalView {
                id: "t0".into(),
                distance,
                phase: Phase::Red,
                now: 0.0,
                next_switch: 10.0,
                phase_duration: 20.0,
            }),
        }
    }

    #[test]
    fn test_first_tick_does_not_learn() {
        let mut d = driver(Archetype::cautious(StyleConfig::cautious()), 1.0);
        d.step(&red_view(5.0, 30.0));
        assert!(d.table().is_empty());
        assert_eq!(d.recorder(), &DecisionRecorder::default());
    }

    #[test]
    fn test_second_tick_updates_previous_entry() {
        let mut d = driver(Archetype::cautious(StyleConfig::cautious()), 1.0);
        let (first, _) = d.step(&red_view(5.0, 30.0));
        d.step(&red_view(5.0, 20.0));
        let prev_state = DrivingState::new(Phase::Red, 2, 1, 2);
        let values = d.table().q_values(&prev_state).expect("previous state learned");
        let idx = DriveAction::all().iter().position(|a| *a == first).unwrap();
        for (i, q) in values.iter().enumerate() {
            if i != idx {
                assert_eq!(*q, 0.0);
            }
        }
        if first.is_go() {
            // alpha * -1.0
            assert!((values[idx] + 0.1).abs() < 1e-12);
            assert_eq!(d.recorder().red_runs, 1);
        }
        assert_eq!(d.recorder().red_decisions, 1);
    }

    #[test]
    fn test_braking_feeds_reward() {
        let mut d = driver(Archetype::cautious(StyleConfig::cautious()), 0.0);
        let start = DrivingState::new(Phase::Red, 2, 1, 2);
        // Make STOP the only greedy choice in the starting state.
        d.table_mut()
            .set_values(start, vec![1.0, 0.0, 0.0, 0.0, 0.0])
            .unwrap();
        let (action, command) = d.step(&red_view(10.0, 30.0));
        assert_eq!(action, DriveAction::Stop);
        assert_eq!(command, SpeedCommand::SetSpeed(0.0));
        d.step(&red_view(5.0, 15.0));
        // 1.0 + 0.1 * (-0.08 * 5 + 0.9 * 0 - 1.0)
        let q = d.table().value(&start, DriveAction::Stop);
        assert!((q - (1.0 + 0.1 * (-0.4 - 1.0))).abs() < 1e-12);
    }

    #[test]
    fn test_begin_episode_resets_scratch_only() {
        let mut d = driver(Archetype::aggressive(StyleConfig::aggressive()), 1.0);
        d.step(&red_view(5.0, 30.0));
        d.step(&red_view(5.0, 15.0));
        let learned = d.table().len();
        assert!(learned > 0);
        d.begin_episode("v2");
        assert_eq!(d.vehicle_id(), "v2");
        assert_eq!(d.recorder(), &DecisionRecorder::default());
        assert_eq!(d.episode_reward(), 0.0);
        // First tick of the new episode must not bootstrap from the old one.
        d.step(&red_view(0.0, 5.0));
        assert_eq!(d.table().len(), learned);
    }

    #[test]
    fn test_anneal_uses_style_schedule() {
        let mut d = driver(Archetype::aggressive(StyleConfig::aggressive()), 1.0);
        let eps = d.anneal();
        let rate = d.style().schedule(1.0).rate();
        assert!((eps - rate).abs() < 1e-12);
        assert!(eps < 1.0);
    }

    #[test]
    fn test_update_sends_command_to_simulator() {
        let mut sim = StubSim::new();
        sim.add_stub_vehicle("v1", 0.0, 10.0, "e0");
        sim.add_stub_signal("t0", "rrrr", 30.0, 20.0);
        sim.place_signal("v1", "t0", 5.0, "r");

        let mut d = driver(Archetype::cautious(StyleConfig::cautious()), 1.0);
        let action = d.update(&mut sim).unwrap();
        assert_eq!(sim.commands.len(), 1);
        let expected = match d.style().command(action, 10.0) {
            SpeedCommand::SetSpeed(v) => Command::SetSpeed("v1".into(), v),
            SpeedCommand::SlowDown { target, decel } => Command::SlowDown("v1".into(), target, decel),
        };
        assert_eq!(sim.commands[0], expected);
    }

    #[test]
    fn test_update_on_missing_vehicle_fails() {
        let mut sim = StubSim::new();
        let mut d = driver(Archetype::cautious(StyleConfig::cautious()), 1.0);
        assert!(d.update(&mut sim).is_err());
        assert!(sim.commands.is_empty());
    }
}
