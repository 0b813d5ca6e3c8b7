use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use crate::config::StyleConfig;
use crate::learning::action::DriveAction;
use crate::learning::agent_state::{DrivingState, MAX_DISTANCE_BIN, VehicleView};
use crate::learning::exploration::ExplorationSchedule;
use crate::learning::reward::{aggressive_reward, aggressive_speed_shaping, cautious_reward};
use crate::simulator::{SimResult, Simulator};

/// Auxiliary signals available when scoring a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardSignals {
    /// Speed lost since the previous tick, never negative.
    pub decel: f64,
    /// Exploration rate of the driver's table at reward time.
    pub epsilon: f64,
}

/// A speed command sent to the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedCommand {
    SetSpeed(f64),
    SlowDown { target: f64, decel: f64 },
}

impl SpeedCommand {
    pub fn send(&self, sim: &mut dyn Simulator, vehicle_id: &str) -> SimResult<()> {
        match *self {
            SpeedCommand::SetSpeed(speed) => sim.set_speed(vehicle_id, speed),
            SpeedCommand::SlowDown { target, decel } => sim.slow_down(vehicle_id, target, decel),
        }
    }
}

/// What distinguishes one driving archetype from another: how it sees the
/// road, what it values, and how its actions map onto the simulator.
#[enum_dispatch]
pub trait DrivingStyle {
    fn name(&self) -> &'static str;
    fn style_config(&self) -> &StyleConfig;
    fn encode_state(&self, view: &VehicleView) -> DrivingState;
    fn compute_reward(
        &self,
        prev: &DrivingState,
        action: DriveAction,
        new: &DrivingState,
        signals: &RewardSignals,
    ) -> f64;

    fn command(&self, action: DriveAction, allowed_speed: f64) -> SpeedCommand {
        let cfg = self.style_config();
        match action {
            DriveAction::Stop => SpeedCommand::SetSpeed(0.0),
            DriveAction::Slow => SpeedCommand::SlowDown {
                target: 0.0,
                decel: cfg.comfortable_decel,
            },
            DriveAction::GoCompliant => SpeedCommand::SetSpeed(allowed_speed),
            DriveAction::GoOvershootSmall => {
                SpeedCommand::SetSpeed(allowed_speed * cfg.small_excess_ratio)
            }
            DriveAction::GoOvershootLarge => {
                SpeedCommand::SetSpeed(allowed_speed * cfg.max_excess_ratio)
            }
        }
    }

    fn schedule(&self, initial_epsilon: f64) -> ExplorationSchedule {
        let cfg = self.style_config();
        ExplorationSchedule::new(initial_epsilon, cfg.epsilon_floor, cfg.horizon)
    }
}

/// Stops on red, slows on amber, keeps to the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CautiousStyle {
    pub config: StyleConfig,
}

impl CautiousStyle {
    pub fn new(config: StyleConfig) -> Self {
        CautiousStyle { config }
    }
}

impl DrivingStyle for CautiousStyle {
    fn name(&self) -> &'static str {
        "cautious"
    }

    fn style_config(&self) -> &StyleConfig {
        &self.config
    }

    fn encode_state(&self, view: &VehicleView) -> DrivingState {
        view.encode(self.config.small_excess_ratio)
    }

    fn compute_reward(
        &self,
        prev: &DrivingState,
        action: DriveAction,
        new: &DrivingState,
        signals: &RewardSignals,
    ) -> f64 {
        // Without shaping the overshoot terms take their late-training values.
        let epsilon = if self.config.epsilon_shaping {
            signals.epsilon
        } else {
            0.0
        };
        cautious_reward(prev, action, new, signals.decel, epsilon)
    }
}

/// Prioritises speed: runs ambers, some reds, and exceeds the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggressiveStyle {
    pub config: StyleConfig,
}

impl AggressiveStyle {
    pub fn new(config: StyleConfig) -> Self {
        AggressiveStyle { config }
    }
}

impl DrivingStyle for AggressiveStyle {
    fn name(&self) -> &'static str {
        "aggressive"
    }

    fn style_config(&self) -> &StyleConfig {
        &self.config
    }

    fn encode_state(&self, view: &VehicleView) -> DrivingState {
        view.encode(self.config.small_excess_ratio)
    }

    fn compute_reward(
        &self,
        prev: &DrivingState,
        action: DriveAction,
        new: &DrivingState,
        _signals: &RewardSignals,
    ) -> f64 {
        aggressive_reward(prev, action, new, prev.distance_bin, MAX_DISTANCE_BIN)
            + aggressive_speed_shaping(new)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[enum_dispatch(DrivingStyle)]
pub enum Archetype {
    Cautious(CautiousStyle),
    Aggressive(AggressiveStyle),
}

impl Archetype {
    pub fn cautious(config: StyleConfig) -> Self {
        Archetype::Cautious(CautiousStyle::new(config))
    }

    pub fn aggressive(config: StyleConfig) -> Self {
        Archetype::Aggressive(AggressiveStyle::new(config))
    }
}
