use serde::{Deserialize, Serialize};

use crate::signal::Phase;
use crate::simulator::{SimResult, Simulator};

/// Number of time-to-switch bins.
pub const N_SWITCH_BINS: u8 = 4;
pub const MAX_DISTANCE_BIN: u8 = 3;
pub const MAX_SPEED_BIN: u8 = 3;
/// Upper edges of the distance bins, in metres to the stop line.
pub const DISTANCE_EDGES: [f64; 3] = [10.0, 20.0, 40.0];

/// Discretised view of a vehicle approaching a signal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DrivingState {
    pub phase: Phase,
    pub distance_bin: u8,
    pub speed_bin: u8,
    pub switch_bin: u8,
}

impl DrivingState {
    pub fn new(phase: Phase, distance_bin: u8, speed_bin: u8, switch_bin: u8) -> Self {
        DrivingState {
            phase,
            distance_bin,
            speed_bin,
            switch_bin,
        }
    }

    /// State used when no signal lies ahead.
    pub fn free_road(speed_bin: u8) -> Self {
        DrivingState::new(Phase::Green, MAX_DISTANCE_BIN, speed_bin, N_SWITCH_BINS - 1)
    }
}

pub fn distance_bin(distance: f64) -> u8 {
    DISTANCE_EDGES
        .iter()
        .position(|edge| distance <= *edge)
        .map_or(MAX_DISTANCE_BIN, |idx| idx as u8)
}

/// 0: stopped, 1: at or below the limit, 2: up to `small_ratio` times the
/// limit, 3: above that.
pub fn speed_bin(speed: f64, allowed: f64, small_ratio: f64) -> u8 {
    if speed <= 0.0 {
        0
    } else if speed <= allowed {
        1
    } else if speed <= allowed * small_ratio {
        2
    } else {
        3
    }
}

/// Fraction of the current phase left before the next switch, linearly binned.
pub fn switch_bin(now: f64, next_switch: f64, phase_duration: f64) -> u8 {
    if phase_duration <= 0.0 {
        return N_SWITCH_BINS - 1;
    }
    let frac = ((next_switch - now) / phase_duration).max(0.0);
    ((frac * N_SWITCH_BINS as f64) as u8).min(N_SWITCH_BINS - 1)
}

/// Timing of the next signal on a vehicle's route.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalView {
    pub id: String,
    pub distance: f64,
    pub phase: Phase,
    pub now: f64,
    pub next_switch: f64,
    pub phase_duration: f64,
}

/// Raw telemetry a driving style needs to encode its state for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleView {
    pub speed: f64,
    pub allowed_speed: f64,
    pub signal: Option<SignalView>,
}

impl VehicleView {
    pub fn collect(sim: &dyn Simulator, vehicle_id: &str) -> SimResult<Self> {
        let speed = sim.speed(vehicle_id)?;
        let allowed_speed = sim.allowed_speed(vehicle_id)?;
        let signal = match sim.next_signals(vehicle_id)?.into_iter().next() {
            Some(ahead) => Some(SignalView {
                phase: Phase::from_signal_state(&sim.signal_state(&ahead.id)?),
                next_switch: sim.next_switch(&ahead.id)?,
                phase_duration: sim.phase_duration(&ahead.id)?,
                now: sim.time(),
                distance: ahead.distance,
                id: ahead.id,
            }),
            None => None,
        };
        Ok(VehicleView {
            speed,
            allowed_speed,
            signal,
        })
    }

    pub fn encode(&self, small_ratio: f64) -> DrivingState {
        let speed_b = speed_bin(self.speed, self.allowed_speed, small_ratio);
        match &self.signal {
            Some(signal) => DrivingState::new(
                signal.phase,
                distance_bin(signal.distance),
                speed_b,
                switch_bin(signal.now, signal.next_switch, signal.phase_duration),
            ),
            None => DrivingState::free_road(speed_b),
        }
    }
}
