//! Per-vehicle episode statistics, derived tick by tick from raw simulator
//! telemetry.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::TelemetryConfig;
use crate::learning::agent_state::{MAX_SPEED_BIN, speed_bin};
use crate::signal::{SignalAhead, SignalColor};
use crate::simulator::{SimResult, Simulator};

/// Everything telemetry needs from one tick for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct TickObservation {
    pub speed: f64,
    pub allowed_speed: f64,
    pub road_id: String,
    pub lane_id: String,
    /// Odometer reading.
    pub distance: f64,
    pub signals: Vec<SignalAhead>,
    pub collided: bool,
}

impl TickObservation {
    pub fn collect(sim: &dyn Simulator, vehicle_id: &str, colliding: &[String]) -> SimResult<Self> {
        Ok(TickObservation {
            speed: sim.speed(vehicle_id)?,
            allowed_speed: sim.allowed_speed(vehicle_id)?,
            road_id: sim.road_id(vehicle_id)?,
            lane_id: sim.lane_id(vehicle_id)?,
            distance: sim.distance(vehicle_id)?,
            signals: sim.next_signals(vehicle_id)?,
            collided: colliding.iter().any(|v| v == vehicle_id),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorCounts {
    pub green: u32,
    pub amber: u32,
    pub red: u32,
}

impl ColorCounts {
    pub fn increment(&mut self, color: SignalColor) {
        match color {
            SignalColor::Green => self.green += 1,
            SignalColor::Amber => self.amber += 1,
            SignalColor::Red => self.red += 1,
        }
    }

    pub fn get(&self, color: SignalColor) -> u32 {
        match color {
            SignalColor::Green => self.green,
            SignalColor::Amber => self.amber,
            SignalColor::Red => self.red,
        }
    }
}

/// A signal that has been within lookahead range at least once.
///
/// Counters only move on transitions: entering encounter range for the first
/// time, or leaving the lookahead set (the vehicle has passed the stop line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSignal {
    pub last_color: SignalColor,
    /// Currently in the vehicle's lookahead set.
    pub present: bool,
    /// Has come within encounter distance.
    pub encountered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub vehicle_id: String,
    pub destination: String,
    pub reached: bool,
    pub end_step: Option<u32>,
    pub active_ticks: u32,
    pub total_distance: f64,
    pub edges_visited: BTreeSet<String>,
    pub signals: BTreeMap<String, TrackedSignal>,
    pub encounters: ColorCounts,
    pub runs: ColorCounts,
    /// Ticks on which the vehicle came to a halt from moving.
    pub stop_count: u32,
    /// Time spent at zero speed.
    pub stopped_time: f64,
    pub max_speed: f64,
    pub sudden_brake_count: u32,
    pub max_decel: f64,
    pub sum_decel: f64,
    pub lane_change_count: u32,
    pub collision_count: u32,
    /// Simulator-maintained accumulated waiting time, pulled after the tick loop.
    pub waiting_time: f64,
    pub speed_bin_ticks: [u32; MAX_SPEED_BIN as usize + 1],
    prev_speed: Option<f64>,
    prev_lane: Option<String>,
}

impl EpisodeRecord {
    pub fn new(vehicle_id: &str, destination: &str) -> Self {
        EpisodeRecord {
            vehicle_id: vehicle_id.into(),
            destination: destination.into(),
            reached: false,
            end_step: None,
            active_ticks: 0,
            total_distance: 0.0,
            edges_visited: BTreeSet::new(),
            signals: BTreeMap::new(),
            encounters: ColorCounts::default(),
            runs: ColorCounts::default(),
            stop_count: 0,
            stopped_time: 0.0,
            max_speed: 0.0,
            sudden_brake_count: 0,
            max_decel: 0.0,
            sum_decel: 0.0,
            lane_change_count: 0,
            collision_count: 0,
            waiting_time: 0.0,
            speed_bin_ticks: [0; MAX_SPEED_BIN as usize + 1],
            prev_speed: None,
            prev_lane: None,
        }
    }

    /// Distinct signals the vehicle came within encounter distance of.
    pub fn signals_encountered(&self) -> usize {
        self.signals.values().filter(|s| s.encountered).count()
    }

    pub fn avg_decel(&self) -> f64 {
        if self.sudden_brake_count > 0 {
            self.sum_decel / self.sudden_brake_count as f64
        } else {
            0.0
        }
    }

    /// Stopped time per encountered signal.
    pub fn avg_wait_per_signal(&self) -> f64 {
        match self.signals_encountered() {
            0 => 0.0,
            n => self.stopped_time / n as f64,
        }
    }

    /// Fold one tick of telemetry into the record. Once the destination has
    /// been reached the record is frozen and further ticks are ignored.
    pub fn observe(
        &mut self,
        step: u32,
        obs: &TickObservation,
        config: &TelemetryConfig,
        step_length: f64,
    ) {
        if self.reached {
            return;
        }
        self.active_ticks += 1;

        if obs.collided {
            self.collision_count += 1;
        }
        self.edges_visited.insert(obs.road_id.clone());
        self.total_distance = obs.distance;

        self.track_signals(&obs.signals, config.encounter_distance);

        self.max_speed = self.max_speed.max(obs.speed);
        if let Some(prev) = self.prev_speed {
            let decel = (prev - obs.speed) / step_length;
            if decel > config.sudden_brake_threshold {
                self.sudden_brake_count += 1;
                self.sum_decel += decel;
                self.max_decel = self.max_decel.max(decel);
            }
            if prev > 0.0 && obs.speed == 0.0 {
                self.stop_count += 1;
            }
        }
        if obs.speed == 0.0 {
            self.stopped_time += step_length;
        }
        self.prev_speed = Some(obs.speed);

        if let Some(prev_lane) = &self.prev_lane {
            if *prev_lane != obs.lane_id {
                self.lane_change_count += 1;
            }
        }
        self.prev_lane = Some(obs.lane_id.clone());

        let bin = speed_bin(obs.speed, obs.allowed_speed, config.speed_bin_ratio);
        self.speed_bin_ticks[bin as usize] += 1;

        if obs.road_id == self.destination {
            self.reached = true;
            self.end_step = Some(step);
            debug!("{} reached {} at step {step}", self.vehicle_id, self.destination);
        }
    }

    fn track_signals(&mut self, ahead: &[SignalAhead], encounter_distance: f64) {
        let mut seen = BTreeSet::new();
        for signal in ahead {
            seen.insert(signal.id.as_str());
            let color = SignalColor::from_link_state(&signal.link_state);
            let tracked = self
                .signals
                .entry(signal.id.clone())
                .or_insert_with(|| TrackedSignal {
                    last_color: color,
                    present: false,
                    encountered: false,
                });
            if !tracked.present {
                tracked.present = true;
                debug!("{}: signal {} entered lookahead ({color})", self.vehicle_id, signal.id);
            }
            if tracked.last_color != color {
                debug!(
                    "{}: signal {} changed {} -> {color}",
                    self.vehicle_id, signal.id, tracked.last_color
                );
                tracked.last_color = color;
            }
            if signal.distance <= encounter_distance && !tracked.encountered {
                tracked.encountered = true;
                self.encounters.increment(color);
            }
        }

        for (id, tracked) in self.signals.iter_mut() {
            if tracked.present && !seen.contains(id.as_str()) {
                tracked.present = false;
                self.runs.increment(tracked.last_color);
                debug!("{}: passed signal {id} on {}", self.vehicle_id, tracked.last_color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TelemetryConfig {
        TelemetryConfig::default()
    }

    fn obs(speed: f64, road: &str, signals: Vec<SignalAhead>) -> TickObservation {
        TickObservation {
            speed,
            allowed_speed: 10.0,
            road_id: road.into(),
            lane_id: format!("{road}_0"),
            distance: 0.0,
            signals,
            collided: false,
        }
    }

    fn tls(id: &str, distance: f64, state: &str) -> SignalAhead {
        SignalAhead {
            id: id.into(),
            link_index: 0,
            distance,
            link_state: state.into(),
        }
    }

    #[test]
    fn test_encounter_counted_once_while_waiting() {
        let mut rec = EpisodeRecord::new("v", "dest");
        for step in 0..5 {
            rec.observe(step, &obs(0.0, "e0", vec![tls("t0", 5.0, "r")]), &cfg(), 1.0);
        }
        assert_eq!(rec.encounters.red, 1);
        assert_eq!(rec.runs, ColorCounts::default());
        assert_eq!(rec.signals_encountered(), 1);
    }

    #[test]
    fn test_run_through_red_on_leaving_lookahead() {
        let mut rec = EpisodeRecord::new("v", "dest");
        rec.observe(0, &obs(10.0, "e0", vec![tls("t0", 15.0, "r")]), &cfg(), 1.0);
        rec.observe(1, &obs(10.0, "e0", vec![tls("t0", 5.0, "r")]), &cfg(), 1.0);
        assert_eq!(rec.runs.red, 0);
        rec.observe(2, &obs(10.0, "e1", vec![]), &cfg(), 1.0);
        assert_eq!(rec.runs.red, 1);
        assert_eq!(rec.encounters.red, 1);
        // No double counting on later ticks.
        rec.observe(3, &obs(10.0, "e1", vec![]), &cfg(), 1.0);
        assert_eq!(rec.runs.red, 1);
    }

    #[test]
    fn test_wait_through_green_is_green_pass() {
        let mut rec = EpisodeRecord::new("v", "dest");
        for step in 0..5 {
            rec.observe(step, &obs(0.0, "e0", vec![tls("t0", 3.0, "r")]), &cfg(), 1.0);
        }
        rec.observe(5, &obs(2.0, "e0", vec![tls("t0", 1.0, "G")]), &cfg(), 1.0);
        rec.observe(6, &obs(4.0, "e1", vec![]), &cfg(), 1.0);
        assert_eq!(rec.runs.red, 0);
        assert_eq!(rec.runs.green, 1);
        assert_eq!(rec.encounters.red, 1);
        assert_eq!(rec.encounters.green, 0);
    }

    #[test]
    fn test_far_signal_passed_without_encounter_still_counts_run() {
        let mut rec = EpisodeRecord::new("v", "dest");
        rec.observe(0, &obs(10.0, "e0", vec![tls("t0", 30.0, "y")]), &cfg(), 1.0);
        rec.observe(1, &obs(10.0, "e1", vec![]), &cfg(), 1.0);
        assert_eq!(rec.encounters, ColorCounts::default());
        assert_eq!(rec.runs.amber, 1);
    }

    #[test]
    fn test_sudden_braking() {
        let mut rec = EpisodeRecord::new("v", "dest");
        for (step, speed) in [12.0, 11.0, 6.0, 6.0, 0.0].into_iter().enumerate() {
            rec.observe(step as u32, &obs(speed, "e0", vec![]), &cfg(), 1.0);
        }
        assert_eq!(rec.sudden_brake_count, 2);
        assert_eq!(rec.max_decel, 6.0);
        assert_eq!(rec.sum_decel, 11.0);
        assert_eq!(rec.avg_decel(), 5.5);
        assert_eq!(rec.stop_count, 1);
        assert_eq!(rec.stopped_time, 1.0);
        assert_eq!(rec.max_speed, 12.0);
    }

    #[test]
    fn test_lane_changes_and_collisions() {
        let mut rec = EpisodeRecord::new("v", "dest");
        let mut o = obs(5.0, "e0", vec![]);
        rec.observe(0, &o, &cfg(), 1.0);
        o.lane_id = "e0_1".into();
        o.collided = true;
        rec.observe(1, &o, &cfg(), 1.0);
        rec.observe(2, &o, &cfg(), 1.0);
        o.lane_id = "e0_0".into();
        o.collided = false;
        rec.observe(3, &o, &cfg(), 1.0);
        assert_eq!(rec.lane_change_count, 2);
        assert_eq!(rec.collision_count, 2);
    }

    #[test]
    fn test_arrival_freezes_record() {
        let mut rec = EpisodeRecord::new("v", "e2");
        rec.observe(0, &obs(5.0, "e1", vec![]), &cfg(), 1.0);
        let mut o = obs(5.0, "e2", vec![]);
        o.distance = 120.0;
        rec.observe(7, &o, &cfg(), 1.0);
        assert!(rec.reached);
        assert_eq!(rec.end_step, Some(7));
        o.distance = 200.0;
        rec.observe(8, &o, &cfg(), 1.0);
        assert_eq!(rec.end_step, Some(7));
        assert_eq!(rec.total_distance, 120.0);
        assert_eq!(rec.active_ticks, 2);
        assert_eq!(rec.edges_visited.len(), 2);
    }

    #[test]
    fn test_speed_bin_histogram() {
        let mut rec = EpisodeRecord::new("v", "dest");
        for speed in [0.0, 5.0, 10.0, 11.0, 15.0] {
            rec.observe(0, &obs(speed, "e0", vec![]), &cfg(), 1.0);
        }
        assert_eq!(rec.speed_bin_ticks, [1, 2, 1, 1]);
    }
}
