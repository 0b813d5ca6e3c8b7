//! The traffic simulator is an external collaborator. This module defines the
//! query/command contract the decision engine and telemetry rely on.

use crate::error::SimError;
use crate::signal::SignalAhead;

pub type SimResult<T> = Result<T, SimError>;

pub trait Simulator {
    /// Advance the simulation by one tick.
    fn step(&mut self) -> SimResult<()>;
    /// Current simulation time in seconds.
    fn time(&self) -> f64;
    /// Ids of the vehicles currently in the network.
    fn active_vehicles(&self) -> Vec<String>;
    fn is_active(&self, vehicle_id: &str) -> bool {
        self.active_vehicles().iter().any(|v| v == vehicle_id)
    }

    fn speed(&self, vehicle_id: &str) -> SimResult<f64>;
    /// Legal speed on the vehicle's current lane.
    fn allowed_speed(&self, vehicle_id: &str) -> SimResult<f64>;
    fn road_id(&self, vehicle_id: &str) -> SimResult<String>;
    fn lane_id(&self, vehicle_id: &str) -> SimResult<String>;
    /// Odometer reading since departure.
    fn distance(&self, vehicle_id: &str) -> SimResult<f64>;
    /// Upcoming signals within lookahead range, nearest first.
    fn next_signals(&self, vehicle_id: &str) -> SimResult<Vec<SignalAhead>>;
    /// Monotonic waiting-time counter maintained by the simulator.
    fn accumulated_waiting_time(&self, vehicle_id: &str) -> SimResult<f64>;
    /// Vehicles involved in a collision during the last tick.
    fn colliding_vehicles(&self) -> Vec<String>;

    /// Full per-lane state string of a signal.
    fn signal_state(&self, signal_id: &str) -> SimResult<String>;
    /// Duration of the signal's current phase.
    fn phase_duration(&self, signal_id: &str) -> SimResult<f64>;
    /// Absolute time of the signal's next switch.
    fn next_switch(&self, signal_id: &str) -> SimResult<f64>;

    fn set_speed(&mut self, vehicle_id: &str, speed: f64) -> SimResult<()>;
    /// Decelerate towards `speed` at `decel` per second squared.
    fn slow_down(&mut self, vehicle_id: &str, speed: f64, decel: f64) -> SimResult<()>;

    fn edges(&self) -> Vec<String>;
    /// Edges from `from` to `to` inclusive, assuming `edges` lists a linear
    /// corridor in driving order.
    fn find_route(&self, from: &str, to: &str) -> SimResult<Vec<String>> {
        let edges = self.edges();
        let start = edges.iter().position(|e| e == from);
        let end = edges.iter().position(|e| e == to);
        match (start, end) {
            (Some(s), Some(e)) if s <= e => Ok(edges[s..=e].to_vec()),
            _ => Err(SimError::UnknownRoute(format!("{from} -> {to}"))),
        }
    }
    fn add_route(&mut self, route_id: &str, edges: &[String]) -> SimResult<()>;
    fn add_vehicle(&mut self, vehicle_id: &str, route_id: &str) -> SimResult<()>;

    fn close(&mut self);
}

/// Starts a fresh simulator instance for each episode.
pub trait Launcher {
    type Sim: Simulator;

    fn launch(&mut self, episode: u32) -> SimResult<Self::Sim>;
}
