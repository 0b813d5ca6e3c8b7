//! A small built-in simulator: a linear corridor of edges, each optionally
//! ending in a fixed-cycle signal. Vehicles follow their speed commands
//! within acceleration limits and do not enforce signals on their own, so
//! running a red is possible.

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::{debug, info};

use crate::config::{CorridorConfig, SignalConfig};
use crate::error::SimError;
use crate::signal::{Phase, SignalAhead};
use crate::simulator::{Launcher, SimResult, Simulator};

/// Vehicle length plus minimum insertion gap.
const VEHICLE_LENGTH: f64 = 5.0;
const MIN_GAP: f64 = 2.5;

#[derive(Debug, Clone)]
struct FixedCycle {
    id: String,
    edge: usize,
    green: f64,
    amber: f64,
    red: f64,
    offset: f64,
}

impl FixedCycle {
    fn cycle(&self) -> f64 {
        self.green + self.amber + self.red
    }

    /// Current phase, its duration and the time left in it.
    fn phase_at(&self, time: f64) -> (Phase, f64, f64) {
        let c = (time + self.offset).rem_euclid(self.cycle());
        if c < self.green {
            (Phase::Green, self.green, self.green - c)
        } else if c < self.green + self.amber {
            (Phase::Amber, self.amber, self.green + self.amber - c)
        } else {
            (Phase::Red, self.red, self.cycle() - c)
        }
    }

    fn link_char(&self, time: f64) -> char {
        match self.phase_at(time).0 {
            Phase::Green => 'G',
            Phase::Amber => 'y',
            Phase::Red => 'r',
        }
    }
}

#[derive(Debug, Clone)]
struct CorridorVehicle {
    route: Vec<usize>,
    /// Index into `route` of the current edge.
    leg: usize,
    /// Position along the current edge.
    pos: f64,
    speed: f64,
    target: Option<f64>,
    /// Set by `slow_down`; otherwise the emergency rate applies.
    decel: Option<f64>,
    odometer: f64,
    waiting_time: f64,
}

#[derive(Debug)]
pub struct CorridorSim {
    config: CorridorConfig,
    step_length: f64,
    time: f64,
    edge_index: HashMap<String, usize>,
    signals: Vec<FixedCycle>,
    routes: HashMap<String, Vec<usize>>,
    pending: VecDeque<(String, Vec<usize>)>,
    vehicles: BTreeMap<String, CorridorVehicle>,
    collisions: Vec<String>,
    closed: bool,
}

impl CorridorSim {
    pub fn new(config: CorridorConfig, step_length: f64) -> SimResult<Self> {
        if config.edges.is_empty() {
            return Err(SimError::Launch("corridor has no edges".into()));
        }
        let edge_index: HashMap<String, usize> = config
            .edges
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        let signals = config
            .signals
            .iter()
            .map(|s| fixed_cycle(s, &edge_index))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(CorridorSim {
            config,
            step_length,
            time: 0.0,
            edge_index,
            signals,
            routes: HashMap::new(),
            pending: VecDeque::new(),
            vehicles: BTreeMap::new(),
            collisions: Vec::new(),
            closed: false,
        })
    }

    fn vehicle(&self, id: &str) -> SimResult<&CorridorVehicle> {
        self.vehicles
            .get(id)
            .ok_or_else(|| SimError::UnknownVehicle(id.into()))
    }

    fn vehicle_mut(&mut self, id: &str) -> SimResult<&mut CorridorVehicle> {
        self.vehicles
            .get_mut(id)
            .ok_or_else(|| SimError::UnknownVehicle(id.into()))
    }

    fn signal(&self, id: &str) -> SimResult<&FixedCycle> {
        self.signals
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| SimError::UnknownSignal(id.into()))
    }

    fn edge_of(&self, v: &CorridorVehicle) -> usize {
        v.route[v.leg]
    }

    fn move_vehicles(&mut self) {
        let dt = self.step_length;
        let mut finished = Vec::new();
        for (id, v) in self.vehicles.iter_mut() {
            let edge = &self.config.edges[v.route[v.leg]];
            let target = v.target.unwrap_or(edge.speed_limit).max(0.0);
            v.speed = if target > v.speed {
                (v.speed + self.config.accel * dt).min(target)
            } else {
                let decel = v.decel.unwrap_or(self.config.emergency_decel);
                (v.speed - decel * dt).max(target)
            };
            if v.speed < self.config.halting_speed {
                v.waiting_time += dt;
            }
            // At most one edge boundary per tick, so every edge on the route
            // (the destination included) is observed at least once.
            let length = edge.length;
            let advance = v.speed * dt;
            if v.pos + advance < length {
                v.pos += advance;
                v.odometer += advance;
            } else if v.leg + 1 == v.route.len() {
                finished.push(id.clone());
            } else {
                v.leg += 1;
                let next = self.config.edges[v.route[v.leg]].length;
                let overflow = (v.pos + advance - length).min(next);
                v.odometer += length - v.pos + overflow;
                v.pos = overflow;
            }
        }
        for id in finished {
            debug!("{id} left the corridor at t={}", self.time);
            self.vehicles.remove(&id);
        }
    }

    fn insert_pending(&mut self) {
        while let Some((id, route)) = self.pending.front() {
            let start = route[0];
            let blocked = self
                .vehicles
                .values()
                .any(|v| v.route[v.leg] == start && v.pos < VEHICLE_LENGTH + MIN_GAP);
            if blocked {
                break;
            }
            debug!("{id} departs at t={}", self.time);
            let vehicle = CorridorVehicle {
                route: route.clone(),
                leg: 0,
                pos: 0.0,
                speed: 0.0,
                target: None,
                decel: None,
                odometer: 0.0,
                waiting_time: 0.0,
            };
            let id = id.clone();
            self.pending.pop_front();
            self.vehicles.insert(id, vehicle);
        }
    }

    fn detect_collisions(&mut self) {
        let placed: Vec<(&String, usize, f64)> = self
            .vehicles
            .iter()
            .map(|(id, v)| (id, v.route[v.leg], v.pos))
            .collect();
        let mut colliding = Vec::new();
        for (i, (a, edge_a, pos_a)) in placed.iter().enumerate() {
            for (b, edge_b, pos_b) in &placed[i + 1..] {
                if edge_a == edge_b && (pos_a - pos_b).abs() < VEHICLE_LENGTH {
                    colliding.push((*a).clone());
                    colliding.push((*b).clone());
                }
            }
        }
        colliding.sort();
        colliding.dedup();
        if !colliding.is_empty() {
            debug!("collision at t={}: {colliding:?}", self.time);
        }
        self.collisions = colliding;
    }
}

fn fixed_cycle(s: &SignalConfig, edge_index: &HashMap<String, usize>) -> SimResult<FixedCycle> {
    let edge = *edge_index
        .get(&s.edge)
        .ok_or_else(|| SimError::Launch(format!("signal {} sits on unknown edge {}", s.id, s.edge)))?;
    if s.green + s.amber + s.red <= 0.0 {
        return Err(SimError::Launch(format!("signal {} has an empty cycle", s.id)));
    }
    Ok(FixedCycle {
        id: s.id.clone(),
        edge,
        green: s.green,
        amber: s.amber,
        red: s.red,
        offset: s.offset,
    })
}

impl Simulator for CorridorSim {
    fn step(&mut self) -> SimResult<()> {
        if self.closed {
            return Err(SimError::Closed);
        }
        self.time += self.step_length;
        self.move_vehicles();
        self.insert_pending();
        self.detect_collisions();
        Ok(())
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn active_vehicles(&self) -> Vec<String> {
        self.vehicles.keys().cloned().collect()
    }

    fn speed(&self, vehicle_id: &str) -> SimResult<f64> {
        Ok(self.vehicle(vehicle_id)?.speed)
    }

    fn allowed_speed(&self, vehicle_id: &str) -> SimResult<f64> {
        let v = self.vehicle(vehicle_id)?;
        Ok(self.config.edges[self.edge_of(v)].speed_limit)
    }

    fn road_id(&self, vehicle_id: &str) -> SimResult<String> {
        let v = self.vehicle(vehicle_id)?;
        Ok(self.config.edges[self.edge_of(v)].id.clone())
    }

    fn lane_id(&self, vehicle_id: &str) -> SimResult<String> {
        Ok(format!("{}_0", self.road_id(vehicle_id)?))
    }

    fn distance(&self, vehicle_id: &str) -> SimResult<f64> {
        Ok(self.vehicle(vehicle_id)?.odometer)
    }

    fn next_signals(&self, vehicle_id: &str) -> SimResult<Vec<SignalAhead>> {
        let v = self.vehicle(vehicle_id)?;
        let mut ahead = Vec::new();
        let mut to_end = -v.pos;
        for &edge in &v.route[v.leg..] {
            to_end += self.config.edges[edge].length;
            if to_end > self.config.lookahead {
                break;
            }
            if let Some(signal) = self.signals.iter().find(|s| s.edge == edge) {
                ahead.push(SignalAhead {
                    id: signal.id.clone(),
                    link_index: 0,
                    distance: to_end,
                    link_state: signal.link_char(self.time).to_string(),
                });
            }
        }
        Ok(ahead)
    }

    fn accumulated_waiting_time(&self, vehicle_id: &str) -> SimResult<f64> {
        Ok(self.vehicle(vehicle_id)?.waiting_time)
    }

    fn colliding_vehicles(&self) -> Vec<String> {
        self.collisions.clone()
    }

    fn signal_state(&self, signal_id: &str) -> SimResult<String> {
        let signal = self.signal(signal_id)?;
        let lanes = self.config.edges[signal.edge].lanes.max(1) as usize;
        Ok(signal.link_char(self.time).to_string().repeat(lanes))
    }

    fn phase_duration(&self, signal_id: &str) -> SimResult<f64> {
        Ok(self.signal(signal_id)?.phase_at(self.time).1)
    }

    fn next_switch(&self, signal_id: &str) -> SimResult<f64> {
        Ok(self.time + self.signal(signal_id)?.phase_at(self.time).2)
    }

    fn set_speed(&mut self, vehicle_id: &str, speed: f64) -> SimResult<()> {
        let v = self.vehicle_mut(vehicle_id)?;
        v.target = Some(speed);
        v.decel = None;
        Ok(())
    }

    fn slow_down(&mut self, vehicle_id: &str, speed: f64, decel: f64) -> SimResult<()> {
        let v = self.vehicle_mut(vehicle_id)?;
        v.target = Some(speed);
        v.decel = Some(decel);
        Ok(())
    }

    fn edges(&self) -> Vec<String> {
        self.config.edges.iter().map(|e| e.id.clone()).collect()
    }

    fn add_route(&mut self, route_id: &str, edges: &[String]) -> SimResult<()> {
        if self.routes.contains_key(route_id) {
            return Err(SimError::DuplicateRoute(route_id.into()));
        }
        let route = edges
            .iter()
            .map(|e| self.edge_index.get(e).copied())
            .collect::<Option<Vec<_>>>()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| SimError::UnknownRoute(route_id.into()))?;
        self.routes.insert(route_id.into(), route);
        Ok(())
    }

    fn add_vehicle(&mut self, vehicle_id: &str, route_id: &str) -> SimResult<()> {
        if self.vehicles.contains_key(vehicle_id)
            || self.pending.iter().any(|(id, _)| id == vehicle_id)
        {
            return Err(SimError::DuplicateVehicle(vehicle_id.into()));
        }
        let route = self
            .routes
            .get(route_id)
            .ok_or_else(|| SimError::UnknownRoute(route_id.into()))?
            .clone();
        self.pending.push_back((vehicle_id.into(), route));
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.vehicles.clear();
        self.pending.clear();
        self.collisions.clear();
    }
}

/// Builds a fresh [`CorridorSim`] for every episode.
#[derive(Debug, Clone)]
pub struct CorridorLauncher {
    pub config: CorridorConfig,
    pub step_length: f64,
}

impl CorridorLauncher {
    pub fn new(config: CorridorConfig, step_length: f64) -> Self {
        CorridorLauncher {
            config,
            step_length,
        }
    }
}

impl Launcher for CorridorLauncher {
    type Sim = CorridorSim;

    fn launch(&mut self, episode: u32) -> SimResult<CorridorSim> {
        let sim = CorridorSim::new(self.config.clone(), self.step_length)?;
        info!(
            "Launched corridor for episode {episode}: {} edges, {} signals",
            sim.config.edges.len(),
            sim.signals.len()
        );
        Ok(sim)
    }
}
