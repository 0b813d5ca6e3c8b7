use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::telemetry::episode::EpisodeRecord;
use crate::telemetry::recorder::DecisionRecorder;

/// Metrics of one vehicle that reached its destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyMetrics {
    pub time_steps: u32,
    pub distance: f64,
    pub avg_speed: f64,
    pub max_speed: f64,
    pub edges: usize,
    pub signals_encountered: usize,
    pub stops: u32,
    pub stopped_time: f64,
    pub amber_encountered: u32,
    pub red_encountered: u32,
    pub amber_runs: u32,
    pub red_runs: u32,
    pub green_runs: u32,
    pub sudden_brakes: u32,
    pub max_decel: f64,
    pub avg_decel: f64,
    pub lane_changes: u32,
    pub avg_wait_per_signal: f64,
    pub waiting_time: f64,
    pub collisions: u32,
    pub speed_bin_ticks: [u32; 4],
}

impl JourneyMetrics {
    pub fn from_record(rec: &EpisodeRecord) -> Option<Self> {
        let t = rec.end_step?;
        Some(JourneyMetrics {
            time_steps: t,
            distance: rec.total_distance,
            avg_speed: if t > 0 {
                rec.total_distance / t as f64
            } else {
                0.0
            },
            max_speed: rec.max_speed,
            edges: rec.edges_visited.len(),
            signals_encountered: rec.signals_encountered(),
            stops: rec.stop_count,
            stopped_time: rec.stopped_time,
            amber_encountered: rec.encounters.amber,
            red_encountered: rec.encounters.red,
            amber_runs: rec.runs.amber,
            red_runs: rec.runs.red,
            green_runs: rec.runs.green,
            sudden_brakes: rec.sudden_brake_count,
            max_decel: rec.max_decel,
            avg_decel: rec.avg_decel(),
            lane_changes: rec.lane_change_count,
            avg_wait_per_signal: rec.avg_wait_per_signal(),
            waiting_time: rec.waiting_time,
            collisions: rec.collision_count,
            speed_bin_ticks: rec.speed_bin_ticks,
        })
    }
}

/// One row per vehicle per episode. `metrics` is `None` for non-arrivals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub episode: u32,
    pub agent: String,
    pub route: String,
    pub epsilon: f64,
    pub decisions: DecisionRecorder,
    pub metrics: Option<JourneyMetrics>,
}

/// Per-agent means over the runs in which the agent arrived.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentAverages {
    pub agent: String,
    pub runs: usize,
    pub arrivals: usize,
    pub time_steps: f64,
    pub distance: f64,
    pub avg_speed: f64,
    pub max_speed: f64,
    pub edges: f64,
    pub signals_encountered: f64,
    pub stops: f64,
    pub stopped_time: f64,
    pub amber_encountered: f64,
    pub red_encountered: f64,
    pub amber_runs: f64,
    pub red_runs: f64,
    pub sudden_brakes: f64,
    pub max_decel: f64,
    pub avg_decel: f64,
    pub lane_changes: f64,
    pub avg_wait_per_signal: f64,
    pub waiting_time: f64,
    pub collisions: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub rows: Vec<RunRow>,
    pub averages: Vec<AgentAverages>,
}

impl Summary {
    pub fn push(&mut self, row: RunRow) {
        self.rows.push(row);
    }

    /// Recompute `averages` from the collected rows.
    pub fn compute_averages(&mut self) {
        let mut by_agent: BTreeMap<&str, Vec<&RunRow>> = BTreeMap::new();
        for row in &self.rows {
            by_agent.entry(row.agent.as_str()).or_default().push(row);
        }
        self.averages = by_agent
            .into_iter()
            .map(|(agent, rows)| average(agent, &rows))
            .collect();
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Summary)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(Error::SummaryEncode)?;
        std::fs::write(path, json).map_err(Error::Summary)
    }
}

fn average(agent: &str, rows: &[&RunRow]) -> AgentAverages {
    let arrived: Vec<&JourneyMetrics> = rows.iter().filter_map(|r| r.metrics.as_ref()).collect();
    let mut avg = AgentAverages {
        agent: agent.into(),
        runs: rows.len(),
        arrivals: arrived.len(),
        ..AgentAverages::default()
    };
    if arrived.is_empty() {
        return avg;
    }
    let n = arrived.len() as f64;
    let mean = |f: &dyn Fn(&JourneyMetrics) -> f64| arrived.iter().map(|m| f(m)).sum::<f64>() / n;
    avg.time_steps = mean(&|m| m.time_steps as f64);
    avg.distance = mean(&|m| m.distance);
    avg.avg_speed = mean(&|m| m.avg_speed);
    avg.max_speed = mean(&|m| m.max_speed);
    avg.edges = mean(&|m| m.edges as f64);
    avg.signals_encountered = mean(&|m| m.signals_encountered as f64);
    avg.stops = mean(&|m| m.stops as f64);
    avg.stopped_time = mean(&|m| m.stopped_time);
    avg.amber_encountered = mean(&|m| m.amber_encountered as f64);
    avg.red_encountered = mean(&|m| m.red_encountered as f64);
    avg.amber_runs = mean(&|m| m.amber_runs as f64);
    avg.red_runs = mean(&|m| m.red_runs as f64);
    avg.sudden_brakes = mean(&|m| m.sudden_brakes as f64);
    avg.max_decel = mean(&|m| m.max_decel);
    avg.avg_decel = mean(&|m| m.avg_decel);
    avg.lane_changes = mean(&|m| m.lane_changes as f64);
    avg.avg_wait_per_signal = mean(&|m| m.avg_wait_per_signal);
    avg.waiting_time = mean(&|m| m.waiting_time);
    avg.collisions = mean(&|m| m.collisions as f64);
    avg
}
