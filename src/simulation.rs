use std::collections::HashMap;

use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::UInt;
use crate::agent::Archetype;
use crate::config::{Config, RouteConfig};
use crate::error::{Result, SimError};
use crate::learning::learning_agent::LearningDriver;
use crate::simulator::{Launcher, SimResult, Simulator};
use crate::telemetry::episode::{EpisodeRecord, TickObservation};
use crate::telemetry::summary::{JourneyMetrics, RunRow, Summary};

pub const CAUTIOUS_ID: &str = "cautious_1";
pub const AGGRESSIVE_ID: &str = "aggressive_1";

/// Runs episodes back to back, each on a freshly launched simulator, with the
/// same two learning drivers throughout.
#[derive(Debug)]
pub struct Experiment<L: Launcher> {
    pub config: Config,
    launcher: L,
    drivers: Vec<LearningDriver>,
    route_rng: StdRng,
    summary: Summary,
}

impl<L: Launcher> Experiment<L> {
    pub fn new(config: Config, launcher: L) -> Result<Self> {
        let drivers = vec![
            LearningDriver::new(
                CAUTIOUS_ID,
                Archetype::cautious(config.cautious.clone()),
                &config.rl,
                config.seed.wrapping_add(1),
            )?,
            LearningDriver::new(
                AGGRESSIVE_ID,
                Archetype::aggressive(config.aggressive.clone()),
                &config.rl,
                config.seed.wrapping_add(2),
            )?,
        ];
        Ok(Experiment {
            route_rng: StdRng::seed_from_u64(config.seed),
            config,
            launcher,
            drivers,
            summary: Summary::default(),
        })
    }

    pub fn drivers(&self) -> &[LearningDriver] {
        &self.drivers
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn into_summary(self) -> Summary {
        self.summary
    }

    /// Load persisted tables for every driver. Missing files leave the driver
    /// with a fresh table.
    pub fn resume(&mut self) -> Result<()> {
        for driver in self.drivers.iter_mut() {
            let path = self.config.table_path(driver.name());
            if driver.load(&path)? {
                info!(
                    "Resumed {} from {} ({} states, epsilon {:.4})",
                    driver.vehicle_id(),
                    path.display(),
                    driver.table().len(),
                    driver.epsilon()
                );
            }
        }
        Ok(())
    }

    pub fn save_tables(&self) -> Result<()> {
        for driver in &self.drivers {
            driver.save(self.config.table_path(driver.name()))?;
        }
        Ok(())
    }

    /// Run every configured episode. An episode whose simulator fails is
    /// logged and skipped; table persistence failures abort the run.
    pub fn run(&mut self) -> Result<&Summary> {
        if self.config.resume {
            self.resume()?;
        }
        for episode in 0..self.config.episodes {
            match self.run_episode(episode) {
                Ok(rows) => rows.into_iter().for_each(|row| self.summary.push(row)),
                Err(e) => warn!("Skipping episode {episode}: {e}"),
            }
            self.save_tables()?;
        }
        self.summary.compute_averages();
        Ok(&self.summary)
    }

    /// One episode from launch to annealing. Returns one row per driver.
    pub fn run_episode(&mut self, episode: UInt) -> SimResult<Vec<RunRow>> {
        let route = self
            .config
            .routes
            .choose(&mut self.route_rng)
            .cloned()
            .ok_or_else(|| SimError::UnknownRoute("no routes configured".into()))?;
        let mut sim = self.launcher.launch(episode)?;
        let outcome = self.drive_episode(&mut sim, &route);
        sim.close();
        let (records, steps) = outcome?;

        let route_id = route.route_id();
        let mut rows = Vec::with_capacity(self.drivers.len());
        for (driver, record) in self.drivers.iter_mut().zip(&records) {
            let epsilon = driver.epsilon();
            let decisions = driver.end_episode();
            let metrics = JourneyMetrics::from_record(record);
            let annealed = driver.anneal();
            info!(
                "Episode {episode} {}: route {route_id}, {}, reward {:.2}, violations {}, epsilon {epsilon:.4} -> {annealed:.4}",
                driver.vehicle_id(),
                match record.end_step {
                    Some(step) => format!("arrived at step {step}"),
                    None => "did not arrive".to_string(),
                },
                driver.episode_reward(),
                decisions.violations(),
            );
            rows.push(RunRow {
                episode,
                agent: driver.vehicle_id().to_string(),
                route: route_id.clone(),
                epsilon,
                decisions,
                metrics,
            });
        }
        info!("Episode {episode} finished after {steps} steps");
        Ok(rows)
    }

    fn drive_episode(
        &mut self,
        sim: &mut dyn Simulator,
        route: &RouteConfig,
    ) -> SimResult<(Vec<EpisodeRecord>, UInt)> {
        let edges = sim.find_route(&route.from, &route.to)?;
        let route_id = route.route_id();
        match sim.add_route(&route_id, &edges) {
            Ok(()) | Err(SimError::DuplicateRoute(_)) => {}
            Err(e) => return Err(e),
        }

        let mut records = Vec::with_capacity(self.drivers.len());
        for driver in self.drivers.iter_mut() {
            let id = driver.vehicle_id().to_string();
            sim.add_vehicle(&id, &route_id)?;
            driver.begin_episode(&id);
            records.push(EpisodeRecord::new(&id, &route.to));
        }

        let mut last_waits: HashMap<String, f64> = HashMap::new();
        let mut steps = 0;
        while steps < self.config.max_steps {
            sim.step()?;
            run_tick(sim, &mut self.drivers, &mut records, steps, &self.config)?;
            steps += 1;
            if records.iter().all(|r| r.reached) {
                break;
            }
            remember_waiting_times(&*sim, &records, &mut last_waits);
        }

        pull_waiting_times(&*sim, &mut records, &last_waits);
        Ok((records, steps))
    }
}

/// Keep the latest waiting-time reading of vehicles that have reached their
/// destination, since the simulator may drop them before the episode ends.
fn remember_waiting_times(
    sim: &dyn Simulator,
    records: &[EpisodeRecord],
    last_waits: &mut HashMap<String, f64>,
) {
    for record in records.iter().filter(|r| r.reached) {
        if let Ok(wait) = sim.accumulated_waiting_time(&record.vehicle_id) {
            last_waits.insert(record.vehicle_id.clone(), wait);
        }
    }
}

/// Read each vehicle's accumulated waiting time once the tick loop is over.
/// Vehicles no longer in the network fall back to their last reading.
fn pull_waiting_times(
    sim: &dyn Simulator,
    records: &mut [EpisodeRecord],
    last_waits: &HashMap<String, f64>,
) {
    for record in records.iter_mut() {
        let wait = sim
            .accumulated_waiting_time(&record.vehicle_id)
            .ok()
            .or_else(|| last_waits.get(&record.vehicle_id).copied());
        record.waiting_time = wait.unwrap_or(0.0);
    }
}

/// Drive and observe every active vehicle for the tick the simulator has
/// just produced. A vehicle that vanishes mid-tick is skipped.
pub fn run_tick(
    sim: &mut dyn Simulator,
    drivers: &mut [LearningDriver],
    records: &mut [EpisodeRecord],
    step: UInt,
    config: &Config,
) -> SimResult<()> {
    for driver in drivers.iter_mut() {
        if !sim.is_active(driver.vehicle_id()) {
            continue;
        }
        match driver.update(sim) {
            Ok(_) => {}
            Err(SimError::UnknownVehicle(id)) => warn!("{id} left before its command was applied"),
            Err(e) => return Err(e),
        }
    }

    let colliding = sim.colliding_vehicles();
    for record in records.iter_mut() {
        if !sim.is_active(&record.vehicle_id) {
            continue;
        }
        match TickObservation::collect(&*sim, &record.vehicle_id, &colliding) {
            Ok(obs) => record.observe(step, &obs, &config.telemetry, config.step_length),
            Err(SimError::UnknownVehicle(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
