use itertools::Itertools;
use log::{error, info};
use redlight::{
    config::{Config, core_config, init_core_config},
    corridor::CorridorLauncher,
    error::Result,
    simulation::Experiment,
};

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // An explicit path wins over REDLIGHT_CONFIG and ./redlight.toml.
    let config = match std::env::args().nth(1) {
        Some(path) => init_core_config(Config::from_file(path)?),
        None => core_config()?,
    };
    config.validate()?;
    info!(
        "Running {} episodes of up to {} steps over routes {}",
        config.episodes,
        config.max_steps,
        config.routes.iter().map(|r| r.route_id()).join(", ")
    );

    let launcher = CorridorLauncher::new(config.corridor.clone(), config.step_length);
    let mut experiment = Experiment::new(config.clone(), launcher)?;
    let summary = experiment.run()?;

    for avg in &summary.averages {
        info!(
            "{}: {}/{} arrivals, {:.1} steps, {:.2} m/s, red runs {:.2}, amber runs {:.2}, sudden brakes {:.2}, collisions {:.2}",
            avg.agent,
            avg.arrivals,
            avg.runs,
            avg.time_steps,
            avg.avg_speed,
            avg.red_runs,
            avg.amber_runs,
            avg.sudden_brakes,
            avg.collisions
        );
    }
    let path = config.table_dir.join("summary.json");
    summary.write_json(&path)?;
    info!("Wrote {}", path.display());
    Ok(())
}
