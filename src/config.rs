use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::UInt;
use crate::error::ConfigError;

pub const CONFIG_ENV_VAR: &str = "REDLIGHT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./redlight.toml";

static CORE_CONFIG: OnceLock<Config> = OnceLock::new();

/// Process-wide configuration.
///
/// Initialised either explicitly through [`init_core_config`] or lazily from the
/// file named by `REDLIGHT_CONFIG` (falling back to `./redlight.toml`). Only an
/// absent file yields the defaults; a file that fails to parse or validate is
/// an error.
pub fn core_config() -> Result<&'static Config, ConfigError> {
    if let Some(config) = CORE_CONFIG.get() {
        return Ok(config);
    }
    let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    Ok(init_core_config(Config::from_file_or_default(path)?))
}

/// Install `config` as the process-wide configuration. Returns the installed
/// value, which is the earlier one if the configuration was already set.
pub fn init_core_config(config: Config) -> &'static Config {
    if CORE_CONFIG.set(config).is_err() {
        warn!("Core config already initialised; keeping the existing one");
    }
    CORE_CONFIG.get_or_init(Config::default)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub seed: u64,
    pub episodes: UInt,
    /// Tick budget per episode.
    pub max_steps: UInt,
    /// Seconds per simulation tick.
    pub step_length: f64,
    pub table_dir: PathBuf,
    /// Load previously persisted tables before the first episode.
    pub resume: bool,
    pub rl: RlConfig,
    pub cautious: StyleConfig,
    pub aggressive: StyleConfig,
    pub telemetry: TelemetryConfig,
    pub routes: Vec<RouteConfig>,
    pub corridor: CorridorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            seed: 42,
            episodes: 100,
            max_steps: 3000,
            step_length: 1.0,
            table_dir: PathBuf::from("tables"),
            resume: false,
            rl: RlConfig::default(),
            cautious: StyleConfig::cautious(),
            aggressive: StyleConfig::aggressive(),
            telemetry: TelemetryConfig::default(),
            routes: vec![
                RouteConfig::new("e0", "e5"),
                RouteConfig::new("e1", "e5"),
                RouteConfig::new("e0", "e3"),
            ],
            corridor: CorridorConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Like [`Config::from_file`], but a missing file gives the defaults.
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Config::from_file(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if !(self.rl.alpha > 0.0 && self.rl.alpha <= 1.0) {
            return invalid(format!("alpha must be in (0, 1], got {}", self.rl.alpha));
        }
        if !(0.0..=1.0).contains(&self.rl.gamma) {
            return invalid(format!("gamma must be in [0, 1], got {}", self.rl.gamma));
        }
        if !(0.0..=1.0).contains(&self.rl.initial_epsilon) {
            return invalid(format!(
                "initial_epsilon must be in [0, 1], got {}",
                self.rl.initial_epsilon
            ));
        }
        if self.step_length <= 0.0 {
            return invalid(format!("step_length must be positive, got {}", self.step_length));
        }
        for (name, style) in [("cautious", &self.cautious), ("aggressive", &self.aggressive)] {
            if style.epsilon_floor < 0.0 || style.epsilon_floor > self.rl.initial_epsilon {
                return invalid(format!(
                    "{name}.epsilon_floor must be in [0, initial_epsilon], got {}",
                    style.epsilon_floor
                ));
            }
            if style.small_excess_ratio < 1.0 || style.max_excess_ratio < style.small_excess_ratio {
                return invalid(format!(
                    "{name} excess ratios must satisfy 1 <= small <= max, got {} and {}",
                    style.small_excess_ratio, style.max_excess_ratio
                ));
            }
            if style.comfortable_decel <= 0.0 {
                return invalid(format!("{name}.comfortable_decel must be positive"));
            }
        }
        if self.telemetry.speed_bin_ratio < 1.0 {
            return invalid("telemetry.speed_bin_ratio must be at least 1".into());
        }
        if self.routes.is_empty() {
            return invalid("at least one route is required".into());
        }
        Ok(())
    }

    /// Location of the persisted table for the named archetype.
    pub fn table_path(&self, archetype: &str) -> PathBuf {
        self.table_dir.join(format!("{archetype}_table.json"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlConfig {
    pub alpha: f64,
    pub gamma: f64,
    pub initial_epsilon: f64,
}

impl Default for RlConfig {
    fn default() -> Self {
        RlConfig {
            alpha: 0.1,
            gamma: 0.9,
            initial_epsilon: 1.0,
        }
    }
}

/// Parameters of one driving archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleConfig {
    /// Speed multiple used by `GO_OVERSHOOT_SMALL`.
    pub small_excess_ratio: f64,
    /// Speed multiple used by `GO_OVERSHOOT_LARGE`.
    pub max_excess_ratio: f64,
    /// Deceleration applied by `SLOW`.
    pub comfortable_decel: f64,
    pub epsilon_floor: f64,
    /// Episodes over which exploration anneals to the floor.
    pub horizon: UInt,
    /// Interpolate overshoot rewards by the current exploration rate.
    #[serde(default = "default_true")]
    pub epsilon_shaping: bool,
}

fn default_true() -> bool {
    true
}

impl StyleConfig {
    pub fn cautious() -> Self {
        StyleConfig {
            small_excess_ratio: 1.1,
            max_excess_ratio: 1.3,
            comfortable_decel: 4.5,
            epsilon_floor: 0.01,
            horizon: 200,
            epsilon_shaping: true,
        }
    }

    pub fn aggressive() -> Self {
        StyleConfig {
            small_excess_ratio: 1.2,
            max_excess_ratio: 2.0,
            comfortable_decel: 4.5,
            epsilon_floor: 0.10,
            horizon: 300,
            epsilon_shaping: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Distance at which an upcoming signal counts as encountered.
    pub encounter_distance: f64,
    /// Deceleration (per second squared) above which braking is sudden.
    pub sudden_brake_threshold: f64,
    /// Upper bound of the small-overshoot speed bin as a multiple of the limit.
    pub speed_bin_ratio: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            encounter_distance: 10.0,
            sudden_brake_threshold: 3.0,
            speed_bin_ratio: 1.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub from: String,
    pub to: String,
}

impl RouteConfig {
    pub fn new(from: &str, to: &str) -> Self {
        RouteConfig {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn route_id(&self) -> String {
        format!("route_{}_to_{}", self.from, self.to)
    }
}

/// Geometry and signal timing of the built-in corridor simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorridorConfig {
    /// How far ahead signals are reported to vehicles.
    pub lookahead: f64,
    pub accel: f64,
    /// Deceleration used when a vehicle is told to hold a lower speed outright.
    pub emergency_decel: f64,
    /// Speed below which a vehicle accumulates waiting time.
    pub halting_speed: f64,
    pub edges: Vec<EdgeConfig>,
    pub signals: Vec<SignalConfig>,
}

impl Default for CorridorConfig {
    fn default() -> Self {
        let edges = (0..6)
            .map(|i| EdgeConfig {
                id: format!("e{i}"),
                length: 150.0,
                speed_limit: 13.89,
                lanes: 2,
            })
            .collect();
        let signals = (0..5)
            .map(|i| SignalConfig {
                id: format!("tls{i}"),
                edge: format!("e{i}"),
                green: 30.0,
                amber: 4.0,
                red: 26.0,
                offset: 11.0 * i as f64,
            })
            .collect();
        CorridorConfig {
            lookahead: 200.0,
            accel: 2.6,
            emergency_decel: 9.0,
            halting_speed: 0.1,
            edges,
            signals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub id: String,
    pub length: f64,
    pub speed_limit: f64,
    pub lanes: u8,
}

/// A fixed-cycle signal at the downstream end of an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub id: String,
    pub edge: String,
    pub green: f64,
    pub amber: f64,
    pub red: f64,
    /// Seconds into the cycle at time zero.
    pub offset: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization_toml() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("episodes = 5\n[rl]\nalpha = 0.5\n").unwrap();
        assert_eq!(config.episodes, 5);
        assert_eq!(config.rl.alpha, 0.5);
        assert_eq!(config.rl.gamma, 0.9);
        assert_eq!(config.max_steps, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.rl.alpha = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.aggressive.epsilon_floor = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.routes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_table_path() {
        let config = Config {
            table_dir: PathBuf::from("out"),
            ..Config::default()
        };
        assert_eq!(
            config.table_path("cautious"),
            PathBuf::from("out").join("cautious_table.json")
        );
    }

    fn temp_config(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("redlight_cfg_{name}_{}.toml", std::process::id()));
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("redlight_cfg_absent_{}.toml", std::process::id()));
        assert_eq!(Config::from_file_or_default(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let path = temp_config("malformed", "episodes = \"many\"\n");
        assert!(matches!(
            Config::from_file_or_default(&path),
            Err(ConfigError::Parse(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let path = temp_config("invalid", "[rl]\nalpha = 7.0\n");
        assert!(matches!(
            Config::from_file_or_default(&path),
            Err(ConfigError::Invalid(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_sample_config() {
        let config = Config::from_file("./redlight.toml").expect("sample config parses");
        assert!(!config.routes.is_empty());
    }
}
