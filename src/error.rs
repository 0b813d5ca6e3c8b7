use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a [`Simulator`](crate::simulator::Simulator).
#[derive(Debug, Error)]
pub enum SimError {
    #[error("vehicle `{0}` is not active in the simulation")]
    UnknownVehicle(String),
    #[error("signal `{0}` does not exist")]
    UnknownSignal(String),
    #[error("route `{0}` is unknown or invalid")]
    UnknownRoute(String),
    #[error("route `{0}` is already registered")]
    DuplicateRoute(String),
    #[error("vehicle `{0}` already exists")]
    DuplicateVehicle(String),
    #[error("failed to launch simulator: {0}")]
    Launch(String),
    #[error("simulator connection is closed")]
    Closed,
}

/// Failures while persisting or restoring a value table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("table i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed table at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode table: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("a value table needs at least one action")]
    NoActions,
    #[error("persisted state has {found} action values, expected {expected}")]
    ActionCountMismatch { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to write summary: {0}")]
    Summary(#[source] std::io::Error),
    #[error("failed to encode summary: {0}")]
    SummaryEncode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
