use crate::learning::{action::DriveAction, agent_state::DrivingState, q_table::QTable};

pub mod agent;
pub mod config;
pub mod corridor;
pub mod error;
pub mod learning;
pub mod signal;
pub mod simulation;
pub mod simulator;
pub mod telemetry;

pub type UInt = u32;

pub type Model = QTable<DrivingState, DriveAction>;
