pub mod action;
pub mod agent_state;
pub mod exploration;
pub mod learning_agent;
pub mod q_table;
pub mod reward;
pub mod serde_utils;
