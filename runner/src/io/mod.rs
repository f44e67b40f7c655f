//! Side-effecting adapters: tracker, coding agent, processes, config, time.

pub mod agent;
pub mod config;
pub mod github;
pub mod identity;
pub mod local;
pub mod process;
pub mod prompt;
pub mod sleep;
pub mod tracker;
