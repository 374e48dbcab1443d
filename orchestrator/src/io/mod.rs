//! Side-effecting adapters for the orchestrator.

pub mod completion;
pub mod config;
pub mod process;
pub mod prompt;
pub mod store;
