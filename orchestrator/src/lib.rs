//! Orchestration core for a planner → executor → reporter agent pipeline.
//!
//! A project is decomposed into ordered tasks, the tasks are executed one by one
//! against a completion service with a rolling context of prior outputs, and the
//! results are reduced into a narrative summary stored on the run.
//!
//! - **[`core`]**: Pure, deterministic logic (records, plan parsing, rolling
//!   context, sanitization, reporting). No I/O.
//! - **[`io`]**: Side-effecting adapters (SQLite store, completion command,
//!   prompt templates, config file).
//! - **[`agents`]**: Planner and executor, combining core logic with the ports.
//!
//! [`coordinator`] owns the project/run locking discipline and the run state
//! machine; it is the only entry point callers need.

pub mod agents;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod lock;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
