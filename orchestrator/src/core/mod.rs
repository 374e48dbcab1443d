//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! records and return deterministic outputs suitable for tests.

pub mod context;
pub mod plan;
pub mod reporter;
pub mod sanitize;
pub mod text;
pub mod types;
