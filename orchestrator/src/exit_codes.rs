//! Stable exit codes for orchestrator CLI commands.

use crate::error::ErrorKind;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, config, storage failure or any other unclassified error.
pub const INVALID: i32 = 1;
/// The planner could not obtain a valid plan within its attempt bound.
pub const STRUCTURAL: i32 = 2;
/// The project or run is locked by another invocation.
pub const CONFLICT: i32 = 3;
/// The project or run does not exist.
pub const NOT_FOUND: i32 = 4;
/// The completion service failed.
pub const UPSTREAM: i32 = 5;
/// Nothing to execute or summarize.
pub const EMPTY_WORK: i32 = 6;

/// Map an error category to its exit code.
pub fn for_kind(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Structural => STRUCTURAL,
        ErrorKind::Conflict => CONFLICT,
        ErrorKind::NotFound => NOT_FOUND,
        ErrorKind::Upstream => UPSTREAM,
        ErrorKind::EmptyWork => EMPTY_WORK,
        ErrorKind::Internal => INVALID,
    }
}
