//! Error taxonomy surfaced by the orchestration core.

use crate::io::completion::CompletionError;
use crate::io::store::StoreError;

/// Errors returned by coordinator and agent operations.
///
/// Each variant is a distinct category so callers can decide whether to retry,
/// wait, or surface the failure to a human.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// No schema-valid plan within the planner's attempt bound.
    #[error("planner failed to produce a valid plan: {0}")]
    Structural(String),
    /// The project or run lock is already held.
    #[error("{0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("completion failed: {0}")]
    Upstream(#[from] CompletionError),
    /// No pending tasks to execute, or no tasks to summarize.
    #[error("{0}")]
    EmptyWork(String),
    #[error("render prompt: {0}")]
    Prompt(#[from] minijinja::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse category of an [`OrchestratorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Conflict,
    NotFound,
    Upstream,
    EmptyWork,
    Internal,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Structural(_) => ErrorKind::Structural,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::EmptyWork(_) => ErrorKind::EmptyWork,
            Self::Prompt(_) | Self::Store(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
