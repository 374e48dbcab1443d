//! Scoped ownership of a project or run lock flag.
//!
//! A [`LockGuard`] is obtained by claiming the flag through the store and gives
//! it back when released or dropped, whatever path the holder takes out.

use tracing::{debug, error};

use crate::core::types::{Project, ProjectId, Run, RunId};
use crate::error::{OrchestratorError, Result};
use crate::io::store::{Claim, Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTarget {
    Project(ProjectId),
    Run(RunId),
}

impl std::fmt::Display for LockTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project(id) => write!(f, "project {id}"),
            Self::Run(id) => write!(f, "run {id}"),
        }
    }
}

pub struct LockGuard<'a, S: Store + ?Sized> {
    store: &'a S,
    target: LockTarget,
    released: bool,
}

impl<'a, S: Store + ?Sized> LockGuard<'a, S> {
    /// Claim the project's run-creation lock.
    pub fn project(store: &'a S, id: ProjectId) -> Result<(Self, Project)> {
        let target = LockTarget::Project(id);
        match store.claim_project(id)? {
            Claim::Acquired(project) => Ok((Self::held(store, target), project)),
            Claim::AlreadyLocked => Err(OrchestratorError::Conflict(format!(
                "{target} already has a running job"
            ))),
            Claim::NotFound => Err(OrchestratorError::NotFound(target.to_string())),
        }
    }

    /// Claim the run's execution lock.
    pub fn run(store: &'a S, id: RunId) -> Result<(Self, Run)> {
        let target = LockTarget::Run(id);
        match store.claim_run(id)? {
            Claim::Acquired(run) => Ok((Self::held(store, target), run)),
            Claim::AlreadyLocked => Err(OrchestratorError::Conflict(format!(
                "{target} is already executing"
            ))),
            Claim::NotFound => Err(OrchestratorError::NotFound(target.to_string())),
        }
    }

    fn held(store: &'a S, target: LockTarget) -> Self {
        debug!(lock = %target, "lock acquired");
        Self {
            store,
            target,
            released: false,
        }
    }

    /// Clear the flag and report whether that worked.
    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.clear()
    }

    fn clear(&self) -> Result<(), StoreError> {
        debug!(lock = %self.target, "lock released");
        match self.target {
            LockTarget::Project(id) => self.store.release_project(id),
            LockTarget::Run(id) => self.store.release_run(id),
        }
    }
}

impl<S: Store + ?Sized> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.clear() {
            error!(lock = %self.target, error = %err, "failed to release lock");
        }
    }
}
