//! Test-only helpers: scripted completion ports, stores and record fixtures.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Mutex;

use crate::core::types::{NewProject, Project};
use crate::io::completion::{Completion, CompletionError, CompletionPort, CompletionRequest, Usage};
use crate::io::store::{SqliteStore, Store};

/// Completion port that returns queued replies in order and records every prompt.
///
/// Once the queue is empty every call fails with [`CompletionError::Unavailable`].
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<Completion, CompletionError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(replies: Vec<Result<Completion, CompletionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Successful replies with the given texts and zero usage.
    pub fn replies(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|text| {
                    Ok(Completion {
                        text: (*text).to_string(),
                        usage: Usage::default(),
                    })
                })
                .collect(),
        )
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }
}

impl CompletionPort for ScriptedCompletion {
    fn generate(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.prompt.clone());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Unavailable("script exhausted".to_string())))
    }
}

/// Completion port that announces each call and then blocks until released.
///
/// Every reply is `text`. Dropping the [`Gate`] releases all current and future
/// calls.
pub struct GatedCompletion {
    text: String,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

/// Test-side handle of a [`GatedCompletion`].
pub struct Gate {
    pub entered: Receiver<()>,
    release: Sender<()>,
}

impl Gate {
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

impl GatedCompletion {
    pub fn new(text: &str) -> (Self, Gate) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        (
            Self {
                text: text.to_string(),
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            },
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl CompletionPort for GatedCompletion {
    fn generate(&self, _request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let _ = self.entered.lock().expect("entered lock").send(());
        // Err means the gate was dropped, which also releases.
        let _ = self.release.lock().expect("release lock").recv();
        Ok(Completion {
            text: self.text.clone(),
            usage: Usage::total(1),
        })
    }
}

pub fn memory_store() -> SqliteStore {
    SqliteStore::open_in_memory().expect("in-memory store")
}

/// A file-backed database in a temporary directory, removed on drop.
pub struct TestDb {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("orchestrator.db");
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new connection to the database.
    pub fn open(&self) -> SqliteStore {
        SqliteStore::open(&self.path).expect("open store")
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sample_project<S: Store + ?Sized>(store: &S) -> Project {
    store
        .create_project(&NewProject {
            owner: "owner-1".to_string(),
            title: "Demo".to_string(),
            description: Some("A demo project".to_string()),
        })
        .expect("create project")
}
