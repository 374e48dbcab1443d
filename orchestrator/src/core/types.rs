//! Records for projects, runs, tasks and their audit log.
//!
//! Relationships are explicit foreign-key fields resolved through the store;
//! records never hold pointers to each other.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type ProjectId = i64;
pub type RunId = i64;
pub type TaskId = i64;
pub type LogId = i64;

/// Agent type recorded on planned tasks.
pub const EXECUTOR_AGENT: &str = "executor";
/// Agent type for planner log entries.
pub const PLANNER_AGENT: &str = "planner";
/// Agent type for per-task token spend.
pub const LLM_AGENT: &str = "llm";
/// Agent type for lifecycle entries written by the coordinator.
pub const COORDINATOR_AGENT: &str = "coordinator";

/// Branch label given to tasks of the sequential pipeline.
pub const MAIN_BRANCH: &str = "main";

/// A stored status or level string did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Run lifecycle: `created → planned → running → completed → summarized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Planned,
    Running,
    Completed,
    Summarized,
}

string_enum!(RunStatus, "run status", {
    Created => "created",
    Planned => "planned",
    Running => "running",
    Completed => "completed",
    Summarized => "summarized",
});

/// Task lifecycle. A failed task goes back to `pending`; there is no failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
}

string_enum!(TaskStatus, "task status", {
    Pending => "pending",
    Running => "running",
    Done => "done",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Cost,
    Error,
}

string_enum!(LogLevel, "log level", {
    Info => "info",
    Cost => "cost",
    Error => "error",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Opaque owner identifier; ownership checks belong to the caller.
    pub owner: String,
    pub title: String,
    pub description: Option<String>,
    /// Set while a run-creation is in flight for this project.
    pub locked: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub project_id: ProjectId,
    pub status: RunStatus,
    pub final_summary: Option<String>,
    /// Superseded by a newer run of the same project.
    pub archived: bool,
    /// Set while an execution is in flight for this run.
    pub locked: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub run_id: RunId,
    /// Execution order within the run (ascending).
    pub order_index: i64,
    pub agent_type: String,
    pub status: TaskStatus,
    pub input: String,
    pub output: Option<String>,
    /// Reserved for branching plans; carried through storage untouched.
    pub parent_task_id: Option<TaskId>,
    pub depth: u32,
    pub branch: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub id: LogId,
    pub run_id: RunId,
    pub agent_type: String,
    pub level: LogLevel,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub owner: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub order_index: i64,
    pub agent_type: String,
    pub input: String,
    pub parent_task_id: Option<TaskId>,
    pub depth: u32,
    pub branch: String,
}

impl NewTask {
    /// A top-level task for the executor agent on the main branch.
    pub fn executor(order_index: i64, input: impl Into<String>) -> Self {
        Self {
            order_index,
            agent_type: EXECUTOR_AGENT.to_string(),
            input: input.into(),
            parent_task_id: None,
            depth: 0,
            branch: MAIN_BRANCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLog {
    pub run_id: RunId,
    pub agent_type: String,
    pub level: LogLevel,
    pub message: String,
}

impl NewLog {
    pub fn new(
        run_id: RunId,
        agent_type: &str,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            agent_type: agent_type.to_string(),
            level,
            message: message.into(),
        }
    }

    pub fn info(run_id: RunId, agent_type: &str, message: impl Into<String>) -> Self {
        Self::new(run_id, agent_type, LogLevel::Info, message)
    }

    pub fn cost(run_id: RunId, agent_type: &str, total_tokens: u64) -> Self {
        Self::new(
            run_id,
            agent_type,
            LogLevel::Cost,
            format!("Tokens used: {total_tokens}"),
        )
    }

    pub fn error(run_id: RunId, agent_type: &str, message: impl Into<String>) -> Self {
        Self::new(run_id, agent_type, LogLevel::Error, message)
    }
}

/// The slice of a task the reporter needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub order_index: i64,
    pub agent_type: String,
    pub input: String,
    pub output: Option<String>,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            order_index: task.order_index,
            agent_type: task.agent_type.clone(),
            input: task.input.clone(),
            output: task.output.clone(),
        }
    }
}
