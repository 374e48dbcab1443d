//! Persistence port and its SQLite implementation.
//!
//! The [`Store`] trait is what the coordinator and agents see: plain records in,
//! plain records out, with three capabilities beyond CRUD:
//!
//! - exclusive claim of a single project/run row by id ([`Store::claim_project`],
//!   [`Store::claim_run`]),
//! - bulk status update filtered by foreign key and flag ([`Store::archive_runs`]),
//! - ordered range reads filtered by foreign key ([`Store::list_tasks`],
//!   [`Store::list_logs`], [`Store::list_runs`]).
//!
//! Every method commits or rolls back on its own; multi-row mutations
//! ([`Store::insert_plan`], [`Store::complete_task`]) are atomic.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::debug;

use crate::core::types::{
    Log, NewLog, NewProject, NewTask, Project, ProjectId, Run, RunId, RunStatus, Task, TaskId,
    TaskStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected state: {0}")]
    StateMismatch(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of trying to take a row's lock flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim<T> {
    /// The flag was clear and is now set; carries the row as read under lock.
    Acquired(T),
    AlreadyLocked,
    NotFound,
}

/// Filter for [`Store::list_runs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub project_id: Option<ProjectId>,
    pub archived: Option<bool>,
}

/// Transactional storage for projects, runs, tasks and logs.
pub trait Store {
    fn create_project(&self, project: &NewProject) -> StoreResult<Project>;
    fn get_project(&self, id: ProjectId) -> StoreResult<Option<Project>>;
    /// Read the project under an exclusive lock and set `locked` if it is clear.
    fn claim_project(&self, id: ProjectId) -> StoreResult<Claim<Project>>;
    fn release_project(&self, id: ProjectId) -> StoreResult<()>;

    /// Insert a run with status `created`.
    fn create_run(&self, project_id: ProjectId) -> StoreResult<Run>;
    fn get_run(&self, id: RunId) -> StoreResult<Option<Run>>;
    /// Runs matching `filter`, newest first.
    fn list_runs(&self, filter: RunFilter) -> StoreResult<Vec<Run>>;
    /// Archive every non-archived run of the project; returns how many changed.
    fn archive_runs(&self, project_id: ProjectId) -> StoreResult<usize>;
    /// Read the run under an exclusive lock and set `locked` if it is clear.
    fn claim_run(&self, id: RunId) -> StoreResult<Claim<Run>>;
    fn release_run(&self, id: RunId) -> StoreResult<()>;
    fn set_run_status(&self, id: RunId, status: RunStatus) -> StoreResult<()>;
    /// Store the summary and move the run to `summarized`.
    fn set_run_summary(&self, id: RunId, summary: &str) -> StoreResult<()>;
    /// Delete a run with its tasks and logs. Returns false if it did not exist.
    fn delete_run(&self, id: RunId) -> StoreResult<bool>;

    /// Insert all tasks and move the run to `planned`, or change nothing.
    fn insert_plan(&self, run_id: RunId, tasks: &[NewTask]) -> StoreResult<Vec<Task>>;
    /// Tasks of a run in ascending `order_index`, optionally filtered by status.
    fn list_tasks(&self, run_id: RunId, status: Option<TaskStatus>) -> StoreResult<Vec<Task>>;
    fn set_task_status(&self, id: TaskId, status: TaskStatus) -> StoreResult<()>;
    /// Record a running task's output, mark it `done`, and append its cost log.
    fn complete_task(&self, id: TaskId, output: &str, cost: &NewLog) -> StoreResult<()>;

    fn append_log(&self, log: &NewLog) -> StoreResult<Log>;
    /// Logs of a run in chronological order.
    fn list_logs(&self, run_id: RunId) -> StoreResult<Vec<Log>>;
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS projects (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  owner TEXT NOT NULL,
  title TEXT NOT NULL,
  description TEXT,
  locked INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
  status TEXT NOT NULL,
  final_summary TEXT,
  archived INTEGER NOT NULL DEFAULT 0,
  locked INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS runs_by_project ON runs(project_id, archived);
CREATE TABLE IF NOT EXISTS tasks (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  order_index INTEGER NOT NULL,
  agent_type TEXT NOT NULL,
  status TEXT NOT NULL,
  input TEXT NOT NULL,
  output TEXT,
  parent_task_id INTEGER REFERENCES tasks(id) ON DELETE SET NULL,
  depth INTEGER NOT NULL DEFAULT 0,
  branch TEXT NOT NULL DEFAULT 'main',
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE(run_id, order_index)
);
CREATE TABLE IF NOT EXISTS logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  agent_type TEXT NOT NULL,
  level TEXT NOT NULL,
  message TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS logs_by_run ON logs(run_id, id);";

const PROJECT_COLUMNS: &str = "id, owner, title, description, locked, created_at, updated_at";
const RUN_COLUMNS: &str =
    "id, project_id, status, final_summary, archived, locked, created_at, updated_at";
const TASK_COLUMNS: &str = "id, run_id, order_index, agent_type, status, input, output, \
parent_task_id, depth, branch, created_at, updated_at";
const LOG_COLUMNS: &str = "id, run_id, agent_type, level, message, created_at";

/// SQLite-backed [`Store`].
///
/// Each instance owns one connection. Independent processes or threads that
/// need to contend for the same project/run open their own instance on the same
/// database file; `busy_timeout` makes a contending claim wait for the write
/// lock rather than fail.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "opening sqlite store");
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;\
             PRAGMA busy_timeout=5000;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection. A poisoned mutex is recovered; the connection is still usable.
    fn with_conn<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> StoreResult<R>,
    {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn set_flag(&self, table: &'static str, id: i64, locked: bool) -> StoreResult<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                &format!("UPDATE {table} SET locked = ?2, updated_at = ?3 WHERE id = ?1"),
                params![id, locked, now()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("{table} row {id}")));
            }
            Ok(())
        })
    }
}

impl Store for SqliteStore {
    fn create_project(&self, project: &NewProject) -> StoreResult<Project> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO projects(owner, title, description, locked, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![project.owner, project.title, project.description, ts],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Project {
                id,
                owner: project.owner.clone(),
                title: project.title.clone(),
                description: project.description.clone(),
                locked: false,
                created_at: ts.clone(),
                updated_at: ts,
            })
        })
    }

    fn get_project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        self.with_conn(|conn| {
            let project = conn
                .query_row(
                    &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                    [id],
                    project_from_row,
                )
                .optional()?;
            Ok(project)
        })
    }

    fn claim_project(&self, id: ProjectId) -> StoreResult<Claim<Project>> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let project = tx
                .query_row(
                    &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                    [id],
                    project_from_row,
                )
                .optional()?;
            let Some(mut project) = project else {
                return Ok(Claim::NotFound);
            };
            if project.locked {
                return Ok(Claim::AlreadyLocked);
            }
            let ts = now();
            tx.execute(
                "UPDATE projects SET locked = 1, updated_at = ?2 WHERE id = ?1",
                params![id, ts],
            )?;
            tx.commit()?;
            project.locked = true;
            project.updated_at = ts;
            Ok(Claim::Acquired(project))
        })
    }

    fn release_project(&self, id: ProjectId) -> StoreResult<()> {
        self.set_flag("projects", id, false)
    }

    fn create_run(&self, project_id: ProjectId) -> StoreResult<Run> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO runs(project_id, status, archived, locked, created_at, updated_at) \
                 VALUES (?1, ?2, 0, 0, ?3, ?3)",
                params![project_id, RunStatus::Created.as_str(), ts],
            )?;
            Ok(Run {
                id: conn.last_insert_rowid(),
                project_id,
                status: RunStatus::Created,
                final_summary: None,
                archived: false,
                locked: false,
                created_at: ts.clone(),
                updated_at: ts,
            })
        })
    }

    fn get_run(&self, id: RunId) -> StoreResult<Option<Run>> {
        self.with_conn(|conn| {
            let run = conn
                .query_row(
                    &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                    [id],
                    run_from_row,
                )
                .optional()?;
            Ok(run)
        })
    }

    fn list_runs(&self, filter: RunFilter) -> StoreResult<Vec<Run>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs \
                 WHERE (?1 IS NULL OR project_id = ?1) AND (?2 IS NULL OR archived = ?2) \
                 ORDER BY id DESC"
            ))?;
            let runs = stmt
                .query_map(params![filter.project_id, filter.archived], run_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }

    fn archive_runs(&self, project_id: ProjectId) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE runs SET archived = 1, updated_at = ?2 \
                 WHERE project_id = ?1 AND archived = 0",
                params![project_id, now()],
            )?;
            Ok(rows)
        })
    }

    fn claim_run(&self, id: RunId) -> StoreResult<Claim<Run>> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let run = tx
                .query_row(
                    &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                    [id],
                    run_from_row,
                )
                .optional()?;
            let Some(mut run) = run else {
                return Ok(Claim::NotFound);
            };
            if run.locked {
                return Ok(Claim::AlreadyLocked);
            }
            let ts = now();
            tx.execute(
                "UPDATE runs SET locked = 1, updated_at = ?2 WHERE id = ?1",
                params![id, ts],
            )?;
            tx.commit()?;
            run.locked = true;
            run.updated_at = ts;
            Ok(Claim::Acquired(run))
        })
    }

    fn release_run(&self, id: RunId) -> StoreResult<()> {
        self.set_flag("runs", id, false)
    }

    fn set_run_status(&self, id: RunId, status: RunStatus) -> StoreResult<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE runs SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), now()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("run {id}")));
            }
            Ok(())
        })
    }

    fn set_run_summary(&self, id: RunId, summary: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE runs SET final_summary = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, summary, RunStatus::Summarized.as_str(), now()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("run {id}")));
            }
            Ok(())
        })
    }

    fn delete_run(&self, id: RunId) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM runs WHERE id = ?1", [id])?;
            Ok(rows > 0)
        })
    }

    fn insert_plan(&self, run_id: RunId, tasks: &[NewTask]) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let ts = now();
            let mut created = Vec::with_capacity(tasks.len());
            {
                let mut insert = tx.prepare(
                    "INSERT INTO tasks(run_id, order_index, agent_type, status, input, output, \
                     parent_task_id, depth, branch, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8, ?9, ?9)",
                )?;
                for task in tasks {
                    insert.execute(params![
                        run_id,
                        task.order_index,
                        task.agent_type,
                        TaskStatus::Pending.as_str(),
                        task.input,
                        task.parent_task_id,
                        task.depth,
                        task.branch,
                        ts,
                    ])?;
                    created.push(Task {
                        id: tx.last_insert_rowid(),
                        run_id,
                        order_index: task.order_index,
                        agent_type: task.agent_type.clone(),
                        status: TaskStatus::Pending,
                        input: task.input.clone(),
                        output: None,
                        parent_task_id: task.parent_task_id,
                        depth: task.depth,
                        branch: task.branch.clone(),
                        created_at: ts.clone(),
                        updated_at: ts.clone(),
                    });
                }
            }
            let rows = tx.execute(
                "UPDATE runs SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![run_id, RunStatus::Planned.as_str(), ts],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("run {run_id}")));
            }
            tx.commit()?;
            created.sort_by_key(|task| task.order_index);
            Ok(created)
        })
    }

    fn list_tasks(&self, run_id: RunId, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE run_id = ?1 AND (?2 IS NULL OR status = ?2) \
                 ORDER BY order_index ASC, id ASC"
            ))?;
            let tasks = stmt
                .query_map(
                    params![run_id, status.map(TaskStatus::as_str)],
                    task_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    fn set_task_status(&self, id: TaskId, status: TaskStatus) -> StoreResult<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), now()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("task {id}")));
            }
            Ok(())
        })
    }

    fn complete_task(&self, id: TaskId, output: &str, cost: &NewLog) -> StoreResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let ts = now();
            let rows = tx.execute(
                "UPDATE tasks SET output = ?2, status = ?3, updated_at = ?4 \
                 WHERE id = ?1 AND status = ?5",
                params![
                    id,
                    output,
                    TaskStatus::Done.as_str(),
                    ts,
                    TaskStatus::Running.as_str()
                ],
            )?;
            if rows == 0 {
                return Err(StoreError::StateMismatch(format!("task {id} is not running")));
            }
            insert_log(&tx, cost, &ts)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn append_log(&self, log: &NewLog) -> StoreResult<Log> {
        self.with_conn(|conn| {
            let ts = now();
            let id = insert_log(conn, log, &ts)?;
            Ok(Log {
                id,
                run_id: log.run_id,
                agent_type: log.agent_type.clone(),
                level: log.level,
                message: log.message.clone(),
                created_at: ts,
            })
        })
    }

    fn list_logs(&self, run_id: RunId) -> StoreResult<Vec<Log>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM logs WHERE run_id = ?1 ORDER BY created_at ASC, id ASC"
            ))?;
            let logs = stmt
                .query_map([run_id], log_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(logs)
        })
    }
}

fn insert_log(conn: &Connection, log: &NewLog, ts: &str) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO logs(run_id, agent_type, level, message, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            log.run_id,
            log.agent_type,
            log.level.as_str(),
            log.message,
            ts
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a TEXT column through `FromStr`, reporting failures as conversion errors.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        owner: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        locked: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        project_id: row.get(1)?,
        status: parse_column(row, 2)?,
        final_summary: row.get(3)?,
        archived: row.get(4)?,
        locked: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        run_id: row.get(1)?,
        order_index: row.get(2)?,
        agent_type: row.get(3)?,
        status: parse_column(row, 4)?,
        input: row.get(5)?,
        output: row.get(6)?,
        parent_task_id: row.get(7)?,
        depth: row.get(8)?,
        branch: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<Log> {
    Ok(Log {
        id: row.get(0)?,
        run_id: row.get(1)?,
        agent_type: row.get(2)?,
        level: parse_column(row, 3)?,
        message: row.get(4)?,
        created_at: row.get(5)?,
    })
}
