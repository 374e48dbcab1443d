//! Run lifecycle: `created → planned → running → completed → summarized`.
//!
//! The coordinator is the only place that takes project/run locks, archives
//! superseded runs, and moves a run between statuses. Each critical section
//! runs under a [`LockGuard`], and the operation's own error takes precedence
//! over a failure to release the flag afterwards.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::Ports;
use crate::agents::executor::{ExecutionReport, ExecutorAgent};
use crate::agents::planner::{PlanReport, PlannerAgent};
use crate::core::reporter;
use crate::core::sanitize::Sanitizer;
use crate::core::types::{
    COORDINATOR_AGENT, Log, NewLog, NewProject, Project, ProjectId, Run, RunId, RunStatus, Task,
    TaskSnapshot, TaskStatus,
};
use crate::error::{OrchestratorError, Result};
use crate::io::completion::CompletionPort;
use crate::io::config::OrchestratorConfig;
use crate::io::store::{RunFilter, Store};
use crate::lock::LockGuard;

/// A freshly planned run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRun {
    pub run: Run,
    pub plan: PlanReport,
}

/// A run after one execution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedRun {
    pub run: Run,
    pub execution: ExecutionReport,
}

/// Everything one plan → execute → summarize pass produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    pub run: Run,
    pub plan: PlanReport,
    pub execution: ExecutionReport,
}

pub struct RunCoordinator<'a, S: ?Sized, C: ?Sized, Z: ?Sized> {
    store: &'a S,
    completion: &'a C,
    sanitizer: &'a Z,
    planner: PlannerAgent,
    executor: ExecutorAgent,
}

impl<'a, S, C, Z> RunCoordinator<'a, S, C, Z>
where
    S: Store + ?Sized,
    C: CompletionPort + ?Sized,
    Z: Sanitizer + ?Sized,
{
    pub fn new(store: &'a S, completion: &'a C, sanitizer: &'a Z, config: &OrchestratorConfig) -> Self {
        Self {
            store,
            completion,
            sanitizer,
            planner: PlannerAgent::new(config),
            executor: ExecutorAgent::new(config),
        }
    }

    fn ports(&self) -> Ports<'a, S, C, Z> {
        Ports {
            store: self.store,
            completion: self.completion,
            sanitizer: self.sanitizer,
        }
    }

    pub fn create_project(&self, project: &NewProject) -> Result<Project> {
        let project = self.store.create_project(project)?;
        info!(project_id = project.id, "project created");
        Ok(project)
    }

    /// Supersede the project's runs with a new one and plan it.
    ///
    /// Holds the project lock for the whole pass. If planning fails the new run
    /// stays `created` with an `error` log explaining why.
    #[instrument(skip_all, fields(project_id = project_id))]
    pub fn create_and_plan(&self, project_id: ProjectId) -> Result<PlannedRun> {
        let (guard, project) = LockGuard::project(self.store, project_id)?;
        let result = self.plan_locked(&project);
        let released = guard.release();
        let planned = result?;
        released?;
        Ok(planned)
    }

    fn plan_locked(&self, project: &Project) -> Result<PlannedRun> {
        let archived = self.store.archive_runs(project.id)?;
        let run = self.store.create_run(project.id)?;
        info!(run_id = run.id, archived, "run created");
        self.store.append_log(&NewLog::info(
            run.id,
            COORDINATOR_AGENT,
            format!("Run created for project {}", project.id),
        ))?;

        let plan = self.planner.plan(
            &self.ports(),
            &run,
            &project.title,
            project.description.as_deref(),
        );
        let plan = match plan {
            Ok(plan) => plan,
            Err(err) => {
                self.log_failure(run.id, &err);
                return Err(err);
            }
        };
        self.store.append_log(&NewLog::info(
            run.id,
            COORDINATOR_AGENT,
            format!("Planned {} tasks", plan.tasks.len()),
        ))?;
        Ok(PlannedRun {
            run: self.get_run(run.id)?,
            plan,
        })
    }

    /// Execute the run's pending tasks under the run lock.
    ///
    /// Tasks already `done` are skipped but their outputs still reach later
    /// prompts, so re-invoking after a partial failure resumes where it stopped.
    #[instrument(skip_all, fields(run_id = run_id))]
    pub fn execute(&self, run_id: RunId) -> Result<ExecutedRun> {
        let (guard, run) = LockGuard::run(self.store, run_id)?;
        let result = self.execute_locked(&run);
        let released = guard.release();
        let executed = result?;
        released?;
        Ok(executed)
    }

    fn execute_locked(&self, run: &Run) -> Result<ExecutedRun> {
        let project = self.get_project(run.project_id)?;
        self.recover_stale(run.id)?;

        let tasks = self.store.list_tasks(run.id, None)?;
        let pending = tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .count();
        if pending == 0 {
            return Err(OrchestratorError::EmptyWork(format!(
                "run {} has no pending tasks",
                run.id
            )));
        }

        self.store.set_run_status(run.id, RunStatus::Running)?;
        self.store.append_log(&NewLog::info(
            run.id,
            COORDINATOR_AGENT,
            format!("Execution started with {pending} pending tasks"),
        ))?;

        let execution = self
            .executor
            .execute(&self.ports(), &project.title, &tasks, run.id)?;

        self.store.set_run_status(run.id, RunStatus::Completed)?;
        self.store.append_log(&NewLog::info(
            run.id,
            COORDINATOR_AGENT,
            format!(
                "Execution finished: {} completed, {} failed",
                execution.completed.len(),
                execution.failed.len()
            ),
        ))?;
        Ok(ExecutedRun {
            run: self.get_run(run.id)?,
            execution,
        })
    }

    /// Reset tasks an interrupted execution left `running`.
    ///
    /// Only valid while the run lock is held: nobody else can be running them.
    fn recover_stale(&self, run_id: RunId) -> Result<()> {
        for task in self.store.list_tasks(run_id, Some(TaskStatus::Running))? {
            warn!(task_id = task.id, order_index = task.order_index, "resetting stale running task");
            self.store.set_task_status(task.id, TaskStatus::Pending)?;
            self.store.append_log(&NewLog::error(
                run_id,
                COORDINATOR_AGENT,
                format!(
                    "Task {} was left running by an interrupted execution; reset to pending",
                    task.order_index
                ),
            ))?;
        }
        Ok(())
    }

    /// Render the run's tasks into a summary and store it. Repeat calls overwrite.
    #[instrument(skip_all, fields(run_id = run_id))]
    pub fn summarize(&self, run_id: RunId) -> Result<Run> {
        let run = self.get_run(run_id)?;
        let project = self.get_project(run.project_id)?;
        let tasks = self.store.list_tasks(run.id, None)?;
        if tasks.is_empty() {
            return Err(OrchestratorError::EmptyWork(format!(
                "run {} has no tasks to summarize",
                run.id
            )));
        }

        let snapshots: Vec<TaskSnapshot> = tasks.iter().map(TaskSnapshot::from).collect();
        let summary = reporter::summarize(&project.title, &snapshots);
        self.store.set_run_summary(run.id, &summary)?;
        self.store.append_log(&NewLog::info(
            run.id,
            COORDINATOR_AGENT,
            "Summary generated",
        ))?;
        info!(tasks = tasks.len(), "run summarized");
        self.get_run(run.id)
    }

    /// Plan a new run for the project, execute it, and summarize it.
    pub fn run_pipeline(&self, project_id: ProjectId) -> Result<PipelineOutcome> {
        let planned = self.create_and_plan(project_id)?;
        let executed = self.execute(planned.run.id)?;
        let run = self.summarize(executed.run.id)?;
        Ok(PipelineOutcome {
            run,
            plan: planned.plan,
            execution: executed.execution,
        })
    }

    pub fn get_project(&self, project_id: ProjectId) -> Result<Project> {
        self.store
            .get_project(project_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("project {project_id}")))
    }

    pub fn get_run(&self, run_id: RunId) -> Result<Run> {
        self.store
            .get_run(run_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("run {run_id}")))
    }

    /// Runs of one project, newest first. `archived` filters on the flag when set.
    pub fn list_runs(&self, project_id: ProjectId, archived: Option<bool>) -> Result<Vec<Run>> {
        self.get_project(project_id)?;
        Ok(self.store.list_runs(RunFilter {
            project_id: Some(project_id),
            archived,
        })?)
    }

    pub fn list_tasks(&self, run_id: RunId) -> Result<Vec<Task>> {
        self.get_run(run_id)?;
        Ok(self.store.list_tasks(run_id, None)?)
    }

    pub fn list_logs(&self, run_id: RunId) -> Result<Vec<Log>> {
        self.get_run(run_id)?;
        Ok(self.store.list_logs(run_id)?)
    }

    /// Delete a run with its tasks and logs. A run that is executing is refused.
    pub fn delete_run(&self, run_id: RunId) -> Result<()> {
        let run = self.get_run(run_id)?;
        if run.locked {
            return Err(OrchestratorError::Conflict(format!(
                "run {run_id} is already executing"
            )));
        }
        if !self.store.delete_run(run_id)? {
            return Err(OrchestratorError::NotFound(format!("run {run_id}")));
        }
        info!(run_id, "run deleted");
        Ok(())
    }

    /// Clear a project lock left behind by a crashed process.
    pub fn unlock_project(&self, project_id: ProjectId) -> Result<Project> {
        self.get_project(project_id)?;
        self.store.release_project(project_id)?;
        warn!(project_id, "project lock cleared manually");
        self.get_project(project_id)
    }

    /// Clear a run lock left behind by a crashed process.
    pub fn unlock_run(&self, run_id: RunId) -> Result<Run> {
        self.get_run(run_id)?;
        self.store.release_run(run_id)?;
        warn!(run_id, "run lock cleared manually");
        self.store.append_log(&NewLog::info(
            run_id,
            COORDINATOR_AGENT,
            "Run lock cleared manually",
        ))?;
        self.get_run(run_id)
    }

    fn log_failure(&self, run_id: RunId, err: &OrchestratorError) {
        let entry = NewLog::error(run_id, COORDINATOR_AGENT, err.to_string());
        if let Err(log_err) = self.store.append_log(&entry) {
            warn!(run_id, error = %log_err, "failed to record planning failure");
        }
    }
}
