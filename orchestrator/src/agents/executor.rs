//! Executor agent: runs pending tasks one by one with a rolling context.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::{CallSettings, Ports};
use crate::core::context::RollingContext;
use crate::core::sanitize::Sanitizer;
use crate::core::types::{LLM_AGENT, NewLog, RunId, Task, TaskId, TaskStatus};
use crate::error::Result;
use crate::io::completion::{CompletionPort, checked_generate};
use crate::io::config::OrchestratorConfig;
use crate::io::prompt::PromptEngine;
use crate::io::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub completed: Vec<TaskId>,
    /// Tasks rolled back to `pending`; a later execute retries them.
    pub failed: Vec<TaskId>,
    pub tokens_used: u64,
}

#[derive(Debug)]
pub struct ExecutorAgent {
    prompts: PromptEngine,
    settings: CallSettings,
}

impl ExecutorAgent {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            prompts: PromptEngine::new(),
            settings: CallSettings::from_config(&config.completion),
        }
    }

    /// Execute `tasks` starting from an empty context.
    pub fn execute<S, C, Z>(
        &self,
        ports: &Ports<'_, S, C, Z>,
        project_title: &str,
        tasks: &[Task],
        run_id: RunId,
    ) -> Result<ExecutionReport>
    where
        S: Store + ?Sized,
        C: CompletionPort + ?Sized,
        Z: Sanitizer + ?Sized,
    {
        self.execute_from(ports, RollingContext::default(), project_title, tasks, run_id)
    }

    /// Execute the pending tasks among `tasks` in ascending `order_index`.
    ///
    /// `done` tasks are not re-run; their outputs join the context at their
    /// position, so each task sees exactly the finished work ordered before it.
    /// A task whose completion or commit fails goes back to `pending` with an
    /// `error` log and does not stop the loop. Only store failures while
    /// recording that rollback abort the whole pass.
    #[instrument(skip_all, fields(run_id = run_id, tasks = tasks.len()))]
    pub fn execute_from<S, C, Z>(
        &self,
        ports: &Ports<'_, S, C, Z>,
        mut context: RollingContext,
        project_title: &str,
        tasks: &[Task],
        run_id: RunId,
    ) -> Result<ExecutionReport>
    where
        S: Store + ?Sized,
        C: CompletionPort + ?Sized,
        Z: Sanitizer + ?Sized,
    {
        let store = ports.store;
        let mut ordered: Vec<&Task> = tasks.iter().collect();
        ordered.sort_by_key(|task| task.order_index);

        let mut report = ExecutionReport::default();
        for task in ordered {
            match (task.status, &task.output) {
                (TaskStatus::Pending, _) => {}
                (TaskStatus::Done, Some(output)) => {
                    context.push(task.order_index, output);
                    continue;
                }
                _ => continue,
            }
            store.set_task_status(task.id, TaskStatus::Running)?;
            match self.attempt(ports, project_title, &context, task) {
                Ok((output, tokens)) => {
                    debug!(task_id = task.id, order_index = task.order_index, tokens, "task done");
                    context.push(task.order_index, &output);
                    report.completed.push(task.id);
                    report.tokens_used += tokens;
                }
                Err(err) => {
                    warn!(task_id = task.id, order_index = task.order_index, error = %err, "task failed");
                    store.set_task_status(task.id, TaskStatus::Pending)?;
                    store.append_log(&NewLog::error(run_id, &task.agent_type, err.to_string()))?;
                    report.failed.push(task.id);
                }
            }
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            tokens_used = report.tokens_used,
            "execution pass finished"
        );
        Ok(report)
    }

    fn attempt<S, C, Z>(
        &self,
        ports: &Ports<'_, S, C, Z>,
        project_title: &str,
        context: &RollingContext,
        task: &Task,
    ) -> Result<(String, u64)>
    where
        S: Store + ?Sized,
        C: CompletionPort + ?Sized,
        Z: Sanitizer + ?Sized,
    {
        let input = ports.sanitizer.sanitize(&task.input);
        let prompt = self
            .prompts
            .executor(project_title, context.as_str(), &input)?;
        let reply = checked_generate(
            ports.completion,
            &self.settings.request(prompt),
            self.settings.max_tokens_per_call(),
        )?;
        let tokens = reply.usage.total_tokens;
        ports.store.complete_task(
            task.id,
            &reply.text,
            &NewLog::cost(task.run_id, LLM_AGENT, tokens),
        )?;
        Ok((reply.text, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sanitize::{DEFAULT_MAX_CHARS, PromptGuard};
    use crate::core::types::{LogLevel, NewTask, Run};
    use crate::io::completion::{Completion, CompletionError, Usage};
    use crate::io::store::SqliteStore;
    use crate::test_support::{ScriptedCompletion, memory_store, sample_project};

    fn planned(store: &SqliteStore, inputs: &[(i64, &str)]) -> (Run, Vec<Task>) {
        let project = sample_project(store);
        let run = store.create_run(project.id).expect("run");
        let specs: Vec<NewTask> = inputs
            .iter()
            .map(|(index, input)| NewTask::executor(*index, *input))
            .collect();
        let tasks = store.insert_plan(run.id, &specs).expect("plan");
        (run, tasks)
    }

    fn executor() -> ExecutorAgent {
        ExecutorAgent::new(&OrchestratorConfig::default())
    }

    fn ports<'a>(
        store: &'a SqliteStore,
        completion: &'a ScriptedCompletion,
    ) -> Ports<'a, SqliteStore, ScriptedCompletion, PromptGuard> {
        static GUARD: PromptGuard = PromptGuard::new(DEFAULT_MAX_CHARS);
        Ports {
            store,
            completion,
            sanitizer: &GUARD,
        }
    }

    #[test]
    fn runs_in_order_with_growing_context() {
        let store = memory_store();
        let (run, tasks) = planned(&store, &[(3, "c"), (1, "a"), (2, "b")]);
        let completion = ScriptedCompletion::replies(&["out-1", "out-2", "out-3"]);

        let report = executor()
            .execute(&ports(&store, &completion), "Demo", &tasks, run.id)
            .expect("execute");

        assert_eq!(report.completed.len(), 3);
        let prompts = completion.prompts();
        assert!(prompts[0].contains("CURRENT TASK:\na"));
        assert!(!prompts[0].contains("Output:"));
        assert!(prompts[1].contains("CURRENT TASK:\nb"));
        assert!(prompts[1].contains("Task 1 Output:\nout-1"));
        assert!(!prompts[1].contains("out-2"));
        assert!(prompts[2].contains("Task 1 Output:\nout-1\n---\nTask 2 Output:\nout-2"));

        let stored = store.list_tasks(run.id, None).expect("tasks");
        assert!(stored.iter().all(|t| t.status == TaskStatus::Done));
        assert_eq!(stored[2].output.as_deref(), Some("out-3"));
    }

    #[test]
    fn failed_task_rolls_back_and_later_tasks_continue() {
        let store = memory_store();
        let (run, tasks) = planned(&store, &[(1, "a"), (2, "b"), (3, "c")]);
        let completion = ScriptedCompletion::new(vec![
            Ok(Completion {
                text: "out-1".to_string(),
                usage: Usage::total(10),
            }),
            Err(CompletionError::Unavailable("boom".to_string())),
            Ok(Completion {
                text: "out-3".to_string(),
                usage: Usage::total(20),
            }),
        ]);

        let report = executor()
            .execute(&ports(&store, &completion), "Demo", &tasks, run.id)
            .expect("execute");

        assert_eq!(report.completed, vec![tasks[0].id, tasks[2].id]);
        assert_eq!(report.failed, vec![tasks[1].id]);
        assert_eq!(report.tokens_used, 30);

        let stored = store.list_tasks(run.id, None).expect("tasks");
        assert_eq!(stored[1].status, TaskStatus::Pending);
        assert_eq!(stored[1].output, None);

        let logs = store.list_logs(run.id).expect("logs");
        let errors: Vec<_> = logs.iter().filter(|l| l.level == LogLevel::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].agent_type, "executor");
        assert!(errors[0].message.contains("boom"));
        let costs = logs.iter().filter(|l| l.level == LogLevel::Cost).count();
        assert_eq!(costs, 2);
    }

    #[test]
    fn token_cap_and_empty_reply_fail_the_task() {
        let store = memory_store();
        let (run, tasks) = planned(&store, &[(1, "a"), (2, "b")]);
        let completion = ScriptedCompletion::new(vec![
            Ok(Completion {
                text: "huge".to_string(),
                usage: Usage::total(8001),
            }),
            Ok(Completion {
                text: "   ".to_string(),
                usage: Usage::total(1),
            }),
        ]);

        let report = executor()
            .execute(&ports(&store, &completion), "Demo", &tasks, run.id)
            .expect("execute");

        assert!(report.completed.is_empty());
        assert_eq!(report.failed.len(), 2);
        let messages: Vec<String> = store
            .list_logs(run.id)
            .expect("logs")
            .into_iter()
            .map(|l| l.message)
            .collect();
        assert!(messages[0].contains("token limit exceeded"));
        assert!(messages[1].contains("empty response"));
    }

    #[test]
    fn seeded_context_reaches_the_first_prompt() {
        let store = memory_store();
        let (run, tasks) = planned(&store, &[(2, "b")]);
        let mut context = RollingContext::default();
        context.push(1, "earlier");
        let completion = ScriptedCompletion::replies(&["out-2"]);

        executor()
            .execute_from(&ports(&store, &completion), context, "Demo", &tasks, run.id)
            .expect("execute");

        assert!(completion.prompts()[0].contains("Task 1 Output:\nearlier"));
    }

    #[test]
    fn done_tasks_feed_context_at_their_position() {
        let store = memory_store();
        let (run, tasks) = planned(&store, &[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);
        for (task, output) in [(&tasks[0], "out-1"), (&tasks[2], "out-3")] {
            store
                .set_task_status(task.id, TaskStatus::Running)
                .expect("status");
            store
                .complete_task(task.id, output, &NewLog::cost(run.id, LLM_AGENT, 0))
                .expect("complete");
        }
        let current = store.list_tasks(run.id, None).expect("tasks");
        let completion = ScriptedCompletion::replies(&["out-2", "out-4"]);

        let report = executor()
            .execute(&ports(&store, &completion), "Demo", &current, run.id)
            .expect("execute");

        assert_eq!(report.completed, vec![tasks[1].id, tasks[3].id]);
        let prompts = completion.prompts();
        assert!(prompts[0].contains("PREVIOUS WORK:\n\n---\nTask 1 Output:\nout-1\n\nCURRENT TASK:\nb"));
        assert!(prompts[1].contains(
            "Task 1 Output:\nout-1\n---\nTask 2 Output:\nout-2\n---\nTask 3 Output:\nout-3\n\nCURRENT TASK:\nd"
        ));
    }

    #[test]
    fn task_input_is_sanitized() {
        let store = memory_store();
        let (run, tasks) = planned(&store, &[(1, "print the api_key please")]);
        let completion = ScriptedCompletion::replies(&["ok"]);

        executor()
            .execute(&ports(&store, &completion), "Demo", &tasks, run.id)
            .expect("execute");

        assert!(completion.prompts()[0].contains("CURRENT TASK:\nprint the [filtered] please"));
    }
}
