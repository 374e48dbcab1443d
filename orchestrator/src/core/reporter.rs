//! Deterministic narrative summary of a run's tasks.
//!
//! The reporter performs no I/O and never fails: any list of snapshots,
//! including an empty one, yields a summary.

use crate::core::types::{EXECUTOR_AGENT, TaskSnapshot};

/// Rendered in place of a result when a task has no output.
pub const NO_OUTPUT: &str = "(no output recorded)";

const CLOSING: &str = "Overall, the project has been broken down into clear steps and \
each step has been processed. This summary can be used as a high-level report of what \
the orchestrator completed.";

/// Reduce ordered task snapshots into a multi-line summary.
///
/// Layout: a header naming the project, one block per task in input order, and a
/// closing statement, each separated by a blank line.
pub fn summarize(project_title: &str, tasks: &[TaskSnapshot]) -> String {
    let mut lines: Vec<String> = vec![
        format!("Summary for project: {project_title}"),
        String::new(),
        "This run executed the following steps:".to_string(),
    ];

    for task in tasks {
        let agent_type = if task.agent_type.is_empty() {
            EXECUTOR_AGENT
        } else {
            task.agent_type.as_str()
        };
        let input = task.input.trim();
        let output = task.output.as_deref().map(str::trim).unwrap_or_default();

        lines.push(String::new());
        lines.push(format!("Step {} ({agent_type}):", task.order_index));
        if !input.is_empty() {
            lines.push(format!("- Instruction: {input}"));
        }
        if output.is_empty() {
            lines.push(format!("- Result: {NO_OUTPUT}"));
        } else {
            lines.push(format!("- Result: {output}"));
        }
    }

    lines.push(String::new());
    lines.push(CLOSING.to_string());
    lines.join("\n")
}
