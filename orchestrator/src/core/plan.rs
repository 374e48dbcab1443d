//! Parsing of planner responses into task specs.
//!
//! The completion service is asked for a strict JSON object of the form
//! `{"tasks": [{"order_index": <number>, "input": <string>}]}`. Parsing is split
//! in two: [`parse_plan`] only decides whether the response is JSON at all (the
//! planner's correction loop keys off that), and [`planned_tasks`] extracts the
//! usable task specs from a parsed document.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::core::text::truncate_chars;
use crate::core::types::NewTask;

/// Outcome of one parse attempt on a planner response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Ok(PlanDocument),
    Error(String),
}

/// A planner response that parsed as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDocument(Value);

impl PlanDocument {
    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// The parsed document does not describe any usable task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("planner returned invalid tasks: {0}")]
pub struct InvalidPlan(&'static str);

/// Parse a raw completion as a JSON document. No prose or fences are tolerated.
pub fn parse_plan(raw: &str) -> ParseOutcome {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => ParseOutcome::Ok(PlanDocument(value)),
        Err(err) => ParseOutcome::Error(err.to_string()),
    }
}

/// Extract task specs from a parsed plan.
///
/// A missing, non-array or empty `tasks` key is an [`InvalidPlan`]. Elements
/// missing `order_index` or `input`, or whose `order_index` is not integral,
/// are skipped, as are repeats of an `order_index` already taken; a list where
/// every element is skipped yields no tasks. Inputs are stringified and
/// truncated to `input_limit_chars`. The result is sorted by `order_index`.
pub fn planned_tasks(
    document: &PlanDocument,
    input_limit_chars: usize,
) -> Result<Vec<NewTask>, InvalidPlan> {
    let entries = document
        .value()
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or(InvalidPlan("missing \"tasks\" array"))?;
    if entries.is_empty() {
        return Err(InvalidPlan("empty \"tasks\" array"));
    }

    let mut seen = BTreeSet::new();
    let mut tasks = Vec::with_capacity(entries.len());
    for entry in entries {
        let (Some(order), Some(input)) = (entry.get("order_index"), entry.get("input")) else {
            continue;
        };
        let Some(order_index) = coerce_order_index(order) else {
            continue;
        };
        if !seen.insert(order_index) {
            continue;
        }
        let input = stringify(input);
        tasks.push(NewTask::executor(
            order_index,
            truncate_chars(&input, input_limit_chars),
        ));
    }

    tasks.sort_by_key(|task| task.order_index);
    Ok(tasks)
}

/// Integers pass through, floats truncate toward zero, numeric strings parse.
fn coerce_order_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(raw: &str) -> PlanDocument {
        match parse_plan(raw) {
            ParseOutcome::Ok(doc) => doc,
            ParseOutcome::Error(err) => panic!("expected json, got error: {err}"),
        }
    }

    #[test]
    fn prose_wrapped_json_is_a_parse_error() {
        let outcome = parse_plan("Here is the plan: {\"tasks\": []}");
        assert!(matches!(outcome, ParseOutcome::Error(_)));
    }

    #[test]
    fn surrounding_whitespace_is_accepted() {
        assert!(matches!(
            parse_plan("\n  {\"tasks\": []}\n"),
            ParseOutcome::Ok(_)
        ));
    }

    #[test]
    fn extracts_tasks_in_order_with_executor_agent() {
        let doc = parsed(
            r#"{"tasks": [
                {"order_index": 2, "input": "write tests"},
                {"order_index": 1, "input": "design api"}
            ]}"#,
        );

        let tasks = planned_tasks(&doc, 4000).expect("tasks");
        let got: Vec<(i64, &str)> = tasks
            .iter()
            .map(|t| (t.order_index, t.input.as_str()))
            .collect();
        assert_eq!(got, vec![(1, "design api"), (2, "write tests")]);
        assert!(tasks.iter().all(|t| t.agent_type == "executor"));
        assert!(tasks.iter().all(|t| t.branch == "main" && t.depth == 0));
    }

    #[test]
    fn skips_entries_missing_required_keys() {
        let doc = parsed(
            r#"{"tasks": [
                {"order_index": 1},
                {"input": "orphan"},
                {"order_index": 3, "input": "kept"}
            ]}"#,
        );

        let tasks = planned_tasks(&doc, 4000).expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].order_index, 3);
    }

    #[test]
    fn coerces_order_index_to_integer() {
        let doc = parsed(
            r#"{"tasks": [
                {"order_index": "4", "input": "string index"},
                {"order_index": 2.9, "input": "float index"},
                {"order_index": "four", "input": "skipped"},
                {"order_index": null, "input": "skipped too"}
            ]}"#,
        );

        let tasks = planned_tasks(&doc, 4000).expect("tasks");
        let indices: Vec<i64> = tasks.iter().map(|t| t.order_index).collect();
        assert_eq!(indices, vec![2, 4]);
    }

    #[test]
    fn duplicate_order_index_keeps_first_entry() {
        let doc = parsed(
            r#"{"tasks": [
                {"order_index": 1, "input": "first"},
                {"order_index": 1, "input": "second"}
            ]}"#,
        );

        let tasks = planned_tasks(&doc, 4000).expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].input, "first");
    }

    #[test]
    fn truncates_input_to_limit() {
        let long = "x".repeat(5000);
        let raw = serde_json::json!({"tasks": [{"order_index": 1, "input": long}]}).to_string();

        let tasks = planned_tasks(&parsed(&raw), 4000).expect("tasks");
        assert_eq!(tasks[0].input.chars().count(), 4000);
    }

    #[test]
    fn non_string_input_is_stringified() {
        let doc = parsed(r#"{"tasks": [{"order_index": 1, "input": {"step": "a"}}]}"#);
        let tasks = planned_tasks(&doc, 4000).expect("tasks");
        assert_eq!(tasks[0].input, r#"{"step":"a"}"#);
    }

    #[test]
    fn missing_or_empty_task_list_is_invalid() {
        for raw in [
            r#"{"steps": []}"#,
            r#"{"tasks": []}"#,
            r#"{"tasks": "a"}"#,
            r#"{"tasks": null}"#,
            "[1, 2]",
        ] {
            assert!(planned_tasks(&parsed(raw), 4000).is_err(), "{raw}");
        }
    }

    #[test]
    fn all_entries_skipped_yields_no_tasks() {
        let doc = parsed(r#"{"tasks": [{"input": "no index"}, {"order_index": 2}, 7]}"#);
        assert_eq!(planned_tasks(&doc, 4000), Ok(Vec::new()));
    }
}
