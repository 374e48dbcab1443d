//! Prompt rendering for the planner and executor.

use minijinja::{Environment, context};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CORRECTION_TEMPLATE: &str = include_str!("prompts/correction.md");
const EXECUTOR_TEMPLATE: &str = include_str!("prompts/executor.md");

/// Rendered in place of a missing project description.
pub const NO_DESCRIPTION: &str = "N/A";

/// Template engine wrapper around minijinja.
///
/// Callers are responsible for sanitizing free text before it reaches a template.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("correction", CORRECTION_TEMPLATE)
            .expect("correction template should be valid");
        env.add_template("executor", EXECUTOR_TEMPLATE)
            .expect("executor template should be valid");
        Self { env }
    }

    /// Initial planning prompt asking for the strict `{"tasks": [...]}` object.
    pub fn planner(&self, title: &str, description: &str) -> Result<String, minijinja::Error> {
        let description = if description.trim().is_empty() {
            NO_DESCRIPTION
        } else {
            description
        };
        self.env.get_template("planner")?.render(context! {
            title => title,
            description => description,
        })
    }

    /// Re-prompt asking the service to repair its previous, unparseable reply.
    pub fn correction(&self, previous: &str) -> Result<String, minijinja::Error> {
        self.env
            .get_template("correction")?
            .render(context! { previous => previous })
    }

    /// Task prompt: project title, everything done so far, then the task itself.
    pub fn executor(
        &self,
        title: &str,
        previous_work: &str,
        task: &str,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("executor")?.render(context! {
            title => title,
            previous_work => previous_work,
            task => task,
        })
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_prompt_embeds_schema_and_project() {
        let prompt = PromptEngine::new()
            .planner("Apollo", "Land on the moon")
            .expect("render");
        assert!(prompt.contains("Return ONLY valid JSON"));
        assert!(prompt.contains("\"order_index\": number"));
        assert!(prompt.contains("Project Title:\nApollo"));
        assert!(prompt.contains("Project Description:\nLand on the moon"));
    }

    #[test]
    fn planner_prompt_marks_missing_description() {
        let prompt = PromptEngine::new().planner("Apollo", "").expect("render");
        assert!(prompt.contains("Project Description:\nN/A"));
    }

    #[test]
    fn correction_prompt_embeds_previous_reply_verbatim() {
        let prompt = PromptEngine::new()
            .correction("{\"tasks\": [ {{ broken")
            .expect("render");
        assert!(prompt.starts_with("Fix this and return ONLY valid JSON with the same schema:"));
        assert!(prompt.contains("{\"tasks\": [ {{ broken"));
    }

    #[test]
    fn executor_sections_appear_in_order() {
        let prompt = PromptEngine::new()
            .executor("Apollo", "\n---\nTask 1 Output:\nalpha", "build the lander")
            .expect("render");

        let project = prompt.find("PROJECT:\nApollo").expect("project");
        let previous = prompt.find("PREVIOUS WORK:").expect("previous");
        let output = prompt.find("Task 1 Output:\nalpha").expect("context");
        let task = prompt.find("CURRENT TASK:\nbuild the lander").expect("task");
        assert!(project < previous && previous < output && output < task);
    }
}
