//! Planner and executor agents.
//!
//! Agents combine the pure `core` logic with the store, completion and
//! sanitization ports. They never touch lock flags or run status beyond what
//! their own contract states; the coordinator owns that.

use crate::io::completion::CompletionRequest;
use crate::io::config::CompletionConfig;

pub mod executor;
pub mod planner;

/// The collaborators one agent pass works against.
pub struct Ports<'a, S: ?Sized, C: ?Sized, Z: ?Sized> {
    pub store: &'a S,
    pub completion: &'a C,
    pub sanitizer: &'a Z,
}

/// Model settings shared by every call an agent makes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallSettings {
    model: Option<String>,
    temperature: f64,
    max_tokens_per_call: u64,
}

impl CallSettings {
    pub(crate) fn from_config(config: &CompletionConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens_per_call: config.max_tokens_per_call,
        }
    }

    pub(crate) fn request(&self, prompt: String) -> CompletionRequest {
        CompletionRequest {
            prompt,
            model: self.model.clone(),
            temperature: Some(self.temperature),
        }
    }

    pub(crate) fn max_tokens_per_call(&self) -> u64 {
        self.max_tokens_per_call
    }
}
