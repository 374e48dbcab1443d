//! Completion port: the synchronous contract to a text-completion provider.
//!
//! The [`CompletionPort`] trait decouples the planner and executor from the
//! actual provider. [`CommandCompletion`] shells out to a configured command;
//! tests use scripted ports that return queued replies without spawning anything.

use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::io::config::CompletionConfig;
use crate::io::process::{ChildLimits, run_child};

/// Exit status a completion command uses to signal rate limiting (`EX_TEMPFAIL`).
pub const RATE_LIMITED_EXIT: i32 = 75;

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn total(total_tokens: u64) -> Self {
        Self {
            total_tokens,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Parameters for one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
    #[error("completion service rate limited: {0}")]
    RateLimited(String),
    #[error("token limit exceeded for safety: {total} > {limit}")]
    TokenLimitExceeded { total: u64, limit: u64 },
    #[error("empty response from completion service")]
    EmptyResponse,
}

/// Abstraction over completion providers.
pub trait CompletionPort {
    /// Run one completion. No retries; the caller decides what a failure means.
    fn generate(&self, request: &CompletionRequest) -> Result<Completion, CompletionError>;
}

/// Generate and enforce the core's guarantees on the reply.
///
/// A call reporting more than `max_tokens_per_call` total tokens fails with
/// [`CompletionError::TokenLimitExceeded`]; a blank reply fails with
/// [`CompletionError::EmptyResponse`]. The returned text is trimmed.
pub fn checked_generate<C: CompletionPort + ?Sized>(
    port: &C,
    request: &CompletionRequest,
    max_tokens_per_call: u64,
) -> Result<Completion, CompletionError> {
    let completion = port.generate(request)?;
    if completion.usage.total_tokens > max_tokens_per_call {
        warn!(
            total_tokens = completion.usage.total_tokens,
            limit = max_tokens_per_call,
            "completion exceeded token safety cap"
        );
        return Err(CompletionError::TokenLimitExceeded {
            total: completion.usage.total_tokens,
            limit: max_tokens_per_call,
        });
    }
    let text = completion.text.trim();
    if text.is_empty() {
        return Err(CompletionError::EmptyResponse);
    }
    Ok(Completion {
        text: text.to_string(),
        usage: completion.usage,
    })
}

/// Reply shape a completion command may print on stdout.
#[derive(Debug, Deserialize)]
struct CommandReply {
    text: String,
    #[serde(default)]
    usage: Usage,
}

/// Completion port that runs a command per call.
///
/// The prompt is written to stdin. `COMPLETION_MODEL` and
/// `COMPLETION_TEMPERATURE` carry the request's model and temperature. Stdout
/// is either a JSON object `{"text": ..., "usage": {...}}` or plain text (usage
/// reported as zero).
#[derive(Debug, Clone)]
pub struct CommandCompletion {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandCompletion {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.timeout(),
            config.output_limit_bytes,
        )
    }
}

impl CompletionPort for CommandCompletion {
    #[instrument(skip_all, fields(program = ?self.command.first(), timeout_secs = self.timeout.as_secs()))]
    fn generate(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(CompletionError::Unavailable(
                "completion command is empty".to_string(),
            ));
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(model) = &request.model {
            cmd.env("COMPLETION_MODEL", model);
        }
        if let Some(temperature) = request.temperature {
            cmd.env("COMPLETION_TEMPERATURE", temperature.to_string());
        }

        let outcome = run_child(
            cmd,
            request.prompt.as_bytes().to_vec(),
            ChildLimits {
                timeout: self.timeout,
                max_output_bytes: self.output_limit_bytes,
            },
        )
        .map_err(|err| CompletionError::Unavailable(format!("{err:#}")))?;

        if outcome.timed_out {
            return Err(CompletionError::Unavailable(format!(
                "completion command timed out after {:?}",
                self.timeout
            )));
        }
        match outcome.status.code() {
            Some(0) => {}
            Some(RATE_LIMITED_EXIT) => {
                return Err(CompletionError::RateLimited(outcome.stderr_text()));
            }
            code => {
                return Err(CompletionError::Unavailable(format!(
                    "completion command failed with status {code:?}: {}",
                    outcome.stderr_text()
                )));
            }
        }

        let completion = parse_reply(&outcome.stdout.lossy());
        debug!(
            total_tokens = completion.usage.total_tokens,
            "completion command finished"
        );
        Ok(completion)
    }
}

fn parse_reply(stdout: &str) -> Completion {
    match serde_json::from_str::<CommandReply>(stdout.trim()) {
        Ok(reply) => Completion {
            text: reply.text,
            usage: reply.usage,
        },
        Err(_) => Completion {
            text: stdout.to_string(),
            usage: Usage::default(),
        },
    }
}
