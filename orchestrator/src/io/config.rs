//! Orchestrator configuration stored as TOML (default `orchestrator.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Orchestrator configuration (TOML).
///
/// Missing fields default to the values the pipeline was tuned with. The struct
/// is passed into the planner and executor at construction; nothing reads
/// settings from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// SQLite database holding projects, runs, tasks and logs.
    pub database_path: PathBuf,

    pub completion: CompletionConfig,

    pub planner: PlannerConfig,

    pub sanitizer: SanitizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Command to run for each completion; the prompt is written to stdin.
    pub command: Vec<String>,

    /// Model identifier passed to the command as `COMPLETION_MODEL`.
    pub model: Option<String>,

    pub temperature: f64,

    /// Wall-clock bound for a single completion command.
    pub timeout_secs: u64,

    /// Discard completion stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// A single call reporting more total tokens than this is a hard failure.
    pub max_tokens_per_call: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Completion calls the planner makes before giving up, the initial call
    /// included. The default of 3 means two corrections; 4 allows three.
    pub max_attempts: u32,

    /// Planned task inputs are truncated to this many characters.
    pub task_input_limit_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Sanitized text is truncated to this many characters.
    pub max_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("orchestrator.db"),
            completion: CompletionConfig::default(),
            planner: PlannerConfig::default(),
            sanitizer: SanitizerConfig::default(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm-complete".to_string()],
            model: Some("deepseek/deepseek-chat".to_string()),
            temperature: 0.4,
            timeout_secs: 60,
            output_limit_bytes: 1_000_000,
            max_tokens_per_call: 8000,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            task_input_limit_chars: 4000,
        }
    }
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_chars: crate::core::sanitize::DEFAULT_MAX_CHARS,
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(anyhow!("database_path must not be empty"));
        }
        let completion = &self.completion;
        if completion.command.is_empty() || completion.command[0].trim().is_empty() {
            return Err(anyhow!("completion.command must be a non-empty array"));
        }
        if !(0.0..=2.0).contains(&completion.temperature) {
            return Err(anyhow!("completion.temperature must be within 0.0..=2.0"));
        }
        if completion.timeout_secs == 0 {
            return Err(anyhow!("completion.timeout_secs must be > 0"));
        }
        if completion.output_limit_bytes == 0 {
            return Err(anyhow!("completion.output_limit_bytes must be > 0"));
        }
        if completion.max_tokens_per_call == 0 {
            return Err(anyhow!("completion.max_tokens_per_call must be > 0"));
        }
        if self.planner.max_attempts == 0 {
            return Err(anyhow!("planner.max_attempts must be > 0"));
        }
        if self.planner.task_input_limit_chars == 0 {
            return Err(anyhow!("planner.task_input_limit_chars must be > 0"));
        }
        if self.sanitizer.max_chars == 0 {
            return Err(anyhow!("sanitizer.max_chars must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
