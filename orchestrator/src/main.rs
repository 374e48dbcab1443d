//! Command-line front end for the orchestration core.
//!
//! Every command prints its result as pretty JSON on stdout. Failures print the
//! error chain on stderr and exit with a code from [`exit_codes`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use orchestrator::coordinator::RunCoordinator;
use orchestrator::core::sanitize::PromptGuard;
use orchestrator::core::types::{NewProject, ProjectId, RunId};
use orchestrator::error::OrchestratorError;
use orchestrator::exit_codes;
use orchestrator::io::completion::CommandCompletion;
use orchestrator::io::config::{OrchestratorConfig, load_config, write_config};
use orchestrator::io::store::SqliteStore;
use orchestrator::logging;

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Planner → executor → reporter pipeline over a completion command"
)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "orchestrator.toml")]
    config: PathBuf,

    /// Override `database_path` from the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// More diagnostics on stderr (-v info, -vv debug with span timings).
    /// `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file and create the database.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    #[command(subcommand)]
    Project(ProjectCommand),
    #[command(subcommand)]
    Run(RunCommand),
    /// Clear a lock flag left behind by a crashed process.
    #[command(subcommand)]
    Unlock(UnlockCommand),
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a project.
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
enum RunCommand {
    /// Archive the project's runs, create a new run and plan it.
    Create { project_id: ProjectId },
    Get { run_id: RunId },
    /// List a project's runs, newest first.
    List {
        project_id: ProjectId,
        /// Only runs with this archived flag.
        #[arg(long)]
        archived: Option<bool>,
    },
    /// List a run's tasks in execution order.
    Tasks { run_id: RunId },
    /// List a run's log entries in chronological order.
    Logs { run_id: RunId },
    /// Execute pending tasks; resumes after partial failures.
    Execute { run_id: RunId },
    /// Store a narrative summary of the run's tasks.
    Summarize { run_id: RunId },
    /// Delete a run with its tasks and logs.
    Delete { run_id: RunId },
    /// Create, execute and summarize a run in one go.
    Pipeline { project_id: ProjectId },
}

#[derive(Subcommand)]
enum UnlockCommand {
    Project { project_id: ProjectId },
    Run { run_id: RunId },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("{:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<OrchestratorError>()
        .map_or(exit_codes::INVALID, |err| exit_codes::for_kind(err.kind()))
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, cli.db, force),
        Command::Project(command) => {
            with_coordinator(&cli.config, cli.db, |c| cmd_project(c, command))
        }
        Command::Run(command) => with_coordinator(&cli.config, cli.db, |c| cmd_run(c, command)),
        Command::Unlock(command) => {
            with_coordinator(&cli.config, cli.db, |c| cmd_unlock(c, command))
        }
    }
}

type Coordinator<'a> = RunCoordinator<'a, SqliteStore, CommandCompletion, PromptGuard>;

/// Load config, open the database and hand a coordinator to `f`.
fn with_coordinator<F>(config_path: &Path, db: Option<PathBuf>, f: F) -> Result<()>
where
    F: FnOnce(&Coordinator<'_>) -> Result<()>,
{
    let mut config = load_config(config_path)?;
    if let Some(db) = db {
        config.database_path = db;
    }
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("open database {}", config.database_path.display()))?;
    let completion = CommandCompletion::from_config(&config.completion);
    let guard = PromptGuard::new(config.sanitizer.max_chars);
    f(&RunCoordinator::new(&store, &completion, &guard, &config))
}

fn cmd_project(coordinator: &Coordinator<'_>, command: ProjectCommand) -> Result<()> {
    match command {
        ProjectCommand::Create {
            owner,
            title,
            description,
        } => print_json(&coordinator.create_project(&NewProject {
            owner,
            title,
            description,
        })?),
    }
}

fn cmd_run(coordinator: &Coordinator<'_>, command: RunCommand) -> Result<()> {
    match command {
        RunCommand::Create { project_id } => print_json(&coordinator.create_and_plan(project_id)?),
        RunCommand::Get { run_id } => print_json(&coordinator.get_run(run_id)?),
        RunCommand::List {
            project_id,
            archived,
        } => print_json(&coordinator.list_runs(project_id, archived)?),
        RunCommand::Tasks { run_id } => print_json(&coordinator.list_tasks(run_id)?),
        RunCommand::Logs { run_id } => print_json(&coordinator.list_logs(run_id)?),
        RunCommand::Execute { run_id } => print_json(&coordinator.execute(run_id)?),
        RunCommand::Summarize { run_id } => print_json(&coordinator.summarize(run_id)?),
        RunCommand::Delete { run_id } => {
            coordinator.delete_run(run_id)?;
            print_json(&serde_json::json!({ "deleted": run_id }))
        }
        RunCommand::Pipeline { project_id } => print_json(&coordinator.run_pipeline(project_id)?),
    }
}

fn cmd_unlock(coordinator: &Coordinator<'_>, command: UnlockCommand) -> Result<()> {
    match command {
        UnlockCommand::Project { project_id } => {
            print_json(&coordinator.unlock_project(project_id)?)
        }
        UnlockCommand::Run { run_id } => print_json(&coordinator.unlock_run(run_id)?),
    }
}

fn cmd_init(config_path: &Path, db: Option<PathBuf>, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    let mut config = OrchestratorConfig::default();
    if let Some(db) = db {
        config.database_path = db;
    }
    write_config(config_path, &config)?;
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("create database {}", config.database_path.display()))?;
    print_json(&config)
}

/// Pretty-print `value` as JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{payload}");
    Ok(())
}
