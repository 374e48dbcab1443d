//! Diagnostic tracing for the orchestrator binary.
//!
//! Tracing output goes to stderr and is never persisted. The durable record of
//! what a run did (decisions, failures, token spend) is the `logs` table, which
//! is written regardless of the filter chosen here.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Filter used when `RUST_LOG` is unset, by `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "orchestrator=info,warn",
        2 => "orchestrator=debug,info",
        _ => "orchestrator=trace,debug",
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over `verbosity` when set. From `-vv` on, span close events
/// are printed too, which times each planner, executor and completion call.
///
/// ```bash
/// orchestrator -vv run execute 3
/// RUST_LOG=orchestrator::io::store=trace orchestrator run tasks 3
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let spans = if verbosity >= 2 {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2)
                .with_span_events(spans)
                .compact(),
        )
        .init();
}
