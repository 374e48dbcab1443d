//! Child-process plumbing for command-backed completion.
//!
//! The prompt is fed through stdin on its own thread and both output pipes are
//! drained on reader threads, so a child that writes a lot before reading (or
//! never reads) cannot wedge the caller. The deadline covers the whole exchange.

use std::io::{Read, Write};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output pipe plus how many were dropped past the limit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Outcome of one child run. `status` is the post-kill status when `timed_out`.
#[derive(Debug)]
pub struct ChildOutcome {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl ChildOutcome {
    /// Trimmed stderr text, for error messages.
    pub fn stderr_text(&self) -> String {
        self.stderr.lossy().trim().to_string()
    }
}

/// Deadline and per-pipe capture bound for [`run_child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

/// Spawn `cmd`, write `input` to its stdin, and wait up to `limits.timeout`.
///
/// A child still running at the deadline is killed and reported with
/// `timed_out`. Bytes past `limits.max_output_bytes` on either pipe are drained
/// and counted, not kept.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), input_bytes = input.len()))]
pub fn run_child(mut cmd: Command, input: Vec<u8>, limits: ChildLimits) -> Result<ChildOutcome> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn completion command")?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;
    let stdin = child.stdin.take().ok_or_else(|| anyhow!("stdin not piped"))?;
    let stdout = drain(stdout, limits.max_output_bytes);
    let stderr = drain(stderr, limits.max_output_bytes);
    let feeder = feed(stdin, input);

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!("completion command hit its deadline; killing");
            child.kill().context("kill child")?;
            (child.wait().context("reap child")?, true)
        }
    };

    // Killing the child closes its end of stdin, which unblocks the feeder.
    if feeder.join().is_err() {
        warn!("stdin feeder panicked");
    }
    let stdout = collect(stdout).context("read stdout")?;
    let stderr = collect(stderr).context("read stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "child output exceeded capture limit"
        );
    }
    debug!(code = ?status.code(), timed_out, "child exited");

    Ok(ChildOutcome {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn feed(mut stdin: ChildStdin, input: Vec<u8>) -> JoinHandle<()> {
    thread::spawn(move || {
        // A child may exit without reading everything; a broken pipe is not an error here.
        if let Err(err) = stdin.write_all(&input) {
            debug!(error = %err, "child stopped reading stdin");
        }
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R, limit: usize) -> JoinHandle<Result<Captured>> {
    thread::spawn(move || {
        let mut captured = Captured::default();
        let mut chunk = [0u8; 8192];
        loop {
            let n = pipe.read(&mut chunk).context("read pipe")?;
            if n == 0 {
                return Ok(captured);
            }
            let keep = n.min(limit.saturating_sub(captured.bytes.len()));
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.dropped += n - keep;
        }
    })
}

fn collect(handle: JoinHandle<Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("pipe reader panicked"))?
}
