//! External command execution with a bounded wall-clock timeout.
use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

/// Poll interval while waiting for a child process.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a command execution.
#[derive(Debug)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, if the process was not killed by a signal.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Error returned when a command exceeds its timeout.
#[derive(Debug, thiserror::Error)]
#[error("{label} timed out after {}s", .timeout.as_secs())]
pub struct TimedOut {
    /// Description of the command.
    pub label: String,
    /// The timeout that expired.
    pub timeout: Duration,
}

/// Abstraction over process execution so engine code can be tested without
/// spawning real programs.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run `program` in `dir` with extra environment variables, failing on a
    /// non-zero exit or when `timeout` expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned, exits non-zero, or
    /// runs longer than `timeout` (in which case it is killed and the error
    /// downcasts to [`TimedOut`]).
    fn run_in_with_env(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<ExecResult>;

    /// Whether `program` is available on `PATH`.
    fn which(&self, program: &str) -> bool;
}

/// Production [`Executor`] spawning real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run_in_with_env(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<ExecResult> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(dir);
        for (k, v) in env {
            cmd.env(k, v);
        }
        let label = format!("{program} {}", args.first().copied().unwrap_or_default());
        execute_with_timeout(cmd, &label, timeout)
    }

    fn which(&self, program: &str) -> bool {
        which(program)
    }
}

/// Spawn `cmd`, wait at most `timeout`, and bail on non-zero exit.
fn execute_with_timeout(mut cmd: Command, label: &str, timeout: Duration) -> Result<ExecResult> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to execute: {label}"))?;

    // Drain pipes on helper threads so a chatty child cannot block on a full pipe.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("waiting for {label}"))?
        {
            break status;
        }
        if start.elapsed() >= timeout {
            child.kill().ok();
            child.wait().ok();
            return Err(TimedOut {
                label: label.to_string(),
                timeout,
            }
            .into());
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let result = ExecResult {
        stdout: stdout.and_then(|h| h.join().ok()).unwrap_or_default(),
        stderr: stderr.and_then(|h| h.join().ok()).unwrap_or_default(),
        success: status.success(),
        code: status.code(),
    };
    if !result.success {
        bail!(
            "{label} failed (exit {}): {}",
            result.code.unwrap_or(-1),
            result.stderr.trim()
        );
    }
    Ok(result)
}

fn drain<R: std::io::Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf).ok();
        String::from_utf8_lossy(&buf).to_string()
    })
}

/// Check if a program is available on PATH.
#[must_use]
pub fn which(program: &str) -> bool {
    which::which(program).is_ok()
}
