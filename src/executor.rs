//! Child-process execution with timeout enforcement and kill escalation.
//!
//! Children are spawned without a shell: argv is passed verbatim. Exit code
//! != 0 is reported in the outcome, not as an error; `Err` means the process
//! could not be run at all.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// A command spec with all template placeholders substituted.
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

/// Captured outcome of one child run.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run a resolved command to completion, feeding `stdin_payload` if present.
///
/// Stdin is always closed after the payload is written. Stdout and stderr
/// are drained concurrently and decoded lossily, so a misbehaving child can
/// neither deadlock the gateway nor poison it with invalid UTF-8.
pub async fn run(cmd: &ResolvedCommand, stdin_payload: Option<&str>) -> Result<CommandOutcome> {
    let started = Instant::now();

    let mut child = build_command(cmd, stdin_payload.is_some())
        .spawn()
        .map_err(|e| GatewayError::Spawn(format!("'{}': {e}", cmd.program)))?;

    if let Some(payload) = stdin_payload {
        if let Some(mut stdin) = child.stdin.take() {
            let payload = payload.to_owned();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!(error = %e, "child closed stdin before the payload was written");
                }
                // dropping the handle closes the pipe
            });
        }
    }

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(drain(stdout_pipe));
    let stderr_task = tokio::spawn(drain(stderr_pipe));

    let (status, timed_out) = match tokio::time::timeout(cmd.timeout, child.wait()).await {
        Ok(waited) => {
            let status = waited
                .map_err(|e| GatewayError::Spawn(format!("'{}': wait failed: {e}", cmd.program)))?;
            (Some(status), false)
        }
        Err(_) => {
            warn!(
                program = %cmd.program,
                timeout_ms = cmd.timeout.as_millis() as u64,
                "command exceeded its timeout, terminating"
            );
            (terminate(&mut child).await, true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    let (exit_code, signal) = match &status {
        Some(status) => (status.code(), unix_signal(status)),
        None => (None, None),
    };

    Ok(CommandOutcome {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
        signal,
        timed_out,
        duration: started.elapsed(),
    })
}

fn build_command(cmd: &ResolvedCommand, piped_stdin: bool) -> Command {
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(if piped_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &cmd.env {
        command.env(key, value);
    }
    if let Some(cwd) = &cmd.cwd {
        command.current_dir(cwd);
    }
    command
}

async fn drain(pipe: Option<impl AsyncReadExt + Unpin>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buffer).await;
    }
    buffer
}

/// SIGTERM the child, escalating to SIGKILL after [`KILL_GRACE`].
pub(crate) async fn terminate(child: &mut Child) -> Option<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        // SAFETY: pid refers to our own un-reaped child.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    }
}

fn unix_signal(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        None
    }
}
