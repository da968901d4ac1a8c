//! Shared subprocess management.
//!
//! [`run_command`] spawns a child, pipes a payload to its stdin and captures
//! both output streams. [`run_streaming`] does the same but hands stdout to
//! a callback line by line as the child produces it, which is how solver
//! progress reaches the worker while the solver is still running.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Input for a child process.
#[derive(Debug, Clone, Default)]
pub struct CommandInput {
    /// Bytes piped to stdin, which is then closed.
    pub stdin: Vec<u8>,
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child process (uses current dir if `None`).
    pub working_directory: Option<PathBuf>,
    /// Wall-clock limit; the child is killed when it expires.
    pub timeout: Option<Duration>,
}

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Captured stdout. Empty for [`run_streaming`].
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The last `lines` lines of stderr.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.trim_end().lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run `cmd` to completion and capture stdout and stderr.
pub async fn run_command(
    cmd: &mut Command,
    input: CommandInput,
) -> Result<CommandOutput, CommandError> {
    let start = Instant::now();
    let timeout = input.timeout;
    let mut child = spawn(cmd, input)?;

    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    // On timeout `child` is dropped, which kills it (`kill_on_drop`).
    let status = wait_with_timeout(child.wait(), timeout, start).await?;

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: status.code().unwrap_or(-1),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run `cmd`, invoking `on_line` for every stdout line as it arrives.
pub async fn run_streaming<F>(
    cmd: &mut Command,
    input: CommandInput,
    mut on_line: F,
) -> Result<CommandOutput, CommandError>
where
    F: FnMut(&str) + Send,
{
    let start = Instant::now();
    let timeout = input.timeout;
    let mut child = spawn(cmd, input)?;

    let stdout = child.stdout.take();
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    let run = async {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                on_line(&line);
            }
        }
        child.wait().await
    };
    let status = wait_with_timeout(run, timeout, start).await?;

    let stderr = stderr_task.await.unwrap_or_default();
    Ok(CommandOutput {
        stdout: String::new(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: status.code().unwrap_or(-1),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

fn spawn(cmd: &mut Command, input: CommandInput) -> Result<Child, CommandError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &input.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        program: cmd.as_std().get_program().to_string_lossy().into_owned(),
        source,
    })?;

    // Written from a separate task so a child that fills its stdout pipe
    // before draining stdin cannot deadlock us.
    if let Some(mut stdin) = child.stdin.take() {
        let payload = input.stdin;
        tokio::spawn(async move {
            // If the process closes stdin early, ignore the error.
            let _ = stdin.write_all(&payload).await;
        });
    }
    Ok(child)
}

async fn wait_with_timeout<F>(
    fut: F,
    timeout: Option<Duration>,
    start: Instant,
) -> Result<std::process::ExitStatus, CommandError>
where
    F: std::future::Future<Output = std::io::Result<std::process::ExitStatus>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(status) => Ok(status?),
            Err(_elapsed) => Err(CommandError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        },
        None => Ok(fut.await?),
    }
}

/// Read an output stream to EOF, keeping the first [`MAX_OUTPUT_BYTES`].
///
/// Output past the cap is drained and discarded so the child never sees a
/// closed pipe.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
        let _ = tokio::io::copy(&mut h, &mut tokio::io::sink()).await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
