//! External command execution.
//!
//! Every container-engine and elevation-helper invocation goes through a
//! [`CommandRunner`]. The system implementation spawns exactly one child per
//! call, streams stdout/stderr line by line to optional callbacks, and kills the
//! child outright when the timeout elapses. Retries are the caller's business.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::errors::ProcessError;

/// Callback invoked once per output line, as soon as the line is read.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// How long to wait for pipe readers after a timed-out child was killed.
/// Grandchildren (e.g. `sudo` → `docker`) can keep the pipes open.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A fully described command invocation.
#[derive(Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
    pub on_stdout: Option<LineCallback>,
    pub on_stderr: Option<LineCallback>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn on_stdout(mut self, callback: LineCallback) -> Self {
        self.on_stdout = Some(callback);
        self
    }

    pub fn on_stderr(mut self, callback: LineCallback) -> Self {
        self.on_stderr = Some(callback);
        self
    }

    /// Single-line rendering used in logs: env assignments, program, args.
    /// Never includes stdin, which may carry a password.
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("command", &self.display())
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Abstraction over process execution for testability.
/// Real implementation: `SystemRunner`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands as real child processes via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput, ProcessError> {
        let program = spec.program.clone();
        tracing::debug!(command = %spec.display(), "spawning");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: program.clone(),
            source,
        })?;

        if let Some(input) = spec.stdin.as_deref()
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|source| ProcessError::Io {
                    program: program.clone(),
                    source,
                })?;
            // Dropping closes the pipe so the child sees EOF.
            drop(stdin);
        }

        let stdout_task = spawn_line_reader(child.stdout.take(), spec.on_stdout.clone());
        let stderr_task = spawn_line_reader(child.stderr.take(), spec.on_stderr.clone());

        let status = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    // SIGKILL, then reap.
                    if let Err(e) = child.kill().await {
                        tracing::warn!(program = %program, error = %e, "failed to kill timed-out child");
                    }
                    let stdout = drain(stdout_task, PIPE_DRAIN_GRACE).await;
                    let stderr = drain(stderr_task, PIPE_DRAIN_GRACE).await;
                    tracing::warn!(
                        command = %spec.display(),
                        timeout_secs = limit.as_secs_f64(),
                        "command timed out"
                    );
                    return Err(ProcessError::TimedOut {
                        program,
                        timeout: limit,
                        stdout,
                        stderr,
                    });
                }
            },
            None => child.wait().await,
        }
        .map_err(|source| ProcessError::Io {
            program: program.clone(),
            source,
        })?;

        let stdout = collect(stdout_task, &program, "stdout").await;
        let stderr = collect(stderr_task, &program, "stderr").await;

        if status.success() {
            return Ok(ProcessOutput { stdout, stderr });
        }

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        tracing::debug!(
            command = %spec.display(),
            exit_code = ?status.code(),
            stderr = %stderr.trim(),
            "command failed"
        );
        Err(ProcessError::Failed {
            program,
            exit_code: status.code(),
            signal,
            stdout,
            stderr,
        })
    }
}

fn spawn_line_reader<R>(pipe: Option<R>, callback: Option<LineCallback>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = String::new();
        let Some(pipe) = pipe else {
            return collected;
        };
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(ref cb) = callback {
                cb(&line);
            }
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

async fn collect(task: JoinHandle<String>, program: &str, stream: &str) -> String {
    match task.await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(program, stream, error = %e, "output reader ended abnormally");
            String::new()
        }
    }
}

async fn drain(task: JoinHandle<String>, grace: Duration) -> String {
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "output reader ended abnormally");
            String::new()
        }
        Err(_) => String::new(),
    }
}
