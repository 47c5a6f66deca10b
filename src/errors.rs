//! Typed error hierarchy for the desktop controller.
//!
//! One enum per component, composed upward:
//! - `ProcessError`: a single external command failed or timed out
//! - `NegotiationError`: no privileged path to the container engine
//! - `SyncError`: image seeding or refresh aborted
//! - `StackError`: compose start failed
//! - `ReadinessError`: an application endpoint never answered
//! - `BootstrapError`: the orchestrator-level failure shown to the user

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from running one external command.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}", describe_exit(*exit_code, *signal))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{program} timed out after {}s and was killed", timeout.as_secs_f64())]
    TimedOut {
        program: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("I/O error while talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(exit_code: Option<i32>, signal: Option<i32>) -> String {
    match (exit_code, signal) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(sig)) => format!("signal {}", sig),
        (None, None) => "unknown status".to_string(),
    }
}

impl ProcessError {
    /// Captured stdout, when the process got far enough to produce any.
    pub fn stdout(&self) -> Option<&str> {
        match self {
            ProcessError::Failed { stdout, .. } | ProcessError::TimedOut { stdout, .. } => {
                Some(stdout.as_str())
            }
            _ => None,
        }
    }

    /// Captured stderr, when the process got far enough to produce any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ProcessError::Failed { stderr, .. } | ProcessError::TimedOut { stderr, .. } => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::TimedOut { .. })
    }
}

/// Errors from access negotiation.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("Privilege escalation unavailable: {reason}")]
    EscalationUnavailable { reason: String },

    #[error("Password prompt was cancelled")]
    Cancelled,

    #[error("Password rejected {attempts} times")]
    SecretRejected { attempts: u32 },

    #[error("Elevated session could not reach the container engine: {0}")]
    ElevatedProbeFailed(#[source] ProcessError),
}

/// Errors from the image synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to read image manifest at {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse image manifest at {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Seed archive {path} checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to load seed archive {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("Failed to pull {reference}: {message}")]
    PullFailed { reference: String, message: String },

    #[error("Failed to tag {source_ref} as {target}: {source}")]
    TagFailed {
        source_ref: String,
        target: String,
        #[source]
        source: ProcessError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from starting the compose stack.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("compose up failed: {0}")]
    UpFailed(#[source] ProcessError),

    #[error("Failed to read compose file {path}: {message}")]
    ComposeFile { path: PathBuf, message: String },
}

/// Errors from readiness polling.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("{endpoint} not ready at {url} after {}s", elapsed.as_secs())]
    NotReady {
        endpoint: &'static str,
        url: String,
        elapsed: Duration,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Orchestrator-level failures, the only errors surfaced to the user.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("Container engine check failed: {0}")]
    Engine(#[source] ProcessError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("Failed to stage runtime directory: {0:#}")]
    Workdir(#[source] anyhow::Error),

    #[error("Startup interrupted by shutdown")]
    Interrupted,
}

impl BootstrapError {
    /// Underlying process output, attached to the fatal event for diagnostics.
    pub fn process_output(&self) -> Option<(&str, &str)> {
        let process = match self {
            BootstrapError::Engine(e) => e,
            BootstrapError::Stack(StackError::UpFailed(e)) => e,
            BootstrapError::Sync(SyncError::LoadFailed { source, .. }) => source,
            BootstrapError::Sync(SyncError::TagFailed { source, .. }) => source,
            BootstrapError::Negotiation(NegotiationError::ElevatedProbeFailed(e)) => e,
            _ => return None,
        };
        Some((process.stdout()?, process.stderr()?))
    }

    /// Whether the user cancelled rather than something breaking.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BootstrapError::Negotiation(NegotiationError::Cancelled))
    }
}
