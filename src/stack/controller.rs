//! Compose stack controller.
//!
//! `start` runs `compose up` while a poller task lists the project's
//! containers and publishes the mean readiness weight. `shutdown` is safe to
//! call at any time, from any state, any number of times.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::errors::StackError;
use crate::events::StageReporter;
use crate::stack::status::{ServiceStatus, aggregate_progress, parse_status_listing};

#[derive(Debug, Clone)]
pub struct StackSettings {
    pub project: String,
    pub compose_file: PathBuf,
    pub env_file: Option<PathBuf>,
    /// Every service the stack is expected to run, in compose-file order.
    pub services: Vec<String>,
    pub up_timeout: Duration,
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
    pub settle_window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    NotStarted,
    Stopped { graceful: bool, removed_leftovers: usize },
    ForceKilled { removed: usize },
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::NotStarted => write!(f, "nothing to stop"),
            StopOutcome::Stopped {
                graceful: true,
                removed_leftovers: 0,
            } => write!(f, "stopped"),
            StopOutcome::Stopped {
                graceful,
                removed_leftovers,
            } => write!(
                f,
                "stopped ({}, removed {} leftover containers)",
                if *graceful { "graceful" } else { "compose down failed" },
                removed_leftovers
            ),
            StopOutcome::ForceKilled { removed } => {
                write!(f, "force-killed {} containers after timeout", removed)
            }
        }
    }
}

pub struct StackController {
    settings: StackSettings,
    services: Mutex<Vec<String>>,
    engine: Mutex<Option<Engine>>,
    started: AtomicBool,
}

impl StackController {
    pub fn new(settings: StackSettings) -> Self {
        Self {
            services: Mutex::new(settings.services.clone()),
            settings,
            engine: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &StackSettings {
        &self.settings
    }

    /// Expected services; starts as `settings.services`.
    pub fn services(&self) -> Vec<String> {
        self.services.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Replace the expected service list, e.g. once the compose file is staged.
    pub fn set_services(&self, services: Vec<String>) {
        if let Ok(mut slot) = self.services.lock() {
            *slot = services;
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Treat a stack left running by an earlier process as ours, so that
    /// `shutdown` tears it down.
    pub fn attach(&self, engine: Engine) {
        self.set_engine(engine);
        self.started.store(true, Ordering::SeqCst);
    }

    fn set_engine(&self, engine: Engine) {
        if let Ok(mut slot) = self.engine.lock() {
            *slot = Some(engine);
        }
    }

    fn engine(&self) -> Option<Engine> {
        self.engine.lock().ok().and_then(|slot| slot.clone())
    }

    fn compose_spec<I, S>(&self, engine: &Engine, args: I) -> crate::process::CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        engine.compose(
            &self.settings.project,
            &self.settings.compose_file,
            self.settings.env_file.as_deref(),
            args,
        )
    }

    /// Bring the stack up, reporting compose progress until every service is
    /// ready or the settle window after `up` has passed.
    pub async fn start(&self, engine: Engine, reporter: &StageReporter) -> Result<(), StackError> {
        self.set_engine(engine.clone());
        // Marked before `up` so that a shutdown racing a hung `up` still cleans up.
        self.started.store(true, Ordering::SeqCst);

        let services = self.services();
        let token = CancellationToken::new();
        // Stops the poller even if this future is dropped mid-`up`.
        let _poller_guard = token.clone().drop_guard();
        let (ready_tx, mut ready_rx) = watch::channel(false);
        let poller = tokio::spawn(poll_status(
            engine.clone(),
            self.settings.project.clone(),
            services.clone(),
            self.settings.poll_interval,
            reporter.clone(),
            token.clone(),
            ready_tx,
        ));

        let mut args = vec!["up".to_string(), "-d".to_string(), "--remove-orphans".to_string()];
        args.extend(services.iter().cloned());
        tracing::info!(project = %self.settings.project, services = ?services, "starting stack");
        let up = engine
            .run(self.compose_spec(&engine, args).timeout(self.settings.up_timeout))
            .await;

        if up.is_ok() {
            let settle = tokio::time::timeout(self.settings.settle_window, ready_rx.wait_for(|ready| *ready));
            if settle.await.is_err() {
                tracing::debug!("settle window elapsed before every service was ready");
            }
        }

        token.cancel();
        if let Err(e) = poller.await {
            tracing::warn!(error = %e, "status poller ended abnormally");
        }

        up.map(|_| ()).map_err(StackError::UpFailed)
    }

    /// Current status of the project's containers, one entry per container.
    pub async fn status(&self, engine: &Engine) -> Result<(Vec<ServiceStatus>, f64), crate::errors::ProcessError> {
        let listing = engine.container_status_listing(&self.settings.project).await?;
        let statuses = parse_status_listing(&listing);
        let progress = aggregate_progress(&self.services(), &statuses);
        Ok((statuses, progress))
    }

    /// Graceful `compose down` followed by removal of anything still labeled
    /// with the project. Never fails.
    pub async fn stop(&self) -> StopOutcome {
        if !self.is_started() {
            return StopOutcome::NotStarted;
        }
        let Some(engine) = self.engine() else {
            self.started.store(false, Ordering::SeqCst);
            return StopOutcome::NotStarted;
        };

        let down = self
            .compose_spec(&engine, ["down", "--remove-orphans"])
            .timeout(self.settings.stop_timeout);
        let graceful = match engine.run(down).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "compose down failed; removing containers directly");
                false
            }
        };

        let removed_leftovers = self.remove_leftovers(&engine).await;
        self.started.store(false, Ordering::SeqCst);
        tracing::info!(graceful, removed_leftovers, "stack stopped");
        StopOutcome::Stopped {
            graceful,
            removed_leftovers,
        }
    }

    async fn remove_leftovers(&self, engine: &Engine) -> usize {
        let ids = match engine.labeled_containers(&self.settings.project).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list leftover containers");
                return 0;
            }
        };
        match engine.remove_force(&ids).await {
            Ok(()) => ids.len(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to remove leftover containers");
                0
            }
        }
    }

    /// Kill and remove every container labeled with the project.
    pub async fn force_kill(&self) -> usize {
        let Some(engine) = self.engine() else {
            return 0;
        };
        let ids = match engine.labeled_containers(&self.settings.project).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "force kill could not list containers");
                return 0;
            }
        };
        if let Err(e) = engine.kill(&ids).await {
            tracing::warn!(error = %e, "kill failed; removing anyway");
        }
        let removed = match engine.remove_force(&ids).await {
            Ok(()) => ids.len(),
            Err(e) => {
                tracing::error!(error = %e, "force removal failed");
                0
            }
        };
        self.started.store(false, Ordering::SeqCst);
        removed
    }

    /// `stop` bounded by `hard_timeout`; past it, force-kill everything.
    pub async fn shutdown(&self, hard_timeout: Duration) -> StopOutcome {
        match tokio::time::timeout(hard_timeout, self.stop()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = hard_timeout.as_secs_f64(),
                    "graceful shutdown timed out; force-killing containers"
                );
                let removed = self.force_kill().await;
                StopOutcome::ForceKilled { removed }
            }
        }
    }
}

async fn poll_status(
    engine: Engine,
    project: String,
    services: Vec<String>,
    interval: Duration,
    reporter: StageReporter,
    token: CancellationToken,
    ready: watch::Sender<bool>,
) {
    let mut failing = false;
    loop {
        let listing = tokio::select! {
            _ = token.cancelled() => break,
            listing = engine.container_status_listing(&project) => listing,
        };

        match listing {
            Ok(listing) => {
                failing = false;
                let statuses = parse_status_listing(&listing);
                let progress = aggregate_progress(&services, &statuses);
                let ready_count = services
                    .iter()
                    .filter(|name| statuses.iter().any(|s| &s.service_name == *name && s.weight >= 1.0))
                    .count();
                reporter.progress(
                    progress * 100.0,
                    format!("{}/{} services ready", ready_count, services.len()),
                );
                if progress >= 1.0 {
                    ready.send_replace(true);
                }
            }
            Err(e) => {
                if !failing {
                    reporter.warn(format!("container status poll failed: {}", e));
                }
                failing = true;
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Service names declared in a compose file, in file order.
pub fn services_from_compose(path: &Path) -> Result<Vec<String>, StackError> {
    let compose_error = |message: String| StackError::ComposeFile {
        path: path.to_path_buf(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| compose_error(e.to_string()))?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| compose_error(e.to_string()))?;
    let services = doc
        .get("services")
        .and_then(|s| s.as_mapping())
        .ok_or_else(|| compose_error("no services section".to_string()))?;
    Ok(services
        .keys()
        .filter_map(|k| k.as_str().map(String::from))
        .collect())
}
