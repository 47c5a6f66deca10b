//! Sequences one startup attempt through check, seed, pull, compose and
//! health, and owns shutdown.
//!
//! At most one attempt runs at a time. A failed attempt cleans up the stack,
//! publishes a `Fatal` event and can be retried; the negotiated engine access
//! is kept across attempts. Once `shutdown` begins nothing else is published
//! except the shutdown events themselves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::access::{AccessMode, AccessNegotiator, SecretPrompter};
use crate::bootstrap::prompt::{SecretRequest, secret_channel};
use crate::config::{DeskConfig, ResolvedPaths};
use crate::engine::Engine;
use crate::errors::BootstrapError;
use crate::events::{BootstrapEvent, EventBus, StageReporter, StartupStage};
use crate::images::{ApiPull, CliPull, ImageManifest, ImageSynchronizer, PullBackend, SyncReport};
use crate::process::CommandRunner;
use crate::readiness::ReadinessWaiter;
use crate::stack::{StackController, StopOutcome, services_from_compose};
use crate::workdir::RuntimeDir;

const EVENT_CAPACITY: usize = 256;

/// Summary of a successful attempt.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub access_mode: AccessMode,
    pub engine_version: String,
    pub images: SyncReport,
    pub url: String,
    pub elapsed: Duration,
}

struct Inner {
    config: DeskConfig,
    paths: ResolvedPaths,
    prompter: Arc<dyn SecretPrompter>,
    bus: EventBus,
    negotiator: Mutex<AccessNegotiator>,
    stack: StackController,
    readiness: ReadinessWaiter,
    attempt_active: AtomicBool,
    attempt: std::sync::Mutex<Option<AbortHandle>>,
    gate: CancellationToken,
}

/// Clears the single-attempt flag however the attempt ends.
struct AttemptGuard(Arc<Inner>);

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.0.attempt_active.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct BootstrapOrchestrator {
    inner: Arc<Inner>,
}

impl BootstrapOrchestrator {
    pub fn new(
        config: DeskConfig,
        paths: ResolvedPaths,
        runner: Arc<dyn CommandRunner>,
        prompter: Arc<dyn SecretPrompter>,
    ) -> Result<Self, BootstrapError> {
        let bus = EventBus::new(EVENT_CAPACITY, config.ui.log_tail);
        Self::build(config, paths, runner, prompter, bus, CancellationToken::new())
    }

    /// An orchestrator whose password prompts arrive on the returned receiver.
    /// Pending prompts resolve as cancelled when shutdown begins.
    pub fn with_secret_channel(
        config: DeskConfig,
        paths: ResolvedPaths,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<(Self, mpsc::Receiver<SecretRequest>), BootstrapError> {
        let bus = EventBus::new(EVENT_CAPACITY, config.ui.log_tail);
        let gate = CancellationToken::new();
        let (prompter, requests) = secret_channel(bus.clone(), gate.clone());
        let orchestrator = Self::build(config, paths, runner, Arc::new(prompter), bus, gate)?;
        Ok((orchestrator, requests))
    }

    fn build(
        config: DeskConfig,
        paths: ResolvedPaths,
        runner: Arc<dyn CommandRunner>,
        prompter: Arc<dyn SecretPrompter>,
        bus: EventBus,
        gate: CancellationToken,
    ) -> Result<Self, BootstrapError> {
        let negotiator = AccessNegotiator::new(runner, config.negotiator_settings());
        let stack = StackController::new(config.stack_settings(&paths.runtime_dir, config.stack.services.clone()));
        let readiness = ReadinessWaiter::new(config.readiness_settings())?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                paths,
                prompter,
                bus,
                negotiator: Mutex::new(negotiator),
                stack,
                readiness,
                attempt_active: AtomicBool::new(false),
                attempt: std::sync::Mutex::new(None),
                gate,
            }),
        })
    }

    pub fn events(&self) -> broadcast::Receiver<BootstrapEvent> {
        self.inner.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.gate.is_cancelled()
    }

    /// The negotiated access mode, if known and not being negotiated right now.
    pub fn access_mode(&self) -> Option<AccessMode> {
        self.inner
            .negotiator
            .try_lock()
            .ok()
            .and_then(|n| n.mode().cloned())
    }

    /// Begin a startup attempt. Returns `None` while another attempt is
    /// running or after shutdown has begun.
    pub fn start(&self) -> Option<JoinHandle<Result<StartupReport, BootstrapError>>> {
        let inner = &self.inner;
        if inner.gate.is_cancelled() {
            return None;
        }
        if inner
            .attempt_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("startup attempt already running");
            return None;
        }

        let guard = AttemptGuard(inner.clone());
        let handle = tokio::spawn(async move {
            let inner = guard.0.clone();
            let result = inner.run_attempt().await;
            if let Err(ref e) = result {
                inner.fail(e).await;
            }
            drop(guard);
            result
        });
        if let Ok(mut slot) = inner.attempt.lock() {
            *slot = Some(handle.abort_handle());
        }
        Some(handle)
    }

    /// Start again after a failed attempt. Engine access negotiated by an
    /// earlier attempt is reused.
    pub fn retry(&self) -> Option<JoinHandle<Result<StartupReport, BootstrapError>>> {
        self.start()
    }

    /// Stop everything. Safe from any state and more than once.
    pub async fn shutdown(&self) -> StopOutcome {
        let inner = &self.inner;
        inner.gate.cancel();
        inner.bus.publish(BootstrapEvent::ShutdownStarted);
        tracing::info!("shutdown requested");

        if let Some(attempt) = inner.attempt.lock().ok().and_then(|mut slot| slot.take()) {
            attempt.abort();
        }

        let outcome = inner.stack.shutdown(inner.config.hard_stop_timeout()).await;

        match inner.negotiator.try_lock() {
            Ok(mut negotiator) => negotiator.release().await,
            Err(_) => tracing::debug!("negotiator busy; skipping release"),
        }

        tracing::info!(outcome = %outcome, "shutdown finished");
        inner.bus.publish(BootstrapEvent::ShutdownFinished {
            outcome: outcome.to_string(),
        });
        outcome
    }
}

impl Inner {
    fn reporter(&self, stage: StartupStage) -> StageReporter {
        StageReporter::new(self.bus.clone(), stage, self.gate.clone())
    }

    fn ensure_running(&self) -> Result<(), BootstrapError> {
        if self.gate.is_cancelled() {
            return Err(BootstrapError::Interrupted);
        }
        Ok(())
    }

    async fn run_attempt(&self) -> Result<StartupReport, BootstrapError> {
        let started = Instant::now();

        let check = self.reporter(StartupStage::Check);
        check.progress(0.0, "Checking container engine access");
        let engine = {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.negotiate(self.prompter.as_ref()).await?
        };
        self.ensure_running()?;
        check.progress(40.0, format!("Engine access: {}", engine.mode()));

        let engine_version = engine.server_version().await.map_err(BootstrapError::Engine)?;
        check.progress(70.0, format!("{} {} is running", engine.binary(), engine_version));

        let manifest = ImageManifest::load_from_seed_dir(&self.paths.seed_dir)?;
        let specs = manifest.specs(&self.paths.seed_dir);
        let staged = RuntimeDir::new(&self.paths.runtime_dir)
            .stage(
                &self.paths.resources_dir,
                &self.config.stack.compose_file,
                &self.config.stack.extra_files,
                &self.config.compose_env(&specs),
            )
            .map_err(BootstrapError::Workdir)?;
        if self.config.stack.services.is_empty() {
            self.stack.set_services(services_from_compose(&staged.compose_file)?);
        }
        check.progress(100.0, "Runtime directory ready");
        self.ensure_running()?;

        let sync = ImageSynchronizer::new(engine.clone(), pull_backend(&self.config, &engine), self.config.sync_settings());
        let seeded = sync.seed(&specs, &self.reporter(StartupStage::Seed)).await?;
        self.ensure_running()?;
        let images = sync.refresh(seeded, &self.reporter(StartupStage::Pull)).await?;
        self.ensure_running()?;

        self.stack.start(engine.clone(), &self.reporter(StartupStage::Compose)).await?;
        self.ensure_running()?;

        self.readiness.wait(&self.reporter(StartupStage::Health)).await?;
        self.ensure_running()?;

        let url = self.readiness.settings().frontend_url.clone();
        let elapsed = started.elapsed();
        tracing::info!(url = %url, elapsed_ms = elapsed.as_millis() as u64, "application ready");
        self.bus.publish(BootstrapEvent::Ready { url: url.clone() });

        Ok(StartupReport {
            access_mode: engine.mode().clone(),
            engine_version,
            images,
            url,
            elapsed,
        })
    }

    /// Clean up after a failed attempt, then report it.
    async fn fail(&self, error: &BootstrapError) {
        if self.gate.is_cancelled() {
            tracing::debug!(error = %error, "attempt ended during shutdown");
            return;
        }
        tracing::error!(error = %error, "startup failed");

        let outcome = self.stack.shutdown(self.config.hard_stop_timeout()).await;
        tracing::debug!(outcome = %outcome, "cleaned up after failed attempt");

        if self.gate.is_cancelled() {
            return;
        }
        let detail = error
            .process_output()
            .map(|(stdout, stderr)| format!("{}\n{}", stdout.trim(), stderr.trim()).trim().to_string())
            .filter(|d| !d.is_empty());
        self.bus.publish(BootstrapEvent::Fatal {
            message: error.to_string(),
            detail,
            cancelled: error.is_cancelled(),
        });
    }
}

/// Engine API pulls when the daemon socket is reachable without a helper,
/// CLI pulls otherwise.
pub fn pull_backend(config: &DeskConfig, engine: &Engine) -> Arc<dyn PullBackend> {
    let timeout = config.pull_timeout();
    let window = config.speed_window();
    if config.engine.use_api {
        let host = match engine.mode() {
            AccessMode::Direct => Some(None),
            AccessMode::AlternateContext { docker_host } if docker_host.starts_with("unix://") => {
                Some(Some(docker_host.as_str()))
            }
            _ => None,
        };
        if let Some(host) = host {
            match ApiPull::connect(host, timeout, window) {
                Ok(api) => return Arc::new(api),
                Err(e) => tracing::warn!(error = %e, "engine API unavailable; pulling through the CLI"),
            }
        }
    }
    Arc::new(CliPull::new(engine.clone(), timeout, window))
}
