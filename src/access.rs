//! Privileged access negotiation.
//!
//! Finds an [`AccessMode`] under which the container engine answers with the
//! privilege the stack needs, prompting the user as rarely as possible:
//!
//! 1. the engine as-is
//! 2. an alternate daemon host (often the rootful system socket)
//! 3. a cached or freshly validated `sudo` session, kept alive in the background
//! 4. `pkexec` per command, also when the session route is refused or still rootless
//!
//! The decision is cached for the lifetime of the negotiator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, ProbeResult};
use crate::errors::NegotiationError;
use crate::process::{CommandRunner, CommandSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AccessMode {
    Direct,
    AlternateContext { docker_host: String },
    SessionElevated,
    PerCommandElevated,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Direct => write!(f, "direct"),
            AccessMode::AlternateContext { docker_host } => write!(f, "alternate context ({})", docker_host),
            AccessMode::SessionElevated => write!(f, "session-elevated"),
            AccessMode::PerCommandElevated => write!(f, "per-command-elevated"),
        }
    }
}

/// A password handed back by the presentation layer. Never printed.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub enum SecretResponse {
    Provided(Secret),
    Cancelled,
}

/// Asks the user for the elevation password.
#[async_trait]
pub trait SecretPrompter: Send + Sync {
    async fn request_secret(&self, attempt: u32, max_attempts: u32) -> SecretResponse;
}

#[derive(Debug, Clone)]
pub struct NegotiatorSettings {
    pub engine_binary: String,
    /// Daemon host tried before any elevation; `None` skips that step.
    pub docker_host: Option<String>,
    pub require_rootful: bool,
    pub session_helper: String,
    pub per_command_helper: String,
    pub max_secret_attempts: u32,
    pub keepalive_interval: Duration,
    pub command_timeout: Duration,
}

impl Default for NegotiatorSettings {
    fn default() -> Self {
        Self {
            engine_binary: "docker".to_string(),
            docker_host: Some("unix:///var/run/docker.sock".to_string()),
            require_rootful: true,
            session_helper: "sudo".to_string(),
            per_command_helper: "pkexec".to_string(),
            max_secret_attempts: 3,
            keepalive_interval: Duration::from_secs(60),
            command_timeout: Duration::from_secs(20),
        }
    }
}

/// Background refresh of a cached sudo grant. Cancelled on drop.
struct Keepalive {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.token.cancel();
        self.handle.abort();
    }
}

pub struct AccessNegotiator {
    runner: Arc<dyn CommandRunner>,
    settings: NegotiatorSettings,
    mode: Option<AccessMode>,
    keepalive: Option<Keepalive>,
}

impl AccessNegotiator {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: NegotiatorSettings) -> Self {
        Self {
            runner,
            settings,
            mode: None,
            keepalive: None,
        }
    }

    /// The cached decision, if negotiation already succeeded.
    pub fn mode(&self) -> Option<&AccessMode> {
        self.mode.as_ref()
    }

    pub fn has_keepalive(&self) -> bool {
        self.keepalive.is_some()
    }

    /// An engine handle for the cached mode.
    pub fn engine(&self) -> Option<Engine> {
        self.mode.clone().map(|mode| self.engine_for(mode))
    }

    fn engine_for(&self, mode: AccessMode) -> Engine {
        Engine::new(
            self.runner.clone(),
            &self.settings.engine_binary,
            mode,
            self.settings.command_timeout,
        )
    }

    /// Negotiate (or return the cached) access mode and an engine bound to it.
    pub async fn negotiate(&mut self, prompter: &dyn SecretPrompter) -> Result<Engine, NegotiationError> {
        if let Some(engine) = self.engine() {
            return Ok(engine);
        }

        let mode = self.find_mode(prompter).await?;
        tracing::info!(mode = %mode, "container engine access negotiated");
        self.mode = Some(mode.clone());
        Ok(self.engine_for(mode))
    }

    async fn find_mode(&mut self, prompter: &dyn SecretPrompter) -> Result<AccessMode, NegotiationError> {
        let require_rootful = self.settings.require_rootful;

        match self.engine_for(AccessMode::Direct).probe(require_rootful).await {
            ProbeResult::Satisfied => return Ok(AccessMode::Direct),
            ProbeResult::Rootless => tracing::info!("engine is rootless; looking for a privileged path"),
            ProbeResult::Unreachable(e) => tracing::info!(error = %e, "engine not reachable directly"),
        }

        if let Some(host) = self.settings.docker_host.clone() {
            let mode = AccessMode::AlternateContext { docker_host: host };
            match self.engine_for(mode.clone()).probe(require_rootful).await {
                ProbeResult::Satisfied => return Ok(mode),
                other => tracing::debug!(result = ?other, "alternate daemon host not usable"),
            }
        }

        let mut session_failure = None;
        if self.helper_available(&self.settings.session_helper).await {
            match self.negotiate_session(prompter).await {
                Ok(mode) => return Ok(mode),
                Err(NegotiationError::Cancelled) => return Err(NegotiationError::Cancelled),
                Err(e) => {
                    tracing::warn!(error = %e, "session elevation unusable; trying per-command elevation");
                    session_failure = Some(e);
                }
            }
        }

        if self.helper_available(&self.settings.per_command_helper).await {
            let mode = AccessMode::PerCommandElevated;
            match self.engine_for(mode.clone()).probe(require_rootful).await {
                ProbeResult::Satisfied => return Ok(mode),
                other => tracing::warn!(result = ?other, "per-command elevation did not reach the engine"),
            }
        }

        if let Some(e) = session_failure {
            return Err(e);
        }
        Err(NegotiationError::EscalationUnavailable {
            reason: format!(
                "neither {} nor {} could reach a privileged {} daemon",
                self.settings.session_helper, self.settings.per_command_helper, self.settings.engine_binary
            ),
        })
    }

    async fn negotiate_session(&mut self, prompter: &dyn SecretPrompter) -> Result<AccessMode, NegotiationError> {
        if self.validate_cached_session().await {
            tracing::info!("reusing cached elevation session");
        } else {
            let max = self.settings.max_secret_attempts;
            let mut validated = false;
            for attempt in 1..=max {
                let secret = match prompter.request_secret(attempt, max).await {
                    SecretResponse::Provided(secret) => secret,
                    SecretResponse::Cancelled => return Err(NegotiationError::Cancelled),
                };
                if self.validate_secret(&secret).await {
                    validated = true;
                    break;
                }
                tracing::warn!(attempt, max, "elevation password rejected");
            }
            if !validated {
                return Err(NegotiationError::SecretRejected { attempts: max });
            }
        }

        let mode = AccessMode::SessionElevated;
        match self.engine_for(mode.clone()).probe(self.settings.require_rootful).await {
            ProbeResult::Satisfied => {
                self.start_keepalive();
                Ok(mode)
            }
            ProbeResult::Rootless => Err(NegotiationError::EscalationUnavailable {
                reason: "engine still reports rootless under elevation".to_string(),
            }),
            ProbeResult::Unreachable(e) => Err(NegotiationError::ElevatedProbeFailed(e)),
        }
    }

    async fn helper_available(&self, helper: &str) -> bool {
        let spec = CommandSpec::new(helper)
            .arg("--version")
            .timeout(self.settings.command_timeout);
        self.runner.run(spec).await.is_ok()
    }

    async fn validate_cached_session(&self) -> bool {
        let spec = CommandSpec::new(&self.settings.session_helper)
            .args(["-n", "-v"])
            .timeout(self.settings.command_timeout);
        self.runner.run(spec).await.is_ok()
    }

    async fn validate_secret(&self, secret: &Secret) -> bool {
        let spec = CommandSpec::new(&self.settings.session_helper)
            .args(["-S", "-p", "", "-v"])
            .stdin(format!("{}\n", secret.expose()))
            .timeout(self.settings.command_timeout);
        self.runner.run(spec).await.is_ok()
    }

    fn start_keepalive(&mut self) {
        let runner = self.runner.clone();
        let helper = self.settings.session_helper.clone();
        let every = self.settings.keepalive_interval;
        let timeout = self.settings.command_timeout;
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        let spec = CommandSpec::new(&helper).args(["-n", "-v"]).timeout(timeout);
                        if let Err(e) = runner.run(spec).await {
                            tracing::warn!(error = %e, "elevation keepalive failed");
                        }
                    }
                }
            }
        });

        self.keepalive = Some(Keepalive { token, handle });
    }

    /// Stop the keepalive and invalidate the cached grant. The negotiated mode
    /// is forgotten so the next negotiation starts over.
    pub async fn release(&mut self) {
        self.keepalive = None;
        if self.mode == Some(AccessMode::SessionElevated) {
            let spec = CommandSpec::new(&self.settings.session_helper)
                .arg("-K")
                .timeout(self.settings.command_timeout);
            if let Err(e) = self.runner.run(spec).await {
                tracing::debug!(error = %e, "failed to invalidate elevation session");
            }
        }
        self.mode = None;
    }
}
