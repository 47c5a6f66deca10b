//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `up`      | `Up`             |
//! | `down`    | `Down`           |
//! | `images`  | `Images`         |
//! | `status`  | `Status`         |
//! | `config`  | `Config`         |

pub mod config;
pub mod down;
pub mod images;
pub mod status;
pub mod up;

pub use config::cmd_config;
pub use down::cmd_down;
pub use images::cmd_images;
pub use status::cmd_status;
pub use up::cmd_up;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use un1ca_desk::access::{AccessNegotiator, Secret, SecretPrompter, SecretResponse};
use un1ca_desk::config::{DeskConfig, ResolvedPaths, default_app_dir};
use un1ca_desk::engine::Engine;
use un1ca_desk::process::SystemRunner;

use super::Cli;

/// Configuration resolved for one invocation.
pub struct DeskContext {
    pub config: DeskConfig,
    pub paths: ResolvedPaths,
    pub config_file: PathBuf,
    /// Ignored environment overrides, reported once logging is up.
    pub warnings: Vec<String>,
}

/// Layer `desk.toml`, the app directory's `.env`, `UN1CA_*` variables and CLI flags.
pub fn load_context(cli: &Cli) -> Result<DeskContext> {
    let app_dir = match cli.app_dir.clone() {
        Some(dir) => dir,
        None => default_app_dir()?,
    };
    let env_file = app_dir.join(".env");
    if env_file.is_file()
        && let Err(e) = dotenvy::from_path(&env_file)
    {
        eprintln!("Warning: failed to read {}: {}", env_file.display(), e);
    }

    let mut config = DeskConfig::load_or_default(&app_dir)?;
    let warnings = config.apply_env();

    if cli.strict_pull {
        config.images.strict = true;
    }
    if cli.skip_pull {
        config.images.skip_pull = true;
    }
    if let Some(tag) = &cli.pull_tag {
        config.images.pull_tag = tag.clone();
    }

    Ok(DeskContext {
        paths: config.resolve_paths(&app_dir),
        config_file: app_dir.join(un1ca_desk::config::CONFIG_FILE),
        config,
        warnings,
    })
}

/// Asks for the administrator password on the terminal.
pub struct TerminalPrompter;

#[async_trait]
impl SecretPrompter for TerminalPrompter {
    async fn request_secret(&self, attempt: u32, max_attempts: u32) -> SecretResponse {
        let answer = tokio::task::spawn_blocking(move || read_password(attempt, max_attempts)).await;
        match answer {
            Ok(Some(password)) => SecretResponse::Provided(Secret::new(password)),
            _ => SecretResponse::Cancelled,
        }
    }
}

/// Blocking password prompt; `None` when the user aborts or there is no terminal.
pub fn read_password(attempt: u32, max_attempts: u32) -> Option<String> {
    let prompt = if attempt > 1 {
        format!("Password incorrect. Administrator password ({}/{})", attempt, max_attempts)
    } else {
        "Administrator password (needed to manage containers)".to_string()
    };
    dialoguer::Password::new().with_prompt(prompt).interact().ok()
}

/// Negotiate engine access on the terminal for one-shot commands.
pub async fn negotiate(ctx: &DeskContext) -> Result<(AccessNegotiator, Engine)> {
    let runner = std::sync::Arc::new(SystemRunner::new());
    let mut negotiator = AccessNegotiator::new(runner, ctx.config.negotiator_settings());
    let engine = negotiator.negotiate(&TerminalPrompter).await?;
    Ok((negotiator, engine))
}

/// Expected services: configured, or those in the staged compose file.
pub fn expected_services(ctx: &DeskContext) -> Vec<String> {
    if !ctx.config.stack.services.is_empty() {
        return ctx.config.stack.services.clone();
    }
    let compose = ctx.paths.runtime_dir.join(&ctx.config.stack.compose_file);
    match un1ca_desk::stack::services_from_compose(&compose) {
        Ok(services) => services,
        Err(e) => {
            tracing::debug!(error = %e, "no staged compose file");
            Vec::new()
        }
    }
}
