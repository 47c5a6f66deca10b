//! Startup sequencing and shutdown for the desktop application.

pub mod orchestrator;
pub mod prompt;

pub use orchestrator::{BootstrapOrchestrator, StartupReport, pull_backend};
pub use prompt::{ChannelPrompter, SecretRequest, secret_channel};
