//! Compose stack lifecycle: start with live status polling, bounded shutdown.

pub mod controller;
pub mod status;

pub use controller::{StackController, StackSettings, StopOutcome, services_from_compose};
pub use status::{ServiceStatus, aggregate_progress, parse_status_listing, status_weight};
