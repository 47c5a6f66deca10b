//! Bridges password prompts from the negotiator to the presentation layer.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::access::{SecretPrompter, SecretResponse};
use crate::events::{BootstrapEvent, EventBus};

/// A pending password request. Dropping it without answering cancels.
#[derive(Debug)]
pub struct SecretRequest {
    pub attempt: u32,
    pub max_attempts: u32,
    respond: oneshot::Sender<SecretResponse>,
}

impl SecretRequest {
    pub fn respond(self, response: SecretResponse) {
        // The negotiator may have given up already.
        let _ = self.respond.send(response);
    }
}

/// [`SecretPrompter`] that publishes `SecretRequested` and waits for the UI
/// to answer on the paired receiver.
pub struct ChannelPrompter {
    bus: EventBus,
    requests: mpsc::Sender<SecretRequest>,
    cancel: CancellationToken,
}

/// Create a prompter and the receiver the UI answers from. Requests resolve
/// as cancelled once `cancel` fires or the receiver is dropped.
pub fn secret_channel(bus: EventBus, cancel: CancellationToken) -> (ChannelPrompter, mpsc::Receiver<SecretRequest>) {
    let (tx, rx) = mpsc::channel(1);
    (
        ChannelPrompter {
            bus,
            requests: tx,
            cancel,
        },
        rx,
    )
}

#[async_trait]
impl SecretPrompter for ChannelPrompter {
    async fn request_secret(&self, attempt: u32, max_attempts: u32) -> SecretResponse {
        if self.cancel.is_cancelled() {
            return SecretResponse::Cancelled;
        }
        let (tx, rx) = oneshot::channel();
        let request = SecretRequest {
            attempt,
            max_attempts,
            respond: tx,
        };
        if self.requests.send(request).await.is_err() {
            tracing::warn!("no one is listening for password requests");
            return SecretResponse::Cancelled;
        }
        self.bus.publish(BootstrapEvent::SecretRequested { attempt, max_attempts });

        tokio::select! {
            _ = self.cancel.cancelled() => SecretResponse::Cancelled,
            answer = rx => answer.unwrap_or(SecretResponse::Cancelled),
        }
    }
}
