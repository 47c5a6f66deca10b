//! Progress and lifecycle events published to the presentation layer.
//!
//! The orchestrator owns one [`EventBus`]. Components never see the bus
//! directly; they receive a [`StageReporter`] bound to their stage, which maps
//! stage-local percentages onto the overall 0–100 scale and drops everything
//! once shutdown has been requested.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Ordered startup stages, each owning a fixed slice of the overall progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupStage {
    Check,
    Seed,
    Pull,
    Compose,
    Health,
}

impl StartupStage {
    pub const ALL: [StartupStage; 5] = [
        StartupStage::Check,
        StartupStage::Seed,
        StartupStage::Pull,
        StartupStage::Compose,
        StartupStage::Health,
    ];

    /// Sub-range of the 0–100 aggregate reserved for this stage.
    pub fn range(self) -> (f64, f64) {
        match self {
            StartupStage::Check => (0.0, 5.0),
            StartupStage::Seed => (5.0, 25.0),
            StartupStage::Pull => (25.0, 60.0),
            StartupStage::Compose => (60.0, 90.0),
            StartupStage::Health => (90.0, 100.0),
        }
    }

    /// Map a stage-local percentage into the aggregate scale.
    pub fn aggregate(self, stage_progress: f64) -> f64 {
        let (start, end) = self.range();
        let clamped = stage_progress.clamp(0.0, 100.0);
        start + (end - start) * clamped / 100.0
    }

    pub fn label(self) -> &'static str {
        match self {
            StartupStage::Check => "check",
            StartupStage::Seed => "seed",
            StartupStage::Pull => "pull",
            StartupStage::Compose => "compose",
            StartupStage::Health => "health",
        }
    }
}

impl std::fmt::Display for StartupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Byte-level transfer figures for an image pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferMetrics {
    pub downloaded: u64,
    pub total: u64,
    pub bytes_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: StartupStage,
    pub stage_progress: f64,
    pub aggregate_progress: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TransferMetrics>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BootstrapEvent {
    Progress(ProgressEvent),
    Warning {
        stage: Option<StartupStage>,
        message: String,
    },
    /// The presentation layer must answer through the pending `SecretRequest`.
    SecretRequested {
        attempt: u32,
        max_attempts: u32,
    },
    Fatal {
        message: String,
        detail: Option<String>,
        cancelled: bool,
    },
    Ready {
        url: String,
    },
    ShutdownStarted,
    ShutdownFinished {
        outcome: String,
    },
}

impl BootstrapEvent {
    /// One-line rendering kept in the log tail.
    pub fn summary(&self) -> String {
        match self {
            BootstrapEvent::Progress(p) => {
                format!("[{} {:>3.0}%] {}", p.stage, p.aggregate_progress, p.message)
            }
            BootstrapEvent::Warning { stage, message } => match stage {
                Some(stage) => format!("[{}] warning: {}", stage, message),
                None => format!("warning: {}", message),
            },
            BootstrapEvent::SecretRequested {
                attempt,
                max_attempts,
            } => format!("password requested ({}/{})", attempt, max_attempts),
            BootstrapEvent::Fatal { message, .. } => format!("startup failed: {}", message),
            BootstrapEvent::Ready { url } => format!("ready at {}", url),
            BootstrapEvent::ShutdownStarted => "shutdown started".to_string(),
            BootstrapEvent::ShutdownFinished { outcome } => format!("shutdown finished: {}", outcome),
        }
    }
}

/// Most-recent-N log of event summaries; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct LogTail {
    entries: VecDeque<String>,
    capacity: usize,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Broadcast stream of [`BootstrapEvent`]s plus a bounded tail and the last
/// progress snapshot. Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BootstrapEvent>,
    tail: Arc<Mutex<LogTail>>,
    last_progress: Arc<Mutex<Option<ProgressEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize, tail_len: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            tail: Arc::new(Mutex::new(LogTail::new(tail_len))),
            last_progress: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BootstrapEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: BootstrapEvent) {
        if let Ok(mut tail) = self.tail.lock() {
            tail.push(event.summary());
        }
        if let BootstrapEvent::Progress(ref p) = event
            && let Ok(mut last) = self.last_progress.lock()
        {
            *last = Some(p.clone());
        }
        // No receivers is fine; the tail still records the event.
        let _ = self.tx.send(event);
    }

    pub fn tail(&self) -> Vec<String> {
        self.tail.lock().map(|t| t.entries()).unwrap_or_default()
    }

    pub fn last_progress(&self) -> Option<ProgressEvent> {
        self.last_progress.lock().ok().and_then(|p| p.clone())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

/// Stage-bound publishing handle given to components.
#[derive(Clone)]
pub struct StageReporter {
    bus: Option<EventBus>,
    stage: StartupStage,
    gate: CancellationToken,
}

impl StageReporter {
    pub fn new(bus: EventBus, stage: StartupStage, gate: CancellationToken) -> Self {
        Self {
            bus: Some(bus),
            stage,
            gate,
        }
    }

    /// A reporter that only logs; used by standalone CLI commands.
    pub fn detached(stage: StartupStage) -> Self {
        Self {
            bus: None,
            stage,
            gate: CancellationToken::new(),
        }
    }

    pub fn stage(&self) -> StartupStage {
        self.stage
    }

    pub fn progress(&self, stage_progress: f64, message: impl Into<String>) {
        self.emit(stage_progress, message.into(), None);
    }

    pub fn transfer(&self, stage_progress: f64, message: impl Into<String>, metrics: TransferMetrics) {
        self.emit(stage_progress, message.into(), Some(metrics));
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(stage = %self.stage, "{}", message);
        if self.gate.is_cancelled() {
            return;
        }
        if let Some(ref bus) = self.bus {
            bus.publish(BootstrapEvent::Warning {
                stage: Some(self.stage),
                message,
            });
        }
    }

    fn emit(&self, stage_progress: f64, message: String, metrics: Option<TransferMetrics>) {
        if self.gate.is_cancelled() {
            return;
        }
        let stage_progress = stage_progress.clamp(0.0, 100.0);
        tracing::debug!(stage = %self.stage, progress = stage_progress, "{}", message);
        if let Some(ref bus) = self.bus {
            bus.publish(BootstrapEvent::Progress(ProgressEvent {
                stage: self.stage,
                stage_progress,
                aggregate_progress: self.stage.aggregate(stage_progress),
                message,
                metrics,
                at: Utc::now(),
            }));
        }
    }
}
