//! Byte-level pull progress.
//!
//! Both pull backends translate whatever the transfer exposes into
//! [`LayerUpdate`]s and feed one [`TransferTracker`], which sums the per-layer
//! counters and derives speed from a short sliding window of samples.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::CreateImageInfo;
use bollard::query_parameters::CreateImageOptionsBuilder;
use futures_util::StreamExt;
use regex::Regex;

use crate::engine::Engine;
use crate::errors::SyncError;
use crate::events::TransferMetrics;
use crate::images::reference::split_reference;
use crate::process::LineCallback;

pub type TransferCallback = Arc<dyn Fn(TransferMetrics) + Send + Sync>;

/// `<layer>: <status> [====>   ] 12.3MB/45.6MB`
static PULL_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<id>[0-9a-f]{6,64}): (?P<status>[A-Za-z][A-Za-z ]*?)(?:\s+\[[^\]]*\])?(?:\s+(?P<cur>[\d.]+)\s*(?P<cur_unit>[kKMGT]?i?B)/(?P<tot>[\d.]+)\s*(?P<tot_unit>[kKMGT]?i?B))?\s*$",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub enum LayerUpdate {
    /// The layer is known but has not started downloading.
    Pending { id: String },
    Downloading { id: String, current: u64, total: u64 },
    /// Download finished (or the layer already existed locally).
    Done { id: String },
}

#[derive(Debug, Clone, Copy, Default)]
struct LayerBytes {
    current: u64,
    total: u64,
}

#[derive(Debug)]
pub struct TransferTracker {
    layers: HashMap<String, LayerBytes>,
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl TransferTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            layers: HashMap::new(),
            samples: VecDeque::new(),
            window,
        }
    }

    pub fn apply(&mut self, update: LayerUpdate, now: Instant) -> TransferMetrics {
        match update {
            LayerUpdate::Pending { id } => {
                self.layers.entry(id).or_default();
            }
            LayerUpdate::Downloading { id, current, total } => {
                let layer = self.layers.entry(id).or_default();
                layer.total = layer.total.max(total);
                layer.current = current;
            }
            LayerUpdate::Done { id } => {
                let layer = self.layers.entry(id).or_default();
                layer.current = layer.total.max(layer.current);
                layer.total = layer.current;
            }
        }
        self.sample(now)
    }

    fn sample(&mut self, now: Instant) -> TransferMetrics {
        let downloaded: u64 = self.layers.values().map(|l| l.current).sum();
        let total: u64 = self.layers.values().map(|l| l.total).sum();

        self.samples.push_back((now, downloaded));
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) > self.window && self.samples.len() > 1 {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let bytes_per_sec = match (self.samples.front(), self.samples.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if t1 > t0 => {
                b1.saturating_sub(b0) as f64 / t1.duration_since(t0).as_secs_f64()
            }
            _ => 0.0,
        };

        TransferMetrics {
            downloaded,
            total,
            bytes_per_sec,
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

/// Percentage of bytes downloaded; zero while the total is still unknown.
pub fn percent(metrics: &TransferMetrics) -> f64 {
    if metrics.total == 0 {
        0.0
    } else {
        (metrics.downloaded as f64 / metrics.total as f64 * 100.0).min(100.0)
    }
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit {
        "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" | "kiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let number: f64 = value.parse().ok()?;
    Some((number * unit_multiplier(unit)).round() as u64)
}

/// Parse one line of CLI pull output. Lines without a layer id are ignored.
pub fn parse_pull_line(line: &str) -> Option<LayerUpdate> {
    let caps = PULL_LINE_REGEX.captures(line.trim())?;
    let id = caps.name("id")?.as_str().to_string();
    let status = caps.name("status")?.as_str().trim();
    status_update(id, status, || {
        let current = parse_size(caps.name("cur")?.as_str(), caps.name("cur_unit")?.as_str())?;
        let total = parse_size(caps.name("tot")?.as_str(), caps.name("tot_unit")?.as_str())?;
        Some((current, total))
    })
}

fn status_update(
    id: String,
    status: &str,
    counters: impl FnOnce() -> Option<(u64, u64)>,
) -> Option<LayerUpdate> {
    match status {
        "Downloading" => {
            let (current, total) = counters()?;
            Some(LayerUpdate::Downloading { id, current, total })
        }
        "Download complete" | "Pull complete" | "Already exists" => Some(LayerUpdate::Done { id }),
        "Pulling fs layer" | "Waiting" => Some(LayerUpdate::Pending { id }),
        _ => None,
    }
}

/// Translate one Engine API pull record.
pub fn api_update(info: &CreateImageInfo) -> Option<LayerUpdate> {
    let id = info.id.clone()?;
    let status = info.status.as_deref()?;
    status_update(id, status, || {
        let detail = info.progress_detail.as_ref()?;
        let current = u64::try_from(detail.current?).ok()?;
        let total = u64::try_from(detail.total?).ok()?;
        Some((current, total))
    })
}

/// A way of pulling one image with byte progress.
#[async_trait]
pub trait PullBackend: Send + Sync {
    async fn pull(&self, reference: &str, on_progress: TransferCallback) -> Result<(), SyncError>;
}

fn tracking_sink(window: Duration, on_progress: TransferCallback) -> impl Fn(LayerUpdate) + Send + Sync {
    let tracker = Mutex::new(TransferTracker::new(window));
    move |update| {
        let metrics = match tracker.lock() {
            Ok(mut tracker) => tracker.apply(update, Instant::now()),
            Err(_) => return,
        };
        on_progress(metrics);
    }
}

/// Pulls through the engine CLI, parsing its progress lines.
pub struct CliPull {
    engine: Engine,
    timeout: Duration,
    window: Duration,
}

impl CliPull {
    pub fn new(engine: Engine, timeout: Duration, window: Duration) -> Self {
        Self {
            engine,
            timeout,
            window,
        }
    }
}

#[async_trait]
impl PullBackend for CliPull {
    async fn pull(&self, reference: &str, on_progress: TransferCallback) -> Result<(), SyncError> {
        let sink = tracking_sink(self.window, on_progress);
        let on_line: LineCallback = Arc::new(move |line: &str| {
            if let Some(update) = parse_pull_line(line) {
                sink(update);
            }
        });

        self.engine
            .pull(reference, self.timeout, on_line)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::PullFailed {
                reference: reference.to_string(),
                message: match e.stderr().map(str::trim).filter(|s| !s.is_empty()) {
                    Some(stderr) => format!("{}: {}", e, stderr),
                    None => e.to_string(),
                },
            })
    }
}

/// Pulls through the Engine API, which reports exact per-layer counters.
pub struct ApiPull {
    docker: Docker,
    timeout: Duration,
    window: Duration,
}

impl ApiPull {
    pub fn new(docker: Docker, timeout: Duration, window: Duration) -> Self {
        Self {
            docker,
            timeout,
            window,
        }
    }

    /// Connect to the daemon at `host` (a `unix://` URL) or the local default.
    pub fn connect(host: Option<&str>, timeout: Duration, window: Duration) -> Result<Self, bollard::errors::Error> {
        let docker = match host.and_then(|h| h.strip_prefix("unix://")) {
            Some(path) => Docker::connect_with_socket(path, timeout.as_secs().max(1), bollard::API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self::new(docker, timeout, window))
    }
}

#[async_trait]
impl PullBackend for ApiPull {
    async fn pull(&self, reference: &str, on_progress: TransferCallback) -> Result<(), SyncError> {
        let parts = split_reference(reference);
        let options = CreateImageOptionsBuilder::new()
            .from_image(parts.repository)
            .tag(parts.digest.or(parts.tag).unwrap_or("latest"))
            .build();
        let sink = tracking_sink(self.window, on_progress);
        let failed = |message: String| SyncError::PullFailed {
            reference: reference.to_string(),
            message,
        };

        let drive = async {
            let mut stream = Box::pin(self.docker.create_image(Some(options), None, None));
            while let Some(item) = stream.next().await {
                let info = item.map_err(|e| failed(e.to_string()))?;
                if let Some(update) = api_update(&info) {
                    sink(update);
                }
            }
            Ok(())
        };

        match tokio::time::timeout(self.timeout, drive).await {
            Ok(result) => result,
            Err(_) => Err(failed(format!("timed out after {}s", self.timeout.as_secs()))),
        }
    }
}
