//! Image synchronization: an offline seed pass, then a remote refresh pass.
//!
//! The seed pass never touches the network. The refresh pass compares the
//! remote manifest digest against the local repo digests before pulling, and
//! a digest match under either the remote reference or the local tag counts as
//! fresh. That tolerance is intentional: after a manual retag only one of the
//! two names may still carry the digest, and a stricter check would re-pull
//! images that are already current.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::engine::Engine;
use crate::errors::SyncError;
use crate::events::{StageReporter, TransferMetrics};
use crate::images::manifest::ImageSpec;
use crate::images::reference::{digests_match, resolve_pull_targets};
use crate::images::transfer::{PullBackend, TransferCallback, percent};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Abort on the first pull (or seed load) failure instead of warning.
    pub strict: bool,
    pub skip_pull: bool,
    pub pull_tag: String,
    pub load_timeout: Duration,
    pub verify_checksums: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            strict: false,
            skip_pull: false,
            pull_tag: "latest".to_string(),
            load_timeout: Duration::from_secs(600),
            verify_checksums: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecision {
    AlreadyCurrent,
    LoadedFromArchive,
    Pulled,
    PullFailedFallbackToLocal,
}

impl fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncDecision::AlreadyCurrent => "already current",
            SyncDecision::LoadedFromArchive => "loaded from archive",
            SyncDecision::Pulled => "pulled",
            SyncDecision::PullFailedFallbackToLocal => "pull failed, using local image",
        };
        f.write_str(text)
    }
}

/// What the seed pass left locally for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    /// Local id equals the manifest id; the refresh pass leaves it alone.
    Current,
    Loaded,
    /// Some other build is present under the local tag.
    Present,
    Missing,
}

#[derive(Debug, Clone)]
pub struct SeededImage {
    pub spec: ImageSpec,
    pub state: LocalState,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub local_reference: String,
    pub decision: SyncDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulled_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub images: Vec<ImageReport>,
}

impl SyncReport {
    pub fn decision_for(&self, local_reference: &str) -> Option<SyncDecision> {
        self.images
            .iter()
            .find(|r| r.local_reference == local_reference)
            .map(|r| r.decision)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.images.iter().filter_map(|r| r.warning.as_deref())
    }
}

pub struct ImageSynchronizer {
    engine: Engine,
    puller: Arc<dyn PullBackend>,
    settings: SyncSettings,
}

impl ImageSynchronizer {
    pub fn new(engine: Engine, puller: Arc<dyn PullBackend>, settings: SyncSettings) -> Self {
        Self {
            engine,
            puller,
            settings,
        }
    }

    /// Both passes back to back, for callers that do not split stages.
    pub async fn synchronize(
        &self,
        specs: &[ImageSpec],
        seed_reporter: &StageReporter,
        pull_reporter: &StageReporter,
    ) -> Result<SyncReport, SyncError> {
        let seeded = self.seed(specs, seed_reporter).await?;
        self.refresh(seeded, pull_reporter).await
    }

    /// Make every image available locally from its offline archive, if needed.
    pub async fn seed(&self, specs: &[ImageSpec], reporter: &StageReporter) -> Result<Vec<SeededImage>, SyncError> {
        let total = specs.len().max(1) as f64;
        let mut seeded = Vec::with_capacity(specs.len());

        for (i, spec) in specs.iter().enumerate() {
            reporter.progress(i as f64 / total * 100.0, format!("Checking {}", spec.local_reference));
            let local_id = self.engine.image_id(&spec.local_reference).await;

            if local_id.as_deref() == Some(spec.expected_local_id.as_str()) {
                tracing::info!(image = %spec.local_reference, "image already current");
                seeded.push(SeededImage {
                    spec: spec.clone(),
                    state: LocalState::Current,
                    warning: None,
                });
                continue;
            }

            // The seeded build may already be loaded under another name.
            if self.holds_expected(spec).await {
                match self.retag(&spec.expected_local_id, &spec.local_reference).await {
                    Ok(()) => {
                        tracing::info!(image = %spec.local_reference, "re-tagged previously loaded seed image");
                        seeded.push(SeededImage {
                            spec: spec.clone(),
                            state: LocalState::Current,
                            warning: None,
                        });
                        continue;
                    }
                    Err(e) => tracing::warn!(image = %spec.local_reference, error = %e, "failed to re-tag seed image"),
                }
            }

            let held = if local_id.is_some() {
                LocalState::Present
            } else {
                LocalState::Missing
            };
            let archive = spec.archive_path.as_deref().filter(|p| p.is_file());
            let (state, warning) = match archive {
                None => (held, None),
                Some(archive) => {
                    reporter.progress(
                        (i as f64 + 0.5) / total * 100.0,
                        format!("Loading {} from offline seed", spec.local_reference),
                    );
                    match self.load_archive(spec, archive).await {
                        Ok(()) => (LocalState::Loaded, None),
                        Err(e) if self.settings.strict => return Err(e),
                        Err(e) => {
                            let warning = e.to_string();
                            reporter.warn(warning.clone());
                            (held, Some(warning))
                        }
                    }
                }
            };

            seeded.push(SeededImage {
                spec: spec.clone(),
                state,
                warning,
            });
        }

        reporter.progress(100.0, "Offline seed checked");
        Ok(seeded)
    }

    async fn holds_expected(&self, spec: &ImageSpec) -> bool {
        if spec.expected_local_id.is_empty() {
            return false;
        }
        self.engine.image_id(&spec.expected_local_id).await.as_deref() == Some(spec.expected_local_id.as_str())
    }

    async fn load_archive(&self, spec: &ImageSpec, archive: &Path) -> Result<(), SyncError> {
        if self.settings.verify_checksums
            && let Some(expected) = spec.archive_sha256.as_deref()
        {
            let actual = file_sha256(archive).await?;
            let expected = expected.trim_start_matches("sha256:");
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(SyncError::ChecksumMismatch {
                    path: archive.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        self.engine
            .load(archive, self.settings.load_timeout)
            .await
            .map_err(|source| SyncError::LoadFailed {
                path: archive.to_path_buf(),
                source,
            })?;
        tracing::info!(image = %spec.local_reference, archive = %archive.display(), "loaded seed archive");
        Ok(())
    }

    /// Pull images whose remote digest differs from what is held locally.
    pub async fn refresh(&self, seeded: Vec<SeededImage>, reporter: &StageReporter) -> Result<SyncReport, SyncError> {
        let total = seeded.len().max(1) as f64;
        let mut report = SyncReport::default();

        for (i, image) in seeded.into_iter().enumerate() {
            let base = i as f64 / total * 100.0;
            let slice = 100.0 / total;
            reporter.progress(base, format!("Checking {} for updates", image.spec.local_reference));

            let result = self.refresh_one(&image, reporter, base, slice).await;
            let entry = match result {
                Ok((decision, pulled_from)) => ImageReport {
                    local_reference: image.spec.local_reference.clone(),
                    decision,
                    pulled_from,
                    warning: image.warning.clone(),
                },
                Err(e) if self.settings.strict => return Err(e),
                Err(e) => {
                    let mut warning = e.to_string();
                    if image.state == LocalState::Missing {
                        warning.push_str("; no local copy is available");
                    }
                    reporter.warn(warning.clone());
                    ImageReport {
                        local_reference: image.spec.local_reference.clone(),
                        decision: SyncDecision::PullFailedFallbackToLocal,
                        pulled_from: None,
                        warning: Some(warning),
                    }
                }
            };
            tracing::info!(image = %entry.local_reference, decision = %entry.decision, "image synchronized");
            report.images.push(entry);
        }

        reporter.progress(100.0, "Images up to date");
        Ok(report)
    }

    async fn refresh_one(
        &self,
        image: &SeededImage,
        reporter: &StageReporter,
        base: f64,
        slice: f64,
    ) -> Result<(SyncDecision, Option<String>), SyncError> {
        let spec = &image.spec;
        let kept = match image.state {
            LocalState::Loaded => SyncDecision::LoadedFromArchive,
            _ => SyncDecision::AlreadyCurrent,
        };

        if image.state == LocalState::Current {
            return Ok((SyncDecision::AlreadyCurrent, None));
        }
        if self.settings.skip_pull {
            if image.state == LocalState::Missing {
                return Err(SyncError::PullFailed {
                    reference: spec.remote_reference.clone(),
                    message: "pulls are disabled".to_string(),
                });
            }
            return Ok((kept, None));
        }

        let targets = resolve_pull_targets(
            &spec.remote_reference,
            spec.remote_fallback_reference.as_deref(),
            &self.settings.pull_tag,
        );

        match self.engine.remote_digest(&targets.primary).await {
            Ok(Some(digest)) => {
                let remote_cached = self.engine.repo_digests(&targets.primary).await;
                let local_cached = self.engine.repo_digests(&spec.local_reference).await;
                if digests_match(&local_cached, &digest) {
                    return Ok((kept, None));
                }
                if digests_match(&remote_cached, &digest) {
                    // Current under the remote name only; point the local tag at it.
                    self.retag(&targets.primary, &spec.local_reference).await?;
                    return Ok((kept, None));
                }
                tracing::info!(image = %spec.local_reference, remote = %digest, "remote image changed");
            }
            Ok(None) => tracing::debug!(reference = %targets.primary, "remote digest not reported; pulling"),
            Err(e) => tracing::debug!(reference = %targets.primary, error = %e, "remote digest unknown; pulling"),
        }

        let progress: TransferCallback = {
            let reporter = reporter.clone();
            let name = spec.local_reference.clone();
            Arc::new(move |metrics: TransferMetrics| {
                reporter.transfer(base + slice * percent(&metrics) / 100.0, format!("Pulling {}", name), metrics);
            })
        };

        let pulled_from = match self.puller.pull(&targets.primary, progress.clone()).await {
            Ok(()) => targets.primary,
            Err(primary_err) => match targets.fallback {
                Some(fallback) => {
                    tracing::warn!(error = %primary_err, fallback = %fallback, "pull failed; trying pinned reference");
                    self.puller.pull(&fallback, progress).await?;
                    fallback
                }
                None => return Err(primary_err),
            },
        };

        self.retag(&pulled_from, &spec.local_reference).await?;
        Ok((SyncDecision::Pulled, Some(pulled_from)))
    }

    async fn retag(&self, source: &str, target: &str) -> Result<(), SyncError> {
        if source == target {
            return Ok(());
        }
        self.engine
            .tag(source, target)
            .await
            .map_err(|e| SyncError::TagFailed {
                source_ref: source.to_string(),
                target: target.to_string(),
                source: e,
            })
    }
}

async fn file_sha256(path: &Path) -> Result<String, SyncError> {
    let path = path.to_path_buf();
    let io_err = |path: &Path, source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    };
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&task_path).map_err(|e| io_err(&task_path, e))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher).map_err(|e| io_err(&task_path, e))?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| io_err(&path, std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessMode;
    use crate::events::{BootstrapEvent, EventBus, StartupStage};
    use crate::images::transfer::CliPull;
    use crate::testing::{Reply, ScriptedRunner};
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    const ID: &str = "sha256:1111";
    const REMOTE_DIGEST: &str = "sha256:feed";

    fn manifest_output(digest: &str) -> String {
        format!(r#"{{"Descriptor":{{"digest":"{}"}}}}"#, digest)
    }

    fn spec(archive: Option<PathBuf>) -> ImageSpec {
        ImageSpec {
            local_reference: "un1ca-api:local".into(),
            remote_reference: "ghcr.io/un1ca/api:2024.06".into(),
            remote_fallback_reference: Some("ghcr.io/un1ca/api:latest".into()),
            expected_local_id: ID.into(),
            archive_path: archive,
            archive_sha256: None,
            size: None,
        }
    }

    fn synchronizer(runner: &ScriptedRunner, settings: SyncSettings) -> ImageSynchronizer {
        let engine = Engine::new(Arc::new(runner.clone()), "docker", AccessMode::Direct, Duration::from_secs(5));
        let puller = Arc::new(CliPull::new(engine.clone(), Duration::from_secs(60), Duration::from_secs(2)));
        ImageSynchronizer::new(engine, puller, settings)
    }

    fn quiet() -> (StageReporter, StageReporter) {
        (
            StageReporter::detached(StartupStage::Seed),
            StageReporter::detached(StartupStage::Pull),
        )
    }

    fn archive_in(dir: &Path) -> PathBuf {
        let path = dir.join("api.tar");
        std::fs::write(&path, b"not really a tarball").unwrap();
        path
    }

    #[tokio::test]
    async fn test_current_image_makes_no_network_calls() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}}", &format!("{}\n", ID));
        let (seed, pull) = quiet();

        let report = synchronizer(&runner, SyncSettings::default())
            .synchronize(&[spec(Some(archive_in(dir.path())))], &seed, &pull)
            .await
            .unwrap();

        assert_eq!(report.decision_for("un1ca-api:local"), Some(SyncDecision::AlreadyCurrent));
        assert_eq!(runner.count("docker load"), 0);
        assert_eq!(runner.count("docker manifest"), 0);
        assert_eq!(runner.count("docker pull"), 0);
    }

    #[tokio::test]
    async fn test_missing_image_loads_archive_then_skips_pull_on_digest_match() {
        let dir = tempfile::tempdir().unwrap();
        let archive = archive_in(dir.path());
        let runner = ScriptedRunner::new();
        runner.fail("docker image inspect --format {{.Id}}", "No such image");
        runner.ok("docker load -i", "Loaded image: un1ca-api:local\n");
        runner.ok("docker manifest inspect", &manifest_output(REMOTE_DIGEST));
        runner.on(
            "docker image inspect --format {{json .RepoDigests}} ghcr.io/un1ca/api:latest",
            vec![Reply::Fail("No such image".into())],
        );
        runner.ok(
            "docker image inspect --format {{json .RepoDigests}} un1ca-api:local",
            &format!("[\"ghcr.io/un1ca/api@{}\"]", REMOTE_DIGEST),
        );
        let (seed, pull) = quiet();

        let report = synchronizer(&runner, SyncSettings::default())
            .synchronize(&[spec(Some(archive.clone()))], &seed, &pull)
            .await
            .unwrap();

        assert_eq!(report.decision_for("un1ca-api:local"), Some(SyncDecision::LoadedFromArchive));
        assert!(runner.lines().contains(&format!("docker load -i {}", archive.display())));
        assert_eq!(runner.count("docker pull"), 0);
    }

    #[tokio::test]
    async fn test_digest_match_under_remote_name_counts_as_fresh() {
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}}", "sha256:older\n");
        runner.ok("docker manifest inspect", &manifest_output(REMOTE_DIGEST));
        runner.ok(
            "docker image inspect --format {{json .RepoDigests}} ghcr.io/un1ca/api:latest",
            &format!("[\"ghcr.io/un1ca/api@{}\"]", REMOTE_DIGEST),
        );
        runner.ok("docker image inspect --format {{json .RepoDigests}} un1ca-api:local", "[]");
        runner.ok("docker tag", "");
        let (seed, pull) = quiet();

        let report = synchronizer(&runner, SyncSettings::default())
            .synchronize(&[spec(None)], &seed, &pull)
            .await
            .unwrap();

        assert_eq!(report.decision_for("un1ca-api:local"), Some(SyncDecision::AlreadyCurrent));
        assert_eq!(runner.count("docker pull"), 0);
        // The local tag still held the older build, so it is moved onto the current one.
        assert!(
            runner
                .lines()
                .contains(&"docker tag ghcr.io/un1ca/api:latest un1ca-api:local".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_retag_under_remote_name_is_a_warning() {
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}}", "sha256:older\n");
        runner.ok("docker manifest inspect", &manifest_output(REMOTE_DIGEST));
        runner.ok(
            "docker image inspect --format {{json .RepoDigests}} ghcr.io/un1ca/api:latest",
            &format!("[\"ghcr.io/un1ca/api@{}\"]", REMOTE_DIGEST),
        );
        runner.ok("docker image inspect --format {{json .RepoDigests}} un1ca-api:local", "[]");
        runner.fail("docker tag", "permission denied");
        let (seed, pull) = quiet();

        let report = synchronizer(&runner, SyncSettings::default())
            .synchronize(&[spec(None)], &seed, &pull)
            .await
            .unwrap();

        assert_eq!(
            report.decision_for("un1ca-api:local"),
            Some(SyncDecision::PullFailedFallbackToLocal)
        );
        assert_eq!(runner.count("docker pull"), 0);
    }

    #[tokio::test]
    async fn test_newer_seed_replaces_older_build_under_local_tag() {
        let dir = tempfile::tempdir().unwrap();
        let archive = archive_in(dir.path());
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}} un1ca-api:local", "sha256:old\n");
        runner.fail(&format!("docker image inspect --format {{{{.Id}}}} {}", ID), "No such image");
        runner.ok("docker load -i", "Loaded image: un1ca-api:local\n");
        let (seed, _) = quiet();

        let seeded = synchronizer(&runner, SyncSettings::default())
            .seed(&[spec(Some(archive.clone()))], &seed)
            .await
            .unwrap();

        assert_eq!(seeded[0].state, LocalState::Loaded);
        assert!(runner.lines().contains(&format!("docker load -i {}", archive.display())));
    }

    #[tokio::test]
    async fn test_newer_seed_is_loaded_even_when_registry_is_offline() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}} un1ca-api:local", "sha256:old\n");
        runner.fail(&format!("docker image inspect --format {{{{.Id}}}} {}", ID), "No such image");
        runner.ok("docker load -i", "");
        runner.fail("docker manifest inspect", "network unreachable");
        runner.fail("docker pull", "dial tcp: lookup ghcr.io: no such host");
        let (seed, pull) = quiet();

        let report = synchronizer(&runner, SyncSettings::default())
            .synchronize(&[spec(Some(archive_in(dir.path())))], &seed, &pull)
            .await
            .unwrap();

        assert_eq!(runner.count("docker load"), 1);
        assert_eq!(
            report.decision_for("un1ca-api:local"),
            Some(SyncDecision::PullFailedFallbackToLocal)
        );
    }

    #[tokio::test]
    async fn test_seed_already_loaded_under_other_name_is_retagged() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}} un1ca-api:local", "sha256:old\n");
        runner.ok(&format!("docker image inspect --format {{{{.Id}}}} {}", ID), &format!("{}\n", ID));
        runner.ok("docker tag", "");
        let (seed, _) = quiet();

        let seeded = synchronizer(&runner, SyncSettings::default())
            .seed(&[spec(Some(archive_in(dir.path())))], &seed)
            .await
            .unwrap();

        assert_eq!(seeded[0].state, LocalState::Current);
        assert_eq!(runner.count("docker load"), 0);
        assert!(runner.lines().contains(&format!("docker tag {} un1ca-api:local", ID)));
    }

    #[tokio::test]
    async fn test_pull_failure_falls_back_to_local_when_not_strict() {
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}}", "sha256:older\n");
        runner.fail("docker manifest inspect", "network unreachable");
        runner.fail("docker pull", "dial tcp: lookup ghcr.io: no such host");
        let (seed, pull) = quiet();

        let report = synchronizer(&runner, SyncSettings::default())
            .synchronize(&[spec(None)], &seed, &pull)
            .await
            .unwrap();

        let entry = &report.images[0];
        assert_eq!(entry.decision, SyncDecision::PullFailedFallbackToLocal);
        assert!(entry.warning.as_deref().unwrap().contains("ghcr.io/un1ca/api:2024.06"));
        // Primary target first, then the pinned fallback.
        let pulls: Vec<_> = runner.lines().into_iter().filter(|l| l.starts_with("docker pull")).collect();
        assert_eq!(
            pulls,
            vec!["docker pull ghcr.io/un1ca/api:latest", "docker pull ghcr.io/un1ca/api:2024.06"]
        );
    }

    #[tokio::test]
    async fn test_strict_mode_aborts_on_pull_failure() {
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}}", "sha256:older\n");
        runner.fail("docker manifest inspect", "network unreachable");
        runner.fail("docker pull", "denied");
        let (seed, pull) = quiet();
        let settings = SyncSettings {
            strict: true,
            ..Default::default()
        };

        let err = synchronizer(&runner, settings)
            .synchronize(&[spec(None)], &seed, &pull)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::PullFailed { .. }));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_later_images() {
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}}", "sha256:older\n");
        runner.fail("docker manifest inspect", "offline");
        runner.fail("docker pull ghcr.io/un1ca/api", "denied");
        runner.ok("docker pull ghcr.io/un1ca/web:latest", "");
        runner.ok("docker tag", "");
        let (seed, pull) = quiet();
        let web = ImageSpec {
            local_reference: "un1ca-web:local".into(),
            remote_reference: "ghcr.io/un1ca/web:2024.06".into(),
            remote_fallback_reference: Some("ghcr.io/un1ca/web:latest".into()),
            ..spec(None)
        };

        let report = synchronizer(&runner, SyncSettings::default())
            .synchronize(&[spec(None), web], &seed, &pull)
            .await
            .unwrap();

        assert_eq!(
            report.decision_for("un1ca-api:local"),
            Some(SyncDecision::PullFailedFallbackToLocal)
        );
        assert_eq!(report.decision_for("un1ca-web:local"), Some(SyncDecision::Pulled));
        assert!(
            runner
                .lines()
                .contains(&"docker tag ghcr.io/un1ca/web:latest un1ca-web:local".to_string())
        );
    }

    #[tokio::test]
    async fn test_pull_reports_byte_progress_in_pull_stage() {
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}}", "sha256:older\n");
        runner.ok("docker manifest inspect", &manifest_output(REMOTE_DIGEST));
        runner.ok("docker image inspect --format {{json .RepoDigests}}", "[]");
        runner.on(
            "docker pull",
            vec![Reply::Stream(vec![
                "latest: Pulling from un1ca/api".into(),
                "a3ed95caeb02: Downloading  5MB/10MB".into(),
                "a3ed95caeb02: Download complete".into(),
            ])],
        );
        runner.ok("docker tag", "");
        let bus = EventBus::new(64, 64);
        let mut rx = bus.subscribe();
        let gate = CancellationToken::new();
        let seed = StageReporter::new(bus.clone(), StartupStage::Seed, gate.clone());
        let pull = StageReporter::new(bus.clone(), StartupStage::Pull, gate);

        let report = synchronizer(&runner, SyncSettings::default())
            .synchronize(&[spec(None)], &seed, &pull)
            .await
            .unwrap();
        assert_eq!(report.decision_for("un1ca-api:local"), Some(SyncDecision::Pulled));

        let mut transfers = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BootstrapEvent::Progress(p) = event
                && let Some(metrics) = p.metrics
            {
                assert_eq!(p.stage, StartupStage::Pull);
                transfers.push((p.stage_progress, metrics));
            }
        }
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].0, 50.0);
        assert_eq!(transfers[0].1.downloaded, 5_000_000);
        assert_eq!(transfers[1].1.downloaded, 10_000_000);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_warning_when_not_strict() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner.fail("docker image inspect --format {{.Id}}", "No such image");
        let (seed, _) = quiet();
        let mut image = spec(Some(archive_in(dir.path())));
        image.archive_sha256 = Some("0000".into());

        let seeded = synchronizer(&runner, SyncSettings::default())
            .seed(&[image], &seed)
            .await
            .unwrap();

        assert_eq!(seeded[0].state, LocalState::Missing);
        assert!(seeded[0].warning.as_deref().unwrap().contains("checksum mismatch"));
        assert_eq!(runner.count("docker load"), 0);
    }

    #[tokio::test]
    async fn test_checksum_match_loads_archive() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner.fail("docker image inspect --format {{.Id}}", "No such image");
        runner.ok("docker load", "");
        let (seed, _) = quiet();
        let archive = archive_in(dir.path());
        let mut image = spec(Some(archive.clone()));
        image.archive_sha256 = Some(format!("sha256:{:x}", Sha256::digest(b"not really a tarball")));

        let seeded = synchronizer(&runner, SyncSettings::default())
            .seed(&[image], &seed)
            .await
            .unwrap();

        assert_eq!(seeded[0].state, LocalState::Loaded);
    }

    #[tokio::test]
    async fn test_skip_pull_never_contacts_registry() {
        let runner = ScriptedRunner::new();
        runner.ok("docker image inspect --format {{.Id}}", "sha256:older\n");
        let (seed, pull) = quiet();
        let settings = SyncSettings {
            skip_pull: true,
            ..Default::default()
        };

        let report = synchronizer(&runner, settings)
            .synchronize(&[spec(None)], &seed, &pull)
            .await
            .unwrap();

        assert_eq!(report.decision_for("un1ca-api:local"), Some(SyncDecision::AlreadyCurrent));
        assert_eq!(runner.count("docker manifest"), 0);
        assert_eq!(runner.count("docker pull"), 0);
    }
}
