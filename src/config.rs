//! Configuration for the desktop controller, read from `desk.toml`.
//!
//! Layered: file → environment (`UN1CA_*`, with `.env` loaded first) → CLI.
//! Every field has a default, so a missing file is a valid configuration.
//!
//! ```toml
//! [engine]
//! binary = "docker"
//! docker_host = "unix:///var/run/docker.sock"
//! require_rootful = true
//!
//! [stack]
//! project = "un1ca"
//! compose_file = "docker-compose.yml"
//!
//! [images]
//! strict = false
//! pull_tag = "latest"
//!
//! [timeouts]
//! compose_up_secs = 600
//! hard_stop_secs = 90
//!
//! [readiness]
//! backend_url = "http://127.0.0.1:8000/api/v1/healthz"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::access::NegotiatorSettings;
use crate::images::{ImageSpec, SyncSettings};
use crate::readiness::ReadinessSettings;
use crate::stack::StackSettings;

pub const CONFIG_FILE: &str = "desk.toml";
pub const APP_DIR_NAME: &str = "un1ca-desk";

/// Filesystem locations. Relative paths are resolved against the app directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsSection {
    /// Bundled compose file, `.env` and seed images (default: `<app>/resources`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_dir: Option<PathBuf>,
    /// Directory holding `images.json` and the archives (default: `<resources>/seed`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    /// Daemon host tried before asking for elevation. Empty disables the step.
    #[serde(default = "default_docker_host")]
    pub docker_host: String,
    #[serde(default = "default_true")]
    pub require_rootful: bool,
    #[serde(default = "default_session_helper")]
    pub session_helper: String,
    #[serde(default = "default_per_command_helper")]
    pub per_command_helper: String,
    #[serde(default = "default_max_secret_attempts")]
    pub max_secret_attempts: u32,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Pull through the Engine API when the socket is directly reachable.
    #[serde(default = "default_true")]
    pub use_api: bool,
}

fn default_engine_binary() -> String {
    "docker".to_string()
}

fn default_docker_host() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_session_helper() -> String {
    "sudo".to_string()
}

fn default_per_command_helper() -> String {
    "pkexec".to_string()
}

fn default_max_secret_attempts() -> u32 {
    3
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            docker_host: default_docker_host(),
            require_rootful: true,
            session_helper: default_session_helper(),
            per_command_helper: default_per_command_helper(),
            max_secret_attempts: default_max_secret_attempts(),
            keepalive_secs: default_keepalive_secs(),
            use_api: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSection {
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_compose_file")]
    pub compose_file: String,
    /// Expected services; empty means every service in the compose file.
    #[serde(default)]
    pub services: Vec<String>,
    /// Resource files copied next to the compose file.
    #[serde(default = "default_extra_files")]
    pub extra_files: Vec<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

fn default_project() -> String {
    "un1ca".to_string()
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}

fn default_extra_files() -> Vec<String> {
    vec![".env".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_settle_secs() -> u64 {
    3
}

impl Default for StackSection {
    fn default() -> Self {
        Self {
            project: default_project(),
            compose_file: default_compose_file(),
            services: Vec::new(),
            extra_files: default_extra_files(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_secs: default_settle_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesSection {
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub skip_pull: bool,
    #[serde(default = "default_pull_tag")]
    pub pull_tag: String,
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
    /// Sliding window for transfer speed.
    #[serde(default = "default_speed_window_ms")]
    pub speed_window_ms: u64,
}

fn default_pull_tag() -> String {
    "latest".to_string()
}

fn default_speed_window_ms() -> u64 {
    2000
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            strict: false,
            skip_pull: false,
            pull_tag: default_pull_tag(),
            verify_checksums: true,
            speed_window_ms: default_speed_window_ms(),
        }
    }
}

/// Per-stage time budgets, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_engine_check_secs")]
    pub engine_check_secs: u64,
    #[serde(default = "default_load_secs")]
    pub load_secs: u64,
    #[serde(default = "default_pull_secs")]
    pub pull_secs: u64,
    #[serde(default = "default_compose_up_secs")]
    pub compose_up_secs: u64,
    /// Bound on the graceful `compose down`.
    #[serde(default = "default_stop_secs")]
    pub stop_secs: u64,
    /// Bound on the whole shutdown; past it containers are force-killed.
    #[serde(default = "default_hard_stop_secs")]
    pub hard_stop_secs: u64,
    #[serde(default = "default_backend_secs")]
    pub backend_secs: u64,
    #[serde(default = "default_frontend_secs")]
    pub frontend_secs: u64,
}

fn default_engine_check_secs() -> u64 {
    20
}

fn default_load_secs() -> u64 {
    600
}

fn default_pull_secs() -> u64 {
    1800
}

fn default_compose_up_secs() -> u64 {
    600
}

fn default_stop_secs() -> u64 {
    60
}

fn default_hard_stop_secs() -> u64 {
    90
}

fn default_backend_secs() -> u64 {
    120
}

fn default_frontend_secs() -> u64 {
    60
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            engine_check_secs: default_engine_check_secs(),
            load_secs: default_load_secs(),
            pull_secs: default_pull_secs(),
            compose_up_secs: default_compose_up_secs(),
            stop_secs: default_stop_secs(),
            hard_stop_secs: default_hard_stop_secs(),
            backend_secs: default_backend_secs(),
            frontend_secs: default_frontend_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSection {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000/api/v1/healthz".to_string()
}

fn default_frontend_url() -> String {
    "http://127.0.0.1:5173/".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            frontend_url: default_frontend_url(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiSection {
    /// Number of event lines kept in the log tail.
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
    #[serde(default = "default_true")]
    pub open_browser: bool,
}

fn default_log_tail() -> usize {
    200
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            log_tail: default_log_tail(),
            open_browser: true,
        }
    }
}

/// The complete `desk.toml` structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeskConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub stack: StackSection,
    #[serde(default)]
    pub images: ImagesSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub readiness: ReadinessSection,
    #[serde(default)]
    pub ui: UiSection,
}

/// Concrete directories after resolving `[paths]` against the app directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub app_dir: PathBuf,
    pub resources_dir: PathBuf,
    pub seed_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub log_dir: PathBuf,
}

/// `$XDG_DATA_HOME/un1ca-desk` (or the platform equivalent).
pub fn default_app_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("Could not determine local data directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl DeskConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse desk.toml")
    }

    /// Load `desk.toml` from the app directory, or defaults if it is absent.
    pub fn load_or_default(app_dir: &Path) -> Result<Self> {
        let config_path = app_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize desk.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `UN1CA_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Vec<String> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `UN1CA_*` overrides from `lookup`. Returns a warning for every
    /// variable whose value could not be parsed; those are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();

        let string = |key: &str, target: &mut String| {
            if let Some(value) = lookup(key) {
                *target = value;
            }
        };
        string("UN1CA_ENGINE", &mut self.engine.binary);
        string("UN1CA_DOCKER_HOST", &mut self.engine.docker_host);
        string("UN1CA_PROJECT", &mut self.stack.project);
        string("UN1CA_PULL_TAG", &mut self.images.pull_tag);
        string("UN1CA_BACKEND_URL", &mut self.readiness.backend_url);
        string("UN1CA_FRONTEND_URL", &mut self.readiness.frontend_url);

        for (key, target) in [
            ("UN1CA_RESOURCES_DIR", &mut self.paths.resources_dir),
            ("UN1CA_SEED_DIR", &mut self.paths.seed_dir),
            ("UN1CA_RUNTIME_DIR", &mut self.paths.runtime_dir),
            ("UN1CA_LOG_DIR", &mut self.paths.log_dir),
        ] {
            if let Some(value) = lookup(key) {
                *target = Some(PathBuf::from(value));
            }
        }

        for (key, target) in [
            ("UN1CA_STRICT_PULL", &mut self.images.strict),
            ("UN1CA_SKIP_PULL", &mut self.images.skip_pull),
            ("UN1CA_REQUIRE_ROOTFUL", &mut self.engine.require_rootful),
        ] {
            if let Some(value) = lookup(key) {
                match parse_bool(&value) {
                    Some(flag) => *target = flag,
                    None => warnings.push(format!("Ignoring {}={}: expected a boolean", key, value)),
                }
            }
        }

        for (key, target) in [
            ("UN1CA_ENGINE_CHECK_TIMEOUT", &mut self.timeouts.engine_check_secs),
            ("UN1CA_LOAD_TIMEOUT", &mut self.timeouts.load_secs),
            ("UN1CA_PULL_TIMEOUT", &mut self.timeouts.pull_secs),
            ("UN1CA_COMPOSE_UP_TIMEOUT", &mut self.timeouts.compose_up_secs),
            ("UN1CA_STOP_TIMEOUT", &mut self.timeouts.stop_secs),
            ("UN1CA_HARD_STOP_TIMEOUT", &mut self.timeouts.hard_stop_secs),
            ("UN1CA_BACKEND_TIMEOUT", &mut self.timeouts.backend_secs),
            ("UN1CA_FRONTEND_TIMEOUT", &mut self.timeouts.frontend_secs),
        ] {
            if let Some(value) = lookup(key) {
                match value.trim().parse::<u64>() {
                    Ok(secs) => *target = secs,
                    Err(_) => warnings.push(format!("Ignoring {}={}: expected seconds", key, value)),
                }
            }
        }

        warnings
    }

    pub fn resolve_paths(&self, app_dir: &Path) -> ResolvedPaths {
        let resolve = |p: &Option<PathBuf>, default: PathBuf| match p {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => app_dir.join(p),
            None => default,
        };
        let resources_dir = resolve(&self.paths.resources_dir, app_dir.join("resources"));
        ResolvedPaths {
            app_dir: app_dir.to_path_buf(),
            seed_dir: resolve(&self.paths.seed_dir, resources_dir.join("seed")),
            runtime_dir: resolve(&self.paths.runtime_dir, app_dir.join("runtime")),
            log_dir: resolve(&self.paths.log_dir, app_dir.join("logs")),
            resources_dir,
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, url) in [
            ("readiness.backend_url", &self.readiness.backend_url),
            ("readiness.frontend_url", &self.readiness.frontend_url),
        ] {
            match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => warnings.push(format!("{} uses unsupported scheme '{}'", name, parsed.scheme())),
                Err(e) => warnings.push(format!("Invalid {} '{}': {}", name, url, e)),
            }
        }

        for (name, secs) in [
            ("timeouts.engine_check_secs", self.timeouts.engine_check_secs),
            ("timeouts.load_secs", self.timeouts.load_secs),
            ("timeouts.pull_secs", self.timeouts.pull_secs),
            ("timeouts.compose_up_secs", self.timeouts.compose_up_secs),
            ("timeouts.stop_secs", self.timeouts.stop_secs),
            ("timeouts.hard_stop_secs", self.timeouts.hard_stop_secs),
            ("timeouts.backend_secs", self.timeouts.backend_secs),
            ("timeouts.frontend_secs", self.timeouts.frontend_secs),
        ] {
            if secs == 0 {
                warnings.push(format!("{} must be greater than zero", name));
            }
        }

        if self.engine.max_secret_attempts == 0 {
            warnings.push("engine.max_secret_attempts must be at least 1".to_string());
        }
        if self.engine.binary.trim().is_empty() {
            warnings.push("engine.binary is empty".to_string());
        }
        if self.stack.project.trim().is_empty() {
            warnings.push("stack.project is empty".to_string());
        }
        if self.images.pull_tag.trim().is_empty() {
            warnings.push("images.pull_tag is empty".to_string());
        }
        if self.ui.log_tail == 0 {
            warnings.push("ui.log_tail must be at least 1".to_string());
        }

        warnings
    }

    pub fn negotiator_settings(&self) -> NegotiatorSettings {
        let host = self.engine.docker_host.trim();
        NegotiatorSettings {
            engine_binary: self.engine.binary.clone(),
            docker_host: (!host.is_empty()).then(|| host.to_string()),
            require_rootful: self.engine.require_rootful,
            session_helper: self.engine.session_helper.clone(),
            per_command_helper: self.engine.per_command_helper.clone(),
            max_secret_attempts: self.engine.max_secret_attempts.max(1),
            keepalive_interval: Duration::from_secs(self.engine.keepalive_secs.max(1)),
            command_timeout: Duration::from_secs(self.timeouts.engine_check_secs),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            strict: self.images.strict,
            skip_pull: self.images.skip_pull,
            pull_tag: self.images.pull_tag.clone(),
            load_timeout: Duration::from_secs(self.timeouts.load_secs),
            verify_checksums: self.images.verify_checksums,
        }
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.pull_secs)
    }

    pub fn speed_window(&self) -> Duration {
        Duration::from_millis(self.images.speed_window_ms.max(1))
    }

    pub fn hard_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.hard_stop_secs)
    }

    pub fn stack_settings(&self, runtime_dir: &Path, services: Vec<String>) -> StackSettings {
        StackSettings {
            project: self.stack.project.clone(),
            compose_file: runtime_dir.join(&self.stack.compose_file),
            env_file: Some(runtime_dir.join(crate::workdir::DESK_ENV_FILE)),
            services,
            up_timeout: Duration::from_secs(self.timeouts.compose_up_secs),
            stop_timeout: Duration::from_secs(self.timeouts.stop_secs),
            poll_interval: Duration::from_millis(self.stack.poll_interval_ms.max(1)),
            settle_window: Duration::from_secs(self.stack.settle_secs),
        }
    }

    pub fn readiness_settings(&self) -> ReadinessSettings {
        ReadinessSettings {
            backend_url: self.readiness.backend_url.clone(),
            frontend_url: self.readiness.frontend_url.clone(),
            backend_timeout: Duration::from_secs(self.timeouts.backend_secs),
            frontend_timeout: Duration::from_secs(self.timeouts.frontend_secs),
            poll_interval: Duration::from_millis(self.readiness.poll_interval_ms.max(1)),
            request_timeout: Duration::from_millis(self.readiness.request_timeout_ms.max(1)),
        }
    }

    /// Variables written to `desk.env` for compose: project, endpoints and the
    /// local tag of every managed image (`un1ca-api:local` → `UN1CA_API_IMAGE`).
    pub fn compose_env(&self, images: &[ImageSpec]) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("COMPOSE_PROJECT_NAME".to_string(), self.stack.project.clone());
        vars.insert("UN1CA_BACKEND_URL".to_string(), self.readiness.backend_url.clone());
        vars.insert("UN1CA_FRONTEND_URL".to_string(), self.readiness.frontend_url.clone());
        for image in images {
            let repo = crate::images::reference::repository(&image.local_reference);
            let name = repo.rsplit('/').next().unwrap_or(repo);
            let key: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            vars.insert(format!("{}_IMAGE", key), image.local_reference.clone());
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = DeskConfig::default();
        assert_eq!(config.engine.binary, "docker");
        assert_eq!(config.engine.max_secret_attempts, 3);
        assert_eq!(config.images.pull_tag, "latest");
        assert!(!config.images.strict);
        assert_eq!(config.readiness.backend_url, "http://127.0.0.1:8000/api/v1/healthz");
        assert_eq!(config.ui.log_tail, 200);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_other_defaults() {
        let config = DeskConfig::parse(
            r#"
            [images]
            strict = true

            [timeouts]
            hard_stop_secs = 15
            "#,
        )
        .unwrap();
        assert!(config.images.strict);
        assert_eq!(config.images.pull_tag, "latest");
        assert_eq!(config.hard_stop_timeout(), Duration::from_secs(15));
        assert_eq!(config.timeouts.stop_secs, 60);
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(DeskConfig::parse("[images\nstrict = ").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeskConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.stack.project, "un1ca");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = DeskConfig::default();
        config.stack.services = vec!["api".into(), "web".into()];
        config.save(&path).unwrap();

        let loaded = DeskConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.stack.services, vec!["api", "web"]);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("UN1CA_STRICT_PULL", "true"),
            ("UN1CA_SKIP_PULL", "maybe"),
            ("UN1CA_PULL_TAG", "beta"),
            ("UN1CA_FRONTEND_TIMEOUT", "5"),
            ("UN1CA_BACKEND_TIMEOUT", "soon"),
            ("UN1CA_RUNTIME_DIR", "/tmp/rt"),
        ]);
        let mut config = DeskConfig::default();

        let warnings = config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert!(config.images.strict);
        assert!(!config.images.skip_pull);
        assert_eq!(config.images.pull_tag, "beta");
        assert_eq!(config.timeouts.frontend_secs, 5);
        assert_eq!(config.timeouts.backend_secs, 120);
        assert_eq!(config.paths.runtime_dir, Some(PathBuf::from("/tmp/rt")));
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = DeskConfig::default();
        config.paths.seed_dir = Some(PathBuf::from("images"));
        config.paths.log_dir = Some(PathBuf::from("/var/log/un1ca"));

        let paths = config.resolve_paths(Path::new("/opt/desk"));

        assert_eq!(paths.resources_dir, PathBuf::from("/opt/desk/resources"));
        assert_eq!(paths.seed_dir, PathBuf::from("/opt/desk/images"));
        assert_eq!(paths.runtime_dir, PathBuf::from("/opt/desk/runtime"));
        assert_eq!(paths.log_dir, PathBuf::from("/var/log/un1ca"));
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = DeskConfig::default();
        config.readiness.frontend_url = "not a url".into();
        config.readiness.backend_url = "ftp://127.0.0.1/".into();
        config.timeouts.hard_stop_secs = 0;
        config.engine.max_secret_attempts = 0;

        let warnings = config.validate();

        assert_eq!(warnings.len(), 4, "{:?}", warnings);
        assert!(warnings.iter().any(|w| w.contains("hard_stop_secs")));
    }

    #[test]
    fn test_empty_docker_host_disables_alternate_context() {
        let mut config = DeskConfig::default();
        config.engine.docker_host = String::new();
        assert!(config.negotiator_settings().docker_host.is_none());
    }

    #[test]
    fn test_compose_env_names_images() {
        let config = DeskConfig::default();
        let image = ImageSpec {
            local_reference: "un1ca-api:local".into(),
            remote_reference: "ghcr.io/un1ca/api:2024.06".into(),
            remote_fallback_reference: None,
            expected_local_id: "sha256:1".into(),
            archive_path: None,
            archive_sha256: None,
            size: None,
        };
        let vars = config.compose_env(&[image]);
        assert_eq!(vars.get("UN1CA_API_IMAGE").map(String::as_str), Some("un1ca-api:local"));
        assert_eq!(vars.get("COMPOSE_PROJECT_NAME").map(String::as_str), Some("un1ca"));
    }
}
