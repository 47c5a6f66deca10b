//! Container-engine CLI protocol.
//!
//! [`Engine`] turns engine operations into [`CommandSpec`]s for the negotiated
//! [`AccessMode`] and parses their output. It is the only place that knows the
//! docker-compatible command syntax.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::access::AccessMode;
use crate::errors::ProcessError;
use crate::process::{CommandRunner, CommandSpec, LineCallback, ProcessOutput};

/// Label compose puts on every container it creates.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
/// Label carrying the compose service name.
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Outcome of an engine privilege probe.
#[derive(Debug)]
pub enum ProbeResult {
    /// Reachable and privileged enough.
    Satisfied,
    /// Reachable, but the daemon runs rootless.
    Rootless,
    /// The engine could not be queried in this mode.
    Unreachable(ProcessError),
}

#[derive(Clone)]
pub struct Engine {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    mode: AccessMode,
    command_timeout: Duration,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("binary", &self.binary)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Engine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        binary: impl Into<String>,
        mode: AccessMode,
        command_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            binary: binary.into(),
            mode,
            command_timeout,
        }
    }

    pub fn mode(&self) -> &AccessMode {
        &self.mode
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Build an engine invocation wrapped for the current access mode.
    pub fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = match &self.mode {
            AccessMode::Direct => CommandSpec::new(&self.binary),
            AccessMode::AlternateContext { docker_host } => {
                CommandSpec::new(&self.binary).env("DOCKER_HOST", docker_host)
            }
            // -n: never prompt; the cached grant must already be valid.
            AccessMode::SessionElevated => CommandSpec::new("sudo").arg("-n").arg(&self.binary),
            AccessMode::PerCommandElevated => CommandSpec::new("pkexec").arg(&self.binary),
        };
        spec.args(args).timeout(self.command_timeout)
    }

    /// `compose -p <project> -f <file> [--env-file <env>] <args>`.
    pub fn compose<I, S>(&self, project: &str, compose_file: &Path, env_file: Option<&Path>, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut base = vec![
            "compose".to_string(),
            "-p".to_string(),
            project.to_string(),
            "-f".to_string(),
            compose_file.display().to_string(),
        ];
        if let Some(env) = env_file {
            base.push("--env-file".to_string());
            base.push(env.display().to_string());
        }
        base.extend(args.into_iter().map(Into::into));
        self.command(base)
    }

    pub async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput, ProcessError> {
        self.runner.run(spec).await
    }

    /// Query daemon security options; rootless daemons list `name=rootless`.
    pub async fn probe(&self, require_rootful: bool) -> ProbeResult {
        let spec = self.command(["info", "--format", "{{json .SecurityOptions}}"]);
        match self.run(spec).await {
            Ok(out) if require_rootful && out.stdout.contains("rootless") => ProbeResult::Rootless,
            Ok(_) => ProbeResult::Satisfied,
            Err(e) => ProbeResult::Unreachable(e),
        }
    }

    pub async fn server_version(&self) -> Result<String, ProcessError> {
        let out = self
            .run(self.command(["version", "--format", "{{.Server.Version}}"]))
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    /// Content identifier of a local image, or `None` when it is absent.
    pub async fn image_id(&self, reference: &str) -> Option<String> {
        let spec = self.command(["image", "inspect", "--format", "{{.Id}}", reference]);
        match self.run(spec).await {
            Ok(out) => {
                let id = out.stdout.trim();
                (!id.is_empty()).then(|| id.to_string())
            }
            Err(_) => None,
        }
    }

    /// `RepoDigests` of a local image; empty when absent or unparseable.
    pub async fn repo_digests(&self, reference: &str) -> Vec<String> {
        let spec = self.command(["image", "inspect", "--format", "{{json .RepoDigests}}", reference]);
        match self.run(spec).await {
            Ok(out) => serde_json::from_str::<Option<Vec<String>>>(out.stdout.trim())
                .ok()
                .flatten()
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Manifest digest of a remote reference, without pulling it.
    pub async fn remote_digest(&self, reference: &str) -> Result<Option<String>, ProcessError> {
        let out = self
            .run(self.command(["manifest", "inspect", "--verbose", reference]))
            .await?;
        Ok(parse_manifest_digest(&out.stdout))
    }

    pub async fn load(&self, archive: &Path, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        let spec = self
            .command(["load", "-i", &archive.display().to_string()])
            .timeout(timeout);
        self.run(spec).await
    }

    pub async fn pull(
        &self,
        reference: &str,
        timeout: Duration,
        on_line: LineCallback,
    ) -> Result<ProcessOutput, ProcessError> {
        let spec = self
            .command(["pull", reference])
            .timeout(timeout)
            .on_stdout(on_line);
        self.run(spec).await
    }

    pub async fn tag(&self, source: &str, target: &str) -> Result<(), ProcessError> {
        self.run(self.command(["tag", source, target])).await.map(|_| ())
    }

    /// IDs of every container (running or not) labeled with the project.
    pub async fn labeled_containers(&self, project: &str) -> Result<Vec<String>, ProcessError> {
        let filter = format!("label={}={}", COMPOSE_PROJECT_LABEL, project);
        let out = self.run(self.command(["ps", "-aq", "--filter", &filter])).await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// `service<TAB>status` lines for every labeled container.
    pub async fn container_status_listing(&self, project: &str) -> Result<String, ProcessError> {
        let filter = format!("label={}={}", COMPOSE_PROJECT_LABEL, project);
        let format = format!("{{{{.Label \"{}\"}}}}\t{{{{.Status}}}}", COMPOSE_SERVICE_LABEL);
        let out = self
            .run(self.command(["ps", "-a", "--filter", &filter, "--format", &format]))
            .await?;
        Ok(out.stdout)
    }

    pub async fn kill(&self, ids: &[String]) -> Result<(), ProcessError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut args = vec!["kill".to_string()];
        args.extend(ids.iter().cloned());
        self.run(self.command(args)).await.map(|_| ())
    }

    pub async fn remove_force(&self, ids: &[String]) -> Result<(), ProcessError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(ids.iter().cloned());
        self.run(self.command(args)).await.map(|_| ())
    }
}

/// Extract the manifest digest from `manifest inspect --verbose` output.
///
/// A single-platform image prints one object; a multi-platform index prints an
/// array of per-platform entries, in which case `linux/amd64` wins and the
/// first entry is the fallback.
pub fn parse_manifest_digest(output: &str) -> Option<String> {
    let value: Value = serde_json::from_str(output.trim()).ok()?;
    let digest_of = |entry: &Value| {
        entry
            .get("Descriptor")
            .and_then(|d| d.get("digest"))
            .and_then(Value::as_str)
            .map(String::from)
    };
    match value {
        Value::Array(entries) => {
            let amd64 = entries.iter().find(|e| {
                let platform = e.get("Descriptor").and_then(|d| d.get("platform"));
                let field = |name: &str| {
                    platform
                        .and_then(|p| p.get(name))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                field("os") == "linux" && field("architecture") == "amd64"
            });
            amd64.or_else(|| entries.first()).and_then(digest_of)
        }
        Value::Object(_) => digest_of(&value),
        _ => None,
    }
}
