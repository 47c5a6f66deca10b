//! Runtime working directory.
//!
//! Every startup attempt rebuilds the directory from the bundled resources:
//! files are written into a sibling staging directory which then replaces the
//! previous one, so compose never sees a half-written configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Env file handed to compose with `--env-file`.
pub const DESK_ENV_FILE: &str = "desk.env";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFiles {
    pub dir: PathBuf,
    pub compose_file: PathBuf,
    pub env_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RuntimeDir {
    path: PathBuf,
}

impl RuntimeDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Paths the staged files will have, without touching the disk.
    pub fn planned(&self, compose_name: &str) -> StagedFiles {
        StagedFiles {
            dir: self.path.clone(),
            compose_file: self.path.join(compose_name),
            env_file: self.path.join(DESK_ENV_FILE),
        }
    }

    fn sibling(&self, suffix: &str) -> Result<PathBuf> {
        let name = self
            .path
            .file_name()
            .with_context(|| format!("Runtime directory has no name: {}", self.path.display()))?;
        Ok(self
            .path
            .with_file_name(format!("{}.{}", name.to_string_lossy(), suffix)))
    }

    /// Rebuild the directory from `resources`.
    ///
    /// Copies the compose file and any of `extra_files` that exist, then writes
    /// `desk.env`: the resource `.env` (if any) with `overrides` applied on top.
    pub fn stage(
        &self,
        resources: &Path,
        compose_name: &str,
        extra_files: &[String],
        overrides: &BTreeMap<String, String>,
    ) -> Result<StagedFiles> {
        let compose_src = resources.join(compose_name);
        if !compose_src.is_file() {
            bail!("Compose file not found: {}", compose_src.display());
        }

        let staging = self.sibling("staging")?;
        if staging.exists() {
            std::fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to clear staging directory: {}", staging.display()))?;
        }
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create directory: {}", staging.display()))?;

        copy_into(&compose_src, &staging)?;
        for name in extra_files {
            let src = resources.join(name);
            if src.is_file() {
                copy_into(&src, &staging)?;
            }
        }

        let mut env = read_env_file(&resources.join(".env"))?;
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        let rendered: String = env.iter().map(|(k, v)| format!("{}={}\n", k, quote_env_value(v))).collect();
        let env_path = staging.join(DESK_ENV_FILE);
        std::fs::write(&env_path, rendered)
            .with_context(|| format!("Failed to write env file: {}", env_path.display()))?;

        self.swap_in(&staging)?;
        tracing::debug!(dir = %self.path.display(), "runtime directory staged");
        Ok(self.planned(compose_name))
    }

    fn swap_in(&self, staging: &Path) -> Result<()> {
        let previous = self.sibling("old")?;
        if previous.exists() {
            std::fs::remove_dir_all(&previous)
                .with_context(|| format!("Failed to remove {}", previous.display()))?;
        }
        if self.path.exists() {
            std::fs::rename(&self.path, &previous)
                .with_context(|| format!("Failed to move aside {}", self.path.display()))?;
        }
        std::fs::rename(staging, &self.path)
            .with_context(|| format!("Failed to install {}", self.path.display()))?;
        if previous.exists()
            && let Err(e) = std::fs::remove_dir_all(&previous)
        {
            tracing::warn!(path = %previous.display(), error = %e, "failed to remove previous runtime directory");
        }
        Ok(())
    }
}

fn copy_into(src: &Path, dir: &Path) -> Result<()> {
    let name = src
        .file_name()
        .with_context(|| format!("Not a file: {}", src.display()))?;
    let dest = dir.join(name);
    std::fs::copy(src, &dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    Ok(())
}

/// Parse a dotenv file into ordered key/value pairs; a missing file is empty.
/// Double-quote a value so `#`, whitespace, `$` and newlines read back verbatim.
fn quote_env_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '$' => quoted.push_str("\\$"),
            '\n' => quoted.push_str("\\n"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.is_file() {
        return Ok(BTreeMap::new());
    }
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to read env file: {}", path.display()))?;
    let mut vars = BTreeMap::new();
    for item in iter {
        let (key, value) = item.with_context(|| format!("Failed to parse env file: {}", path.display()))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), "services:\n  api: {}\n").unwrap();
        std::fs::write(dir.path().join(".env"), "API_PORT=8000\nAPI_IMAGE=ghcr.io/un1ca/api:latest\n").unwrap();
        dir
    }

    #[test]
    fn test_stage_copies_compose_and_writes_env() {
        let res = resources();
        let root = tempfile::tempdir().unwrap();
        let runtime = RuntimeDir::new(root.path().join("runtime"));
        let overrides = BTreeMap::from([("API_IMAGE".to_string(), "un1ca-api:local".to_string())]);

        let staged = runtime
            .stage(res.path(), "docker-compose.yml", &[".env".to_string()], &overrides)
            .unwrap();

        assert!(staged.compose_file.is_file());
        assert!(staged.dir.join(".env").is_file());
        let env = std::fs::read_to_string(&staged.env_file).unwrap();
        assert_eq!(env, "API_IMAGE=\"un1ca-api:local\"\nAPI_PORT=\"8000\"\n");
    }

    #[test]
    fn test_staged_env_preserves_special_values() {
        let res = resources();
        std::fs::write(
            res.path().join(".env"),
            "SECRET=\"abc #def\"\nMULTI=\"line1\\nline2\"\nPRICE='$5'\nPATHLIKE=\"C:\\\\un1ca\"\nQUOTE='say \"hi\"'\n",
        )
        .unwrap();
        let root = tempfile::tempdir().unwrap();
        let runtime = RuntimeDir::new(root.path().join("runtime"));

        let staged = runtime
            .stage(res.path(), "docker-compose.yml", &[], &BTreeMap::new())
            .unwrap();

        let env = read_env_file(&staged.env_file).unwrap();
        assert_eq!(env["SECRET"], "abc #def");
        assert_eq!(env["MULTI"], "line1\nline2");
        assert_eq!(env["PRICE"], "$5");
        assert_eq!(env["PATHLIKE"], "C:\\un1ca");
        assert_eq!(env["QUOTE"], "say \"hi\"");
    }

    #[test]
    fn test_quote_env_value_escapes() {
        assert_eq!(quote_env_value("plain"), "\"plain\"");
        assert_eq!(quote_env_value("a\"b$c\\d\ne"), r#""a\"b\$c\\d\ne""#);
    }

    #[test]
    fn test_restage_replaces_previous_contents() {
        let res = resources();
        let root = tempfile::tempdir().unwrap();
        let runtime = RuntimeDir::new(root.path().join("runtime"));
        runtime
            .stage(res.path(), "docker-compose.yml", &[], &BTreeMap::new())
            .unwrap();
        std::fs::write(runtime.path().join("stale.yml"), "old").unwrap();

        runtime
            .stage(res.path(), "docker-compose.yml", &[], &BTreeMap::new())
            .unwrap();

        assert!(!runtime.path().join("stale.yml").exists());
        assert!(runtime.path().join("docker-compose.yml").is_file());
        assert!(!root.path().join("runtime.staging").exists());
        assert!(!root.path().join("runtime.old").exists());
    }

    #[test]
    fn test_missing_compose_file_is_error_and_keeps_previous() {
        let res = resources();
        let root = tempfile::tempdir().unwrap();
        let runtime = RuntimeDir::new(root.path().join("runtime"));
        runtime
            .stage(res.path(), "docker-compose.yml", &[], &BTreeMap::new())
            .unwrap();

        let err = runtime
            .stage(res.path(), "missing.yml", &[], &BTreeMap::new())
            .unwrap_err();

        assert!(err.to_string().contains("Compose file not found"));
        assert!(runtime.path().join("docker-compose.yml").is_file());
    }
}
