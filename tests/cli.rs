//! CLI tests for the configuration commands.
//!
//! Commands that need a container engine are covered by unit tests with a
//! scripted runner; these only exercise argument parsing and `desk.toml`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn desk(app_dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("un1ca-desk");
    cmd.arg("--app-dir").arg(app_dir.path());
    for var in ["UN1CA_PULL_TAG", "UN1CA_STRICT_PULL", "UN1CA_SKIP_PULL", "UN1CA_HARD_STOP_TIMEOUT"] {
        cmd.env_remove(var);
    }
    cmd
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        cargo_bin_cmd!("un1ca-desk")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("up"))
            .stdout(predicate::str::contains("down"))
            .stdout(predicate::str::contains("images"));
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("un1ca-desk").arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        cargo_bin_cmd!("un1ca-desk").arg("launch").assert().failure();
    }
}

mod config_commands {
    use super::*;

    #[test]
    fn test_show_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        desk(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No desk.toml found"))
            .stdout(predicate::str::contains("pull_tag = \"latest\""));
    }

    #[test]
    fn test_init_creates_file_once() {
        let dir = TempDir::new().unwrap();
        desk(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created desk.toml"));
        assert!(dir.path().join("desk.toml").is_file());

        desk(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("desk.toml"), "[timeouts]\nhard_stop_secs = 0\n").unwrap();

        desk(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("timeouts.hard_stop_secs must be greater than zero"));
    }

    #[test]
    fn test_validate_default_is_valid() {
        let dir = TempDir::new().unwrap();
        desk(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("desk.toml"), "[images\nstrict = ").unwrap();

        desk(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse desk.toml"));
    }

    #[test]
    fn test_env_and_flags_override_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("desk.toml"), "[images]\npull_tag = \"stable\"\n").unwrap();

        desk(&dir)
            .env("UN1CA_HARD_STOP_TIMEOUT", "15")
            .args(["--pull-tag", "beta", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("pull_tag = \"beta\""))
            .stdout(predicate::str::contains("hard_stop_secs = 15"));
    }

    #[test]
    fn test_dotenv_in_app_dir_is_read() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "UN1CA_PULL_TAG=nightly\n").unwrap();

        desk(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("pull_tag = \"nightly\""));
    }
}
