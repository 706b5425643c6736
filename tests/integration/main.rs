//! Integration tests for stagecache

mod postgres;
mod repository;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn stagecache() -> Command {
        let mut cmd = cargo_bin_cmd!("stagecache");
        cmd.env_remove("STAGECACHE_CONFIG")
            .env_remove("STAGECACHE_DATABASE_URL");
        cmd
    }

    #[test]
    fn help_displays() {
        stagecache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("staging-table locks"));
    }

    #[test]
    fn version_displays() {
        stagecache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stagecache"));
    }

    #[test]
    fn config_path() {
        stagecache()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        stagecache()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(path.exists());

        stagecache()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));

        stagecache()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("cache_lock"));
    }

    #[test]
    fn config_show_hides_database_url() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "[database]\nurl = \"postgres://loader:secret@db/registry\"\n",
        )
        .unwrap();

        stagecache()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("<set>"))
            .stdout(predicate::str::contains("secret").not());
    }

    #[test]
    fn get_without_database_url_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[general]\nverbose = false\n").unwrap();

        stagecache()
            .arg("--config")
            .arg(&path)
            .args(["get", "orders"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No database URL configured"))
            .stderr(predicate::str::contains("STAGECACHE_DATABASE_URL"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[schema]\nentry_table = \"bad name\"\n").unwrap();

        stagecache()
            .arg("--config")
            .arg(&path)
            .arg("locks")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn missing_explicit_config_fails() {
        let temp = TempDir::new().unwrap();

        stagecache()
            .arg("--config")
            .arg(temp.path().join("absent.toml"))
            .arg("locks")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration file not found"))
            .stderr(predicate::str::contains("stagecache config init"));
    }

    #[test]
    fn release_all_needs_yes_when_not_interactive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[general]\nverbose = false\n").unwrap();

        stagecache()
            .arg("--config")
            .arg(&path)
            .args(["release", "--all"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("pass --yes"));
    }

    #[test]
    fn release_requires_owner_or_all() {
        stagecache().arg("release").assert().failure();
        stagecache()
            .args(["release", "--owner", "exec-1", "--all"])
            .assert()
            .failure();
    }
}
