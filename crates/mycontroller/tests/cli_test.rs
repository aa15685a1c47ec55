//! Integration tests for the `mycontroller` binary.
//!
//! Every test points the binary at a config file inside a temp directory so
//! no test reads or writes the user's real installation.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

fn mc_cmd(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("mycontroller");
    cmd.arg("--config")
        .arg(config)
        .env_remove("MC_DIR_DATA")
        .env_remove("MC_DIR_DATA_STORAGE")
        .env_remove("MC_DIR_DATA_FIRMWARE")
        .env_remove("MC_DIR_DATA_INTERNAL")
        .env_remove("MC_DIR_SHARE_SECURE")
        .env_remove("MC_DIR_SHARE_INSECURE")
        .env_remove("MC_TELEMETRY_ENABLED")
        .env_remove("MC_METRIC_DB_DISABLED")
        .env_remove("JWT_ACCESS_SECRET")
        .env_remove("RUST_LOG");
    cmd
}

/// Write a config rooting the installation under `home`.
fn write_config(dir: &Path, home: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        format!(
            "[directories]\nhome = {:?}\n\n[storage]\ndump_formats = [\"json\"]\n",
            home.display().to_string()
        ),
    )
    .unwrap();
    path
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = cargo_bin_cmd!("mycontroller").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "Expected 'Usage' in:\n{stderr}");
}

#[test]
fn test_config_path_prints_given_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    mc_cmd(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mc/config.toml");
    mc_cmd(&path).args(["config", "init"]).assert().success();
    assert!(path.exists());

    mc_cmd(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[storage]").and(predicate::str::contains("queue_capacity")));

    // A second init refuses to overwrite.
    mc_cmd(&path)
        .args(["config", "init"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_invalid_duration_exits_with_config_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[service]\nstop_timeout = \"whenever\"\n").unwrap();
    mc_cmd(&path)
        .args(["config", "show"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("service.stop_timeout"));
}

#[test]
fn test_env_override_shows_in_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &dir.path().join("home"));
    mc_cmd(&path)
        .env("MC_TELEMETRY_ENABLED", "false")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("enabled = false"));
}

// ── Backup ──────────────────────────────────────────────────────────

#[test]
fn test_backup_export_writes_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("home");
    let path = write_config(dir.path(), &home);
    let out = dir.path().join("backups");

    mc_cmd(&path)
        .args(["backup", "export", "--prefix", "nightly", "--format", "yaml", "--dir"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("nightly_"));

    let bundles: Vec<_> = std::fs::read_dir(&out).unwrap().collect();
    assert_eq!(bundles.len(), 1);
    let bundle = bundles[0].as_ref().unwrap().path();
    assert!(bundle.join("backup.yaml").exists());
    assert!(bundle.join("storage").is_dir());
}

#[test]
fn test_restore_of_missing_bundle_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &dir.path().join("home"));
    mc_cmd(&path)
        .args(["backup", "restore"])
        .arg(dir.path().join("nope"))
        .assert()
        .code(4);
}

#[test]
fn test_restore_is_scheduled_for_next_start() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("home");
    let path = write_config(dir.path(), &home);
    let out = dir.path().join("backups");
    mc_cmd(&path)
        .args(["backup", "export", "--dir"])
        .arg(&out)
        .assert()
        .success();
    let bundle = std::fs::read_dir(&out).unwrap().next().unwrap().unwrap().path();

    mc_cmd(&path)
        .args(["backup", "restore"])
        .arg(&bundle)
        .assert()
        .success()
        .stdout(predicate::str::contains("next time the server starts"));
    assert!(home.join("data/internal/system_start_jobs.yaml").exists());
}
