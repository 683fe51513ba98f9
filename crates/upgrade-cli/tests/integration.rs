#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn junos_upgrade(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("junos-upgrade").unwrap();
    cmd.current_dir(dir.path())
        .env("JUNOS_UPGRADE_CONFIG", dir.path().join("upgrade.yaml"))
        .env_remove("RUST_LOG");
    cmd
}

/// Config whose image repository is `<dir>/images`.
fn write_config(dir: &TempDir) -> PathBuf {
    let repo = dir.path().join("images");
    std::fs::create_dir_all(&repo).unwrap();
    let yaml = format!(
        r#"images:
  repository: {}
  main:
    bit64: junos-install-mx-x86-64-16.1R6-S1.1.tgz
  two_stage:
    bit64: jinstall64-13.3R6-S1.6-domestic-signed.tgz
  two_stage_for: "12"
pre_upgrade:
  - delete chassis redundancy graceful-switchover
post_upgrade:
  - set chassis redundancy graceful-switchover
"#,
        repo.display()
    );
    let path = dir.path().join("upgrade.yaml");
    std::fs::write(&path, yaml).unwrap();
    repo
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_init_writes_template_once() {
    let dir = TempDir::new().unwrap();
    junos_upgrade(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));
    assert!(dir.path().join("upgrade.yaml").exists());

    std::fs::write(dir.path().join("upgrade.yaml"), "images:\n  repository: /x\n").unwrap();
    junos_upgrade(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
    let content = std::fs::read_to_string(dir.path().join("upgrade.yaml")).unwrap();
    assert_eq!(content, "images:\n  repository: /x\n");
}

#[test]
fn template_validates_cleanly() {
    let dir = TempDir::new().unwrap();
    junos_upgrade(&dir).args(["config", "init"]).assert().success();
    junos_upgrade(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[error]").not());
}

#[test]
fn validate_fails_on_marker_without_intermediate_image() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("upgrade.yaml"),
        "images:\n  repository: /srv\n  main:\n    bit64: a.tgz\n  two_stage_for: \"12\"\n",
    )
    .unwrap();
    junos_upgrade(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_validate_json_lists_warnings() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("upgrade.yaml"),
        "images:\n  repository: /srv\n  main:\n    bit64: a.tgz\n",
    )
    .unwrap();
    let out = junos_upgrade(&dir)
        .args(["--json", "config", "validate"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let warnings = value["warnings"].as_array().unwrap();
    assert!(!warnings.is_empty());
}

#[test]
fn missing_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    junos_upgrade(&dir)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

#[test]
fn plan_is_two_stage_for_marked_versions() {
    let dir = TempDir::new().unwrap();
    write_config(&dir);
    junos_upgrade(&dir)
        .args(["plan", "--version", "12.3R5.7", "--arch", "64-bit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("two-stage"))
        .stdout(predicate::str::contains("jinstall64-13.3R6-S1.6-domestic-signed.tgz"))
        .stdout(predicate::str::contains("/var/preserve/"));
}

#[test]
fn plan_is_single_stage_otherwise() {
    let dir = TempDir::new().unwrap();
    write_config(&dir);
    junos_upgrade(&dir)
        .args(["plan", "--version", "13.3R6.5", "--arch", "64-bit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("single-stage"))
        .stdout(predicate::str::contains("jinstall64").not());
}

#[test]
fn plan_rejects_unconfigured_architecture() {
    let dir = TempDir::new().unwrap();
    write_config(&dir);
    junos_upgrade(&dir)
        .args(["plan", "--version", "13.3R6.5", "--arch", "32-bit"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no 32-bit main image configured"));
}

// ---------------------------------------------------------------------------
// upgrade
// ---------------------------------------------------------------------------

#[test]
fn upgrade_stops_on_missing_local_image_before_connecting() {
    let dir = TempDir::new().unwrap();
    let repo = write_config(&dir);
    std::fs::write(repo.join("junos-install-mx-x86-64-16.1R6-S1.1.tgz"), b"img").unwrap();

    // The intermediate image is absent; the device name does not resolve.
    junos_upgrade(&dir)
        .args(["upgrade", "--device", "unreachable.invalid", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("local image check failed"))
        .stderr(predicate::str::contains("jinstall64-13.3R6-S1.6-domestic-signed.tgz"))
        .stderr(predicate::str::contains("Connecting").not());
}
