#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CLI smoke tests for the arcus-service binary.

use std::process::{Command, Stdio};
use tempfile::TempDir;

const LEGACY_ENV: &[&str] = &[
    "ARCUS_SERVICE",
    "ARCUS_CONFIG_DIR",
    "ARANGO_ROOT_PASSWORD",
    "MINIO_ACCESS_KEY",
    "MINIO_SECRET_KEY",
    "MQTT_HOST",
    "MQTT_USER",
    "MQTT_PASSWORD",
];

fn run_arcus_service(args: &[&str]) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_arcus-service"));
    for var in LEGACY_ENV {
        cmd.env_remove(var);
    }
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute arcus-service")
}

/// App config pointing at a unit directory holding `unit_yaml` as `config.yml`.
fn unit_fixture(unit_yaml: &str) -> (TempDir, String) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let units = dir.path().join("units");
    std::fs::create_dir_all(&units).unwrap();
    std::fs::write(units.join("config.yml"), unit_yaml).unwrap();
    let app = dir.path().join("arcus.yml");
    std::fs::write(
        &app,
        format!("unit: demo\nconfig_dir: {}\nweb:\n  enabled: false\n", units.display()),
    )
    .unwrap();
    let path = app.to_str().unwrap().to_owned();
    (dir, path)
}

#[test]
fn help_lists_subcommands() {
    let output = run_arcus_service(&["--help"]);
    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("arcus-service"), "Should contain binary name");
    assert!(stdout.contains("Usage:"), "Should contain usage information");
    for word in ["run", "check", "deploy", "--config", "--print-config"] {
        assert!(stdout.contains(word), "Should mention {word}");
    }
}

#[test]
fn version_is_printed() {
    let output = run_arcus_service(&["--version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("arcus-service"));
    assert!(stdout.chars().any(|c| c.is_ascii_digit()));
}

#[test]
fn invalid_command_fails() {
    let output = run_arcus_service(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");
}

#[test]
fn missing_config_file_fails() {
    let output = run_arcus_service(&["--config", "/nonexistent/arcus.yml", "check"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "Should name the missing file: {stderr}");
}

#[test]
fn check_accepts_valid_unit() {
    let (_dir, config) = unit_fixture("services:\n  - dummy\nconnectors:\n  - shell\n");
    let output = run_arcus_service(&["--config", &config, "check"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "Should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("Configuration is valid"));
    assert!(stdout.contains("dummy"));
}

#[test]
fn check_rejects_unknown_modules() {
    let (_dir, config) = unit_fixture("services:\n  - nope\nconnectors:\n  - shell\n");
    let output = run_arcus_service(&["--config", &config, "check"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot be built"), "Should list unbuildable modules: {stderr}");
}

#[test]
fn check_knows_registered_service_modules() {
    let (_dir, config) = unit_fixture(
        "services:\n  - name: skill\n    skill-id: billing\n  - name: agent\n    agent-name: abot\nconnectors:\n  - shell\n",
    );
    let output = run_arcus_service(&["--config", &config, "check"]);
    assert!(
        output.status.success(),
        "Externally registered modules should resolve: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn run_without_services_exits_fatally() {
    let (_dir, config) = unit_fixture("services: []\nconnectors:\n  - shell\n");
    let output = run_arcus_service(&["--config", &config, "run"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn print_config_redacts_credentials() {
    let dir = TempDir::new().unwrap();
    let app = dir.path().join("arcus.yml");
    std::fs::write(&app, "unit: demo\ncredentials:\n  database_password: hunter2\n").unwrap();
    let output = run_arcus_service(&["--config", app.to_str().unwrap(), "--print-config"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("demo"));
    assert!(!stdout.contains("hunter2"));
}
