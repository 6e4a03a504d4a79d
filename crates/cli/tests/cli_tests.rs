//! CLI integration tests

use std::process::{Command, Output};

fn mbactl(args: &[&str]) -> Output {
    let home = tempfile::tempdir().expect("Failed to create temp home");
    Command::new(env!("CARGO_BIN_EXE_mbactl"))
        .args(args)
        .env("HOME", home.path())
        .env_remove("MBACTL_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = mbactl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Memory Bandwidth Allocator"),
        "Should show app name"
    );
    for command in ["plan", "usage", "domains", "status", "adjust", "admit"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = mbactl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("mbactl"), "Should show binary name");
}

/// Test admit subcommand help
#[test]
fn test_admit_help() {
    let output = mbactl(&["admit", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Admit help should succeed");
    assert!(stdout.contains("--qos-level"), "Should show qos-level option");
    assert!(stdout.contains("--hint"), "Should show hint option");
    assert!(
        stdout.contains("--container-type"),
        "Should show container-type option"
    );
}

/// Test format option
#[test]
fn test_format_option() {
    let output = mbactl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
}

/// Test api-url option
#[test]
fn test_api_url_option() {
    let output = mbactl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("MBACTL_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = mbactl(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test missing required argument error handling
#[test]
fn test_missing_argument() {
    let output = mbactl(&["admit"]);

    assert!(!output.status.success(), "Missing argument should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}

/// Test that an unreachable agent is reported as an error
#[test]
fn test_unreachable_agent() {
    let output = mbactl(&["--api-url", "http://127.0.0.1:1", "plan"]);

    assert!(!output.status.success(), "Unreachable agent should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Failed to send request"),
        "Should report the failed request"
    );
}
