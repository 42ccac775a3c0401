//! CLI integration tests for dbshift.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn cmd() -> Command {
    Command::cargo_bin("dbshift").unwrap()
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("introspect"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--fail-fast"))
        .stdout(predicate::str::contains("--atomic"))
        .stdout(predicate::str::contains("--start-offset"))
        .stdout(predicate::str::contains("--table"));
}

#[test]
fn test_introspect_subcommand_help() {
    cmd()
        .args(["introspect", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--side"))
        .stdout(predicate::str::contains("[default: source]"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dbshift"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--progress"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_log_flags_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let file = config_file("invalid: yaml: content: [\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let file = config_file("source:\n  type: mssql\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_unaligned_start_offset_exits_with_code_1() {
    let file = config_file(
        "source:\n  type: memory\n  database: legacy\ntarget:\n  type: memory\n  database: warehouse\n",
    );

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "run",
            "--batch-size",
            "100",
            "--start-offset",
            "150",
        ])
        .assert()
        .code(1);
}

#[test]
fn test_memory_databases_are_unreachable_from_the_cli() {
    let file = config_file(
        "source:\n  type: memory\n  database: legacy\ntarget:\n  type: memory\n  database: warehouse\n",
    );

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("UNHEALTHY"));

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "introspect"])
        .assert()
        .code(1);
}

// =============================================================================
// Subcommand Existence Tests
// =============================================================================

#[test]
fn test_health_check_command_exists() {
    cmd()
        .args(["health-check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Test database connections"));
}

#[test]
fn test_validate_command_exists() {
    cmd()
        .args(["validate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Validate row counts"));
}

#[test]
fn test_no_subcommand_shows_usage() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
