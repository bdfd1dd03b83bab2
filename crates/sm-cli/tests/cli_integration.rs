//! CLI integration tests
//!
//! Tests the sshmux CLI using assert_cmd.

use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;

fn sshmux() -> Command {
    Command::cargo_bin("sshmux")
        .expect("Failed to locate sshmux binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    sshmux()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sshmux"))
        .stdout(predicate::str::contains("Multiplex TCP connections"));
}

#[test]
fn test_cli_version() {
    sshmux()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sshmux"));
}

#[test]
fn test_cli_server_help() {
    sshmux()
        .args(["server", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--bind"))
        .stdout(predicate::str::contains("SSH"));
}

#[test]
fn test_cli_transparent_help() {
    sshmux()
        .args(["transparent", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stdin/stdout"));
}

#[test]
fn test_cli_agent_help() {
    sshmux()
        .args(["agent", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--remove-self"))
        .stdout(predicate::str::contains("--target"));
}

#[test]
fn test_cli_server_requires_bind() {
    sshmux()
        .env_remove("SSHMUX_BIND")
        .args(["server", "example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--bind"));
}

#[test]
fn test_cli_transparent_requires_command() {
    sshmux()
        .args(["transparent", "--bind", "127.0.0.1:0"])
        .assert()
        .failure();
}

#[test]
fn test_cli_no_subcommand_fails() {
    sshmux().assert().failure();
}

#[test]
fn test_cli_config_init_and_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    sshmux()
        .args(["config", "init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));
    assert!(path.exists());

    sshmux()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("queue_capacity = 10"));
}

#[test]
fn test_cli_config_path_honours_flag() {
    sshmux()
        .args(["config", "path", "--config", "/tmp/sshmux-test.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/sshmux-test.toml"));
}

#[test]
fn test_cli_invalid_config_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "queue_capacity = \"lots\"").unwrap();

    sshmux()
        .args(["agent", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_cli_agent_exits_on_stdin_eof() {
    sshmux()
        .args(["agent", "--target", "127.0.0.1:9"])
        .write_stdin("")
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_cli_transparent_bind_conflict_fails() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    sshmux()
        .args(["transparent", "--bind", &addr, "--", "cat"])
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to bind"));
}
