//! End-to-end tests for the `dualrun` binary

use std::io::Write;
use std::process::{Command, Output};

fn dualrun(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dualrun"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to launch dualrun")
}

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_simulate_text_report() {
    let output = dualrun(&["simulate", "--calls", "20", "--seed", "7"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("=== dualrun Simulation Report ==="));
    assert!(stdout.contains("Primary Path: legacy"));
    assert!(stdout.contains("Succeeded: 20"));
    assert!(stdout.contains("(COMPLETE)"));
}

#[test]
fn test_simulate_json_prefer_new_with_failures() {
    let output = dualrun(&[
        "simulate",
        "--calls",
        "30",
        "--prefer-new",
        "--new-failure-rate",
        "1.0",
        "--json",
    ]);
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["caller"]["failed"], 30);
    assert_eq!(report["caller"]["succeeded"], 0);
    assert_eq!(report["records"], 60);
    assert_eq!(report["divergence"]["primary_only_failures"], 30);
}

#[test]
fn test_simulate_reads_options_from_config() {
    let file = config_file(
        ".toml",
        r#"
adapter_name = "pricing"

[defaults]
timeout_ms = 1000

[operations.lookup_price]
prefer_legacy = false
"#,
    );
    let path = file.path().to_str().unwrap();

    let output = dualrun(&["simulate", "--calls", "5", "--config", path, "--json"]);
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["config"]["options"]["prefer_legacy"], false);
    assert_eq!(report["config"]["options"]["timeout_ms"], 1000);
}

#[test]
fn test_simulate_rejects_zero_timeout() {
    let output = dualrun(&["simulate", "--timeout-ms", "0"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid simulation settings"));
}

#[test]
fn test_check_config_valid_json() {
    let file = config_file(
        ".json",
        r#"{"adapter_name":"users","defaults":{"timeoutMs":250},"operations":{"get_user":{"preferenceLegacy":false}}}"#,
    );
    let path = file.path().to_str().unwrap();

    let output = dualrun(&["check-config", path]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Adapter: users"));
    assert!(stdout.contains("primary=legacy timeout=250ms"));
    assert!(stdout.contains("get_user: primary=new timeout=250ms"));
    assert!(stdout.contains("Status: VALID"));
}

#[test]
fn test_check_config_rejects_bad_override() {
    let file = config_file(
        ".toml",
        r#"
adapter_name = "users"

[operations.get_user]
timeout_ms = 0
"#,
    );
    let path = file.path().to_str().unwrap();

    let output = dualrun(&["check-config", path]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("get_user"));
}

#[test]
fn test_check_config_rejects_unknown_extension() {
    let file = config_file(".yaml", "adapter_name: users\n");
    let path = file.path().to_str().unwrap();

    let output = dualrun(&["check-config", path]);
    assert!(!output.status.success());
}

#[test]
fn test_check_config_logs_loaded_config_as_json() {
    let file = config_file(".toml", "adapter_name = \"users\"\n");
    let path = file.path().to_str().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_dualrun"))
        .args(["--log-format", "json", "check-config", path])
        .env("RUST_LOG", "info")
        .output()
        .expect("failed to launch dualrun");
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let event = stderr
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|event| event["fields"]["message"] == "Config is valid")
        .expect("no config event logged");
    assert_eq!(event["level"], "INFO");
    assert_eq!(event["fields"]["adapter"], "users");
}
