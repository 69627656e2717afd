//! End-to-end tests running the `layerfix` binary.
//!
//! Only commands that need no container engine are exercised here.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Runs the binary with a config path that does not exist, so defaults apply.
fn layerfix(dir: &TempDir, args: &[&str]) -> Output {
    let config = dir.path().join("layerfix.toml");
    Command::new(env!("CARGO_BIN_EXE_layerfix"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("binary should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout should be JSON ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn test_report_json_prints_manifest() {
    let dir = TempDir::new().expect("should create temp dir");
    let report = fixture("trivy_debian_amd64.json");
    let output = layerfix(
        &dir,
        &["report", report.to_str().expect("utf-8 path"), "--output", "json"],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["scanner"], "trivy");
    assert_eq!(json["platform"], "linux/amd64");
    assert_eq!(json["update_count"], 1);
    assert_eq!(json["manifest"]["os"]["family"], "debian");
    assert_eq!(json["manifest"]["os_updates"][0]["name"], "libssl3");
    assert_eq!(
        json["manifest"]["os_updates"][0]["fixed_version"],
        "3.0.13-1~deb12u1"
    );
}

#[test]
fn test_report_text_lists_packages() {
    let dir = TempDir::new().expect("should create temp dir");
    let report = fixture("trivy_debian_amd64.json");
    let output = layerfix(&dir, &["report", report.to_str().expect("utf-8 path")]);

    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("libssl3"));
    assert!(text.contains("CVE-2024-0727"));
}

#[test]
fn test_report_missing_file_is_io_exit_code() {
    let dir = TempDir::new().expect("should create temp dir");
    let missing = dir.path().join("missing.json");
    let output = layerfix(&dir, &["report", missing.to_str().expect("utf-8 path")]);

    assert_eq!(output.status.code(), Some(10));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn test_report_unknown_scanner_is_config_exit_code() {
    let dir = TempDir::new().expect("should create temp dir");
    let report = fixture("trivy_debian_amd64.json");
    let output = layerfix(
        &dir,
        &["report", report.to_str().expect("utf-8 path"), "--scanner", "grype"],
    );

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_config_validate_bad_file_exits_2() {
    let dir = TempDir::new().expect("should create temp dir");
    std::fs::write(dir.path().join("layerfix.toml"), "[patch]\nscanner = \"grype\"\n")
        .expect("should write config");

    let output = layerfix(&dir, &["config", "validate", "--output", "json"]);

    assert_eq!(output.status.code(), Some(2));
    let json = stdout_json(&output);
    assert_eq!(json["valid"], false);
    assert!(json["errors"][0]
        .as_str()
        .expect("error string")
        .contains("patch.scanner"));
}

#[test]
fn test_config_validate_good_file_succeeds() {
    let dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        dir.path().join("layerfix.toml"),
        "[general]\nlog_format = \"json\"\n",
    )
    .expect("should write config");

    let output = layerfix(&dir, &["config", "validate"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("VALID"));
}

#[test]
fn test_config_show_section_without_file() {
    let dir = TempDir::new().expect("should create temp dir");
    let output = layerfix(&dir, &["config", "show", "--section", "patch"]);

    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("tag_suffix = \"patched\""));
    assert!(text.contains("max_concurrent_platforms = 4"));
}

#[test]
fn test_config_show_unknown_section_fails() {
    let dir = TempDir::new().expect("should create temp dir");
    let output = layerfix(&dir, &["config", "show", "--section", "sbom"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown section"));
}
