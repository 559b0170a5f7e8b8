//! CLI integration tests.
//!
//! Tests:
//! - Help and version output
//! - A successful run prints the result as JSON and exits 0
//! - A source failure exits 1, an out-of-range configuration exits 2

mod common;

use common::{count_rows, FeedBuilder, TestFixture};
use std::process::{Command, Output};

fn stowage(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stowage"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("STOWAGE_FEED")
        .env_remove("STOWAGE_DATA_SOURCE")
        .env_remove("STOWAGE_SECONDARY_DATA_SOURCE")
        .output()
        .expect("failed to run stowage")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn test_cli_help_output() {
    let output = stowage(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    for flag in [
        "--feed",
        "--data-source",
        "--throttle-size",
        "--secondary-data-source",
        "--continue-on-secondary-error",
        "--exclude-table",
        "--log-level",
    ] {
        assert!(stdout.contains(flag), "help should mention {flag}");
    }
}

#[test]
fn test_cli_version_output() {
    let output = stowage(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "version output should contain version number: {stdout}"
    );
}

#[test]
fn test_successful_run_prints_result() {
    let fixture = TestFixture::new();
    let feed = fixture.write_feed(
        &FeedBuilder::new()
            .race_schema()
            .race("Derby", &[Some("Arkle")])
            .file("RA1.txt"),
    );

    let output = stowage(&[
        "--feed",
        feed.to_str().unwrap(),
        "--data-source",
        fixture.db_path_str(),
    ]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let result = stdout_json(&output);
    assert_eq!(result["success"], true);
    assert_eq!(result["arguments"], serde_json::json!(["race"]));
    assert_eq!(count_rows(&fixture.db_path, "runner"), Some(1));
}

#[test]
fn test_excluded_table_is_not_created() {
    let fixture = TestFixture::new();
    let feed = fixture.write_feed(
        &FeedBuilder::new()
            .race_schema()
            .race("Derby", &[Some("Arkle")])
            .file("RA1.txt"),
    );

    let output = stowage(&[
        "--feed",
        feed.to_str().unwrap(),
        "--data-source",
        fixture.db_path_str(),
        "--exclude-table",
        "race",
    ]);

    assert!(output.status.success());
    assert_eq!(count_rows(&fixture.db_path, "race"), None);
}

#[test]
fn test_source_failure_exits_with_one() {
    let fixture = TestFixture::new();
    let feed = fixture.write_feed(
        &FeedBuilder::new()
            .race_schema()
            .error(-502, "download interrupted", "RA1.txt"),
    );

    let output = stowage(&[
        "--feed",
        feed.to_str().unwrap(),
        "--data-source",
        fixture.db_path_str(),
    ]);

    assert_eq!(output.status.code(), Some(1));
    let result = stdout_json(&output);
    assert_eq!(result["success"], false);
    assert_eq!(
        result["debug_message"],
        "download interrupted (code -502)"
    );
}

#[test]
fn test_out_of_range_throttle_exits_with_two() {
    for throttle in ["0", "18446744073709551615"] {
        let fixture = TestFixture::new();
        let feed = fixture.write_feed(&FeedBuilder::new());

        let output = stowage(&[
            "--feed",
            feed.to_str().unwrap(),
            "--data-source",
            fixture.db_path_str(),
            "--throttle-size",
            throttle,
        ]);

        assert_eq!(output.status.code(), Some(2), "throttle {throttle}");
        assert!(output.stdout.is_empty());
        assert!(String::from_utf8_lossy(&output.stderr).contains("throttle size"));
    }
}
