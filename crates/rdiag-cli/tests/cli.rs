//! CLI command integration tests.
//! Each test writes its trace and config into its own temp directory.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn rdiag_cmd() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("rdiag").unwrap()
}

const COUNTER_TRACE: &str = r#"# one real change, one parent-driven re-render
{"event":"mount","entityId":1,"name":"Counter","timestamp":0,"durationMs":2,"attributesB":{"count":1}}
{"event":"beforeUpdate","entityId":1}
{"event":"updated","entityId":1,"name":"Counter","timestamp":16,"durationMs":1,"attributesB":{"count":2}}
{"event":"beforeUpdate","entityId":1}
{"event":"updated","entityId":1,"name":"Counter","timestamp":32,"durationMs":1,"attributesB":{"count":2}}
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Six bracketed updates of one entity inside a second.
fn storm_trace() -> String {
    let mut lines = vec![
        r#"{"event":"mount","entityId":5,"name":"Ticker","timestamp":0,"attributesA":{"n":0}}"#
            .to_string(),
    ];
    for i in 1..=6 {
        lines.push(r#"{"event":"beforeUpdate","entityId":5}"#.to_string());
        lines.push(format!(
            r#"{{"event":"updated","entityId":5,"name":"Ticker","timestamp":{},"attributesA":{{"n":{i}}}}}"#,
            i * 100
        ));
    }
    lines.join("\n")
}

#[test]
fn replay_prints_summary() {
    let dir = TempDir::new().unwrap();
    let trace = write(&dir, "counter.jsonl", COUNTER_TRACE);

    rdiag_cmd()
        .arg("replay")
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("events:      5"))
        .stdout(predicate::str::contains("records:     3"))
        .stdout(predicate::str::contains("entities:    1"))
        .stdout(predicate::str::contains("top unnecessary:"))
        .stdout(predicate::str::contains("#1 Counter  unnecessary=1/3"));
}

#[test]
fn replay_reports_storms() {
    let dir = TempDir::new().unwrap();
    let trace = write(&dir, "storm.jsonl", &storm_trace());

    rdiag_cmd()
        .arg("replay")
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("storms:      1"))
        .stdout(predicate::str::contains("#5 Ticker  count=7 severity=warning"));
}

#[test]
fn replay_honors_config_file() {
    let dir = TempDir::new().unwrap();
    let trace = write(&dir, "storm.jsonl", &storm_trace());
    let config = write(&dir, "rdiag.toml", "stormThreshold = 20\n");

    rdiag_cmd()
        .arg("replay")
        .arg(&trace)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("storms:      0"));
}

#[test]
fn export_writes_records() {
    let dir = TempDir::new().unwrap();
    let trace = write(&dir, "counter.jsonl", COUNTER_TRACE);
    let out = dir.path().join("records.json");

    rdiag_cmd()
        .arg("export")
        .arg(&trace)
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("exported 3 records"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let records = json.as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["cause"], "initial-render");
    assert_eq!(records[1]["cause"], "attributes-changed");
    assert_eq!(records[1]["attributedKey"], "count");
    assert_eq!(records[1]["attributedGroup"], "b");
    assert_eq!(records[2]["necessary"], false);
    assert_eq!(records[2]["cause"], "ancestor-rerender");
}

#[test]
fn config_prints_defaults() {
    rdiag_cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("historySize = 50"))
        .stdout(predicate::str::contains("stormThreshold = 5"))
        .stdout(predicate::str::contains("similarityThreshold = 0.7"));
}

#[test]
fn config_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "bad.toml", "samplingRate = 2.0\n");

    rdiag_cmd()
        .arg("config")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("samplingRate"));
}

#[test]
fn malformed_trace_reports_line() {
    let dir = TempDir::new().unwrap();
    let trace = write(
        &dir,
        "bad.jsonl",
        "{\"event\":\"beforeUpdate\",\"entityId\":1}\n{\"event\":\"nope\"}\n",
    );

    rdiag_cmd()
        .arg("replay")
        .arg(&trace)
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn missing_trace_fails() {
    rdiag_cmd()
        .args(["replay", "/nonexistent/trace.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}
