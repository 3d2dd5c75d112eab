//! End-to-end tests for the `conduct` binary.

use pretty_assertions::assert_eq;
use serde_json::Value;
use std::process::{Command, Output};

const PIPELINE: &str = r#"{
    "source": {"name": "provider", "stage": "probe", "arguments": {"count": 5}},
    "transforms": [
        {"name": "proc", "stage": "probe", "arguments": {"count": 2}},
        {"name": "skip", "stage": "filter", "arguments": {"pattern": "^probe:[13]$"}}
    ],
    "sink": {"name": "out", "stage": "append"}
}"#;

fn conduct(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_conduct"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("conduct runs")
}

fn outcomes(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("outcome is JSON"))
        .collect()
}

fn count(outcomes: &[Value], status: &str) -> usize {
    outcomes.iter().filter(|o| o["status"] == status).count()
}

fn run_strategy(strategy: &str) -> (Output, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("out.jsonl");
    let output = conduct(&[
        "--strategy",
        strategy,
        "--max-workers",
        "2",
        PIPELINE,
        &format!("out.file={}", file.display()),
    ]);
    (output, dir)
}

#[test]
fn test_process_strategy_runs_transforms_in_workers() {
    let (output, dir) = run_strategy("process");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let results = outcomes(&output);
    assert_eq!(results.len(), 5);
    assert_eq!(count(&results, "ok"), 3);
    assert_eq!(count(&results, "stopped"), 2);

    for outcome in results.iter().filter(|o| o["status"] == "ok") {
        let item = &outcome["item"]["results"];
        let provider_pid = &item["probe-provider-record"][0]["value"]["provider_pid"];
        let records = item["probe-processor-record"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(&records[0]["value"]["processor_pid"], provider_pid);
    }

    let written = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
    assert_eq!(written.lines().count(), 3);
}

#[test]
fn test_threaded_and_sequential_strategies() {
    for strategy in ["threaded", "sequential"] {
        let (output, _dir) = run_strategy(strategy);
        assert!(output.status.success(), "{strategy} failed");

        let results = outcomes(&output);
        assert_eq!(count(&results, "ok"), 3, "{strategy}");
        assert_eq!(count(&results, "stopped"), 2, "{strategy}");
    }
}

#[test]
fn test_sequential_outcomes_in_source_order() {
    let (output, _dir) = run_strategy("sequential");
    let paths: Vec<String> = outcomes(&output)
        .iter()
        .map(|o| o["path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["probe:0", "probe:1", "probe:2", "probe:3", "probe:4"]);
}

#[test]
fn test_pipeline_help() {
    let output = conduct(&[PIPELINE, "--pipeline-help"]);
    assert!(output.status.success());

    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("== Element: provider (source 'probe')"));
    assert!(text.contains("== Element: skip (transform 'filter')"));
    assert!(text.contains("out.file"));
}

#[test]
fn test_configuration_errors_fail_before_running() {
    let output = conduct(&["--strategy", "threaded", PIPELINE, "proc.colour=red"]);
    assert!(!output.status.success());
    assert!(outcomes(&output).is_empty());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown key: 'proc.colour'"));
    assert!(stderr.contains("required key: 'out.file' missing"));
}

#[test]
fn test_unsupported_strategy() {
    let output = conduct(&["--strategy", "fibers", PIPELINE, "out.file=/tmp/never"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unsupported processing mode"));
}

#[test]
fn test_failing_sink_does_not_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let output = conduct(&[
        "--strategy",
        "process",
        "-w",
        "1",
        PIPELINE,
        &format!("out.file={}", dir.path().display()),
    ]);
    assert!(output.status.success());

    let results = outcomes(&output);
    assert_eq!(count(&results, "error"), 3);
    assert!(results
        .iter()
        .filter(|o| o["status"] == "error")
        .all(|o| o["stage"] == "out"));
}
