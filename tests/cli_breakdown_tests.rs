//! End-to-end tests for the `breakdown` subcommand.

use predicates::prelude::*;
use std::io::Write;
use trace_breakdown::segment::{RawTrace, SegmentWrapper};

fn single_span_trace_line(trace_id: &str) -> String {
    let trace = RawTrace {
        id: trace_id.to_string(),
        duration: Some(1.0),
        limit_exceeded: Some(false),
        segments: vec![SegmentWrapper {
            id: None,
            document: r#"{"id":"a","name":"root","origin":"AWS::ApiGateway::Stage","start_time":0.0,"end_time":1.0}"#
                .to_string(),
        }],
    };
    serde_json::to_string(&trace).unwrap()
}

fn malformed_trace_line(trace_id: &str) -> String {
    format!(r#"{{"Id":"{trace_id}","Duration":null,"LimitExceeded":false,"Segments":[]}}"#)
}

#[test]
fn breakdown_writes_csv_for_valid_trace() {
    let dir = tempfile::tempdir().unwrap();
    let traces_path = dir.path().join("traces.jsonl");
    let mut file = std::fs::File::create(&traces_path).unwrap();
    writeln!(file, "{}", single_span_trace_line("1-aaaaaaaa-bbbbbbbbbbbbbbbbbbbbbbbb")).unwrap();
    drop(file);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("trace-breakdown");
    cmd.arg("breakdown").arg(&traces_path).assert().success();

    let csv = std::fs::read_to_string(dir.path().join("trace_breakdown.csv")).unwrap();
    assert!(csv.contains("1-aaaaaaaa-bbbbbbbbbbbbbbbbbbbbbbbb"));
    assert!(csv.contains("0:00:01")); // total duration, formatted as H:MM:SS
}

#[test]
fn breakdown_isolates_malformed_trace_as_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let traces_path = dir.path().join("traces.jsonl");
    let mut file = std::fs::File::create(&traces_path).unwrap();
    writeln!(file, "{}", single_span_trace_line("1-aaaaaaaa-bbbbbbbbbbbbbbbbbbbbbbbb")).unwrap();
    writeln!(file, "{}", malformed_trace_line("1-cccccccc-dddddddddddddddddddddddd")).unwrap();
    drop(file);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("trace-breakdown");
    cmd.arg("breakdown").arg(&traces_path).assert().success();

    let breakdown_csv = std::fs::read_to_string(dir.path().join("trace_breakdown.csv")).unwrap();
    assert!(breakdown_csv.contains("1-aaaaaaaa-bbbbbbbbbbbbbbbbbbbbbbbb"));
    assert!(!breakdown_csv.contains("1-cccccccc-dddddddddddddddddddddddd"));

    let invalid_csv = std::fs::read_to_string(dir.path().join("invalid_traces.csv")).unwrap();
    assert!(invalid_csv.contains("1-cccccccc-dddddddddddddddddddddddd"));
    assert!(invalid_csv.contains("missing trace duration"));
}

#[test]
fn breakdown_missing_file_fails_with_message() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("trace-breakdown");
    cmd.arg("breakdown")
        .arg("/no/such/traces.jsonl")
        .assert()
        .failure()
        .stderr(predicate::str::contains("opening"));
}
