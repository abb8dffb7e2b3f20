#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};
use ulid::Ulid;

fn fif_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_fif") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/fif");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "inclusion-forecast-cli", "--bin", "fif"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build fif binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn write_feed(dir: &Path, file_name: &str, rows: &Value) {
    let text = match serde_json::to_string_pretty(rows) {
        Ok(value) => value,
        Err(err) => panic!("failed to encode {file_name}: {err}"),
    };
    if let Err(err) = std::fs::write(dir.join(file_name), text) {
        panic!("failed to write {file_name}: {err}");
    }
}

/// Two Findex points (35 -> 46 over exactly four years) plus a Telebirr link
/// landing in November 2021 and an M-Pesa link landing in August 2024.
fn fixture_feeds(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fif-contract-{label}-{}", Ulid::new()));
    if let Err(err) = std::fs::create_dir_all(&dir) {
        panic!("failed to create feed dir: {err}");
    }

    write_feed(
        &dir,
        "indicators.json",
        &json!([
            {"indicator_id": "ACC_OWNERSHIP", "name": "Account Ownership", "pillar": "access"}
        ]),
    );
    write_feed(
        &dir,
        "observations.json",
        &json!([
            {"indicator_id": "ACC_OWNERSHIP", "date": "2017-12-31", "value": 35.0, "confidence": "high", "source": "Global Findex"},
            {"indicator_id": "ACC_OWNERSHIP", "date": "2021-12-31", "value": 46.0, "confidence": "high", "source": "Global Findex"},
            {"indicator_id": "ACC_OWNERSHIP", "date": "not-a-date", "value": 50.0, "confidence": "high"}
        ]),
    );
    write_feed(
        &dir,
        "events.json",
        &json!([
            {"event_id": "EVT_TELEBIRR", "date": "2021-05-11", "category": "product_launch", "label": "Telebirr Launch", "confidence": "high"},
            {"event_id": "EVT_MPESA", "date": "2023-08-01", "category": "market_entry", "label": "M-Pesa Ethiopia Launch", "confidence": "high"}
        ]),
    );
    write_feed(
        &dir,
        "impact_links.json",
        &json!([
            {"event_id": "EVT_TELEBIRR", "indicator_id": "ACC_OWNERSHIP", "direction": "+", "magnitude": 12.0, "lag_months": 6, "confidence": "high"},
            {"event_id": "EVT_MPESA", "indicator_id": "ACC_OWNERSHIP", "direction": "+", "magnitude": 5.0, "lag_months": 12, "confidence": "high"}
        ]),
    );
    write_feed(
        &dir,
        "targets.json",
        &json!([
            {"indicator_id": "ACC_OWNERSHIP", "target_date": "2025-12-31", "target_value": 60.0, "source": "NFIS-II"}
        ]),
    );
    dir
}

fn fif_output(feeds: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(fif_binary_path());
    command.arg("--feeds").arg(feeds);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run fif command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value.as_f64() {
        Some(number) => number,
        None => panic!("expected number, got {value}"),
    }
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(fif_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in [
        "ingest-check",
        "matrix",
        "validate",
        "forecast",
        "target",
        "drivers",
    ] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn forecast_json_contract_adds_every_landed_link() {
    let feeds = fixture_feeds("forecast");
    let output = fif_output(
        &feeds,
        &[
            "forecast",
            "--indicator",
            "ACC_OWNERSHIP",
            "--date",
            "2025-12-31",
            "--scenario",
            "base",
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "forecast command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let payload = stdout_json(&output);
    assert_eq!(
        payload["contract_version"],
        Value::String("forecast_run.v1".to_string())
    );
    let points = match payload["run"]["points"].as_array() {
        Some(points) => points,
        None => panic!("missing run.points in {payload}"),
    };
    assert_eq!(points.len(), 1);

    let point = &points[0];
    assert_eq!(point["scenario"], json!("base"));
    assert!((as_f64(&point["baseline"]) - 57.0).abs() < 1e-9);
    assert!((as_f64(&point["event_contribution"]) - 17.0).abs() < 1e-9);
    assert!((as_f64(&point["value"]) - 74.0).abs() < 1e-9);
    assert!(as_f64(&point["lower_bound"]) < 74.0);
    assert!(as_f64(&point["upper_bound"]) > 74.0);
    assert_eq!(point["contributions"].as_array().map(Vec::len), Some(2));
    assert_eq!(point["contributions"][0]["event_id"], json!("EVT_TELEBIRR"));
    assert_eq!(point["contributions"][1]["event_id"], json!("EVT_MPESA"));

    let _ = std::fs::remove_dir_all(&feeds);
}

#[test]
fn target_json_contract_scores_declared_target() {
    let feeds = fixture_feeds("target");
    let output = fif_output(&feeds, &["target", "--json"]);
    assert!(
        output.status.success(),
        "target command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let payload = stdout_json(&output);
    assert_eq!(
        payload["contract_version"],
        Value::String("target_evaluation.v1".to_string())
    );
    let evaluation = &payload["evaluations"][0];
    assert_eq!(evaluation["status"], json!("On Track"));
    assert!((as_f64(&evaluation["gap"]) - 14.0).abs() < 1e-9);

    let _ = std::fs::remove_dir_all(&feeds);
}

#[test]
fn error_shape_for_missing_target_is_stable() {
    let feeds = fixture_feeds("missing-target");
    let output = fif_output(
        &feeds,
        &[
            "target",
            "--indicator",
            "ACC_OWNERSHIP",
            "--date",
            "2030-01-01",
            "--json",
        ],
    );
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no target defined"),
        "expected stable error shape, got stderr={stderr}"
    );

    let _ = std::fs::remove_dir_all(&feeds);
}

#[test]
fn validate_command_emits_contract_json_and_report_artifact() {
    let feeds = fixture_feeds("validate");
    let report_path = feeds.join("out/validation.json");

    let output = fif_output(
        &feeds,
        &[
            "validate",
            "--output",
            report_path.to_str().unwrap_or(""),
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "validate command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let payload = stdout_json(&output);
    assert_eq!(
        payload["contract_version"],
        Value::String("validation_report.v1".to_string())
    );
    // Telebirr: observed 11pp against 12pp asserted; M-Pesa has no later data.
    assert_eq!(payload["report"]["pass_count"], json!(1));
    assert_eq!(payload["report"]["unscored"].as_array().map(Vec::len), Some(1));
    assert_eq!(payload["promotable"], json!([0]));

    let file_text = match std::fs::read_to_string(&report_path) {
        Ok(value) => value,
        Err(err) => panic!("failed reading validation report artifact: {err}"),
    };
    let file_json: Value = match serde_json::from_str(&file_text) {
        Ok(value) => value,
        Err(err) => panic!("failed parsing validation report artifact json: {err}"),
    };
    assert_eq!(file_json, payload);

    let _ = std::fs::remove_dir_all(&feeds);
}

#[test]
fn ingest_check_strict_exits_non_zero_on_rejected_rows() {
    let feeds = fixture_feeds("ingest");

    let lenient = fif_output(&feeds, &["ingest-check", "--json"]);
    assert!(lenient.status.success());
    let payload = stdout_json(&lenient);
    assert_eq!(
        payload["contract_version"],
        Value::String("ingest_report.v1".to_string())
    );
    assert_eq!(payload["rejected"], json!(1));
    assert_eq!(payload["feeds"]["observations"]["rejected"][0]["row_index"], json!(2));

    let strict = fif_output(&feeds, &["ingest-check", "--strict", "--json"]);
    assert!(
        !strict.status.success(),
        "expected non-zero exit when rows were rejected"
    );
    let stderr = String::from_utf8_lossy(&strict.stderr);
    assert!(
        stderr.contains("feed row(s) rejected"),
        "expected stable rejection error shape, got stderr={stderr}"
    );

    let _ = std::fs::remove_dir_all(&feeds);
}

#[test]
fn drivers_and_matrix_json_contracts_are_versioned() {
    let feeds = fixture_feeds("drivers");

    let drivers = fif_output(&feeds, &["drivers", "--json"]);
    assert!(drivers.status.success());
    let drivers_payload = stdout_json(&drivers);
    assert_eq!(
        drivers_payload["contract_version"],
        Value::String("key_drivers.v1".to_string())
    );
    assert_eq!(drivers_payload["drivers"][0]["event_id"], json!("EVT_TELEBIRR"));
    assert_eq!(drivers_payload["drivers"][0]["rank"], json!(1));

    let matrix = fif_output(&feeds, &["matrix", "--json"]);
    assert!(matrix.status.success());
    let matrix_payload = stdout_json(&matrix);
    assert_eq!(
        matrix_payload["contract_version"],
        Value::String("association_matrix.v1".to_string())
    );
    assert_eq!(matrix_payload["cells"].as_array().map(Vec::len), Some(2));

    let _ = std::fs::remove_dir_all(&feeds);
}
