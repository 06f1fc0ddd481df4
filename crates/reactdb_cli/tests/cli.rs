//! End-to-end tests that run the `reactdb` binary.

use reactdb_testkit::{drafts_schema, TempFiles};
use serde_json::{json, Value};
use std::process::{Command, Output};

fn reactdb(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_reactdb"))
        .args(args)
        .output()
        .expect("Failed to run reactdb")
}

fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("Output line is not JSON"))
        .collect()
}

#[test]
fn defaults_prints_the_schema_shape() {
    let files = TempFiles::new();
    let schema = files.write_json("schema.json", &drafts_schema());

    let output = reactdb(&["defaults", "--schema", schema.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success());
    let defaults = &json_lines(&output)[0];
    assert_eq!(defaults["x"], json!({ "count": 0 }));
    assert_eq!(defaults["blob"], Value::Null);
}

#[test]
fn replay_streams_deliveries_then_the_document() {
    let files = TempFiles::new();
    let schema = files.write_json("schema.json", &drafts_schema());
    let actions = files.write_lines(
        "actions.jsonl",
        &[
            json!({ "action": "upsert", "path": ["drafts", "d1"], "fields": { "title": "hello" } }),
            json!({ "action": "update", "path": ["drafts", "d1", "editCount"], "fields": 3 }),
            json!({ "action": "remove", "path": ["drafts", "d1"] }),
        ],
    );

    let output = reactdb(&[
        "replay",
        "--schema",
        schema.to_str().unwrap(),
        "--store",
        "app",
        "--actions",
        actions.to_str().unwrap(),
        "--watch",
        "drafts/d1",
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let events = json_lines(&output);
    let deliveries: Vec<&Value> = events.iter().filter(|e| e["event"] == "delivery").collect();
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[0]["changes"][0]["path_str"], "app/drafts/d1");
    assert_eq!(deliveries[1]["changes"][0]["data"]["editCount"], 3);
    assert_eq!(deliveries[2]["changes"][0]["data"], Value::Null);

    let document = events.last().unwrap();
    assert_eq!(document["event"], "document");
    assert_eq!(document["document"]["drafts"], json!({}));
}

#[test]
fn validate_exits_with_failure_on_bad_data() {
    let files = TempFiles::new();
    let schema = files.write_json("schema.json", &drafts_schema());
    let good = files.write_json("good.json", &json!({ "x": { "count": 1 } }));
    let bad = files.write_json("bad.json", &json!({ "settings": { "theme": "SEPIA" } }));

    let output = reactdb(&[
        "validate",
        "--schema",
        schema.to_str().unwrap(),
        "--data",
        good.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("✓ Document matches schema"));

    let output = reactdb(&[
        "validate",
        "--schema",
        schema.to_str().unwrap(),
        "--data",
        bad.to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert!(!output.status.success());
    let report = &json_lines(&output)[0];
    assert_eq!(report["valid"], false);
    assert_eq!(report["diagnostics"][0]["path"], "document/settings/theme");
}

#[test]
fn missing_files_are_reported() {
    let output = reactdb(&["defaults", "--schema", "/nonexistent/schema.json"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("/nonexistent/schema.json"));
}
