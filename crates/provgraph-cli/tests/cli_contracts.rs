#![allow(clippy::single_match_else)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use serde_json::{json, Value};
use ulid::Ulid;

fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_provgraph"))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

struct TempDb(PathBuf);

impl TempDb {
    fn new(label: &str) -> Self {
        Self(std::env::temp_dir().join(format!("provgraph-cli-{label}-{}.sqlite3", Ulid::new())))
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.0.as_os_str().to_owned();
            file.push(suffix);
            let _ = fs::remove_file(PathBuf::from(file));
        }
    }
}

fn run(db: &TempDb, owner: Option<&str>, args: &[&str]) -> Output {
    let mut command = Command::new(binary_path());
    command
        .env_remove("PROVGRAPH_OWNER")
        .env_remove("PROVGRAPH_DB")
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(&db.0);
    if let Some(owner) = owner {
        command.arg("--owner").arg(owner);
    }
    command.args(args);

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run provgraph {args:?}: {err}"),
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

// Log lines may precede the envelope; it is always the last line.
fn stderr_envelope(output: &Output) -> Value {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().rev().find(|line| !line.trim().is_empty());
    match last.map(serde_json::from_str::<Value>) {
        Some(Ok(value)) => value,
        _ => panic!("expected a JSON error envelope on stderr, got: {stderr}"),
    }
}

fn assert_schema(schema_name: &str, value: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_name);
    let body = fs::read_to_string(&schema_path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", schema_path.display()));
    let schema: Value = serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", schema_path.display()));
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile {}: {err}", schema_path.display()));
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!(
            "schema validation failed for {schema_name}:\n{}\nvalue={value}",
            errors.join("\n")
        );
    }
}

fn assert_failure(output: &Output, exit: i32, code: &str) {
    assert_eq!(
        output.status.code(),
        Some(exit),
        "unexpected exit status; stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let envelope = stderr_envelope(output);
    assert_schema("error-envelope.schema.json", &envelope);
    assert_eq!(envelope["code"], json!(code));
}

#[test]
fn help_lists_expected_subcommands() {
    let output = match Command::new(binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in [
        "register",
        "connect",
        "artifacts",
        "pipelines",
        "connections",
        "stats",
    ] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn argument_errors_emit_validation_envelope() {
    let db = TempDb::new("usage");
    assert_failure(&run(&db, None, &["frobnicate"]), 2, "validation");
    assert_failure(
        &run(&db, Some("u1"), &["register", "--name", "A", "--type", "spreadsheet"]),
        2,
        "validation",
    );
}

#[test]
fn pipeline_registration_emits_contract_json() {
    let db = TempDb::new("wpf");

    let first = run(
        &db,
        Some("u1"),
        &[
            "--json", "register", "--name", "raw.csv", "--type", "dataset", "--pipeline", "WPF",
        ],
    );
    assert!(first.status.success());
    let summary = stdout_json(&first);
    assert_schema("mutation-summary.schema.json", &summary);
    assert_eq!(summary["facts"][1], json!({"fact": "pipeline_created", "pipeline": "WPF"}));

    let second = run(
        &db,
        Some("u1"),
        &[
            "--json",
            "register",
            "--name",
            "clean.csv",
            "--type",
            "dataset",
            "--pipeline",
            "WPF",
            "--source",
            "raw.csv",
        ],
    );
    assert!(second.status.success());
    let summary = stdout_json(&second);
    assert_schema("mutation-summary.schema.json", &summary);

    let listed = run(&db, None, &["connections", "list", "--pipeline", "WPF"]);
    assert!(listed.status.success());
    let connections = stdout_json(&listed);
    assert_schema("connection-list.schema.json", &connections);
    assert_eq!(connections.as_array().map(Vec::len), Some(1));
    assert_eq!(connections[0]["source"]["name"], json!("raw.csv"));
    assert_eq!(connections[0]["target"]["name"], json!("clean.csv"));

    let repeated = run(
        &db,
        Some("u1"),
        &[
            "--json",
            "register",
            "--name",
            "clean.csv",
            "--type",
            "dataset",
            "--pipeline",
            "WPF",
            "--source",
            "raw.csv",
        ],
    );
    assert!(repeated.status.success());
    let listed = run(&db, None, &["connections", "list"]);
    assert_eq!(stdout_json(&listed).as_array().map(Vec::len), Some(1));
}

#[test]
fn failures_emit_error_envelope_and_exit_codes() {
    let db = TempDb::new("errors");
    let setup = run(
        &db,
        Some("owner1"),
        &["register", "--name", "A", "--type", "code", "--pipeline", "P"],
    );
    assert!(setup.status.success());

    assert_failure(
        &run(
            &db,
            Some("owner2"),
            &["register", "--name", "B", "--type", "code", "--pipeline", "P"],
        ),
        4,
        "permission_denied",
    );
    assert_failure(&run(&db, Some("owner1"), &["pipelines", "remove", "P"]), 5, "not_empty");
    assert_failure(&run(&db, None, &["artifacts", "show", "ghost"]), 3, "not_found");
    assert_failure(
        &run(&db, None, &["register", "--name", "C", "--type", "code"]),
        2,
        "validation",
    );
    assert_failure(
        &run(
            &db,
            Some("owner1"),
            &["register", "--name", "C", "--type", "code", "--source", "A"],
        ),
        2,
        "validation",
    );

    let rejected = run(&db, None, &["artifacts", "show", "B"]);
    assert_eq!(rejected.status.code(), Some(3));
}

#[test]
fn removal_renders_plain_text_summaries() {
    let db = TempDb::new("remove");
    for args in [
        &["register", "--name", "A", "--type", "dataset", "--pipeline", "P"][..],
        &[
            "register", "--name", "B", "--type", "model", "--pipeline", "P", "--source", "A",
        ][..],
    ] {
        assert!(run(&db, Some("u1"), args).status.success());
    }

    let removed = run(&db, Some("u1"), &["artifacts", "remove", "A"]);
    assert!(removed.status.success());
    assert_eq!(
        String::from_utf8_lossy(&removed.stdout),
        "DELETED artifact A (1 connections, 1 pipeline memberships removed).\n"
    );

    assert!(run(&db, Some("u1"), &["artifacts", "remove", "B"]).status.success());
    let pipeline = run(&db, Some("u1"), &["pipelines", "remove", "P"]);
    assert!(pipeline.status.success());
    assert_eq!(
        String::from_utf8_lossy(&pipeline.stdout),
        "DELETED pipeline P (0 connections removed).\n"
    );

    let stats = stdout_json(&run(&db, None, &["stats"]));
    assert_eq!(
        stats,
        json!({"artifacts": 0, "pipelines": 0, "connections": 0, "memberships": 0})
    );
}

#[test]
fn new_pipeline_source_flag_selects_link_behavior() {
    let db = TempDb::new("policy");
    assert!(run(&db, Some("u1"), &["register", "--name", "A", "--type", "dataset"])
        .status
        .success());

    let deferred = run(
        &db,
        Some("u1"),
        &[
            "register", "--name", "B", "--type", "model", "--pipeline", "P", "--source", "A",
        ],
    );
    assert!(deferred.status.success());
    assert!(String::from_utf8_lossy(&deferred.stdout)
        .contains("Source A was not linked: pipeline P was created by this call."));

    let linked = run(
        &db,
        Some("u1"),
        &[
            "--new-pipeline-source",
            "link",
            "register",
            "--name",
            "C",
            "--type",
            "model",
            "--pipeline",
            "Q",
            "--source",
            "A",
        ],
    );
    assert!(linked.status.success());

    let connections = stdout_json(&run(&db, None, &["connections", "list"]));
    assert_eq!(connections.as_array().map(Vec::len), Some(1));
    assert_eq!(connections[0]["pipeline"]["name"], json!("Q"));
}
