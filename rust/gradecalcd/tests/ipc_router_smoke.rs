use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradecalcd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradecalcd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_line_json(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_line_json(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradecalc-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["workspacePath"].is_null());

    let selected = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], json!(true));
    assert!(workspace.join("gradecalc.sqlite3").exists());

    let _ = request(&mut stdin, &mut reader, "3", "calc.config.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "4",
        "grading.recompute",
        json!({
            "pointsEarned": 1,
            "oldPoints": 0,
            "oldScore": { "points": 1, "percentage": 10 },
            "question": { "points": 2 }
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "grading.recomputeBatch",
        json!({ "edits": [] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "schemes.aggregate",
        json!({ "testGroups": [] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "schemes.overall",
        json!({ "subjects": [] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "schemes.validateWeights",
        json!({ "weights": [] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "schemes.prepareSubmission",
        json!({ "subjectId": "s", "sessionClassId": "c", "weights": [] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "calc.config.clearOverride",
        json!({}),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_method_and_bad_json_are_reported() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let bad = read_line_json(&mut reader);
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("bad_json"));

    // Blank lines are skipped without a reply.
    writeln!(stdin).expect("write blank");
    let payload = json!({ "id": "u1", "method": "grades.publish", "params": {} });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush");
    let unknown = read_line_json(&mut reader);
    assert_eq!(unknown["id"], json!("u1"));
    assert_eq!(unknown["ok"], json!(false));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));

    drop(stdin);
    let _ = child.wait();
}
