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
    let exe = env!("CARGO_BIN_EXE_gradetrackd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradetrackd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn raw_request(
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

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = raw_request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn calendar_crud_keeps_date_order() {
    let workspace = temp_dir("gradetrack-events");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // The event store is workspace-scoped too.
    let resp = raw_request(&mut stdin, &mut reader, "0", "events.list", json!({}));
    assert_eq!(error_code(&resp), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let later = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "events.create",
        json!({
            "date": "2026-06-20",
            "subjectId": "subject-a",
            "content": "final exam",
            "classNumber": "8B"
        }),
    );
    let later_id = later
        .get("eventId")
        .and_then(|v| v.as_str())
        .expect("eventId")
        .to_string();
    let earlier = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "events.create",
        json!({
            "date": "2026-03-02",
            "subjectId": "subject-b",
            "content": "oral presentation",
            "classNumber": "8B"
        }),
    );
    let earlier_id = earlier
        .get("eventId")
        .and_then(|v| v.as_str())
        .expect("eventId")
        .to_string();

    let listed = request_ok(&mut stdin, &mut reader, "4", "events.list", json!({}));
    let events = listed["events"].as_array().expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["id"], json!(earlier_id));
    assert_eq!(events[1]["id"], json!(later_id));

    // Malformed dates never reach the store.
    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "5",
        "events.create",
        json!({
            "date": "2026-13-01",
            "subjectId": "subject-a",
            "content": "impossible month"
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "events.update",
        json!({
            "eventId": earlier_id,
            "patch": { "date": "2026-07-01", "content": "oral presentation (moved)" }
        }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "7", "events.list", json!({}));
    let events = listed["events"].as_array().expect("events");
    // The moved event re-sorts to the back.
    assert_eq!(events[1]["id"], json!(earlier_id));
    assert_eq!(events[1]["content"], json!("oral presentation (moved)"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "events.delete",
        json!({ "eventId": later_id }),
    );
    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "9",
        "events.delete",
        json!({ "eventId": later_id }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let listed = request_ok(&mut stdin, &mut reader, "10", "events.list", json!({}));
    assert_eq!(listed["events"].as_array().expect("events").len(), 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn events_survive_their_subject() {
    let workspace = temp_dir("gradetrack-events-dangling");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "name": "Biology" }),
    );
    let subject_id = created
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "events.create",
        json!({
            "date": "2026-04-14",
            "subjectId": subject_id,
            "content": "cells test",
            "classNumber": "7A"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.delete",
        json!({ "subjectId": subject_id }),
    );

    // The reference is weak: the event remains, pointing at a gone subject.
    let listed = request_ok(&mut stdin, &mut reader, "5", "events.list", json!({}));
    let events = listed["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["subjectId"], json!(subject_id));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
