use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

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

#[test]
fn bundle_round_trip_restores_subjects_and_events() {
    let source = temp_dir("gradetrack-backup-src");
    let destination = temp_dir("gradetrack-backup-dst");
    let bundle = source.join("year.gtbackup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "name": "Geography" }),
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
        "evaluations.add",
        json!({
            "subjectId": subject_id,
            "trimester": 1,
            "name": "Map quiz",
            "maxValue": 100,
            "earnedGrade": 88
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "events.create",
        json!({
            "date": "2026-10-05",
            "subjectId": subject_id,
            "content": "capitals test",
            "classNumber": "9C"
        }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("gradetrack-workspace-v1"));
    assert_eq!(exported["entryCount"], json!(3));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": destination.to_string_lossy(),
            "inPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(imported["eventsRestored"], json!(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "workspace.select",
        json!({ "path": destination.to_string_lossy() }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "8", "subjects.list", json!({}));
    let subjects = listed["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0]["name"], json!("Geography"));
    assert_eq!(subjects[0]["evaluationCount"], json!(1));

    let events = request_ok(&mut stdin, &mut reader, "9", "events.list", json!({}));
    let events = events["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["content"], json!("capitals test"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(destination);
}

/// Rebuilds a bundle with one flipped byte in the database entry while the
/// manifest keeps the original digest.
fn tamper_with_db_entry(original: &Path, tampered: &Path) {
    let mut archive = ZipArchive::new(File::open(original).expect("open bundle"))
        .expect("parse bundle");
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).expect("bundle entry");
        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).expect("read entry");
        entries.push((name, bytes));
    }

    let mut zip = ZipWriter::new(File::create(tampered).expect("create tampered bundle"));
    let opts = FileOptions::default();
    for (name, mut bytes) in entries {
        if name == "db/gradetrack.sqlite3" {
            let last = bytes.len() - 1;
            bytes[last] ^= 0xff;
        }
        zip.start_file(name.as_str(), opts).expect("start entry");
        zip.write_all(&bytes).expect("write entry");
    }
    zip.finish().expect("finish tampered bundle");
}

#[test]
fn tampered_bundles_are_rejected_on_digest_mismatch() {
    let source = temp_dir("gradetrack-backup-tamper-src");
    let destination = temp_dir("gradetrack-backup-tamper-dst");
    let bundle = source.join("honest.zip");
    let tampered = source.join("tampered.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "name": "Music" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );

    tamper_with_db_entry(&bundle, &tampered);

    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "4",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": destination.to_string_lossy(),
            "inPath": tampered.to_string_lossy()
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    let code = resp
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    assert_eq!(code, "backup_failed");
    // Nothing was written into the destination workspace.
    assert!(!destination.join("gradetrack.sqlite3").exists());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(destination);
}
