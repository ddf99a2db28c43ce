use chrono::{Datelike, Utc};
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
    let exe = env!("CARGO_BIN_EXE_schooladmind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schooladmind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
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
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
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

fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, path: &PathBuf) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": path.to_string_lossy() }),
    );
}

fn student_params(name: &str, email: &str, roll_no: &str) -> serde_json::Value {
    json!({
        "name": name,
        "email": email,
        "className": "Class 1",
        "rollNo": roll_no,
        "dob": "2015-06-01"
    })
}

#[test]
fn duplicate_email_is_rejected_case_insensitively() {
    let workspace = temp_dir("schooladmin-dup-email");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        student_params("Asha Verma", "Asha.Verma@Example.com", "1A01"),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        student_params("Other Kid", "asha.verma@example.com", "1A02"),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&resp), "duplicate_email");

    // A genuinely different address in any casing is fine.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        student_params("Other Kid", "Asha.V@Example.com", "1A02"),
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn phone_is_normalized_for_format_and_matched_verbatim_for_uniqueness() {
    let workspace = temp_dir("schooladmin-phone");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let mut params = student_params("Asha Verma", "asha@example.com", "1A01");
    params["phone"] = json!("+91 98765-43210");
    let _ = request_ok(&mut stdin, &mut reader, "1", "students.create", params);

    // Same raw phone string for a different candidate.
    let mut dup = student_params("Other Kid", "other@example.com", "1A02");
    dup["phone"] = json!("+91 98765-43210");
    let resp = request(&mut stdin, &mut reader, "2", "students.create", dup);
    assert_eq!(error_code(&resp), "duplicate_phone");

    // Garbage that does not normalize to a 10-digit number.
    let mut bad = student_params("Bad Phone", "bad@example.com", "1A03");
    bad["phone"] = json!("12345");
    let resp = request(&mut stdin, &mut reader, "3", "students.create", bad);
    assert_eq!(error_code(&resp), "invalid_phone_format");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn dob_must_be_in_the_past_and_old_enough() {
    let workspace = temp_dir("schooladmin-dob");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let today = Utc::now().date_naive();

    let mut future = student_params("Future Kid", "future@example.com", "1A01");
    future["dob"] = json!(today
        .succ_opt()
        .expect("tomorrow")
        .format("%Y-%m-%d")
        .to_string());
    let resp = request(&mut stdin, &mut reader, "1", "students.create", future);
    assert_eq!(error_code(&resp), "future_dob");

    let mut young = student_params("Young Kid", "young@example.com", "1A01");
    young["dob"] = json!(format!("{}-01-01", today.year() - 3));
    let resp = request(&mut stdin, &mut reader, "2", "students.create", young);
    assert_eq!(error_code(&resp), "too_young");

    // Calendar-year arithmetic: born any time four years back counts as 4.
    let mut ok_kid = student_params("Old Enough", "oldenough@example.com", "1A01");
    ok_kid["dob"] = json!(format!("{}-12-31", today.year() - 4));
    let _ = request_ok(&mut stdin, &mut reader, "3", "students.create", ok_kid);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn first_violated_rule_wins() {
    let workspace = temp_dir("schooladmin-rule-order");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    // Name missing and email malformed; the name rule fires first.
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({
            "name": "   ",
            "email": "not-an-email",
            "className": "Class 1",
            "rollNo": "1A01",
            "dob": "2015-06-01"
        }),
    );
    assert_eq!(error_code(&resp), "missing_name");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "name": "Asha",
            "email": "not-an-email",
            "className": "Class 1",
            "rollNo": "1A01",
            "dob": "2015-06-01"
        }),
    );
    assert_eq!(error_code(&resp), "invalid_email_format");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn create_echoes_the_stored_trimmed_fields() {
    let workspace = temp_dir("schooladmin-echo-trim");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({
            "name": "  Asha Verma  ",
            "email": " asha@example.com ",
            "className": "Class 1",
            "rollNo": " 1A01 ",
            "dob": " 2015-06-01 "
        }),
    );
    assert_eq!(
        created.get("name").and_then(|v| v.as_str()),
        Some("Asha Verma")
    );
    assert_eq!(
        created.get("email").and_then(|v| v.as_str()),
        Some("asha@example.com")
    );
    assert_eq!(created.get("rollNo").and_then(|v| v.as_str()), Some("1A01"));
    assert_eq!(created.get("dob").and_then(|v| v.as_str()), Some("2015-06-01"));

    // The listing reflects the same persisted form.
    let listing = request_ok(&mut stdin, &mut reader, "2", "students.list", json!({}));
    let rows = listing
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("students array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("rollNo").and_then(|v| v.as_str()), Some("1A01"));
    assert_eq!(
        rows[0].get("name").and_then(|v| v.as_str()),
        Some("Asha Verma")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn update_does_not_collide_with_itself() {
    let workspace = temp_dir("schooladmin-update-self");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        student_params("Asha Verma", "asha@example.com", "1A01"),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // Keeping its own email and roll number must not read as a duplicate.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "name": "Asha V. Verma" }
        }),
    );
    assert_eq!(
        updated.get("name").and_then(|v| v.as_str()),
        Some("Asha V. Verma")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
