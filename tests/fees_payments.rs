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
    let exe = env!("CARGO_BIN_EXE_schooldeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schooldeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request_raw(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn setup(
    prefix: &str,
) -> (Child, ChildStdin, BufReader<ChildStdout>, String, String) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "name": "SS 3A" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.create",
        json!({
            "firstName": "Ibrahim",
            "lastName": "Yusuf",
            "admissionNo": "ADM-0800",
            "classId": class_id
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    (child, stdin, reader, class_id, student_id)
}

#[test]
fn payments_walk_the_fee_from_unpaid_to_paid() {
    let (_child, mut stdin, mut reader, _class_id, student_id) =
        setup("schooldesk-fees-walk");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "fees.create",
        json!({
            "studentId": student_id,
            "description": "Term 1 tuition",
            "amountDue": 50000.0,
            "term": "Term 1",
            "session": "2025/2026"
        }),
    );
    let fee_id = created
        .get("feeId")
        .and_then(|v| v.as_str())
        .expect("feeId")
        .to_string();
    assert_eq!(created.get("status").and_then(|v| v.as_str()), Some("unpaid"));

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.recordPayment",
        json!({
            "feeId": fee_id,
            "amount": 20000.0,
            "receivedBy": "Bursar Adamu",
            "method": "transfer",
            "date": "2025-09-10"
        }),
    );
    assert_eq!(first.get("status").and_then(|v| v.as_str()), Some("partial"));
    assert_eq!(first.get("amountPaid").and_then(|v| v.as_f64()), Some(20000.0));
    assert_eq!(first.get("balance").and_then(|v| v.as_f64()), Some(30000.0));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.recordPayment",
        json!({
            "feeId": fee_id,
            "amount": 30000.0,
            "receivedBy": "Bursar Adamu",
            "date": "2025-10-02"
        }),
    );
    assert_eq!(second.get("status").and_then(|v| v.as_str()), Some("paid"));
    assert_eq!(second.get("balance").and_then(|v| v.as_f64()), Some(0.0));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.list",
        json!({ "studentId": student_id, "term": "Term 1", "session": "2025/2026" }),
    );
    assert_eq!(listed.get("totalDue").and_then(|v| v.as_f64()), Some(50000.0));
    assert_eq!(listed.get("totalPaid").and_then(|v| v.as_f64()), Some(50000.0));
    assert_eq!(listed.get("outstanding").and_then(|v| v.as_f64()), Some(0.0));
    let fee = listed
        .pointer("/fees/0")
        .expect("one fee row");
    assert_eq!(fee.get("status").and_then(|v| v.as_str()), Some("paid"));
    assert_eq!(
        fee.get("payments").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );
    assert_eq!(
        fee.pointer("/payments/0/method").and_then(|v| v.as_str()),
        Some("transfer")
    );
}

#[test]
fn fee_amounts_must_be_positive() {
    let (_child, mut stdin, mut reader, class_id, student_id) =
        setup("schooldesk-fees-validate");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "1",
        "fees.create",
        json!({
            "studentId": student_id,
            "description": "Lost textbook",
            "amountDue": 0.0,
            "term": "Term 1",
            "session": "2025/2026"
        }),
    );
    assert_eq!(code, "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.create",
        json!({
            "studentId": student_id,
            "description": "Lost textbook",
            "amountDue": 3500.0,
            "term": "Term 1",
            "session": "2025/2026"
        }),
    );
    let fee_id = created.get("feeId").and_then(|v| v.as_str()).expect("feeId");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "fees.recordPayment",
        json!({ "feeId": fee_id, "amount": -100.0, "receivedBy": "Bursar Adamu" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "fees.recordPayment",
        json!({ "feeId": "no-such-fee", "amount": 100.0, "receivedBy": "Bursar Adamu" }),
    );
    assert_eq!(code, "not_found");

    // Class-level listing still finds the single unpaid fee.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(listed.get("totalDue").and_then(|v| v.as_f64()), Some(3500.0));
    assert_eq!(
        listed.get("outstanding").and_then(|v| v.as_f64()),
        Some(3500.0)
    );
    assert_eq!(
        listed.pointer("/fees/0/status").and_then(|v| v.as_str()),
        Some("unpaid")
    );
}
