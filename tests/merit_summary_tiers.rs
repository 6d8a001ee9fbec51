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

struct Sidecar {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u32,
}

impl Sidecar {
    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let payload = json!({ "id": self.next_id.to_string(), "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn award(&mut self, student: &str, points: i64, reason: &str) -> serde_json::Value {
        self.call(
            "merit.award",
            json!({
                "studentId": student,
                "points": points,
                "reason": reason,
                "awardedBy": "Mr Danladi",
                "term": "Term 1",
                "session": "2025/2026"
            }),
        )
    }
}

fn setup(prefix: &str) -> (Child, Sidecar, String) {
    let workspace = temp_dir(prefix);
    let (child, stdin, reader) = spawn_sidecar();
    let mut sidecar = Sidecar {
        stdin,
        reader,
        next_id: 0,
    };
    let _ = sidecar.call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = sidecar.call("classes.create", json!({ "name": "JSS 1C" }));
    let class_id = class.get("classId").and_then(|v| v.as_str()).expect("classId");
    let created = sidecar.call(
        "students.create",
        json!({
            "firstName": "Seyi",
            "lastName": "Adewale",
            "admissionNo": "ADM-0600",
            "classId": class_id
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    (child, sidecar, student_id)
}

#[test]
fn running_total_never_drops_below_zero() {
    let (_child, mut sidecar, student) = setup("schooldesk-merit-clamp");

    let first = sidecar.award(&student, 10, "Class monitor duties");
    assert_eq!(first.get("total").and_then(|v| v.as_i64()), Some(10));
    assert_eq!(first.get("tier").and_then(|v| v.as_str()), Some("Bronze"));

    // A big demerit clamps at zero instead of going negative.
    let second = sidecar.award(&student, -50, "Fighting during break");
    assert_eq!(second.get("total").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(second.get("tier").and_then(|v| v.as_str()), Some("None"));

    let summary = sidecar.call(
        "merit.summary",
        json!({ "studentId": student, "term": "Term 1", "session": "2025/2026" }),
    );
    assert_eq!(
        summary.pointer("/summary/total").and_then(|v| v.as_i64()),
        Some(0)
    );
    assert_eq!(
        summary.pointer("/summary/tier").and_then(|v| v.as_str()),
        Some("None")
    );

    // The raw ledger still tells the whole story.
    let listed = sidecar.call(
        "merit.list",
        json!({ "studentId": student, "term": "Term 1", "session": "2025/2026" }),
    );
    assert_eq!(listed.get("merit").and_then(|v| v.as_i64()), Some(10));
    assert_eq!(listed.get("demerit").and_then(|v| v.as_i64()), Some(50));
    assert_eq!(listed.get("net").and_then(|v| v.as_i64()), Some(-40));
    assert_eq!(
        listed.get("entries").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );
}

#[test]
fn tiers_climb_with_the_total() {
    let (_child, mut sidecar, student) = setup("schooldesk-merit-ladder");

    let steps: [(i64, i64, &str); 4] = [
        (10, 10, "Bronze"),
        (20, 30, "Silver"),
        (30, 60, "Gold"),
        (40, 100, "Platinum"),
    ];
    for (points, expected_total, expected_tier) in steps {
        let awarded = sidecar.award(&student, points, "House competition");
        assert_eq!(
            awarded.get("total").and_then(|v| v.as_i64()),
            Some(expected_total)
        );
        assert_eq!(
            awarded.get("tier").and_then(|v| v.as_str()),
            Some(expected_tier)
        );
    }

    // A fresh period starts its own summary.
    let other_term = sidecar.call(
        "merit.summary",
        json!({ "studentId": student, "term": "Term 2", "session": "2025/2026" }),
    );
    assert_eq!(
        other_term.pointer("/summary/total").and_then(|v| v.as_i64()),
        Some(0)
    );
}
