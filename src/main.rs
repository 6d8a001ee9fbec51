mod backup;
mod grading;
mod ipc;
mod records;
mod reports;
mod store;

use std::io::{self, BufRead, Write};

fn main() {
    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // Can't reply with an id we failed to parse; answer anonymously.
            Err(e) => serde_json::json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() }
            }),
        };
        let wire = serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        let _ = writeln!(stdout, "{}", wire);
        let _ = stdout.flush();
    }
}
