mod calc;
mod export;
mod ipc;
mod jobs;
mod model;
mod store;

use std::io::{self, BufRead, Write};

fn main() {
    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No request id to echo; reply with an empty one. The
                // serde message can embed quotes, so the envelope goes
                // through the serializer like every other reply.
                let reply = ipc::err("", "bad_json", e.to_string(), None);
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::to_string(&reply).unwrap_or_else(|_| "{\"ok\":false}".to_string())
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
