//! A reference node: answers `echo` requests over the stdin/stdout wire
//! protocol. Useful for smoke-testing the harness itself:
//!
//! ```text
//! maelstrom test -w echo --bin target/debug/demo_echo --time-limit 5 --rate 1
//! ```

use maelstrom::message::{with_in_reply_to, with_msg_id, Message};
use serde_json::{json, Value};
use std::io::{BufRead, Write};

struct Node {
    id: String,
    next_msg_id: u64,
}

impl Node {
    fn new() -> Self {
        Self {
            id: String::new(),
            next_msg_id: 0,
        }
    }

    fn reply(&mut self, request: &Message, body: Value) -> Message {
        self.next_msg_id += 1;
        let mut body = with_msg_id(body, self.next_msg_id);
        if let Some(msg_id) = request.msg_id() {
            body = with_in_reply_to(body, msg_id);
        }
        Message::new(self.id.clone(), request.src.clone(), body)
    }

    fn handle(&mut self, request: &Message) -> Option<Message> {
        match request.msg_type() {
            Some("init") => {
                self.id = request.body["node_id"].as_str().unwrap_or_default().to_string();
                Some(self.reply(request, json!({"type": "init_ok"})))
            }
            Some("echo") => {
                let echo = request.body["echo"].clone();
                Some(self.reply(request, json!({"type": "echo_ok", "echo": echo})))
            }
            Some(other) => Some(self.reply(
                request,
                json!({
                    "type": "error",
                    "code": 10,
                    "text": format!("unsupported operation {}", other),
                }),
            )),
            None => None,
        }
    }
}

fn main() {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut node = Node::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let request: Message = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("malformed request {:?}: {}", line, e);
                continue;
            }
        };
        if let Some(response) = node.handle(&request) {
            let mut out = stdout.lock();
            if serde_json::to_writer(&mut out, &response).is_ok() {
                let _ = out.write_all(b"\n");
                let _ = out.flush();
            }
        }
    }
}
