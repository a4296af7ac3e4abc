//! A reference broadcast node: gossips every value it learns to its
//! topology neighbors and retries unacknowledged gossip from a background
//! thread. Survives partitions, so the broadcast checker stays green under
//! the partition nemesis.

use maelstrom::message::{with_in_reply_to, with_msg_id, Message};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

/// How often unacknowledged gossip is re-sent.
const RETRY_EVERY: Duration = Duration::from_millis(500);

struct Node {
    id: String,
    neighbors: Vec<String>,
    messages: BTreeSet<i64>,
    next_msg_id: u64,
    /// gossip msg_id -> (neighbor, value), until acknowledged
    pending: HashMap<u64, (String, i64)>,
}

impl Node {
    fn new() -> Self {
        Self {
            id: String::new(),
            neighbors: Vec::new(),
            messages: BTreeSet::new(),
            next_msg_id: 0,
            pending: HashMap::new(),
        }
    }

    fn body(&mut self, body: Value, in_reply_to: Option<u64>) -> Value {
        self.next_msg_id += 1;
        let mut body = with_msg_id(body, self.next_msg_id);
        if let Some(msg_id) = in_reply_to {
            body = with_in_reply_to(body, msg_id);
        }
        body
    }

    fn message(&mut self, dest: &str, body: Value, in_reply_to: Option<u64>) -> Message {
        let body = self.body(body, in_reply_to);
        Message::new(self.id.clone(), dest.to_string(), body)
    }

    fn gossip(&mut self, out: &mut Vec<Message>, value: i64, skip: &str) {
        for neighbor in self.neighbors.clone() {
            if neighbor == skip {
                continue;
            }
            let msg = self.message(&neighbor, json!({"type": "gossip", "message": value}), None);
            self.pending.insert(self.next_msg_id, (neighbor, value));
            out.push(msg);
        }
    }

    /// Re-sends everything unacknowledged, under fresh msg_ids.
    fn retry(&mut self) -> Vec<Message> {
        let pending: Vec<_> = self.pending.drain().map(|(_, entry)| entry).collect();
        let mut out = Vec::with_capacity(pending.len());
        for (neighbor, value) in pending {
            let msg = self.message(&neighbor, json!({"type": "gossip", "message": value}), None);
            self.pending.insert(self.next_msg_id, (neighbor, value));
            out.push(msg);
        }
        out
    }

    fn handle(&mut self, request: &Message) -> Vec<Message> {
        let mut out = Vec::new();
        let reply_to = request.msg_id();
        let src = request.src.clone();
        match request.msg_type() {
            Some("init") => {
                self.id = request.body["node_id"].as_str().unwrap_or_default().to_string();
                out.push(self.message(&src, json!({"type": "init_ok"}), reply_to));
            }
            Some("topology") => {
                self.neighbors = request.body["topology"][&self.id]
                    .as_array()
                    .map(|peers| {
                        peers
                            .iter()
                            .filter_map(|p| p.as_str())
                            .map(|p| p.to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                out.push(self.message(&src, json!({"type": "topology_ok"}), reply_to));
            }
            Some("broadcast") => {
                let value = request.body["message"].as_i64().unwrap_or(0);
                if self.messages.insert(value) {
                    self.gossip(&mut out, value, &src);
                }
                out.push(self.message(&src, json!({"type": "broadcast_ok"}), reply_to));
            }
            Some("gossip") => {
                let value = request.body["message"].as_i64().unwrap_or(0);
                if self.messages.insert(value) {
                    self.gossip(&mut out, value, &src);
                }
                out.push(self.message(&src, json!({"type": "gossip_ok"}), reply_to));
            }
            Some("gossip_ok") => {
                if let Some(acked) = request.in_reply_to() {
                    self.pending.remove(&acked);
                }
            }
            Some("read") => {
                let messages: Vec<i64> = self.messages.iter().copied().collect();
                out.push(self.message(
                    &src,
                    json!({"type": "read_ok", "messages": messages}),
                    reply_to,
                ));
            }
            Some(other) => {
                let text = format!("unsupported operation {}", other);
                out.push(self.message(
                    &src,
                    json!({"type": "error", "code": 10, "text": text}),
                    reply_to,
                ));
            }
            None => {}
        }
        out
    }
}

fn write_messages(messages: &[Message]) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for message in messages {
        if serde_json::to_writer(&mut out, message).is_ok() {
            let _ = out.write_all(b"\n");
        }
    }
    let _ = out.flush();
}

fn main() {
    let node = Arc::new(Mutex::new(Node::new()));

    // background retries keep gossip flowing even when stdin is quiet
    {
        let node = node.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(RETRY_EVERY);
            let out = node.lock().retry();
            write_messages(&out);
        });
    }

    let stdin = std::io::stdin();
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
        let out = node.lock().handle(&request);
        write_messages(&out);
    }
}
