use crate::message::Message;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Send,
    Recv,
}

/// One side of a message's life: its send, or its receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    /// monotonic nanos
    pub t: u64,
    pub message: Message,
}

/// Append-only record of every send and receive for the duration of a test.
/// Consumed by the net checker once the run is over.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_send(&self, t: u64, message: Message) {
        self.entries.lock().push(Entry {
            kind: EntryKind::Send,
            t,
            message,
        });
    }

    pub fn record_recv(&self, t: u64, message: Message) {
        self.entries.lock().push(Entry {
            kind: EntryKind::Recv,
            t,
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of all entries recorded so far.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashMap;
    use serde_json::json;

    #[test]
    fn send_then_recv() {
        let journal = Journal::new();
        let mut msg = Message::new("c1", "n1", json!({"type": "read", "msg_id": 1}));
        msg.id = Some(1);

        journal.record_send(10, msg.clone());
        journal.record_recv(25, msg);

        let entries = journal.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::Send);
        assert_eq!(entries[1].kind, EntryKind::Recv);
        // sends never come after their receive
        assert!(entries[0].t <= entries[1].t);
    }

    #[test]
    fn one_send_per_message_id() {
        let journal = Journal::new();
        for id in 1..=5u64 {
            let mut msg = Message::new("n1", "n2", json!({"type": "gossip"}));
            msg.id = Some(id);
            journal.record_send(id, msg);
        }

        let mut sends: HashMap<u64, usize> = HashMap::new();
        for entry in journal.snapshot() {
            if entry.kind == EntryKind::Send {
                *sends.entry(entry.message.id.unwrap()).or_default() += 1;
            }
        }
        assert!(sends.values().all(|count| *count == 1));
    }
}
