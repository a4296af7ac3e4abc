use super::{error_body, PersistentService};
use crate::message::body_type;
use serde_json::{json, Value};

/// A monotonic timestamp oracle: each `ts` request observes the counter and
/// advances it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistentTSO {
    next: u64,
}

impl PersistentTSO {
    pub fn new() -> Self {
        Default::default()
    }
}

impl PersistentService for PersistentTSO {
    fn handle(&self, _from: &str, body: &Value) -> (Self, Value) {
        match body_type(body) {
            Some("ts") => {
                let ts = self.next;
                (Self { next: ts + 1 }, json!({"type": "ts_ok", "ts": ts}))
            }
            other => (
                self.clone(),
                error_body(10, &format!("unsupported tso operation {:?}", other)),
            ),
        }
    }
}
