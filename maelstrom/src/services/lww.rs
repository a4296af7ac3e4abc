use super::kv::canonical_key;
use super::{error_body, Mergeable, PersistentService};
use crate::message::body_type;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Stamped {
    ts: u64,
    value: Value,
}

/// A last-write-wins key-value state machine: every write is stamped from a
/// local clock, and `merge` resolves per key by the highest stamp. Used by
/// the eventually-consistent `lww-kv` service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LWWKV {
    clock: u64,
    m: BTreeMap<String, Stamped>,
}

impl LWWKV {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.m.get(&canonical_key(key)).map(|stamped| &stamped.value)
    }

    fn put(&self, key: &Value, value: Value) -> Self {
        let mut next = self.clone();
        next.clock += 1;
        let ts = next.clock;
        next.m.insert(canonical_key(key), Stamped { ts, value });
        next
    }
}

impl PersistentService for LWWKV {
    fn handle(&self, _from: &str, body: &Value) -> (Self, Value) {
        let key = match body.get("key") {
            Some(key) => key,
            None => {
                return (
                    self.clone(),
                    error_body(12, "kv request without a key"),
                )
            }
        };
        match body_type(body) {
            Some("read") => match self.get(key) {
                Some(value) => (
                    self.clone(),
                    json!({"type": "read_ok", "value": value}),
                ),
                None => (
                    self.clone(),
                    error_body(20, &format!("key {} does not exist", key)),
                ),
            },
            Some("write") => (self.put(key, body["value"].clone()), json!({"type": "write_ok"})),
            Some("cas") => {
                let from = &body["from"];
                let to = &body["to"];
                match self.get(key) {
                    None => {
                        let create = body
                            .get("create_if_not_exists")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                        if create {
                            (self.put(key, to.clone()), json!({"type": "cas_ok"}))
                        } else {
                            (
                                self.clone(),
                                error_body(20, &format!("key {} does not exist", key)),
                            )
                        }
                    }
                    Some(current) if current == from => {
                        (self.put(key, to.clone()), json!({"type": "cas_ok"}))
                    }
                    Some(current) => (
                        self.clone(),
                        error_body(
                            22,
                            &format!("expected {} but had {}", from, current),
                        ),
                    ),
                }
            }
            other => (
                self.clone(),
                error_body(10, &format!("unsupported kv operation {:?}", other)),
            ),
        }
    }
}

impl Mergeable for LWWKV {
    /// Per-key last-write-wins; `self` is the receiving replica and keeps
    /// its value on stamp ties, which makes the merge stable under
    /// repetition.
    fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.clock = merged.clock.max(other.clock);
        for (key, theirs) in &other.m {
            match merged.m.get(key) {
                Some(ours) if ours.ts >= theirs.ts => {}
                _ => {
                    merged.m.insert(key.clone(), theirs.clone());
                }
            }
        }
        merged
    }
}
