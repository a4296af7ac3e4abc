use super::{error_body, PersistentService};
use crate::message::body_type;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// A pure key-value state machine supporting `read`, `write` and `cas`
/// (with an optional `create_if_not_exists`). Keys may be any JSON value;
/// they are stored under their canonical JSON rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistentKV {
    m: BTreeMap<String, Value>,
}

/// Canonical storage key for a JSON key value.
pub(crate) fn canonical_key(key: &Value) -> String {
    key.to_string()
}

impl PersistentKV {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.m.get(&canonical_key(key))
    }
}

impl PersistentService for PersistentKV {
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
            Some("write") => {
                let mut next = self.clone();
                next.m
                    .insert(canonical_key(key), body["value"].clone());
                (next, json!({"type": "write_ok"}))
            }
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
                            let mut next = self.clone();
                            next.m.insert(canonical_key(key), to.clone());
                            (next, json!({"type": "cas_ok"}))
                        } else {
                            (
                                self.clone(),
                                error_body(20, &format!("key {} does not exist", key)),
                            )
                        }
                    }
                    Some(current) if current == from => {
                        let mut next = self.clone();
                        next.m.insert(canonical_key(key), to.clone());
                        (next, json!({"type": "cas_ok"}))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn read(key: &str) -> Value {
        json!({"type": "read", "key": key})
    }

    #[test]
    fn write_then_read() {
        let kv = PersistentKV::new();
        let (kv, resp) = kv.handle("c1", &json!({"type": "write", "key": "x", "value": 5}));
        assert_eq!(resp["type"], "write_ok");

        let (_, resp) = kv.handle("c1", &read("x"));
        assert_eq!(resp["type"], "read_ok");
        assert_eq!(resp["value"], 5);
    }

    #[test]
    fn read_missing_key() {
        let kv = PersistentKV::new();
        let (_, resp) = kv.handle("c1", &read("x"));
        assert_eq!(resp["type"], "error");
        assert_eq!(resp["code"], 20);
    }

    #[test]
    fn cas_flow() {
        let kv = PersistentKV::new();

        // missing key without the create flag
        let (kv, resp) =
            kv.handle("c1", &json!({"type": "cas", "key": "x", "from": 1, "to": 2}));
        assert_eq!(resp["code"], 20);

        // missing key with the create flag creates
        let (kv, resp) = kv.handle(
            "c1",
            &json!({"type": "cas", "key": "x", "from": 1, "to": 2,
                    "create_if_not_exists": true}),
        );
        assert_eq!(resp["type"], "cas_ok");
        assert_eq!(kv.get(&json!("x")), Some(&json!(2)));

        // mismatch
        let (kv, resp) =
            kv.handle("c1", &json!({"type": "cas", "key": "x", "from": 1, "to": 3}));
        assert_eq!(resp["code"], 22);

        // match swings the value
        let (kv, resp) =
            kv.handle("c1", &json!({"type": "cas", "key": "x", "from": 2, "to": 3}));
        assert_eq!(resp["type"], "cas_ok");
        assert_eq!(kv.get(&json!("x")), Some(&json!(3)));
    }

    #[test]
    fn keys_are_typed() {
        // the string "1" and the integer 1 are distinct keys
        let kv = PersistentKV::new();
        let (kv, _) = kv.handle("c1", &json!({"type": "write", "key": "1", "value": "s"}));
        let (kv, _) = kv.handle("c1", &json!({"type": "write", "key": 1, "value": "i"}));
        assert_eq!(kv.get(&json!("1")), Some(&json!("s")));
        assert_eq!(kv.get(&json!(1)), Some(&json!("i")));
    }

    #[test]
    fn unsupported_op() {
        let kv = PersistentKV::new();
        let (_, resp) = kv.handle("c1", &json!({"type": "frobnicate", "key": "x"}));
        assert_eq!(resp["code"], 10);
    }
}
