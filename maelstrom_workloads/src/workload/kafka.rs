use super::{request, response};
use crate::checker::completions;
use maelstrom::checker::{CheckCtx, CheckResult, Checker, Validity};
use maelstrom::client::Client;
use maelstrom::config::Config;
use maelstrom::error::RpcError;
use maelstrom::history::OpType;
use maelstrom::rpc::{Registry, RpcDef};
use maelstrom::schema::Schema;
use maelstrom::workload::{FnGenerator, GenOp, Generator, Workload};
use maelstrom::{HashMap, HashSet};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// An append-only offset log per key, in the style of a Kafka topic:
/// `send` appends and returns an offset, `poll` reads from tracked
/// offsets, offsets can be committed and listed.
pub struct Kafka {
    keys: Vec<String>,
    /// per harness-client, per key: the next offset to poll from. The
    /// adapter owns this because clients track their own consumer state.
    polled: Mutex<HashMap<String, BTreeMap<String, u64>>>,
}

impl Kafka {
    pub fn new(key_count: usize) -> Self {
        Self {
            keys: (1..=key_count).map(|i| format!("k{}", i)).collect(),
            polled: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for Kafka {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Workload for Kafka {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn register(&self, registry: &mut Registry) {
        registry.defrpc(RpcDef {
            name: "send",
            doc: "Appends a message to a key's log, returning its offset.",
            request: request("send")
                .req("key", Schema::Str)
                .req("msg", Schema::Int)
                .build(),
            response: response("send_ok").req("offset", Schema::Int).build(),
        });
        registry.defrpc(RpcDef {
            name: "poll",
            doc: "Reads messages from the given per-key offsets onward.",
            request: request("poll")
                .req("offsets", Schema::Map(Box::new(Schema::Int)))
                .build(),
            response: response("poll_ok")
                .req(
                    "msgs",
                    Schema::Map(Box::new(Schema::Array(Box::new(Schema::Tuple(vec![
                        Schema::Int,
                        Schema::Int,
                    ]))))),
                )
                .build(),
        });
        registry.defrpc(RpcDef {
            name: "commit_offsets",
            doc: "Commits consumer offsets for the given keys.",
            request: request("commit_offsets")
                .req("offsets", Schema::Map(Box::new(Schema::Int)))
                .build(),
            response: response("commit_offsets_ok").build(),
        });
        registry.defrpc(RpcDef {
            name: "list_committed_offsets",
            doc: "Lists the committed offsets for the given keys.",
            request: request("list_committed_offsets")
                .req("keys", Schema::Array(Box::new(Schema::Str)))
                .build(),
            response: response("list_committed_offsets_ok")
                .req("offsets", Schema::Map(Box::new(Schema::Int)))
                .build(),
        });
    }

    fn generator(&self, _config: &Config) -> Box<dyn Generator> {
        let keys = self.keys.clone();
        let mut next_msg: HashMap<String, u64> = HashMap::new();
        Box::new(FnGenerator::unbounded(move |rng| {
            let key = keys.choose(rng).expect("at least one key").clone();
            match rng.gen_range(0, 10) {
                0 | 1 => GenOp::new("poll", json!({ "keys": [key] })),
                2 => GenOp::new("commit_offsets", Value::Null),
                3 => GenOp::new("list_committed_offsets", json!({ "keys": keys })),
                _ => {
                    let msg = next_msg.entry(key.clone()).or_insert(0);
                    *msg += 1;
                    GenOp::new("send", json!({"key": key, "msg": *msg}))
                }
            }
        }))
    }

    fn idempotent_fs(&self) -> &'static [&'static str] {
        &["poll", "list_committed_offsets"]
    }

    fn apply(&self, client: &Client, dest: &str, op: &GenOp) -> Result<Value, RpcError> {
        match op.f.as_str() {
            "send" => {
                let resp = client.rpc(
                    dest,
                    json!({
                        "type": "send",
                        "key": op.value["key"],
                        "msg": op.value["msg"],
                    }),
                )?;
                Ok(json!({
                    "key": op.value["key"],
                    "msg": op.value["msg"],
                    "offset": resp["offset"],
                }))
            }
            "poll" => {
                // poll from this client's tracked offsets
                let offsets: BTreeMap<String, u64> = {
                    let polled = self.polled.lock();
                    let mine = polled.get(client.id());
                    op.value["keys"]
                        .as_array()
                        .map(|keys| {
                            keys.iter()
                                .filter_map(|k| k.as_str())
                                .map(|k| {
                                    let from = mine
                                        .and_then(|m| m.get(k))
                                        .copied()
                                        .unwrap_or(0);
                                    (k.to_string(), from)
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                };
                let resp = client.rpc(dest, json!({"type": "poll", "offsets": offsets}))?;

                // advance past everything we saw
                if let Some(msgs) = resp["msgs"].as_object() {
                    let mut polled = self.polled.lock();
                    let mine = polled.entry(client.id().to_string()).or_default();
                    for (key, entries) in msgs {
                        let last = entries
                            .as_array()
                            .and_then(|entries| entries.last())
                            .and_then(|entry| entry.get(0))
                            .and_then(Value::as_u64);
                        if let Some(last) = last {
                            let slot = mine.entry(key.clone()).or_insert(0);
                            *slot = (*slot).max(last + 1);
                        }
                    }
                }
                Ok(json!({"offsets": offsets, "msgs": resp["msgs"]}))
            }
            "commit_offsets" => {
                let offsets: BTreeMap<String, u64> = self
                    .polled
                    .lock()
                    .get(client.id())
                    .cloned()
                    .unwrap_or_default();
                client.rpc(dest, json!({"type": "commit_offsets", "offsets": offsets}))?;
                Ok(json!({ "offsets": offsets }))
            }
            "list_committed_offsets" => {
                let resp = client.rpc(
                    dest,
                    json!({"type": "list_committed_offsets", "keys": op.value["keys"]}),
                )?;
                Ok(json!({"offsets": resp["offsets"]}))
            }
            other => Err(RpcError::malformed(format!("unknown kafka op {}", other))),
        }
    }

    fn checker(&self) -> Box<dyn Checker> {
        Box::new(KafkaChecker)
    }
}

/// Per-key log consistency: offsets assign at most one message, polls move
/// forward per client, acknowledged sends inside the observed window must
/// be seen, and committed offsets cannot come from nowhere.
struct KafkaChecker;

impl Checker for KafkaChecker {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        // (key, offset) -> msg, as established by sends and polls
        let mut assigned: HashMap<(String, u64), Value> = HashMap::new();
        // per key: acked send offsets, and all offsets observed by polls
        let mut acked: HashMap<String, Vec<u64>> = HashMap::new();
        let mut observed: HashMap<String, HashSet<u64>> = HashMap::new();
        // per (process, key): last poll start offset
        let mut poll_cursor: HashMap<(i64, String), u64> = HashMap::new();
        // per key: highest committed offset among acknowledged commits
        let mut committed: HashMap<String, u64> = HashMap::new();
        // indefinite commits carry no offsets in the history, so any of
        // them makes the from-nowhere check inconclusive
        let indefinite_commits = ctx
            .history
            .iter()
            .filter(|op| op.f == "commit_offsets" && op.ty == OpType::Info)
            .count();
        let mut errors: Vec<Value> = Vec::new();

        fn record(
            errors: &mut Vec<Value>,
            assigned: &mut HashMap<(String, u64), Value>,
            key: &str,
            offset: u64,
            msg: &Value,
        ) {
            if let Some(existing) = assigned.get(&(key.to_string(), offset)) {
                if existing != msg {
                    errors.push(json!({
                        "type": "inconsistent-offset",
                        "key": key,
                        "offset": offset,
                        "messages": [existing, msg],
                    }));
                }
            } else {
                assigned.insert((key.to_string(), offset), msg.clone());
            }
        }

        for (invoke, complete) in completions(ctx.history) {
            match (invoke.f.as_str(), complete.ty) {
                ("send", OpType::Ok) => {
                    let key = complete.value["key"].as_str().unwrap_or_default().to_string();
                    if let Some(offset) = complete.value["offset"].as_u64() {
                        record(
                            &mut errors,
                            &mut assigned,
                            &key,
                            offset,
                            &complete.value["msg"],
                        );
                        acked.entry(key).or_default().push(offset);
                    }
                }
                ("poll", OpType::Ok) => {
                    // requested offsets move forward per client
                    if let Some(requested) = complete.value["offsets"].as_object() {
                        for (key, from) in requested {
                            let from = from.as_u64().unwrap_or(0);
                            let cursor = poll_cursor
                                .entry((invoke.process, key.clone()))
                                .or_insert(0);
                            if from < *cursor {
                                errors.push(json!({
                                    "type": "nonmonotonic-poll",
                                    "key": key,
                                    "from": from,
                                    "cursor": *cursor,
                                }));
                            }
                            *cursor = (*cursor).max(from);
                        }
                    }
                    if let Some(msgs) = complete.value["msgs"].as_object() {
                        for (key, entries) in msgs {
                            for entry in entries.as_array().into_iter().flatten() {
                                if let Some(offset) = entry.get(0).and_then(Value::as_u64) {
                                    let msg = entry.get(1).cloned().unwrap_or(Value::Null);
                                    record(&mut errors, &mut assigned, key, offset, &msg);
                                    observed.entry(key.clone()).or_default().insert(offset);
                                }
                            }
                        }
                    }
                }
                ("commit_offsets", OpType::Ok) => {
                    if let Some(offsets) = complete.value["offsets"].as_object() {
                        for (key, offset) in offsets {
                            if let Some(offset) = offset.as_u64() {
                                let slot = committed.entry(key.clone()).or_insert(0);
                                *slot = (*slot).max(offset);
                            }
                        }
                    }
                }
                ("list_committed_offsets", OpType::Ok) => {
                    if indefinite_commits > 0 {
                        continue;
                    }
                    if let Some(offsets) = complete.value["offsets"].as_object() {
                        for (key, offset) in offsets {
                            let offset = offset.as_u64().unwrap_or(0);
                            let max = committed.get(key).copied().unwrap_or(0);
                            if offset > max {
                                errors.push(json!({
                                    "type": "committed-offset-from-nowhere",
                                    "key": key,
                                    "listed": offset,
                                    "max-committed": max,
                                }));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        // acked sends inside a key's observed window must have been seen
        for (key, offsets) in &acked {
            if let Some(seen) = observed.get(key) {
                let (min, max) = match (seen.iter().min(), seen.iter().max()) {
                    (Some(&min), Some(&max)) => (min, max),
                    _ => continue,
                };
                for &offset in offsets {
                    if offset > min && offset < max && !seen.contains(&offset) {
                        errors.push(json!({
                            "type": "lost-write",
                            "key": key,
                            "offset": offset,
                        }));
                    }
                }
            }
        }

        let valid = if errors.is_empty() {
            Validity::True
        } else {
            Validity::False
        };
        let mut details = Map::new();
        details.insert("assigned-count".to_string(), json!(assigned.len()));
        details.insert("error-count".to_string(), json!(errors.len()));
        details.insert(
            "errors".to_string(),
            json!(errors.iter().take(10).collect::<Vec<_>>()),
        );
        CheckResult {
            valid,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maelstrom::history::History;
    use maelstrom::time::SimTime;
    use std::sync::Arc;

    fn check(history: &History) -> CheckResult {
        let config = Config::new(1);
        let ops = history.snapshot();
        let ctx = CheckCtx {
            history: &ops,
            journal: &[],
            config: &config,
            store: std::path::Path::new("/tmp"),
            exceptions: &[],
        };
        KafkaChecker.check(&ctx)
    }

    fn send_ok(history: &History, key: &str, msg: u64, offset: u64) {
        history.invoke(0, "send", json!({"key": key, "msg": msg}));
        history.ok(0, "send", json!({"key": key, "msg": msg, "offset": offset}));
    }

    fn poll_ok(history: &History, process: i64, key: &str, from: u64, entries: Value) {
        history.invoke(process, "poll", json!({ "keys": [key] }));
        history.ok(
            process,
            "poll",
            json!({"offsets": {key: from}, "msgs": {key: entries}}),
        );
    }

    #[test]
    fn consistent_log_is_valid() {
        let history = History::new(Arc::new(SimTime::new()));
        send_ok(&history, "k1", 1, 0);
        send_ok(&history, "k1", 2, 1);
        poll_ok(&history, 0, "k1", 0, json!([[0, 1], [1, 2]]));
        history.invoke(0, "commit_offsets", json!({"offsets": {"k1": 2}}));
        history.ok(0, "commit_offsets", json!({"offsets": {"k1": 2}}));
        history.invoke(0, "list_committed_offsets", json!({"keys": ["k1"]}));
        history.ok(0, "list_committed_offsets", json!({"offsets": {"k1": 2}}));

        let result = check(&history);
        assert_eq!(result.valid, Validity::True);
    }

    #[test]
    fn conflicting_offset_is_invalid() {
        let history = History::new(Arc::new(SimTime::new()));
        send_ok(&history, "k1", 1, 0);
        send_ok(&history, "k1", 2, 0);
        let result = check(&history);
        assert_eq!(result.valid, Validity::False);
        assert_eq!(
            result.details["errors"][0]["type"],
            json!("inconsistent-offset")
        );
    }

    #[test]
    fn nonmonotonic_poll_is_invalid() {
        let history = History::new(Arc::new(SimTime::new()));
        poll_ok(&history, 0, "k1", 5, json!([]));
        poll_ok(&history, 0, "k1", 2, json!([]));
        let result = check(&history);
        assert_eq!(result.valid, Validity::False);
        assert_eq!(
            result.details["errors"][0]["type"],
            json!("nonmonotonic-poll")
        );
    }

    #[test]
    fn lost_write_inside_window_is_invalid() {
        let history = History::new(Arc::new(SimTime::new()));
        send_ok(&history, "k1", 1, 0);
        send_ok(&history, "k1", 2, 1);
        send_ok(&history, "k1", 3, 2);
        // a poll spanning offsets 0..2 that skips offset 1
        poll_ok(&history, 0, "k1", 0, json!([[0, 1], [2, 3]]));
        let result = check(&history);
        assert_eq!(result.valid, Validity::False);
        assert_eq!(result.details["errors"][0]["type"], json!("lost-write"));
    }

    #[test]
    fn commit_from_nowhere_is_invalid() {
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "list_committed_offsets", json!({"keys": ["k1"]}));
        history.ok(0, "list_committed_offsets", json!({"offsets": {"k1": 9}}));
        let result = check(&history);
        assert_eq!(result.valid, Validity::False);
    }
}
