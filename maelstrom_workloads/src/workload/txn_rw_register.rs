use super::{request, response};
use crate::checker::completions;
use crate::checker::elle::{add_realtime_edges, parse_txn, DepGraph, MicroOp};
use maelstrom::checker::{CheckCtx, CheckResult, Checker, Validity};
use maelstrom::client::Client;
use maelstrom::config::Config;
use maelstrom::error::RpcError;
use maelstrom::history::OpType;
use maelstrom::rpc::{Registry, RpcDef};
use maelstrom::schema::Schema;
use maelstrom::workload::{FnGenerator, GenOp, Generator, Workload};
use maelstrom::HashMap;
use rand::Rng;
use serde_json::{json, Value};

/// Transactions of register reads and writes. Written values are unique
/// per key, so every read traces back to exactly one writer; the checker
/// looks for aborted reads, intermediate reads, and cycles through
/// write-read and realtime dependencies.
#[derive(Debug)]
pub struct TxnRwRegister {
    key_count: u64,
    max_ops: usize,
}

impl TxnRwRegister {
    pub fn new(key_count: u64) -> Self {
        Self {
            key_count,
            max_ops: 3,
        }
    }
}

impl Default for TxnRwRegister {
    fn default() -> Self {
        Self::new(5)
    }
}

fn txn_schema() -> Schema {
    Schema::Array(Box::new(Schema::Tuple(vec![
        Schema::Str,
        Schema::Any,
        Schema::Any,
    ])))
}

impl Workload for TxnRwRegister {
    fn name(&self) -> &'static str {
        "txn-rw-register"
    }

    fn register(&self, registry: &mut Registry) {
        registry.defrpc(RpcDef {
            name: "txn",
            doc: "Atomically applies a transaction of register reads and writes.",
            request: request("txn").req("txn", txn_schema()).build(),
            response: response("txn_ok").req("txn", txn_schema()).build(),
        });
    }

    fn generator(&self, _config: &Config) -> Box<dyn Generator> {
        let keys = self.key_count;
        let max_ops = self.max_ops;
        let mut next_value = 0u64;
        Box::new(FnGenerator::unbounded(move |rng| {
            let count = rng.gen_range(1, max_ops + 1);
            let mut ops = Vec::with_capacity(count);
            for _ in 0..count {
                let key = rng.gen_range(0, keys);
                if rng.gen_range(0, 2) == 0 {
                    ops.push(json!(["r", key, null]));
                } else {
                    next_value += 1;
                    ops.push(json!(["w", key, next_value]));
                }
            }
            GenOp::new("txn", json!(ops))
        }))
    }

    fn idempotent_fs(&self) -> &'static [&'static str] {
        &[]
    }

    fn apply(&self, client: &Client, dest: &str, op: &GenOp) -> Result<Value, RpcError> {
        let resp = client.rpc(dest, json!({"type": "txn", "txn": op.value}))?;
        Ok(resp["txn"].clone())
    }

    fn checker(&self) -> Box<dyn Checker> {
        Box::new(RwRegisterChecker)
    }
}

struct Committed {
    ops: Vec<MicroOp>,
    invoke: u64,
    complete: u64,
}

/// G1a, G1b and write-read/realtime cycle analysis over register
/// transactions with unique written values.
struct RwRegisterChecker;

impl Checker for RwRegisterChecker {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let mut committed: Vec<Committed> = Vec::new();
        let mut aborted_values: Vec<(String, String)> = Vec::new();
        let mut errors: Vec<Value> = Vec::new();

        for (invoke, complete) in completions(ctx.history) {
            if invoke.f != "txn" {
                continue;
            }
            match complete.ty {
                OpType::Ok => {
                    if let Some(ops) = parse_txn(&complete.value) {
                        committed.push(Committed {
                            ops,
                            invoke: invoke.time,
                            complete: complete.time,
                        });
                    } else {
                        errors.push(json!({
                            "type": "unparseable-txn",
                            "txn": complete.value,
                        }));
                    }
                }
                OpType::Fail => {
                    if let Some(ops) = parse_txn(&invoke.value) {
                        for pair in crate::checker::elle::written_values(&ops) {
                            aborted_values.push(pair);
                        }
                    }
                }
                _ => {}
            }
        }

        // unique values: each read of (key, value) has one possible writer
        let mut writer: HashMap<(String, String), usize> = HashMap::new();
        // a transaction's final write per key, to catch intermediate reads
        let mut final_write: HashMap<(usize, String), String> = HashMap::new();
        for (t, txn) in committed.iter().enumerate() {
            for op in &txn.ops {
                if let MicroOp::Write(key, value) = op {
                    writer.insert((key.clone(), value.to_string()), t);
                    final_write.insert((t, key.clone()), value.to_string());
                }
            }
        }

        let mut graph = DepGraph::new(committed.len());
        for (t, txn) in committed.iter().enumerate() {
            for op in &txn.ops {
                let (key, observed) = match op {
                    MicroOp::Read(key, observed) => (key, observed),
                    _ => continue,
                };
                if observed.is_null() {
                    // reading an unwritten register
                    continue;
                }
                let value = observed.to_string();

                // G1a: observed value written by an aborted transaction
                if aborted_values.contains(&(key.clone(), value.clone())) {
                    errors.push(json!({
                        "type": "aborted-read",
                        "key": key,
                        "value": observed,
                        "txn": t,
                    }));
                    continue;
                }

                match writer.get(&(key.clone(), value.clone())) {
                    Some(&w) => {
                        // G1b: observed a value the writer itself overwrote
                        if w != t && final_write.get(&(w, key.clone())) != Some(&value) {
                            errors.push(json!({
                                "type": "intermediate-read",
                                "key": key,
                                "value": observed,
                                "txn": t,
                            }));
                        }
                        graph.add_edge(w, t, "wr");
                    }
                    None => {
                        // not written by any committed or aborted txn;
                        // indefinite writers make this inconclusive, so
                        // only report when everything completed cleanly
                        if !has_indefinite_txns(ctx) {
                            errors.push(json!({
                                "type": "read-from-nowhere",
                                "key": key,
                                "value": observed,
                                "txn": t,
                            }));
                        }
                    }
                }
            }
        }

        let windows: Vec<(u64, u64)> = committed
            .iter()
            .map(|txn| (txn.invoke, txn.complete))
            .collect();
        add_realtime_edges(&mut graph, &windows);

        for cycle in graph.cycles() {
            errors.push(json!({
                "type": "cycle",
                "txns": cycle,
            }));
        }

        let valid = if errors.is_empty() {
            Validity::True
        } else {
            Validity::False
        };
        CheckResult::new(valid)
            .with("txn-count", json!(committed.len()))
            .with("errors", json!(errors.iter().take(10).collect::<Vec<_>>()))
    }
}

fn has_indefinite_txns(ctx: &CheckCtx<'_>) -> bool {
    ctx.history
        .iter()
        .any(|op| op.f == "txn" && op.ty == OpType::Info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_clock::Tick;
    use maelstrom::history::History;
    use std::sync::Arc;

    fn history() -> History {
        History::new(Arc::new(Tick::new()))
    }

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
        RwRegisterChecker.check(&ctx)
    }

    fn txn_ok(history: &History, request: Value, response: Value) {
        history.invoke(0, "txn", request);
        history.ok(0, "txn", response);
    }

    #[test]
    fn clean_history_is_valid() {
        let history = history();
        txn_ok(&history, json!([["w", 1, 1]]), json!([["w", 1, 1]]));
        txn_ok(&history, json!([["r", 1, null]]), json!([["r", 1, 1]]));
        assert_eq!(check(&history).valid, Validity::True);
    }

    #[test]
    fn aborted_read_is_invalid() {
        let history = history();
        history.invoke(0, "txn", json!([["w", 1, 9]]));
        history.fail(0, "txn", json!([["w", 1, 9]]), json!({"code": 30}));
        txn_ok(&history, json!([["r", 1, null]]), json!([["r", 1, 9]]));
        assert_eq!(check(&history).valid, Validity::False);
    }

    #[test]
    fn intermediate_read_is_invalid() {
        let history = history();
        txn_ok(
            &history,
            json!([["w", 1, 1], ["w", 1, 2]]),
            json!([["w", 1, 1], ["w", 1, 2]]),
        );
        txn_ok(&history, json!([["r", 1, null]]), json!([["r", 1, 1]]));
        assert_eq!(check(&history).valid, Validity::False);
    }

    #[test]
    fn read_from_nowhere_is_invalid() {
        let history = history();
        txn_ok(&history, json!([["r", 1, null]]), json!([["r", 1, 42]]));
        assert_eq!(check(&history).valid, Validity::False);

        // with an indefinite txn in the history, the writer may simply be
        // unobserved
        let history2 = self::history();
        history2.invoke(0, "txn", json!([["w", 1, 42]]));
        history2.info(0, "txn", json!([["w", 1, 42]]), None);
        txn_ok(&history2, json!([["r", 1, null]]), json!([["r", 1, 42]]));
        assert_eq!(check(&history2).valid, Validity::True);
    }

    #[test]
    fn wr_rt_cycle_is_invalid() {
        let history = history();
        // txn 1 reads a value written by txn 0, but txn 1 completed before
        // txn 0 was even invoked: wr(0 -> 1) + rt(1 -> 0) is a cycle
        history.invoke(0, "txn", json!([["r", 1, null]]));
        history.ok(0, "txn", json!([["r", 1, 7]]));
        history.invoke(0, "txn", json!([["w", 1, 7]]));
        history.ok(0, "txn", json!([["w", 1, 7]]));
        assert_eq!(check(&history).valid, Validity::False);
    }
}
