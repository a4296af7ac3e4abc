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

/// Transactions of list appends and reads. The checker infers per-key
/// append order from observed reads and hunts for dependency cycles, in
/// the style of Elle.
#[derive(Debug)]
pub struct TxnListAppend {
    key_count: u64,
    max_ops: usize,
}

impl TxnListAppend {
    pub fn new(key_count: u64) -> Self {
        Self {
            key_count,
            max_ops: 4,
        }
    }
}

impl Default for TxnListAppend {
    fn default() -> Self {
        Self::new(10)
    }
}

fn txn_schema() -> Schema {
    Schema::Array(Box::new(Schema::Tuple(vec![
        Schema::Str,
        Schema::Any,
        Schema::Any,
    ])))
}

impl Workload for TxnListAppend {
    fn name(&self) -> &'static str {
        "txn-list-append"
    }

    fn register(&self, registry: &mut Registry) {
        registry.defrpc(RpcDef {
            name: "txn",
            doc: "Atomically applies a transaction of list appends and reads.",
            request: request("txn").req("txn", txn_schema()).build(),
            response: response("txn_ok").req("txn", txn_schema()).build(),
        });
    }

    fn generator(&self, _config: &Config) -> Box<dyn Generator> {
        let keys = self.key_count;
        let max_ops = self.max_ops;
        let mut next_element: HashMap<u64, u64> = HashMap::new();
        Box::new(FnGenerator::unbounded(move |rng| {
            let count = rng.gen_range(1, max_ops + 1);
            let mut ops = Vec::with_capacity(count);
            for _ in 0..count {
                let key = rng.gen_range(0, keys);
                if rng.gen_range(0, 2) == 0 {
                    ops.push(json!(["r", key, null]));
                } else {
                    let element = next_element.entry(key).or_insert(0);
                    *element += 1;
                    ops.push(json!(["append", key, *element]));
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
        Box::new(ListAppendChecker)
    }
}

struct Committed {
    ops: Vec<MicroOp>,
    invoke: u64,
    complete: u64,
}

/// Elle-style analysis: aborted reads (G1a), intermediate reads (G1b),
/// incompatible read orders, and wr/ww/rw/realtime dependency cycles.
struct ListAppendChecker;

impl Checker for ListAppendChecker {
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
                        for (key, value) in crate::checker::elle::written_values(&ops) {
                            aborted_values.push((key, value));
                        }
                    }
                }
                _ => {}
            }
        }

        // who appended what, and every observed read list
        let mut writer: HashMap<(String, String), usize> = HashMap::new();
        for (t, txn) in committed.iter().enumerate() {
            for op in &txn.ops {
                if let MicroOp::Append(key, value) = op {
                    writer.insert((key.clone(), value.to_string()), t);
                }
            }
        }

        // infer per-key order from the longest read of each key
        let mut longest: HashMap<String, Vec<String>> = HashMap::new();
        let mut reads: Vec<(usize, String, Vec<String>)> = Vec::new();
        for (t, txn) in committed.iter().enumerate() {
            for op in &txn.ops {
                if let MicroOp::Read(key, observed) = op {
                    let list: Vec<String> = observed
                        .as_array()
                        .map(|values| values.iter().map(|v| v.to_string()).collect())
                        .unwrap_or_default();
                    let slot = longest.entry(key.clone()).or_default();
                    if list.len() > slot.len() {
                        *slot = list.clone();
                    }
                    reads.push((t, key.clone(), list));
                }
            }
        }

        // G1a: a committed read observing an aborted append
        for (t, key, list) in &reads {
            for (aborted_key, aborted_value) in &aborted_values {
                if key == aborted_key && list.contains(aborted_value) {
                    errors.push(json!({
                        "type": "aborted-read",
                        "key": key,
                        "value": aborted_value,
                        "txn": t,
                    }));
                }
            }
        }

        // every read must be a prefix of its key's inferred order
        for (t, key, list) in &reads {
            let order = &longest[key];
            if list.as_slice() != &order[..list.len().min(order.len())] {
                errors.push(json!({
                    "type": "incompatible-order",
                    "key": key,
                    "read": list,
                    "inferred": order,
                    "txn": t,
                }));
            }
        }

        // G1b: a read ending at a non-final append of some transaction
        for (t, key, list) in &reads {
            if let Some(last) = list.last() {
                if let Some(&w) = writer.get(&(key.clone(), last.clone())) {
                    let appends: Vec<String> = committed[w]
                        .ops
                        .iter()
                        .filter_map(|op| match op {
                            MicroOp::Append(k, v) if k == key => Some(v.to_string()),
                            _ => None,
                        })
                        .collect();
                    if let Some(position) = appends.iter().position(|v| v == last) {
                        if position + 1 < appends.len() {
                            errors.push(json!({
                                "type": "intermediate-read",
                                "key": key,
                                "value": last,
                                "txn": t,
                            }));
                        }
                    }
                }
            }
        }

        // dependency graph: wr, ww, rw, plus realtime precedence
        let mut graph = DepGraph::new(committed.len());
        for (key, order) in &longest {
            for pair in order.windows(2) {
                if let (Some(&a), Some(&b)) = (
                    writer.get(&(key.clone(), pair[0].clone())),
                    writer.get(&(key.clone(), pair[1].clone())),
                ) {
                    graph.add_edge(a, b, "ww");
                }
            }
        }
        for (t, key, list) in &reads {
            match list.last() {
                Some(last) => {
                    if let Some(&w) = writer.get(&(key.clone(), last.clone())) {
                        graph.add_edge(w, *t, "wr");
                    }
                }
                None => {}
            }
            // the next append after what this read saw anti-depends on it
            let order = &longest[key];
            if list.len() < order.len() {
                if let Some(&w) = writer.get(&(key.clone(), order[list.len()].clone())) {
                    graph.add_edge(*t, w, "rw");
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
