use rand::Rng;
use super::{request, response};
use crate::checker::completions;
use maelstrom::checker::{CheckCtx, CheckResult, Checker, Validity};
use maelstrom::client::Client;
use maelstrom::config::Config;
use maelstrom::error::RpcError;
use maelstrom::history::OpType;
use maelstrom::rpc::{Registry, RpcDef};
use maelstrom::schema::Schema;
use maelstrom::workload::{FnGenerator, GenOp, Generator, SeqGenerator, Workload};
use maelstrom::HashSet;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// A grow-only set: elements added anywhere must, after convergence, be
/// readable everywhere.
#[derive(Debug, Default)]
pub struct GSet;

impl GSet {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Workload for GSet {
    fn name(&self) -> &'static str {
        "g-set"
    }

    fn register(&self, registry: &mut Registry) {
        registry.defrpc(RpcDef {
            name: "add",
            doc: "Adds an element to the set.",
            request: request("add").req("element", Schema::Any).build(),
            response: response("add_ok").build(),
        });
        registry.defrpc(RpcDef {
            name: "read",
            doc: "Reads the whole set.",
            request: request("read").build(),
            response: response("read_ok")
                .req("value", Schema::Array(Box::new(Schema::Any)))
                .build(),
        });
    }

    fn generator(&self, _config: &Config) -> Box<dyn Generator> {
        let mut next = 0i64;
        Box::new(FnGenerator::unbounded(move |rng| {
            if rng.gen_range(0, 10) == 0 {
                GenOp::new("read", Value::Null)
            } else {
                next += 1;
                GenOp::new("add", json!(next))
            }
        }))
    }

    fn final_generator(&self, config: &Config) -> Option<Box<dyn Generator>> {
        Some(Box::new(SeqGenerator::new(
            (0..config.node_count()).map(|i| GenOp::new("read", Value::Null).on_node(i)),
        )))
    }

    fn apply(&self, client: &Client, dest: &str, op: &GenOp) -> Result<Value, RpcError> {
        match op.f.as_str() {
            "add" => {
                client.rpc(dest, json!({"type": "add", "element": op.value}))?;
                Ok(op.value.clone())
            }
            "read" => {
                let resp = client.rpc(dest, json!({"type": "read"}))?;
                Ok(resp["value"].clone())
            }
            other => Err(RpcError::malformed(format!("unknown g-set op {}", other))),
        }
    }

    fn checker(&self) -> Box<dyn Checker> {
        Box::new(GSetChecker)
    }
}

/// Every acknowledged add must be in every final read; nothing may appear
/// that was never attempted.
struct GSetChecker;

impl Checker for GSetChecker {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let final_process = ctx.config.concurrency() as i64;
        let mut attempted: HashSet<String> = HashSet::new();
        let mut acked: BTreeSet<String> = BTreeSet::new();
        let mut final_reads: Vec<BTreeSet<String>> = Vec::new();

        for op in ctx.history {
            if op.f == "add" && op.ty == OpType::Invoke {
                attempted.insert(op.value.to_string());
            }
        }
        for (invoke, complete) in completions(ctx.history) {
            if complete.ty != OpType::Ok {
                continue;
            }
            match invoke.f.as_str() {
                "add" => {
                    acked.insert(invoke.value.to_string());
                }
                "read" if invoke.process == final_process => {
                    let read: BTreeSet<String> = complete
                        .value
                        .as_array()
                        .map(|values| values.iter().map(|v| v.to_string()).collect())
                        .unwrap_or_default();
                    final_reads.push(read);
                }
                _ => {}
            }
        }

        if final_reads.is_empty() {
            return CheckResult::new(Validity::Unknown)
                .with("error", json!("no final reads"));
        }

        let mut lost: BTreeSet<&String> = BTreeSet::new();
        let mut phantom: BTreeSet<&String> = BTreeSet::new();
        for read in &final_reads {
            for element in acked.difference(read) {
                lost.insert(element);
            }
            for element in read {
                if !attempted.contains(element) {
                    phantom.insert(element);
                }
            }
        }

        let valid = if lost.is_empty() && phantom.is_empty() {
            Validity::True
        } else {
            Validity::False
        };
        CheckResult::new(valid)
            .with("attempt-count", json!(attempted.len()))
            .with("acknowledged-count", json!(acked.len()))
            .with("lost-count", json!(lost.len()))
            .with("lost", json!(lost.iter().take(10).collect::<Vec<_>>()))
            .with("phantom-count", json!(phantom.len()))
    }
}
