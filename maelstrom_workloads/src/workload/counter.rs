use super::{request, response};
use crate::checker::completions;
use maelstrom::checker::{CheckCtx, CheckResult, Checker, Validity};
use maelstrom::client::Client;
use maelstrom::config::Config;
use maelstrom::error::RpcError;
use maelstrom::history::OpType;
use maelstrom::ranges::RangeSet;
use maelstrom::rpc::{Registry, RpcDef};
use maelstrom::schema::Schema;
use maelstrom::workload::{FnGenerator, GenOp, Generator, SeqGenerator, Workload};
use rand::Rng;
use serde_json::{json, Value};

/// A replicated counter driven by `add` deltas. The grow-only flavor only
/// adds non-negative deltas; the pn flavor adds both signs.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    negative: bool,
}

impl Counter {
    pub fn grow_only() -> Self {
        Self {
            name: "g-counter",
            negative: false,
        }
    }

    pub fn pn() -> Self {
        Self {
            name: "pn-counter",
            negative: true,
        }
    }
}

impl Workload for Counter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn register(&self, registry: &mut Registry) {
        registry.defrpc(RpcDef {
            name: "add",
            doc: "Adds a delta to the counter.",
            request: request("add").req("delta", Schema::Int).build(),
            response: response("add_ok").build(),
        });
        registry.defrpc(RpcDef {
            name: "read",
            doc: "Reads the current counter value.",
            request: request("read").build(),
            response: response("read_ok").req("value", Schema::Int).build(),
        });
    }

    fn generator(&self, _config: &Config) -> Box<dyn Generator> {
        let negative = self.negative;
        Box::new(FnGenerator::unbounded(move |rng| {
            if rng.gen_range(0, 5) == 0 {
                GenOp::new("read", Value::Null)
            } else {
                let delta = if negative {
                    rng.gen_range(-5i64, 6)
                } else {
                    rng.gen_range(0i64, 6)
                };
                GenOp::new("add", json!(delta))
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
                client.rpc(dest, json!({"type": "add", "delta": op.value}))?;
                Ok(op.value.clone())
            }
            "read" => {
                let resp = client.rpc(dest, json!({"type": "read"}))?;
                Ok(resp["value"].clone())
            }
            other => Err(RpcError::malformed(format!("unknown counter op {}", other))),
        }
    }

    fn checker(&self) -> Box<dyn Checker> {
        Box::new(CounterChecker)
    }
}

/// Builds the set of reachable final totals (the definite sum shifted by
/// every subset of indeterminate deltas) and requires each final read to
/// be a member.
struct CounterChecker;

impl Checker for CounterChecker {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let final_process = ctx.config.concurrency() as i64;
        let mut definite_sum = 0i64;
        let mut indeterminate: Vec<i64> = Vec::new();
        let mut final_reads: Vec<i64> = Vec::new();

        for (invoke, complete) in completions(ctx.history) {
            match (invoke.f.as_str(), complete.ty) {
                ("add", OpType::Ok) => {
                    definite_sum += invoke.value.as_i64().unwrap_or(0);
                }
                ("add", OpType::Info) => {
                    let delta = invoke.value.as_i64().unwrap_or(0);
                    if delta != 0 {
                        indeterminate.push(delta);
                    }
                }
                ("read", OpType::Ok) if invoke.process == final_process => {
                    if let Some(value) = complete.value.as_i64() {
                        final_reads.push(value);
                    }
                }
                _ => {}
            }
        }

        let mut acceptable = RangeSet::singleton(definite_sum);
        for delta in &indeterminate {
            let shifted = acceptable.shifted(*delta);
            acceptable.union(&shifted);
        }

        if final_reads.is_empty() {
            return CheckResult::new(Validity::Unknown)
                .with("error", json!("no final reads"));
        }

        let errors: Vec<_> = final_reads
            .iter()
            .filter(|read| !acceptable.contains(**read))
            .collect();
        let valid = if errors.is_empty() {
            Validity::True
        } else {
            Validity::False
        };
        CheckResult::new(valid)
            .with("definite-sum", json!(definite_sum))
            .with("indeterminate-count", json!(indeterminate.len()))
            .with(
                "acceptable",
                json!(acceptable.iter().take(20).collect::<Vec<_>>()),
            )
            .with("final-reads", json!(final_reads))
            .with("errors", json!(errors))
    }
}
