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
use serde_json::{json, Value};

/// Nodes hand out identifiers; every identifier returned across the whole
/// cluster must be unique.
#[derive(Debug, Default)]
pub struct UniqueIds;

impl UniqueIds {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Workload for UniqueIds {
    fn name(&self) -> &'static str {
        "unique-ids"
    }

    fn register(&self, registry: &mut Registry) {
        registry.defrpc(RpcDef {
            name: "generate",
            doc: "Asks a node for a globally unique identifier.",
            request: request("generate").build(),
            response: response("generate_ok").req("id", Schema::Any).build(),
        });
    }

    fn generator(&self, _config: &Config) -> Box<dyn Generator> {
        Box::new(FnGenerator::unbounded(|_| {
            GenOp::new("generate", Value::Null)
        }))
    }

    fn apply(&self, client: &Client, dest: &str, op: &GenOp) -> Result<Value, RpcError> {
        match op.f.as_str() {
            "generate" => {
                let resp = client.rpc(dest, json!({"type": "generate"}))?;
                Ok(resp["id"].clone())
            }
            other => Err(RpcError::malformed(format!(
                "unknown unique-ids op {}",
                other
            ))),
        }
    }

    fn checker(&self) -> Box<dyn Checker> {
        Box::new(UniqueIdsChecker)
    }
}

/// All returned identifiers must be pairwise distinct.
struct UniqueIdsChecker;

impl Checker for UniqueIdsChecker {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut total = 0u64;
        for (invoke, complete) in completions(ctx.history) {
            if invoke.f == "generate" && complete.ty == OpType::Ok {
                total += 1;
                *counts.entry(complete.value.to_string()).or_default() += 1;
            }
        }
        let duplicates: HashSet<_> = counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(id, _)| id.clone())
            .collect();
        let mut sample: Vec<_> = duplicates.iter().cloned().collect();
        sample.sort();
        sample.truncate(10);

        let valid = if duplicates.is_empty() {
            Validity::True
        } else {
            Validity::False
        };
        CheckResult::new(valid)
            .with("attempted-count", json!(total))
            .with("distinct-count", json!(counts.len()))
            .with("duplicate-count", json!(duplicates.len()))
            .with("duplicates", json!(sample))
    }
}
