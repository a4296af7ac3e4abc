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
use rand::Rng;
use serde_json::{json, Value};

/// The simplest workload: every node must answer `echo` with the payload it
/// was sent.
#[derive(Debug, Default)]
pub struct Echo;

impl Echo {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Workload for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn register(&self, registry: &mut Registry) {
        registry.defrpc(RpcDef {
            name: "echo",
            doc: "Echoes the request payload back, verbatim.",
            request: request("echo").req("echo", Schema::Any).build(),
            response: response("echo_ok").req("echo", Schema::Any).build(),
        });
    }

    fn generator(&self, _config: &Config) -> Box<dyn Generator> {
        Box::new(FnGenerator::unbounded(|rng| {
            let n: u32 = rng.gen_range(0, 128);
            GenOp::new("echo", json!(format!("Please echo {}", n)))
        }))
    }

    fn apply(&self, client: &Client, dest: &str, op: &GenOp) -> Result<Value, RpcError> {
        let resp = client.rpc(dest, json!({"type": "echo", "echo": op.value}))?;
        Ok(resp["echo"].clone())
    }

    fn checker(&self) -> Box<dyn Checker> {
        Box::new(EchoChecker)
    }
}

/// Valid iff every ok echo came back equal to what was sent.
struct EchoChecker;

impl Checker for EchoChecker {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let mut errors = Vec::new();
        let mut ok_count = 0u64;
        for (invoke, complete) in completions(ctx.history) {
            if complete.ty != OpType::Ok || invoke.f != "echo" {
                continue;
            }
            ok_count += 1;
            if invoke.value != complete.value {
                errors.push(json!({
                    "sent": invoke.value,
                    "received": complete.value,
                }));
            }
        }
        let valid = if errors.is_empty() {
            Validity::True
        } else {
            Validity::False
        };
        CheckResult::new(valid)
            .with("ok-count", json!(ok_count))
            .with("errors", json!(errors))
    }
}
