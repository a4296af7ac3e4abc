use crate::checker::Checker;
use crate::client::Client;
use crate::config::Config;
use crate::error::RpcError;
use crate::message::NodeId;
use crate::rpc::Registry;
use color_eyre::eyre::Report;
use rand::rngs::StdRng;
use serde_json::Value;

/// An abstract operation produced by a generator, before the client adapter
/// turns it into RPC calls.
#[derive(Debug, Clone, PartialEq)]
pub struct GenOp {
    pub f: String,
    pub value: Value,
    /// index of the node this operation must target; `None` lets the runner
    /// pick the issuing client's default node
    pub node: Option<usize>,
}

impl GenOp {
    pub fn new(f: &str, value: Value) -> Self {
        Self {
            f: f.to_string(),
            value,
            node: None,
        }
    }

    pub fn on_node(mut self, node: usize) -> Self {
        self.node = Some(node);
        self
    }
}

/// A lazy stream of operations. Client threads pull from a shared generator
/// until it ends or the time limit is reached.
pub trait Generator: Send {
    fn next_op(&mut self, rng: &mut StdRng) -> Option<GenOp>;
}

/// A workload bundles the pieces the runner composes: RPC schemas, an
/// optional setup step (e.g. the broadcast topology), a generator of
/// abstract operations, a client adapter translating them to RPC calls, an
/// optional final generator sampling converged state, and a checker.
pub trait Workload: Send + Sync {
    fn name(&self) -> &'static str;

    /// Registers this workload's RPC schemas and extra error codes.
    fn register(&self, _registry: &mut Registry) {}

    /// Runs once after every node initialized, before client traffic.
    fn setup(&self, _client: &Client, _nodes: &[NodeId]) -> Result<(), Report> {
        Ok(())
    }

    fn generator(&self, config: &Config) -> Box<dyn Generator>;

    /// Runs after the main phase, once the network healed and settled.
    fn final_generator(&self, _config: &Config) -> Option<Box<dyn Generator>> {
        None
    }

    /// Operations whose errors certainly changed nothing.
    fn idempotent_fs(&self) -> &'static [&'static str] {
        &["read"]
    }

    /// Translates an abstract operation into RPC calls against `dest`,
    /// returning the completed operation value recorded in the history.
    fn apply(&self, client: &Client, dest: &str, op: &GenOp) -> Result<Value, RpcError>;

    fn checker(&self) -> Box<dyn Checker>;
}

/// A generator producing `count` operations from a closure.
pub struct FnGenerator<F> {
    remaining: Option<u64>,
    gen: F,
}

impl<F> FnGenerator<F>
where
    F: FnMut(&mut StdRng) -> GenOp + Send,
{
    /// Unbounded: runs until the time limit cuts it off.
    pub fn unbounded(gen: F) -> Self {
        Self {
            remaining: None,
            gen,
        }
    }

    pub fn take(count: u64, gen: F) -> Self {
        Self {
            remaining: Some(count),
            gen,
        }
    }
}

impl<F> Generator for FnGenerator<F>
where
    F: FnMut(&mut StdRng) -> GenOp + Send,
{
    fn next_op(&mut self, rng: &mut StdRng) -> Option<GenOp> {
        match &mut self.remaining {
            None => Some((self.gen)(rng)),
            Some(0) => None,
            Some(remaining) => {
                *remaining -= 1;
                Some((self.gen)(rng))
            }
        }
    }
}

/// A generator draining a fixed list of operations. Used for final reads.
pub struct SeqGenerator {
    ops: std::collections::VecDeque<GenOp>,
}

impl SeqGenerator {
    pub fn new(ops: impl IntoIterator<Item = GenOp>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
        }
    }
}

impl Generator for SeqGenerator {
    fn next_op(&mut self, _rng: &mut StdRng) -> Option<GenOp> {
        self.ops.pop_front()
    }
}
