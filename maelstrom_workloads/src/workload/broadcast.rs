use super::{request, response};
use crate::checker::completions;
use maelstrom::checker::{CheckCtx, CheckResult, Checker, Validity};
use maelstrom::client::Client;
use maelstrom::config::Config;
use maelstrom::error::RpcError;
use maelstrom::history::OpType;
use maelstrom::message::NodeId;
use maelstrom::rpc::{Registry, RpcDef};
use maelstrom::schema::Schema;
use maelstrom::workload::{FnGenerator, GenOp, Generator, SeqGenerator, Workload};
use maelstrom::{HashMap, HashSet};
use color_eyre::eyre::{eyre, Report};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// How peers are wired for gossip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// everyone talks to everyone
    Total,
    /// a chain
    Line,
    /// a near-square two-dimensional grid
    Grid,
    /// a 4-ary tree
    Tree4,
}

impl Topology {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "total" => Some(Topology::Total),
            "line" => Some(Topology::Line),
            "grid" => Some(Topology::Grid),
            "tree4" => Some(Topology::Tree4),
            _ => None,
        }
    }

    /// The neighbor map pushed to nodes after init.
    pub fn neighbors(self, nodes: &[NodeId]) -> HashMap<NodeId, Vec<NodeId>> {
        let n = nodes.len();
        let mut map: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut connect = |a: usize, b: usize| {
            map.entry(nodes[a].clone()).or_default().push(nodes[b].clone());
            map.entry(nodes[b].clone()).or_default().push(nodes[a].clone());
        };
        match self {
            Topology::Total => {
                for a in 0..n {
                    for b in (a + 1)..n {
                        connect(a, b);
                    }
                }
            }
            Topology::Line => {
                for a in 1..n {
                    connect(a - 1, a);
                }
            }
            Topology::Grid => {
                // row-major, width = ceil(sqrt(n))
                let width = (n as f64).sqrt().ceil() as usize;
                for a in 0..n {
                    if a % width != 0 {
                        connect(a - 1, a);
                    }
                    if a >= width {
                        connect(a - width, a);
                    }
                }
            }
            Topology::Tree4 => {
                for a in 1..n {
                    connect((a - 1) / 4, a);
                }
            }
        }
        // nodes with no links still get an entry
        for node in nodes {
            map.entry(node.clone()).or_default();
        }
        map
    }
}

/// Nodes must propagate broadcast values so that, after the network heals,
/// every node's read returns every acknowledged value.
#[derive(Debug)]
pub struct Broadcast {
    topology: Topology,
}

impl Broadcast {
    pub fn new(topology: Topology) -> Self {
        Self { topology }
    }
}

impl Default for Broadcast {
    fn default() -> Self {
        Self::new(Topology::Grid)
    }
}

impl Workload for Broadcast {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn register(&self, registry: &mut Registry) {
        registry.defrpc(RpcDef {
            name: "topology",
            doc: "Informs a node of its gossip neighbors.",
            request: request("topology")
                .req("topology", Schema::Map(Box::new(Schema::Array(Box::new(Schema::Str)))))
                .build(),
            response: response("topology_ok").build(),
        });
        registry.defrpc(RpcDef {
            name: "broadcast",
            doc: "Asks a node to broadcast a value to the whole cluster.",
            request: request("broadcast").req("message", Schema::Any).build(),
            response: response("broadcast_ok").build(),
        });
        registry.defrpc(RpcDef {
            name: "read",
            doc: "Reads the set of values a node has seen.",
            request: request("read").build(),
            response: response("read_ok")
                .req("messages", Schema::Array(Box::new(Schema::Any)))
                .build(),
        });
    }

    fn setup(&self, client: &Client, nodes: &[NodeId]) -> Result<(), Report> {
        let neighbors = self.topology.neighbors(nodes);
        for node in nodes {
            let resp = client
                .rpc(node, json!({"type": "topology", "topology": neighbors}))
                .map_err(|e| eyre!("topology to {}: {}", node, e))?;
            if maelstrom::message::body_type(&resp) != Some("topology_ok") {
                return Err(eyre!("node {} answered topology with {}", node, resp));
            }
        }
        Ok(())
    }

    fn generator(&self, _config: &Config) -> Box<dyn Generator> {
        let mut next = 0i64;
        Box::new(FnGenerator::unbounded(move |rng| {
            if rng.gen_range(0, 10) == 0 {
                GenOp::new("read", Value::Null)
            } else {
                next += 1;
                GenOp::new("broadcast", json!(next))
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
            "broadcast" => {
                client.rpc(dest, json!({"type": "broadcast", "message": op.value}))?;
                Ok(op.value.clone())
            }
            "read" => {
                let resp = client.rpc(dest, json!({"type": "read"}))?;
                Ok(resp["messages"].clone())
            }
            other => Err(RpcError::malformed(format!("unknown broadcast op {}", other))),
        }
    }

    fn checker(&self) -> Box<dyn Checker> {
        Box::new(BroadcastChecker)
    }
}

/// Compares final reads against the broadcast attempts: acknowledged values
/// must be on every node, and nothing may appear from nowhere.
struct BroadcastChecker;

impl Checker for BroadcastChecker {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let final_process = ctx.config.concurrency() as i64;
        let mut attempted: HashSet<String> = HashSet::new();
        let mut acked: BTreeSet<String> = BTreeSet::new();
        let mut final_reads: Vec<BTreeSet<String>> = Vec::new();

        for op in ctx.history {
            if op.f == "broadcast" && op.ty == OpType::Invoke {
                attempted.insert(op.value.to_string());
            }
        }
        for (invoke, complete) in completions(ctx.history) {
            if complete.ty != OpType::Ok {
                continue;
            }
            match invoke.f.as_str() {
                "broadcast" => {
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

        // acked values missing from some node, and values from nowhere
        let mut lost: BTreeSet<&String> = BTreeSet::new();
        let mut phantom: BTreeSet<&String> = BTreeSet::new();
        for read in &final_reads {
            for value in acked.difference(read) {
                lost.insert(value);
            }
            for value in read {
                if !attempted.contains(value) {
                    phantom.insert(value);
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
            .with("final-read-count", json!(final_reads.len()))
            .with("lost-count", json!(lost.len()))
            .with("lost", json!(lost.iter().take(10).collect::<Vec<_>>()))
            .with("phantom-count", json!(phantom.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maelstrom::history::History;
    use maelstrom::time::SimTime;
    use std::sync::Arc;

    #[test]
    fn grid_topology() {
        let nodes: Vec<NodeId> = (1..=5).map(|i| format!("n{}", i)).collect();
        let map = Topology::Grid.neighbors(&nodes);
        // width 3: n1 n2 n3 / n4 n5
        assert_eq!(map["n1"], vec!["n2".to_string(), "n4".to_string()]);
        assert!(map["n5"].contains(&"n4".to_string()));
        assert!(map["n5"].contains(&"n2".to_string()));
        // symmetry
        for (node, peers) in &map {
            for peer in peers {
                assert!(map[peer].contains(node), "{} -> {} not symmetric", node, peer);
            }
        }
    }

    #[test]
    fn line_and_tree_topologies() {
        let nodes: Vec<NodeId> = (1..=5).map(|i| format!("n{}", i)).collect();
        let line = Topology::Line.neighbors(&nodes);
        assert_eq!(line["n3"], vec!["n2".to_string(), "n4".to_string()]);

        let tree = Topology::Tree4.neighbors(&nodes);
        // n1 is the root of a 4-ary tree over five nodes
        assert_eq!(tree["n1"].len(), 4);
    }

    fn check(history: &History, concurrency: usize) -> CheckResult {
        let mut config = Config::new(1);
        config.set_concurrency(concurrency);
        let ops = history.snapshot();
        let ctx = CheckCtx {
            history: &ops,
            journal: &[],
            config: &config,
            store: std::path::Path::new("/tmp"),
            exceptions: &[],
        };
        BroadcastChecker.check(&ctx)
    }

    #[test]
    fn converged_cluster_is_valid() {
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "broadcast", json!(1));
        history.ok(0, "broadcast", json!(1));
        history.invoke(0, "broadcast", json!(2));
        history.ok(0, "broadcast", json!(2));
        // final reads by the final-generator process (concurrency = 1)
        history.invoke(1, "read", Value::Null);
        history.ok(1, "read", json!([1, 2]));
        history.invoke(1, "read", Value::Null);
        history.ok(1, "read", json!([2, 1]));

        let result = check(&history, 1);
        assert_eq!(result.valid, Validity::True);
        assert_eq!(result.details["lost-count"], json!(0));
    }

    #[test]
    fn lost_value_is_invalid() {
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "broadcast", json!(1));
        history.ok(0, "broadcast", json!(1));
        history.invoke(1, "read", Value::Null);
        history.ok(1, "read", json!([]));

        let result = check(&history, 1);
        assert_eq!(result.valid, Validity::False);
        assert_eq!(result.details["lost-count"], json!(1));
    }

    #[test]
    fn unacked_value_may_be_missing() {
        let history = History::new(Arc::new(SimTime::new()));
        // an indefinite broadcast does not have to survive
        history.invoke(0, "broadcast", json!(9));
        history.info(0, "broadcast", json!(9), None);
        history.invoke(1, "read", Value::Null);
        history.ok(1, "read", json!([]));
        assert_eq!(check(&history, 1).valid, Validity::True);

        // but if it shows up somewhere, it is not a phantom
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "broadcast", json!(9));
        history.info(0, "broadcast", json!(9), None);
        history.invoke(1, "read", Value::Null);
        history.ok(1, "read", json!([9]));
        assert_eq!(check(&history, 1).valid, Validity::True);
    }

    #[test]
    fn no_final_reads_is_unknown() {
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "broadcast", json!(1));
        history.ok(0, "broadcast", json!(1));
        assert_eq!(check(&history, 1).valid, Validity::Unknown);
    }
}
