use crate::history::{History, NEMESIS_PROCESS};
use crate::info;
use crate::message::NodeId;
use crate::net::Net;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Poll interval while waiting between transitions.
const TICK: Duration = Duration::from_millis(100);

/// The partition nemesis: every interval it isolates a random non-empty
/// proper subset of the user nodes from the rest (dropping both directions
/// of every crossing link), and heals one interval later. Transitions are
/// recorded as `info` history events.
pub struct PartitionNemesis {
    net: Net,
    history: History,
    nodes: Vec<NodeId>,
    interval: Duration,
    rng: StdRng,
}

impl PartitionNemesis {
    pub fn new(
        net: Net,
        history: History,
        nodes: Vec<NodeId>,
        interval: Duration,
        seed: u64,
    ) -> Self {
        assert!(nodes.len() > 1, "nemesis needs at least two nodes to partition");
        Self {
            net,
            history,
            nodes,
            interval,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Installs a fresh random partition and returns the isolated side.
    pub fn partition(&mut self) -> Vec<NodeId> {
        let mut shuffled = self.nodes.clone();
        shuffled.shuffle(&mut self.rng);
        let k = self.rng.gen_range(1, self.nodes.len());
        let (isolated, rest) = shuffled.split_at(k);

        for a in isolated {
            for b in rest {
                self.net.drop_link(a, b);
                self.net.drop_link(b, a);
            }
        }
        info!("nemesis: isolated {:?}", isolated);
        self.history.info(
            NEMESIS_PROCESS,
            "start-partition",
            json!({ "isolated": isolated }),
            None,
        );
        isolated.to_vec()
    }

    /// Removes every partition.
    pub fn heal(&self) {
        self.net.heal();
        info!("nemesis: healed");
        self.history
            .info(NEMESIS_PROCESS, "heal", Value::Null, None);
    }

    /// Alternates partition and heal every interval until shutdown, healing
    /// on the way out.
    pub fn run(mut self, shutdown: &AtomicBool) {
        let mut partitioned = false;
        loop {
            if !wait(self.interval, shutdown) {
                break;
            }
            if partitioned {
                self.heal();
            } else {
                self.partition();
            }
            partitioned = !partitioned;
        }
        if partitioned {
            self.heal();
        }
    }

    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        std::thread::spawn(move || self.run(&shutdown))
    }
}

/// Sleeps for `duration`, polling the shutdown flag. Returns false if
/// shutdown was requested.
fn wait(duration: Duration, shutdown: &AtomicBool) -> bool {
    let give_up = Instant::now() + duration;
    while Instant::now() < give_up {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        std::thread::sleep(TICK.min(give_up.saturating_duration_since(Instant::now())));
    }
    !shutdown.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::journal::Journal;
    use crate::message::Message;
    use crate::time::RunTime;
    use serde_json::json;

    #[test]
    fn partition_then_heal() {
        let mut config = Config::new(3);
        config.set_latency(Duration::from_millis(0));
        let net = Net::new(&config, Journal::new(), Arc::new(RunTime::new()));
        let time: Arc<RunTime> = Arc::new(RunTime::new());
        let history = History::new(time);

        let nodes: Vec<NodeId> = vec!["n1".into(), "n2".into(), "n3".into()];
        for node in &nodes {
            net.add_node(node.clone());
        }

        let mut nemesis =
            PartitionNemesis::new(net.clone(), history.clone(), nodes.clone(), Duration::from_secs(1), 42);
        let isolated = nemesis.partition();
        assert!(!isolated.is_empty() && isolated.len() < nodes.len());

        // a crossing link is dead in both directions
        let inside = &isolated[0];
        let outside = nodes.iter().find(|n| !isolated.contains(n)).unwrap();
        net.send(Message::new(inside.clone(), outside.clone(), json!({"type": "x"})))
            .unwrap();
        net.send(Message::new(outside.clone(), inside.clone(), json!({"type": "x"})))
            .unwrap();
        assert_eq!(net.recv(outside, Duration::from_millis(10)), None);
        assert_eq!(net.recv(inside, Duration::from_millis(10)), None);

        // healing restores connectivity
        nemesis.heal();
        net.send(Message::new(inside.clone(), outside.clone(), json!({"type": "x"})))
            .unwrap();
        assert!(net.recv(outside, Duration::from_millis(10)).is_some());

        // both transitions are in the history
        let ops = history.snapshot();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].f, "start-partition");
        assert_eq!(ops[1].f, "heal");
        assert!(ops.iter().all(|op| op.process == NEMESIS_PROCESS));
    }
}
