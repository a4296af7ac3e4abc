use super::{Mergeable, MutableService, PersistentService};
use crate::message::Message;
use crate::HashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::VecDeque;

/// How many recent states a sequential service retains.
const BUFFER: usize = 32;

/// Strictly ordered: a single cell holding the current state, updated
/// atomically under its lock.
pub struct Linearizable<S> {
    state: Mutex<S>,
}

impl<S: PersistentService> Linearizable<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl<S: PersistentService> MutableService for Linearizable<S> {
    fn handle(&self, msg: &Message) -> Value {
        let mut state = self.state.lock();
        let (next, response) = state.handle(&msg.src, &msg.body);
        *state = next;
        response
    }
}

/// Sequentially consistent with bounded staleness: a ring buffer of the
/// last `BUFFER` states plus a per-client watermark. Read-only operations
/// may be served from any retained state at or after the client's
/// watermark; mutating operations re-run against the head and advance the
/// client to the new head.
pub struct Sequential<S> {
    inner: Mutex<SeqInner<S>>,
    rng: Mutex<StdRng>,
}

struct SeqInner<S> {
    states: VecDeque<S>,
    /// global index of the newest retained state
    head: u64,
    clients: HashMap<String, u64>,
}

impl<S: PersistentService + PartialEq> Sequential<S> {
    pub fn new(state: S, seed: u64) -> Self {
        let mut states = VecDeque::with_capacity(BUFFER);
        states.push_back(state);
        Self {
            inner: Mutex::new(SeqInner {
                states,
                head: 0,
                clients: HashMap::new(),
            }),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl<S: PersistentService + PartialEq> MutableService for Sequential<S> {
    fn handle(&self, msg: &Message) -> Value {
        let mut inner = self.inner.lock();
        let oldest = inner.head + 1 - inner.states.len() as u64;

        // watermarks below the retention window are pulled up to the oldest
        // retained state
        let watermark = inner
            .clients
            .get(&msg.src)
            .copied()
            .unwrap_or(oldest)
            .max(oldest);

        let index = if watermark == inner.head {
            inner.head
        } else {
            self.rng.lock().gen_range(watermark, inner.head + 1)
        };
        let chosen = inner.states[(index - oldest) as usize].clone();
        let (next, response) = chosen.handle(&msg.src, &msg.body);

        if next == chosen {
            // read-only: serve from the chosen state, remember where we were
            inner.clients.insert(msg.src.clone(), index);
            return response;
        }

        // mutating: re-run against the head and append the successor
        let head_state = inner.states.back().expect("ring is never empty").clone();
        let (next, response) = head_state.handle(&msg.src, &msg.body);
        inner.states.push_back(next);
        if inner.states.len() > BUFFER {
            inner.states.pop_front();
        }
        inner.head += 1;
        let head = inner.head;
        inner.clients.insert(msg.src.clone(), head);
        response
    }
}

/// Eventually consistent: a handful of replicas gossiped by pairwise merge
/// on every request, with the operation applied at a random replica.
pub struct Eventual<S> {
    replicas: Mutex<Vec<S>>,
    rng: Mutex<StdRng>,
}

impl<S: Mergeable> Eventual<S> {
    pub fn new(state: S, replicas: usize, seed: u64) -> Self {
        assert!(replicas > 0, "eventual service needs at least one replica");
        Self {
            replicas: Mutex::new(vec![state; replicas]),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    #[cfg(test)]
    fn replicas(&self) -> Vec<S> {
        self.replicas.lock().clone()
    }
}

impl<S: Mergeable> MutableService for Eventual<S> {
    fn handle(&self, msg: &Message) -> Value {
        let mut replicas = self.replicas.lock();
        let mut rng = self.rng.lock();
        let n = replicas.len();

        // gossip first: merge a random pair, receiver keeps ties
        let src = rng.gen_range(0, n);
        let dst = rng.gen_range(0, n);
        let merged = replicas[dst].merge(&replicas[src]);
        replicas[dst] = merged;

        // then apply the operation at a random replica
        let at = rng.gen_range(0, n);
        let (next, response) = replicas[at].handle(&msg.src, &msg.body);
        replicas[at] = next;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::PersistentKV;
    use crate::services::lww::LWWKV;
    use crate::services::tso::PersistentTSO;
    use serde_json::json;

    fn msg(src: &str, body: Value) -> Message {
        Message::new(src, "svc", body)
    }

    fn read(key: &str) -> Value {
        json!({"type": "read", "key": key})
    }

    fn write(key: &str, value: i64) -> Value {
        json!({"type": "write", "key": key, "value": value})
    }

    #[test]
    fn linearizable_total_order() {
        let svc = Linearizable::new(PersistentKV::new());
        assert_eq!(svc.handle(&msg("c1", write("x", 1)))["type"], "write_ok");
        assert_eq!(svc.handle(&msg("c2", write("x", 2)))["type"], "write_ok");
        let resp = svc.handle(&msg("c3", read("x")));
        assert_eq!(resp["value"], 2);
    }

    #[test]
    fn linearizable_tso() {
        let svc = Linearizable::new(PersistentTSO::new());
        let a = svc.handle(&msg("c1", json!({"type": "ts"})))["ts"]
            .as_u64()
            .unwrap();
        let b = svc.handle(&msg("c2", json!({"type": "ts"})))["ts"]
            .as_u64()
            .unwrap();
        assert!(b > a);
    }

    #[test]
    fn sequential_writer_reads_its_own_writes() {
        let svc = Sequential::new(PersistentKV::new(), 7);
        svc.handle(&msg("c1", write("x", 1)));
        svc.handle(&msg("c1", write("x", 2)));
        // the writer's watermark is at the head
        assert_eq!(svc.handle(&msg("c1", read("x")))["value"], 2);
    }

    #[test]
    fn sequential_observations_are_monotonic() {
        let svc = Sequential::new(PersistentKV::new(), 13);
        for i in 1..=10 {
            svc.handle(&msg("c1", write("x", i)));
        }

        // a fresh client may observe stale states, but never goes backwards
        let mut last = 0;
        for _ in 0..50 {
            let resp = svc.handle(&msg("c2", read("x")));
            let seen = if resp["type"] == "error" {
                0
            } else {
                resp["value"].as_i64().unwrap()
            };
            assert!(seen >= last, "went back from {} to {}", last, seen);
            last = seen;
        }
    }

    #[test]
    fn sequential_write_advances_to_head() {
        let svc = Sequential::new(PersistentKV::new(), 17);
        for i in 1..=10 {
            svc.handle(&msg("c1", write("x", i)));
        }
        svc.handle(&msg("c2", write("y", 1)));
        // after writing, c2 sees the head of the timeline
        assert_eq!(svc.handle(&msg("c2", read("x")))["value"], 10);
    }

    #[test]
    fn sequential_retention_window() {
        let svc = Sequential::new(PersistentKV::new(), 19);
        for i in 1..=40 {
            svc.handle(&msg("c1", write("x", i)));
        }
        // head is 40 and only 32 states are retained, so even the stalest
        // read sees at least write 9
        for _ in 0..20 {
            let seen = svc.handle(&msg("c2", read("x")))["value"].as_i64().unwrap();
            assert!((9..=40).contains(&seen));
        }
    }

    #[test]
    fn eventual_single_replica_is_immediate() {
        let svc = Eventual::new(LWWKV::new(), 1, 23);
        svc.handle(&msg("c1", write("x", 1)));
        assert_eq!(svc.handle(&msg("c2", read("x")))["value"], 1);
    }

    #[test]
    fn eventual_gossip_converges() {
        let svc = Eventual::new(LWWKV::new(), 2, 29);
        svc.handle(&msg("c1", write("x", 1)));

        // every request merges a random pair, so the write spreads
        for _ in 0..100 {
            svc.handle(&msg("c2", read("x")));
        }
        for replica in svc.replicas() {
            assert_eq!(replica.get(&json!("x")), Some(&json!(1)));
        }
    }
}
