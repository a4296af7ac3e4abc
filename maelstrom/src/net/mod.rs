use crate::config::Config;
use crate::error::RpcError;
use crate::journal::Journal;
use crate::message::{Envelope, Message, MsgId, NodeId};
use crate::time::SysTime;
use crate::{info, log, HashMap, HashSet};
use parking_lot::{Condvar, Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The simulated network: per-node priority mailboxes with configurable
/// latency, random loss and one-way partitions, journaling every send and
/// receive. Cheap to clone; all clones share the same network.
#[derive(Clone)]
pub struct Net {
    inner: Arc<Inner>,
}

struct Inner {
    mailboxes: RwLock<HashMap<NodeId, Arc<Mailbox>>>,
    /// receiver -> senders whose messages are dropped at dequeue time
    partitions: Mutex<HashMap<NodeId, HashSet<NodeId>>>,
    faults: Mutex<Faults>,
    next_msg_id: AtomicU64,
    next_seq: AtomicU64,
    next_client: AtomicU64,
    rng: Mutex<StdRng>,
    journal: Journal,
    time: Arc<dyn SysTime>,
    log_send: bool,
    log_recv: bool,
}

#[derive(Debug, Clone, Copy)]
struct Faults {
    latency: Duration,
    p_loss: f64,
}

struct Mailbox {
    queue: Mutex<BinaryHeap<Reverse<Envelope>>>,
    available: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
        }
    }
}

impl Net {
    pub fn new(config: &Config, journal: Journal, time: Arc<dyn SysTime>) -> Self {
        let inner = Inner {
            mailboxes: RwLock::new(HashMap::new()),
            partitions: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults {
                latency: config.latency(),
                p_loss: config.p_loss(),
            }),
            next_msg_id: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            next_client: AtomicU64::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed())),
            journal,
            time,
            log_send: config.log_net_send(),
            log_recv: config.log_net_recv(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Registers a mailbox for `id`. Re-adding a live node is a harness bug.
    pub fn add_node(&self, id: impl Into<NodeId>) {
        let id = id.into();
        let previous = self
            .inner
            .mailboxes
            .write()
            .insert(id.clone(), Arc::new(Mailbox::new()));
        assert!(previous.is_none(), "node {} registered twice", id);
        log!("net: added node {}", id);
    }

    /// Drops the mailbox for `id`; messages still queued there are gone.
    pub fn remove_node(&self, id: &str) {
        self.inner.mailboxes.write().remove(id);
        log!("net: removed node {}", id);
    }

    pub fn registered(&self, id: &str) -> bool {
        self.inner.mailboxes.read().contains_key(id)
    }

    /// Allocates a fresh harness-client identifier (`c1`, `c2`, ...).
    pub fn next_client_id(&self) -> NodeId {
        let k = self.inner.next_client.fetch_add(1, Ordering::SeqCst) + 1;
        format!("c{}", k)
    }

    pub fn journal(&self) -> &Journal {
        &self.inner.journal
    }

    /// Sends `msg`: assigns a fresh message id, journals the send, then
    /// either loses the message or enqueues it with a uniformly random
    /// delivery delay in `[0, latency)`.
    pub fn send(&self, mut msg: Message) -> Result<MsgId, RpcError> {
        let mailbox = {
            let mailboxes = self.inner.mailboxes.read();
            if !mailboxes.contains_key(&msg.src) {
                return Err(RpcError::node_not_found(&msg.src));
            }
            match mailboxes.get(&msg.dest) {
                Some(mailbox) => mailbox.clone(),
                None => return Err(RpcError::node_not_found(&msg.dest)),
            }
        };

        let id = self.inner.next_msg_id.fetch_add(1, Ordering::SeqCst) + 1;
        msg.id = Some(id);

        let now = self.inner.time.nanos();
        self.inner.journal.record_send(now, msg.clone());
        if self.log_send() {
            info!("net: send {} -> {}: {}", msg.src, msg.dest, msg.body);
        }

        let Faults { latency, p_loss } = *self.inner.faults.lock();
        let (lost, delay) = {
            let mut rng = self.inner.rng.lock();
            let lost = p_loss > 0.0 && rng.gen_bool(p_loss);
            let latency_ms = latency.as_millis() as u64;
            let delay = if latency_ms == 0 {
                0
            } else {
                rng.gen_range(0, latency_ms)
            };
            (lost, Duration::from_millis(delay))
        };
        if lost {
            log!("net: lost message {} from {} to {}", id, msg.src, msg.dest);
            return Ok(id);
        }

        let envelope = Envelope {
            deadline: now + delay.as_nanos() as u64,
            seq: self.inner.next_seq.fetch_add(1, Ordering::SeqCst),
            message: msg,
        };
        let mut queue = mailbox.queue.lock();
        queue.push(Reverse(envelope));
        mailbox.available.notify_one();
        Ok(id)
    }

    /// Pops the earliest-deadline message for `node`, waiting up to
    /// `timeout`. Messages from partitioned senders are dropped silently at
    /// dequeue time, so partitions installed or healed while messages are in
    /// flight take effect on delivery. Returns `None` on timeout or if the
    /// node has no mailbox.
    pub fn recv(&self, node: &str, timeout: Duration) -> Option<Message> {
        let mailbox = self.inner.mailboxes.read().get(node).cloned()?;
        let give_up = Instant::now() + timeout;

        let mut queue = mailbox.queue.lock();
        loop {
            while let Some(Reverse(envelope)) = queue.pop() {
                if self.partitioned(node, &envelope.message.src) {
                    log!(
                        "net: partition dropped message {:?} from {} to {}",
                        envelope.message.id,
                        envelope.message.src,
                        node
                    );
                    continue;
                }
                drop(queue);

                // the envelope may not be due yet
                let now = self.inner.time.nanos();
                if envelope.deadline > now {
                    std::thread::sleep(Duration::from_nanos(envelope.deadline - now));
                }

                let message = envelope.message;
                self.inner
                    .journal
                    .record_recv(self.inner.time.nanos(), message.clone());
                if self.log_recv() {
                    info!(
                        "net: recv {} <- {}: {}",
                        message.dest, message.src, message.body
                    );
                }
                return Some(message);
            }

            if mailbox
                .available
                .wait_until(&mut queue, give_up)
                .timed_out()
            {
                return None;
            }
        }
    }

    fn partitioned(&self, receiver: &str, sender: &str) -> bool {
        self.inner
            .partitions
            .lock()
            .get(receiver)
            .map(|senders| senders.contains(sender))
            .unwrap_or(false)
    }

    /// Starts dropping messages from `src` to `dest`. One-directional; block
    /// both directions for a full partition.
    pub fn drop_link(&self, src: &str, dest: &str) {
        self.inner
            .partitions
            .lock()
            .entry(dest.to_string())
            .or_insert_with(HashSet::new)
            .insert(src.to_string());
        log!("net: dropping {} -> {}", src, dest);
    }

    /// Removes every partition.
    pub fn heal(&self) {
        self.inner.partitions.lock().clear();
        log!("net: healed");
    }

    /// Scales mean latency up by 10x.
    pub fn slow(&self) {
        let mut faults = self.inner.faults.lock();
        faults.latency *= 10;
    }

    /// Scales mean latency down by 10x.
    pub fn fast(&self) {
        let mut faults = self.inner.faults.lock();
        faults.latency /= 10;
    }

    /// Makes the network drop half of all messages.
    pub fn flaky(&self) {
        self.inner.faults.lock().p_loss = 0.5;
    }

    pub fn latency(&self) -> Duration {
        self.inner.faults.lock().latency
    }

    pub fn p_loss(&self) -> f64 {
        self.inner.faults.lock().p_loss
    }

    fn log_send(&self) -> bool {
        self.inner.log_send
    }

    fn log_recv(&self) -> bool {
        self.inner.log_recv
    }
}
