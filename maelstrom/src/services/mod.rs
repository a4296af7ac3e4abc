// This module contains the definition of `PersistentKV`.
pub mod kv;

// This module contains the definition of `LWWKV`.
pub mod lww;

// This module contains the definition of `PersistentTSO`.
pub mod tso;

// This module contains the consistency wrappers.
pub mod wrappers;

// Re-exports.
pub use kv::PersistentKV;
pub use lww::LWWKV;
pub use tso::PersistentTSO;
pub use wrappers::{Eventual, Linearizable, Sequential};

use crate::config::Config;
use crate::message::{with_in_reply_to, Message, NodeId};
use crate::log;
use crate::net::Net;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll interval of the per-service recv loop.
const TICK: Duration = Duration::from_secs(1);

/// A pure state machine: handling a request yields the successor state and
/// the response body.
pub trait PersistentService: Clone + Send + 'static {
    fn handle(&self, from: &str, body: &Value) -> (Self, Value);
}

/// A persistent service whose states can be merged pairwise. Required by
/// the eventually-consistent wrapper.
pub trait Mergeable: PersistentService {
    /// Merges `other` into `self`; `self` is the receiving side.
    fn merge(&self, other: &Self) -> Self;
}

/// A mutable service: a consistency wrapper around a persistent state
/// machine, addressable on the net at a well-known id.
pub trait MutableService: Send + Sync {
    fn handle(&self, msg: &Message) -> Value;
}

/// An error response body, in the wire shape.
pub fn error_body(code: u32, text: &str) -> Value {
    json!({"type": "error", "code": code, "text": text})
}

/// A running service: its recv loop thread and mailbox registration.
pub struct ServiceHandle {
    id: NodeId,
    net: Net,
    thread: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Joins the loop (the shared shutdown flag must already be set) and
    /// unregisters the mailbox.
    pub fn join(self) {
        let _ = self.thread.join();
        self.net.remove_node(&self.id);
    }
}

/// Registers `id` in the net and starts its recv loop: each incoming
/// request is handled and answered with the returned body annotated with
/// `in_reply_to`.
pub fn start_service(
    net: &Net,
    id: &str,
    service: Arc<dyn MutableService>,
    shutdown: &Arc<AtomicBool>,
) -> ServiceHandle {
    net.add_node(id);
    let loop_net = net.clone();
    let loop_id = id.to_string();
    let shutdown = shutdown.clone();
    let thread = std::thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            let msg = match loop_net.recv(&loop_id, TICK) {
                Some(msg) => msg,
                None => continue,
            };
            let mut response = service.handle(&msg);
            if let Some(msg_id) = msg.msg_id() {
                response = with_in_reply_to(response, msg_id);
            }
            let reply = Message::new(loop_id.clone(), msg.src.clone(), response);
            if let Err(e) = loop_net.send(reply) {
                // the requester may be gone already; that's its problem
                log!("service {}: reply failed: {}", loop_id, e);
            }
        }
        log!("service {}: stopped", loop_id);
    });
    ServiceHandle {
        id: id.to_string(),
        net: net.clone(),
        thread,
    }
}

/// The default service bindings started with every test.
pub fn standard_services(config: &Config) -> Vec<(&'static str, Arc<dyn MutableService>)> {
    let seed = config.seed();
    vec![
        (
            "lin-kv",
            Arc::new(Linearizable::new(PersistentKV::new())) as Arc<dyn MutableService>,
        ),
        (
            "seq-kv",
            Arc::new(Sequential::new(PersistentKV::new(), seed.wrapping_add(1)))
                as Arc<dyn MutableService>,
        ),
        (
            "lww-kv",
            Arc::new(Eventual::new(LWWKV::new(), 2, seed.wrapping_add(2)))
                as Arc<dyn MutableService>,
        ),
        (
            "lin-tso",
            Arc::new(Linearizable::new(PersistentTSO::new())) as Arc<dyn MutableService>,
        ),
    ]
}

/// Starts every standard service.
pub fn start_standard_services(
    net: &Net,
    config: &Config,
    shutdown: &Arc<AtomicBool>,
) -> Vec<ServiceHandle> {
    standard_services(config)
        .into_iter()
        .map(|(id, service)| start_service(net, id, service, shutdown))
        .collect()
}
