use crate::error::RpcError;
use crate::message::{with_msg_id, Message, NodeId};
use crate::net::Net;
use crate::rpc::Registry;
use crate::{log, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(5000);

/// A synchronous, one-in-flight RPC endpoint over the net. Clients drive
/// workloads and the init handshake; each owns a mailbox named `cK`.
pub struct Client {
    id: NodeId,
    net: Net,
    registry: Arc<Registry>,
    next_msg_id: AtomicU64,
    waiting: AtomicBool,
}

impl Client {
    /// Opens a client with a fresh identifier and registers it in the net.
    pub fn open(net: &Net, registry: Arc<Registry>) -> Self {
        let id = net.next_client_id();
        net.add_node(id.clone());
        Self {
            id,
            net: net.clone(),
            registry,
            next_msg_id: AtomicU64::new(0),
            waiting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unregisters this client's mailbox.
    pub fn close(self) {
        self.net.remove_node(&self.id);
    }

    pub fn rpc(&self, dest: &str, body: Value) -> Result<Value, RpcError> {
        self.rpc_with_timeout(dest, body, DEFAULT_RPC_TIMEOUT)
    }

    /// Sends `body` to `dest` and waits for the matching reply. Replies to
    /// requests we already gave up on are discarded. A `None` from the net
    /// surfaces as `timeout`; wire errors are mapped through the registry,
    /// preserving definiteness.
    pub fn rpc_with_timeout(
        &self,
        dest: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        // one outstanding request per client; a second one is a harness bug
        let _in_flight = InFlight::acquire(self);

        let msg_id = self.next_msg_id.fetch_add(1, Ordering::SeqCst) + 1;
        let body = with_msg_id(body, msg_id);
        self.registry.validate_request(&body)?;
        let request_type = crate::message::body_type(&body)
            .expect("validated request has a type")
            .to_string();

        self.net
            .send(Message::new(self.id.clone(), dest, body))?;

        let give_up = Instant::now() + timeout;
        loop {
            let remaining = give_up.saturating_duration_since(Instant::now());
            let reply = match self.net.recv(&self.id, remaining) {
                Some(reply) => reply,
                None => {
                    return Err(RpcError::timeout(format!(
                        "rpc {} to {} timed out after {:?}",
                        request_type, dest, timeout
                    )))
                }
            };

            if reply.in_reply_to() != Some(msg_id) {
                // a reply to a request we already gave up on
                log!(
                    "client {}: discarding stale reply {:?}",
                    self.id,
                    reply.in_reply_to()
                );
                continue;
            }

            if reply.msg_type() == Some("error") {
                let err = self.registry.rpc_error(&reply.body);
                log!("client {}: rpc {} failed: {}", self.id, request_type, err);
                return Err(err);
            }

            if let Err(err) = self.registry.validate_response(&request_type, &reply.body) {
                warn!("client {}: {}", self.id, err);
                return Err(err);
            }
            return Ok(reply.body);
        }
    }
}

/// Marks the client as busy for the duration of an rpc call.
struct InFlight<'a> {
    client: &'a Client,
}

impl<'a> InFlight<'a> {
    fn acquire(client: &'a Client) -> Self {
        let was_waiting = client.waiting.swap(true, Ordering::SeqCst);
        assert!(
            !was_waiting,
            "client {} already has an rpc in flight",
            client.id
        );
        Self { client }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.client.waiting.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::journal::Journal;
    use crate::message::with_in_reply_to;
    use crate::time::RunTime;
    use serde_json::json;

    fn test_net() -> Net {
        let mut config = Config::new(1);
        config.set_latency(Duration::from_millis(0));
        Net::new(&config, Journal::new(), Arc::new(RunTime::new()))
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::standard())
    }

    // a server thread that answers each request by applying `reply` to the
    // request body
    fn serve(
        net: &Net,
        node: &str,
        count: usize,
        reply: impl Fn(&Message) -> Value + Send + 'static,
    ) -> std::thread::JoinHandle<()> {
        net.add_node(node);
        let net = net.clone();
        let node = node.to_string();
        std::thread::spawn(move || {
            for _ in 0..count {
                let request = match net.recv(&node, Duration::from_secs(5)) {
                    Some(request) => request,
                    None => return,
                };
                let body =
                    with_in_reply_to(reply(&request), request.msg_id().expect("request msg_id"));
                let response = Message::new(node.clone(), request.src.clone(), body);
                net.send(response).expect("server send");
            }
        })
    }

    #[test]
    fn rpc_round_trip() {
        let net = test_net();
        let server = serve(&net, "n1", 1, |request| {
            json!({"type": "echo_ok", "echo": request.body["echo"]})
        });

        let client = Client::open(&net, registry());
        assert_eq!(client.id(), "c1");
        let reply = client
            .rpc("n1", json!({"type": "echo", "echo": "hi"}))
            .unwrap();
        assert_eq!(reply["type"], "echo_ok");
        assert_eq!(reply["echo"], "hi");
        server.join().unwrap();
    }

    #[test]
    fn rpc_timeout_is_indefinite() {
        let net = test_net();
        net.add_node("n1");
        let client = Client::open(&net, registry());
        let err = client
            .rpc_with_timeout("n1", json!({"type": "read"}), Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err.code, 0);
        assert!(!err.definite);
    }

    #[test]
    fn rpc_to_missing_node() {
        let net = test_net();
        let client = Client::open(&net, registry());
        let err = client.rpc("nope", json!({"type": "read"})).unwrap_err();
        assert_eq!(err.code, 1);
        assert!(err.definite);
    }

    #[test]
    fn wire_errors_are_mapped() {
        let net = test_net();
        let server = serve(&net, "lin-kv", 1, |_| {
            json!({"type": "error", "code": 20, "text": "no such key"})
        });

        let client = Client::open(&net, registry());
        let err = client
            .rpc("lin-kv", json!({"type": "read", "key": "x"}))
            .unwrap_err();
        assert_eq!(err.code, 20);
        assert_eq!(err.name, "key-does-not-exist");
        assert!(err.definite);
        assert_eq!(err.text.as_deref(), Some("no such key"));
        server.join().unwrap();
    }

    #[test]
    fn stale_replies_are_discarded() {
        let net = test_net();
        net.add_node("n1");
        let server_net = net.clone();
        let server = std::thread::spawn(move || {
            // swallow the first request entirely
            let first = server_net.recv("n1", Duration::from_secs(5)).unwrap();
            // answer the second request twice: once as a stale reply to the
            // first, then properly
            let second = server_net.recv("n1", Duration::from_secs(5)).unwrap();
            let stale = with_in_reply_to(json!({"type": "read_ok", "value": 1}), first.msg_id().unwrap());
            server_net
                .send(Message::new("n1", second.src.clone(), stale))
                .unwrap();
            let fresh =
                with_in_reply_to(json!({"type": "read_ok", "value": 2}), second.msg_id().unwrap());
            server_net
                .send(Message::new("n1", second.src.clone(), fresh))
                .unwrap();
        });

        let client = Client::open(&net, registry());
        let err = client
            .rpc_with_timeout("n1", json!({"type": "read"}), Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err.code, 0);

        // the second rpc must skip the reply addressed to the first
        let reply = client.rpc("n1", json!({"type": "read"})).unwrap();
        assert_eq!(reply["value"], 2);
        server.join().unwrap();
    }
}
