use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Node identifiers are plain strings: user nodes are `n1..nN`, harness
/// clients are `c1..cM`, services use fixed well-known names.
pub type NodeId = String;

/// Message identifiers are assigned by the net on send and are unique within
/// a single test.
pub type MsgId = u64;

/// A message routed through the simulated network. The body is an open JSON
/// object carrying at least a `type` field; workloads layer their typed
/// bodies on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MsgId>,
}

impl Message {
    pub fn new(src: impl Into<NodeId>, dest: impl Into<NodeId>, body: Value) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
            id: None,
        }
    }

    /// Returns the body's `type` discriminator, if any.
    pub fn msg_type(&self) -> Option<&str> {
        body_type(&self.body)
    }

    /// Returns the body's `msg_id`, if any.
    pub fn msg_id(&self) -> Option<u64> {
        body_u64(&self.body, "msg_id")
    }

    /// Returns the body's `in_reply_to`, if any.
    pub fn in_reply_to(&self) -> Option<u64> {
        body_u64(&self.body, "in_reply_to")
    }
}

/// Returns the `type` field of a message body.
pub fn body_type(body: &Value) -> Option<&str> {
    body.get("type").and_then(Value::as_str)
}

fn body_u64(body: &Value, field: &str) -> Option<u64> {
    body.get(field).and_then(Value::as_u64)
}

/// Inserts `msg_id` into a request body.
pub fn with_msg_id(mut body: Value, msg_id: u64) -> Value {
    body.as_object_mut()
        .expect("message bodies must be objects")
        .insert("msg_id".to_string(), Value::from(msg_id));
    body
}

/// Annotates a response body with the `in_reply_to` of the request it
/// answers.
pub fn with_in_reply_to(mut body: Value, in_reply_to: u64) -> Value {
    body.as_object_mut()
        .expect("message bodies must be objects")
        .insert("in_reply_to".to_string(), Value::from(in_reply_to));
    body
}

/// An envelope waiting in a mailbox: the message plus its computed delivery
/// deadline. `seq` breaks deadline ties so that delivery is deterministic
/// under a fixed seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub deadline: u64,
    pub seq: u64,
    pub message: Message,
}

// Envelopes are compared by `(deadline, seq)` only; `seq` is unique per
// mailbox.
impl Ord for Envelope {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

impl PartialOrd for Envelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
