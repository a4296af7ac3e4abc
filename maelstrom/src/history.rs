use crate::error::RpcError;
use crate::time::SysTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Process index used for nemesis events.
pub const NEMESIS_PROCESS: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Invoke,
    Ok,
    Fail,
    Info,
}

/// One history entry. `invoke` marks the start of an operation; `ok`,
/// `fail` and `info` mark completions with a known-good, known-bad and
/// unknown outcome respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub process: i64,
    /// monotonic nanos
    pub time: u64,
    #[serde(rename = "type")]
    pub ty: OpType,
    pub f: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// The observed history of a run: everything the clients invoked and how it
/// turned out, plus nemesis transitions. Consumed by checkers.
#[derive(Clone)]
pub struct History {
    entries: Arc<Mutex<Vec<Op>>>,
    time: Arc<dyn SysTime>,
}

impl History {
    pub fn new(time: Arc<dyn SysTime>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            time,
        }
    }

    fn push(&self, process: i64, ty: OpType, f: &str, value: Value, error: Option<Value>) {
        self.entries.lock().push(Op {
            process,
            time: self.time.nanos(),
            ty,
            f: f.to_string(),
            value,
            error,
        });
    }

    pub fn invoke(&self, process: i64, f: &str, value: Value) {
        self.push(process, OpType::Invoke, f, value, None);
    }

    pub fn ok(&self, process: i64, f: &str, value: Value) {
        self.push(process, OpType::Ok, f, value, None);
    }

    pub fn fail(&self, process: i64, f: &str, value: Value, error: Value) {
        self.push(process, OpType::Fail, f, value, Some(error));
    }

    pub fn info(&self, process: i64, f: &str, value: Value, error: Option<Value>) {
        self.push(process, OpType::Info, f, value, error);
    }

    /// Completes an invoked operation from an RPC outcome. Definite errors,
    /// and errors on idempotent operations, certainly did not take effect
    /// and become `fail`; anything else has an unknown outcome and becomes
    /// `info`.
    pub fn complete(
        &self,
        process: i64,
        f: &str,
        value: Value,
        outcome: &Result<Value, RpcError>,
        idempotent: &[&str],
    ) {
        match outcome {
            Ok(completed) => self.ok(process, f, completed.clone()),
            Err(err) => {
                let error = json!({"code": err.code, "name": err.name, "text": err.text});
                if err.definite || idempotent.contains(&f) {
                    self.fail(process, f, value, error);
                } else {
                    self.info(process, f, value, Some(error));
                }
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Op> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Renders a history in the line-per-op text format, for humans.
pub fn render_text(history: &[Op]) -> String {
    let mut out = String::new();
    for op in history {
        let ty = match op.ty {
            OpType::Invoke => "invoke",
            OpType::Ok => "ok",
            OpType::Fail => "fail",
            OpType::Info => "info",
        };
        let process = if op.process == NEMESIS_PROCESS {
            "nemesis".to_string()
        } else {
            op.process.to_string()
        };
        out.push_str(&format!(
            "{:<10} {:<8} {:<8} {:<24} {}\n",
            op.time / 1_000_000,
            process,
            ty,
            op.f,
            op.value
        ));
        if let Some(error) = &op.error {
            out.push_str(&format!("{:>28} error: {}\n", "", error));
        }
    }
    out
}
