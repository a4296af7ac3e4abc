// This module contains the register linearizability checker.
pub mod linearizability;

// This module contains the transaction dependency-graph analysis.
pub mod elle;

use maelstrom::history::{Op, OpType, NEMESIS_PROCESS};
use maelstrom::HashMap;

/// Pairs each completion with its invocation. Clients are serial, so the
/// pending invocation per process is unique.
pub fn completions(history: &[Op]) -> Vec<(&Op, &Op)> {
    let mut pending: HashMap<i64, &Op> = HashMap::new();
    let mut pairs = Vec::new();
    for op in history {
        if op.process == NEMESIS_PROCESS {
            continue;
        }
        match op.ty {
            OpType::Invoke => {
                pending.insert(op.process, op);
            }
            OpType::Ok | OpType::Fail | OpType::Info => {
                if let Some(invoke) = pending.remove(&op.process) {
                    pairs.push((invoke, op));
                }
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use maelstrom::history::History;
    use maelstrom::time::SimTime;
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[test]
    fn pairing_is_per_process() {
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "read", Value::Null);
        history.invoke(1, "write", json!(1));
        history.ok(1, "write", json!(1));
        history.ok(0, "read", json!(2));

        let ops = history.snapshot();
        let pairs = completions(&ops);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0.process, 1);
        assert_eq!(pairs[1].0.process, 0);
        assert_eq!(pairs[1].1.value, json!(2));
    }
}
