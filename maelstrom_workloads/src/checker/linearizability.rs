use maelstrom::{HashMap, HashSet};
use serde_json::Value;

/// A register operation as observed by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum RegOp {
    /// read that returned this value
    Read(Value),
    Write(Value),
    /// compare-and-set from -> to
    Cas(Value, Value),
}

/// One operation window. `complete == u64::MAX` marks an indefinite
/// operation: it may take effect at any point after its invocation, or
/// never.
#[derive(Debug, Clone)]
pub struct OpWindow {
    pub op: RegOp,
    pub invoke: u64,
    pub complete: u64,
    /// true for `ok` operations, which must appear in any linearization;
    /// indefinite operations are optional
    pub definite: bool,
    /// position in the original history, for counterexamples
    pub index: usize,
}

impl OpWindow {
    pub fn indefinite(op: RegOp, invoke: u64, index: usize) -> Self {
        Self {
            op,
            invoke,
            complete: u64::MAX,
            definite: false,
            index,
        }
    }

    pub fn definite(op: RegOp, invoke: u64, complete: u64, index: usize) -> Self {
        Self {
            op,
            invoke,
            complete,
            definite: true,
            index,
        }
    }
}

/// The register model: `None` until the first effective write.
fn step(state: &Option<Value>, op: &RegOp) -> Option<Option<Value>> {
    match op {
        RegOp::Read(observed) => {
            if state.as_ref() == Some(observed) {
                Some(state.clone())
            } else {
                None
            }
        }
        RegOp::Write(value) => Some(Some(value.clone())),
        RegOp::Cas(from, to) => {
            if state.as_ref() == Some(from) {
                Some(Some(to.clone()))
            } else {
                None
            }
        }
    }
}

/// Why a history failed to linearize.
#[derive(Debug, Clone)]
pub struct Counterexample {
    /// indices of the longest linearizable prefix found
    pub longest_prefix: Vec<usize>,
}

/// Wing&Gong-style search: try to order the operation windows into a legal
/// sequential history of the register, respecting real-time precedence.
/// Every definite operation must be placed; indefinite ones may be placed
/// (they took effect) or dropped (they did not).
pub fn check(ops: &[OpWindow]) -> Result<(), Counterexample> {
    let n = ops.len();
    if n == 0 {
        return Ok(());
    }
    let words = (n + 63) / 64;
    let definite_count = ops.iter().filter(|op| op.definite).count();

    // depth-first over (linearized-set, state), memoized
    let mut seen: HashSet<(Vec<u64>, Option<String>)> = HashSet::new();
    let mut stack: Vec<(Vec<u64>, usize, Option<Value>, Vec<usize>)> = Vec::new();
    let start = (vec![0u64; words], 0usize, None, Vec::new());
    let mut longest: Vec<usize> = Vec::new();
    stack.push(start);

    while let Some((mask, placed, state, order)) = stack.pop() {
        if placed == definite_count && all_definite_placed(ops, &mask) {
            return Ok(());
        }
        let key = (mask.clone(), state.as_ref().map(|v| v.to_string()));
        if !seen.insert(key) {
            continue;
        }
        if order.len() > longest.len() {
            longest = order.clone();
        }

        // an op may go next iff every other remaining op completes at or
        // after its invocation
        let min_complete = ops
            .iter()
            .enumerate()
            .filter(|(i, _)| !bit(&mask, *i))
            .map(|(_, op)| op.complete)
            .min()
            .unwrap_or(u64::MAX);

        for (i, op) in ops.iter().enumerate() {
            if bit(&mask, i) || op.invoke > min_complete {
                continue;
            }
            // indefinite ops that never get placed simply never happened;
            // they cannot block anyone (their completion is unbounded) and
            // termination does not require them
            if let Some(next_state) = step(&state, &op.op) {
                let mut next_mask = mask.clone();
                set_bit(&mut next_mask, i);
                let next_placed = placed + usize::from(op.definite);
                let mut next_order = order.clone();
                next_order.push(op.index);
                stack.push((next_mask, next_placed, next_state, next_order));
            }
        }
    }

    Err(Counterexample {
        longest_prefix: longest,
    })
}

fn all_definite_placed(ops: &[OpWindow], mask: &[u64]) -> bool {
    ops.iter()
        .enumerate()
        .all(|(i, op)| !op.definite || bit(mask, i))
}

fn bit(mask: &[u64], i: usize) -> bool {
    mask[i / 64] & (1 << (i % 64)) != 0
}

fn set_bit(mask: &mut [u64], i: usize) {
    mask[i / 64] |= 1 << (i % 64);
}

/// Splits per-key operation windows and checks each key independently;
/// single-register linearizability composes over keys.
pub fn check_keys(
    per_key: &HashMap<String, Vec<OpWindow>>,
) -> Result<(), (String, Counterexample)> {
    let mut keys: Vec<_> = per_key.keys().collect();
    keys.sort();
    for key in keys {
        check(&per_key[key]).map_err(|ce| (key.clone(), ce))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(v: i64, invoke: u64, complete: u64, index: usize) -> OpWindow {
        OpWindow::definite(RegOp::Write(json!(v)), invoke, complete, index)
    }

    fn read(v: i64, invoke: u64, complete: u64, index: usize) -> OpWindow {
        OpWindow::definite(RegOp::Read(json!(v)), invoke, complete, index)
    }

    #[test]
    fn sequential_history() {
        let ops = vec![
            write(1, 0, 10, 0),
            read(1, 20, 30, 1),
            write(2, 40, 50, 2),
            read(2, 60, 70, 3),
        ];
        assert!(check(&ops).is_ok());
    }

    #[test]
    fn read_of_stale_value_is_rejected() {
        // w(1) and w(2) are strictly ordered in real time, so the read
        // must observe 2
        let ops = vec![write(1, 0, 5, 0), write(2, 10, 15, 1), read(1, 20, 25, 2)];
        assert!(check(&ops).is_err());
    }

    #[test]
    fn concurrent_writes_commute() {
        // overlapping writes may linearize either way
        let ops = vec![write(1, 0, 10, 0), write(2, 5, 15, 1), read(1, 20, 30, 2)];
        assert!(check(&ops).is_ok());
        let ops = vec![write(1, 0, 10, 0), write(2, 5, 15, 1), read(2, 20, 30, 2)];
        assert!(check(&ops).is_ok());
    }

    #[test]
    fn read_of_unwritten_value_is_rejected() {
        let ops = vec![write(1, 0, 10, 0), read(3, 20, 30, 1)];
        let err = check(&ops).unwrap_err();
        // the write alone linearizes
        assert_eq!(err.longest_prefix, vec![0]);
    }

    #[test]
    fn indefinite_write_may_or_may_not_apply() {
        // the timed-out w(2) explains a read of 2...
        let ops = vec![
            write(1, 0, 5, 0),
            OpWindow::indefinite(RegOp::Write(json!(2)), 6, 1),
            read(2, 10, 20, 2),
        ];
        assert!(check(&ops).is_ok());

        // ...and its absence explains a read of 1
        let ops = vec![
            write(1, 0, 5, 0),
            OpWindow::indefinite(RegOp::Write(json!(2)), 6, 1),
            read(1, 10, 20, 2),
        ];
        assert!(check(&ops).is_ok());
    }

    #[test]
    fn cas_chains() {
        let ops = vec![
            write(1, 0, 5, 0),
            OpWindow::definite(RegOp::Cas(json!(1), json!(2)), 10, 15, 1),
            read(2, 20, 25, 2),
        ];
        assert!(check(&ops).is_ok());

        // a cas that succeeded must have seen its precondition
        let ops = vec![
            write(1, 0, 5, 0),
            OpWindow::definite(RegOp::Cas(json!(3), json!(4)), 10, 15, 1),
        ];
        assert!(check(&ops).is_err());
    }

    #[test]
    fn per_key_composition() {
        let mut per_key = HashMap::new();
        per_key.insert("a".to_string(), vec![write(1, 0, 5, 0), read(1, 10, 15, 1)]);
        per_key.insert("b".to_string(), vec![write(7, 0, 5, 2), read(8, 10, 15, 3)]);
        let (key, _) = check_keys(&per_key).unwrap_err();
        assert_eq!(key, "b");
    }
}
