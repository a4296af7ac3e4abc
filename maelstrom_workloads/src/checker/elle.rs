use maelstrom::HashSet;
use serde_json::Value;

/// A transaction micro-operation in the wire shape `[f, key, value]`.
#[derive(Debug, Clone, PartialEq)]
pub enum MicroOp {
    /// `["r", k, observed]`; observed is null in requests
    Read(String, Value),
    /// `["append", k, v]`
    Append(String, Value),
    /// `["w", k, v]`
    Write(String, Value),
}

/// Parses the `txn` array of a request or response body.
pub fn parse_txn(txn: &Value) -> Option<Vec<MicroOp>> {
    let ops = txn.as_array()?;
    let mut parsed = Vec::with_capacity(ops.len());
    for op in ops {
        let parts = op.as_array()?;
        if parts.len() != 3 {
            return None;
        }
        let key = parts[1].to_string();
        match parts[0].as_str()? {
            "r" => parsed.push(MicroOp::Read(key, parts[2].clone())),
            "append" => parsed.push(MicroOp::Append(key, parts[2].clone())),
            "w" => parsed.push(MicroOp::Write(key, parts[2].clone())),
            _ => return None,
        }
    }
    Some(parsed)
}

/// A dependency graph over transaction indices, with labeled edges.
#[derive(Debug, Default)]
pub struct DepGraph {
    adjacency: Vec<Vec<usize>>,
    labels: Vec<Vec<&'static str>>,
}

impl DepGraph {
    pub fn new(n: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); n],
            labels: vec![Vec::new(); n],
        }
    }

    pub fn add_edge(&mut self, from: usize, to: usize, label: &'static str) {
        if from == to {
            return;
        }
        // one edge per pair; the first label wins
        if self.adjacency[from].contains(&to) {
            return;
        }
        self.adjacency[from].push(to);
        self.labels[from].push(label);
    }

    pub fn label(&self, from: usize, to: usize) -> Option<&'static str> {
        self.adjacency[from]
            .iter()
            .position(|&t| t == to)
            .map(|at| self.labels[from][at])
    }

    /// Strongly connected components with more than one member: dependency
    /// cycles, i.e. serializability violations.
    pub fn cycles(&self) -> Vec<Vec<usize>> {
        strongly_connected_components(&self.adjacency)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .collect()
    }
}

/// Iterative Tarjan over an adjacency list.
pub fn strongly_connected_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut sccs = Vec::new();
    // (vertex, next child position)
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for start in 0..n {
        if index[start] != UNVISITED {
            continue;
        }
        frames.push((start, 0));
        while !frames.is_empty() {
            let top = frames.len() - 1;
            let (v, child) = frames[top];
            if child == 0 {
                index[v] = next_index;
                low[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if child < adjacency[v].len() {
                frames[top].1 += 1;
                let w = adjacency[v][child];
                if index[w] == UNVISITED {
                    frames.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut scc = Vec::new();
                    loop {
                        let w = stack.pop().expect("tarjan stack underflow");
                        on_stack[w] = false;
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    sccs.push(scc);
                }
            }
        }
    }
    sccs
}

/// Realtime precedence edges: `from` completed before `to` was invoked.
/// Strict serializability forbids cycles even through these.
pub fn add_realtime_edges(graph: &mut DepGraph, windows: &[(u64, u64)]) {
    for (a, &(_, complete_a)) in windows.iter().enumerate() {
        for (b, &(invoke_b, _)) in windows.iter().enumerate() {
            if a != b && complete_a < invoke_b {
                graph.add_edge(a, b, "rt");
            }
        }
    }
}

/// The set of values written for a key by a list of micro-ops.
pub fn written_values(ops: &[MicroOp]) -> HashSet<(String, String)> {
    ops.iter()
        .filter_map(|op| match op {
            MicroOp::Append(k, v) | MicroOp::Write(k, v) => {
                Some((k.clone(), v.to_string()))
            }
            MicroOp::Read(..) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_wire_txn() {
        let txn = json!([["r", 1, null], ["append", 1, 7], ["w", 2, 3]]);
        let parsed = parse_txn(&txn).unwrap();
        assert_eq!(
            parsed,
            vec![
                MicroOp::Read("1".to_string(), Value::Null),
                MicroOp::Append("1".to_string(), json!(7)),
                MicroOp::Write("2".to_string(), json!(3)),
            ]
        );
        assert!(parse_txn(&json!([["x", 1, 2]])).is_none());
    }

    #[test]
    fn tarjan_finds_components() {
        // 0 -> 1 -> 2 -> 0 is a cycle; 3 hangs off it
        let adjacency = vec![vec![1], vec![2], vec![0, 3], vec![]];
        let mut sccs = strongly_connected_components(&adjacency);
        for scc in &mut sccs {
            scc.sort_unstable();
        }
        sccs.sort();
        assert!(sccs.contains(&vec![0, 1, 2]));
        assert!(sccs.contains(&vec![3]));
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let mut graph = DepGraph::new(3);
        graph.add_edge(0, 1, "wr");
        graph.add_edge(1, 2, "ww");
        assert!(graph.cycles().is_empty());
    }

    #[test]
    fn cycle_detection_with_labels() {
        let mut graph = DepGraph::new(2);
        graph.add_edge(0, 1, "wr");
        graph.add_edge(1, 0, "rw");
        let cycles = graph.cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
        assert_eq!(graph.label(0, 1), Some("wr"));
        assert_eq!(graph.label(1, 0), Some("rw"));
    }

    #[test]
    fn realtime_edges_are_strict() {
        let windows = vec![(0, 5), (10, 15), (3, 12)];
        let mut graph = DepGraph::new(3);
        add_realtime_edges(&mut graph, &windows);
        // 0 completed before 1 invoked
        assert_eq!(graph.label(0, 1), Some("rt"));
        // 2 overlaps both
        assert_eq!(graph.label(0, 2), None);
        assert_eq!(graph.label(2, 1), None);
    }
}
