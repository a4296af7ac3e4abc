// This module contains the stats checker.
mod stats;

// This module contains the net checker, fed by the journal.
mod net;

// This module contains the perf checker.
mod perf;

// This module contains the exceptions checker.
mod exceptions;

// This module contains the timeline renderer.
mod timeline;

// Re-exports.
pub use exceptions::ExceptionsChecker;
pub use net::NetChecker;
pub use perf::PerfChecker;
pub use stats::StatsChecker;
pub use timeline::TimelineChecker;

use crate::config::Config;
use crate::history::Op;
use crate::journal::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// A checker verdict. `Unknown` downgrades a valid result; `False`
/// dominates everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    True,
    False,
    Unknown,
}

impl Validity {
    /// Conjunction of two verdicts.
    pub fn and(self, other: Validity) -> Validity {
        match (self, other) {
            (Validity::False, _) | (_, Validity::False) => Validity::False,
            (Validity::Unknown, _) | (_, Validity::Unknown) => Validity::Unknown,
            _ => Validity::True,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub valid: Validity,
    /// checker-specific findings, folded into the result map
    pub details: Map<String, Value>,
}

impl CheckResult {
    pub fn new(valid: Validity) -> Self {
        Self {
            valid,
            details: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

/// Everything a checker may look at once the run is over.
pub struct CheckCtx<'a> {
    pub history: &'a [Op],
    pub journal: &'a [Entry],
    pub config: &'a Config,
    /// per-test artifact directory
    pub store: &'a Path,
    /// exceptions recorded by worker threads during the run
    pub exceptions: &'a [String],
}

/// An offline analyzer over the history/journal emitting a verdict.
pub trait Checker: Send {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult;
}

/// Runs every checker and composes the verdicts conjunctively.
pub fn check_all(checkers: &[Box<dyn Checker>], ctx: &CheckCtx<'_>) -> (Validity, Map<String, Value>) {
    let mut valid = Validity::True;
    let mut results = Map::new();
    for checker in checkers {
        let result = checker.check(ctx);
        valid = valid.and(result.valid);
        let mut entry = Map::new();
        let valid_value =
            serde_json::to_value(result.valid).expect("validity serializes");
        entry.insert("valid".to_string(), valid_value);
        entry.extend(result.details);
        results.insert(checker.name().to_string(), Value::Object(entry));
    }
    (valid, results)
}

/// Exceptions caught from worker threads; any entry turns the test invalid
/// even when the workload checker is satisfied.
#[derive(Debug, Clone, Default)]
pub struct ExceptionTrack {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExceptionTrack {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record(&self, what: impl Into<String>) {
        let what = what.into();
        crate::warn!("exception: {}", what);
        self.entries.lock().push(what);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjunction() {
        use Validity::*;
        assert_eq!(True.and(True), True);
        assert_eq!(True.and(Unknown), Unknown);
        assert_eq!(Unknown.and(True), Unknown);
        assert_eq!(False.and(Unknown), False);
        assert_eq!(Unknown.and(False), False);
        assert_eq!(False.and(True), False);
    }
}
