use super::{CheckCtx, CheckResult, Checker, Validity};
use crate::history::OpType;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    invoke: u64,
    ok: u64,
    fail: u64,
    info: u64,
}

/// Counts history entries by `f` and by type. The verdict is unknown when
/// some `f` never succeeded: nothing failed outright, but the run proved
/// nothing either.
#[derive(Debug, Default)]
pub struct StatsChecker;

impl StatsChecker {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Checker for StatsChecker {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let mut by_f: BTreeMap<String, Counts> = BTreeMap::new();
        let mut total = Counts::default();
        for op in ctx.history {
            if op.process == crate::history::NEMESIS_PROCESS {
                continue;
            }
            let counts = by_f.entry(op.f.clone()).or_default();
            match op.ty {
                OpType::Invoke => {
                    counts.invoke += 1;
                    total.invoke += 1;
                }
                OpType::Ok => {
                    counts.ok += 1;
                    total.ok += 1;
                }
                OpType::Fail => {
                    counts.fail += 1;
                    total.fail += 1;
                }
                OpType::Info => {
                    counts.info += 1;
                    total.info += 1;
                }
            }
        }

        let valid = if by_f.values().all(|counts| counts.ok > 0) {
            Validity::True
        } else {
            Validity::Unknown
        };

        let mut rendered = Map::new();
        for (f, counts) in &by_f {
            rendered.insert(
                f.clone(),
                json!({
                    "invoke": counts.invoke,
                    "ok": counts.ok,
                    "fail": counts.fail,
                    "info": counts.info,
                }),
            );
        }
        CheckResult::new(valid)
            .with("count", json!(total.invoke))
            .with("ok-count", json!(total.ok))
            .with("fail-count", json!(total.fail))
            .with("info-count", json!(total.info))
            .with("by-f", Value::Object(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::history::{History, NEMESIS_PROCESS};
    use crate::time::SimTime;
    use std::sync::Arc;

    fn ctx_check(history: &History) -> CheckResult {
        let config = Config::new(1);
        let ops = history.snapshot();
        let ctx = CheckCtx {
            history: &ops,
            journal: &[],
            config: &config,
            store: std::path::Path::new("/tmp"),
            exceptions: &[],
        };
        StatsChecker::new().check(&ctx)
    }

    #[test]
    fn all_fs_succeeding_is_valid() {
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "read", Value::Null);
        history.ok(0, "read", json!(1));
        history.info(NEMESIS_PROCESS, "start-partition", Value::Null, None);

        let result = ctx_check(&history);
        assert_eq!(result.valid, Validity::True);
        assert_eq!(result.details["count"], json!(1));
        // nemesis entries are not counted
        assert_eq!(result.details["by-f"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn an_f_without_oks_is_unknown() {
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "cas", json!([1, 2]));
        history.fail(0, "cas", json!([1, 2]), json!({"code": 22}));

        let result = ctx_check(&history);
        assert_eq!(result.valid, Validity::Unknown);
    }
}
