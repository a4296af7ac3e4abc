use super::{CheckCtx, CheckResult, Checker, Validity};
use crate::history::{Op, OpType};
use crate::{warn, HashMap};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Write;

/// Latency and throughput aggregation. Never a safety verdict: the result
/// is always valid, and the raw series are written to `latency.csv` and
/// `rate.csv` for external plotting.
#[derive(Debug, Default)]
pub struct PerfChecker;

impl PerfChecker {
    pub fn new() -> Self {
        Default::default()
    }
}

/// Pairs each completion with its invocation. Clients are serial, so the
/// pending invocation per process is unique.
fn latencies(history: &[Op]) -> Vec<(u64, String, u64, OpType)> {
    let mut pending: HashMap<i64, &Op> = HashMap::new();
    let mut out = Vec::new();
    for op in history {
        if op.process == crate::history::NEMESIS_PROCESS {
            continue;
        }
        match op.ty {
            OpType::Invoke => {
                pending.insert(op.process, op);
            }
            OpType::Ok | OpType::Fail | OpType::Info => {
                if let Some(invoke) = pending.remove(&op.process) {
                    out.push((
                        invoke.time,
                        op.f.clone(),
                        op.time.saturating_sub(invoke.time),
                        op.ty,
                    ));
                }
            }
        }
    }
    out
}

fn quantile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[rank]
}

fn stats(latencies_ns: &mut Vec<u64>) -> Value {
    latencies_ns.sort_unstable();
    let count = latencies_ns.len();
    let mean = if count == 0 {
        0
    } else {
        latencies_ns.iter().sum::<u64>() / count as u64
    };
    let to_ms = |ns: u64| ns as f64 / 1_000_000.0;
    json!({
        "count": count,
        "min": to_ms(latencies_ns.first().copied().unwrap_or(0)),
        "mean": to_ms(mean),
        "p50": to_ms(quantile(latencies_ns, 0.5)),
        "p95": to_ms(quantile(latencies_ns, 0.95)),
        "p99": to_ms(quantile(latencies_ns, 0.99)),
        "max": to_ms(latencies_ns.last().copied().unwrap_or(0)),
    })
}

impl Checker for PerfChecker {
    fn name(&self) -> &'static str {
        "perf"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let samples = latencies(ctx.history);

        // per-f and overall latency stats
        let mut overall: Vec<u64> = Vec::with_capacity(samples.len());
        let mut by_f: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        // completions per second of invocation time
        let mut rate: BTreeMap<u64, u64> = BTreeMap::new();
        for (invoked_at, f, latency, _) in &samples {
            overall.push(*latency);
            by_f.entry(f.clone()).or_default().push(*latency);
            *rate.entry(invoked_at / 1_000_000_000).or_default() += 1;
        }

        if let Err(e) = write_series(ctx, &samples, &rate) {
            warn!("perf: writing series failed: {}", e);
        }

        let mut rendered = Map::new();
        for (f, mut series) in by_f {
            rendered.insert(f, stats(&mut series));
        }
        CheckResult::new(Validity::True)
            .with("latency", stats(&mut overall))
            .with("latency-by-f", Value::Object(rendered))
    }
}

fn write_series(
    ctx: &CheckCtx<'_>,
    samples: &[(u64, String, u64, OpType)],
    rate: &BTreeMap<u64, u64>,
) -> std::io::Result<()> {
    std::fs::create_dir_all(ctx.store)?;

    let mut latency = std::fs::File::create(ctx.store.join("latency.csv"))?;
    writeln!(latency, "time_s,f,latency_ms,outcome")?;
    for (invoked_at, f, latency_ns, ty) in samples {
        let outcome = match ty {
            OpType::Ok => "ok",
            OpType::Fail => "fail",
            _ => "info",
        };
        writeln!(
            latency,
            "{:.3},{},{:.3},{}",
            *invoked_at as f64 / 1e9,
            f,
            *latency_ns as f64 / 1e6,
            outcome
        )?;
    }

    let mut rate_file = std::fs::File::create(ctx.store.join("rate.csv"))?;
    writeln!(rate_file, "second,ops")?;
    for (second, ops) in rate {
        writeln!(rate_file, "{},{}", second, ops)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::history::History;
    use crate::time::SimTime;
    use std::sync::Arc;

    #[test]
    fn latency_pairing_and_stats() {
        let mut time = SimTime::new();
        let history = History::new(Arc::new(time.clone()));
        history.invoke(0, "echo", Value::Null);
        // reopen at a later time to fake progress; SimTime is by-value here
        time.add_millis(10);
        let later = History::new(Arc::new(time));
        later.ok(0, "echo", Value::Null);

        let mut ops = history.snapshot();
        ops.extend(later.snapshot());

        let samples = latencies(&ops);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].2, 10_000_000);

        let dir = std::env::temp_dir().join(format!("maelstrom-perf-{}", std::process::id()));
        let config = Config::new(1);
        let ctx = CheckCtx {
            history: &ops,
            journal: &[],
            config: &config,
            store: &dir,
            exceptions: &[],
        };
        let result = PerfChecker::new().check(&ctx);
        assert_eq!(result.valid, Validity::True);
        assert_eq!(result.details["latency"]["count"], json!(1));
        assert_eq!(result.details["latency"]["max"], json!(10.0));
        assert!(dir.join("latency.csv").exists());
        assert!(dir.join("rate.csv").exists());
    }

    #[test]
    fn quantiles() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(quantile(&sorted, 0.0), 1);
        assert_eq!(quantile(&sorted, 0.5), 50);
        assert_eq!(quantile(&sorted, 1.0), 100);
    }
}
