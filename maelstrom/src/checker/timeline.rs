use super::{CheckCtx, CheckResult, Checker, Validity};
use crate::history::{Op, OpType, NEMESIS_PROCESS};
use crate::warn;
use serde_json::json;
use std::io::Write;

/// Renders the history as an HTML timeline, one column per process. Purely
/// informational: always valid.
#[derive(Debug, Default)]
pub struct TimelineChecker;

impl TimelineChecker {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Checker for TimelineChecker {
    fn name(&self) -> &'static str {
        "timeline"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        match write_timeline(ctx.store, ctx.history) {
            Ok(()) => CheckResult::new(Validity::True).with("file", json!("timeline.html")),
            Err(e) => {
                warn!("timeline: rendering failed: {}", e);
                CheckResult::new(Validity::True).with("error", json!(e.to_string()))
            }
        }
    }
}

fn class(ty: OpType) -> &'static str {
    match ty {
        OpType::Invoke => "invoke",
        OpType::Ok => "ok",
        OpType::Fail => "fail",
        OpType::Info => "info",
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn write_timeline(store: &std::path::Path, history: &[Op]) -> std::io::Result<()> {
    std::fs::create_dir_all(store)?;
    let mut out = std::fs::File::create(store.join("timeline.html"))?;

    writeln!(out, "<!DOCTYPE html>")?;
    writeln!(out, "<html><head><meta charset=\"utf-8\"><style>")?;
    writeln!(
        out,
        "table {{ font-family: monospace; border-collapse: collapse; }} \
         td, th {{ border: 1px solid #ddd; padding: 2px 6px; }} \
         .ok {{ background: #dfd; }} .fail {{ background: #fdd; }} \
         .info {{ background: #ffd; }} .invoke {{ color: #888; }}"
    )?;
    writeln!(out, "</style></head><body><table>")?;
    writeln!(
        out,
        "<tr><th>time (ms)</th><th>process</th><th>type</th><th>f</th><th>value</th></tr>"
    )?;
    for op in history {
        let process = if op.process == NEMESIS_PROCESS {
            "nemesis".to_string()
        } else {
            op.process.to_string()
        };
        writeln!(
            out,
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            class(op.ty),
            op.time / 1_000_000,
            process,
            class(op.ty),
            escape(&op.f),
            escape(&op.value.to_string()),
        )?;
    }
    writeln!(out, "</table></body></html>")?;
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
    fn renders_html() {
        let history = History::new(Arc::new(SimTime::new()));
        history.invoke(0, "echo", json!("<hi>"));
        history.ok(0, "echo", json!("<hi>"));

        let dir = std::env::temp_dir().join(format!("maelstrom-timeline-{}", std::process::id()));
        let config = Config::new(1);
        let ops = history.snapshot();
        let ctx = CheckCtx {
            history: &ops,
            journal: &[],
            config: &config,
            store: &dir,
            exceptions: &[],
        };
        let result = TimelineChecker::new().check(&ctx);
        assert_eq!(result.valid, Validity::True);

        let html = std::fs::read_to_string(dir.join("timeline.html")).unwrap();
        assert!(html.contains("&lt;hi&gt;"));
        assert!(html.contains("class=\"ok\""));
    }
}
