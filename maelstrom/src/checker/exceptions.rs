use super::{CheckCtx, CheckResult, Checker, Validity};
use serde_json::json;

/// Any uncaught worker failure recorded during the run turns the test
/// invalid, regardless of what the workload checker concluded.
#[derive(Debug, Default)]
pub struct ExceptionsChecker;

impl ExceptionsChecker {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Checker for ExceptionsChecker {
    fn name(&self) -> &'static str {
        "exceptions"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let valid = if ctx.exceptions.is_empty() {
            Validity::True
        } else {
            Validity::False
        };
        CheckResult::new(valid)
            .with("count", json!(ctx.exceptions.len()))
            .with("exceptions", json!(ctx.exceptions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn exceptions_invalidate() {
        let config = Config::new(1);
        let exceptions = vec!["node n1: malformed stdout line".to_string()];
        let ctx = CheckCtx {
            history: &[],
            journal: &[],
            config: &config,
            store: std::path::Path::new("/tmp"),
            exceptions: &exceptions,
        };
        let result = ExceptionsChecker::new().check(&ctx);
        assert_eq!(result.valid, Validity::False);

        let ctx = CheckCtx { exceptions: &[], ..ctx };
        assert_eq!(ExceptionsChecker::new().check(&ctx).valid, Validity::True);
    }
}
