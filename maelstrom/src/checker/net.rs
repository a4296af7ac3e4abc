use super::{CheckCtx, CheckResult, Checker, Validity};
use crate::history::OpType;
use crate::journal::EntryKind;
use crate::HashSet;
use serde_json::json;

/// Aggregates the journal: how much traffic the run generated, split
/// between harness clients and servers, and how chatty the servers were per
/// operation. With `check_delivery`, a faultless run additionally requires
/// every sent message to have been received.
#[derive(Debug, Default)]
pub struct NetChecker {
    check_delivery: bool,
}

impl NetChecker {
    pub fn new(check_delivery: bool) -> Self {
        Self { check_delivery }
    }
}

fn is_client(id: &str) -> bool {
    id.starts_with('c')
}

impl Checker for NetChecker {
    fn name(&self) -> &'static str {
        "net"
    }

    fn check(&self, ctx: &CheckCtx<'_>) -> CheckResult {
        let mut sends = 0u64;
        let mut recvs = 0u64;
        let mut client_sends = 0u64;
        let mut client_recvs = 0u64;
        let mut undelivered: Vec<u64> = Vec::new();
        let mut received: HashSet<u64> = HashSet::new();

        for entry in ctx.journal {
            if entry.kind == EntryKind::Recv {
                if let Some(id) = entry.message.id {
                    received.insert(id);
                }
            }
        }
        for entry in ctx.journal {
            let touches_client =
                is_client(&entry.message.src) || is_client(&entry.message.dest);
            match entry.kind {
                EntryKind::Send => {
                    sends += 1;
                    if touches_client {
                        client_sends += 1;
                    }
                    if let Some(id) = entry.message.id {
                        if !received.contains(&id) {
                            undelivered.push(id);
                        }
                    }
                }
                EntryKind::Recv => {
                    recvs += 1;
                    if touches_client {
                        client_recvs += 1;
                    }
                }
            }
        }

        let ops = ctx
            .history
            .iter()
            .filter(|op| op.ty == OpType::Invoke && op.process != crate::history::NEMESIS_PROCESS)
            .count() as u64;
        let server_sends = sends - client_sends;
        let msgs_per_op = if ops == 0 {
            0.0
        } else {
            server_sends as f64 / ops as f64
        };

        let all_delivered = undelivered.is_empty();
        let valid = if self.check_delivery && !ctx.config.has_faults() && !all_delivered {
            Validity::False
        } else {
            Validity::True
        };

        undelivered.truncate(10);
        CheckResult::new(valid)
            .with("send-count", json!(sends))
            .with("recv-count", json!(recvs))
            .with(
                "clients",
                json!({"send-count": client_sends, "recv-count": client_recvs}),
            )
            .with(
                "servers",
                json!({
                    "send-count": server_sends,
                    "recv-count": recvs - client_recvs,
                    "msgs-per-op": msgs_per_op,
                }),
            )
            .with("all-delivered", json!(all_delivered))
            .with("undelivered-sample", json!(undelivered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::journal::Journal;
    use crate::message::Message;

    fn msg(src: &str, dest: &str, id: u64) -> Message {
        let mut msg = Message::new(src, dest, json!({"type": "gossip"}));
        msg.id = Some(id);
        msg
    }

    fn check(journal: &Journal, check_delivery: bool) -> CheckResult {
        let config = Config::new(1);
        let entries = journal.snapshot();
        let ctx = CheckCtx {
            history: &[],
            journal: &entries,
            config: &config,
            store: std::path::Path::new("/tmp"),
            exceptions: &[],
        };
        NetChecker::new(check_delivery).check(&ctx)
    }

    #[test]
    fn traffic_breakdown() {
        let journal = Journal::new();
        // one client rpc, one server-to-server message
        journal.record_send(0, msg("c1", "n1", 1));
        journal.record_recv(1, msg("c1", "n1", 1));
        journal.record_send(2, msg("n1", "n2", 2));
        journal.record_recv(3, msg("n1", "n2", 2));

        let result = check(&journal, false);
        assert_eq!(result.valid, Validity::True);
        assert_eq!(result.details["send-count"], json!(2));
        assert_eq!(result.details["clients"]["send-count"], json!(1));
        assert_eq!(result.details["servers"]["send-count"], json!(1));
        assert_eq!(result.details["all-delivered"], json!(true));
    }

    #[test]
    fn undelivered_fails_faultless_delivery_check() {
        let journal = Journal::new();
        journal.record_send(0, msg("n1", "n2", 1));

        // stats-only mode shrugs
        assert_eq!(check(&journal, false).valid, Validity::True);
        // delivery mode on a faultless config does not
        let result = check(&journal, true);
        assert_eq!(result.valid, Validity::False);
        assert_eq!(result.details["undelivered-sample"], json!([1]));
    }
}
