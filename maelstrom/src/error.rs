use serde_json::Value;
use thiserror::Error;

/// Codes below this bound are reserved for the harness; workloads register
/// their own codes above it.
pub const RESERVED_CODES: u32 = 1000;

/// A registered error kind: its wire code, symbolic name, whether it is
/// definite (the operation certainly did not happen), and a one-line doc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDef {
    pub code: u32,
    pub name: &'static str,
    pub definite: bool,
    pub doc: &'static str,
}

/// The error taxonomy shipped with the harness.
pub fn standard_errors() -> Vec<ErrorDef> {
    vec![
        ErrorDef {
            code: 0,
            name: "timeout",
            definite: false,
            doc: "The RPC did not complete within its timeout.",
        },
        ErrorDef {
            code: 1,
            name: "node-not-found",
            definite: true,
            doc: "The destination node is not registered in the network.",
        },
        ErrorDef {
            code: 10,
            name: "not-supported",
            definite: true,
            doc: "The operation is not implemented by the receiver.",
        },
        ErrorDef {
            code: 11,
            name: "temporarily-unavailable",
            definite: true,
            doc: "The operation certainly cannot be performed right now; retry later.",
        },
        ErrorDef {
            code: 12,
            name: "malformed-request",
            definite: true,
            doc: "The request did not match the receiver's schema.",
        },
        ErrorDef {
            code: 13,
            name: "crash",
            definite: false,
            doc: "A generic failure with unknown outcome.",
        },
        ErrorDef {
            code: 14,
            name: "abort",
            definite: true,
            doc: "A generic failure whose operation certainly did not take effect.",
        },
        ErrorDef {
            code: 20,
            name: "key-does-not-exist",
            definite: true,
            doc: "The requested key is absent.",
        },
        ErrorDef {
            code: 21,
            name: "key-already-exists",
            definite: true,
            doc: "The key exists and the receiver will not overwrite it.",
        },
        ErrorDef {
            code: 22,
            name: "precondition-failed",
            definite: true,
            doc: "A requested precondition (e.g. the expected value of a compare-and-set) did not hold.",
        },
        ErrorDef {
            code: 30,
            name: "txn-conflict",
            definite: true,
            doc: "The transaction was aborted because of a conflict.",
        },
    ]
}

/// A tagged RPC failure, preserving whether the outcome is definite. This is
/// the only error surfaced by the client layer; transport noise (loss,
/// partitions) manifests as `timeout`.
#[derive(Debug, Clone, Error)]
pub struct RpcError {
    pub code: u32,
    pub name: String,
    pub definite: bool,
    pub text: Option<String>,
    /// full error body as received, when the error came over the wire
    pub body: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.definite {
            "definite"
        } else {
            "indefinite"
        };
        write!(f, "{} (code {}, {})", self.name, self.code, kind)?;
        if let Some(text) = &self.text {
            write!(f, ": {}", text)?;
        }
        Ok(())
    }
}

impl RpcError {
    pub fn new(def: &ErrorDef, text: Option<String>) -> Self {
        Self {
            code: def.code,
            name: def.name.to_string(),
            definite: def.definite,
            text,
            body: None,
        }
    }

    pub fn timeout(text: impl Into<String>) -> Self {
        Self {
            code: 0,
            name: "timeout".to_string(),
            definite: false,
            text: Some(text.into()),
            body: None,
        }
    }

    pub fn node_not_found(dest: &str) -> Self {
        Self {
            code: 1,
            name: "node-not-found".to_string(),
            definite: true,
            text: Some(format!("no such node: {}", dest)),
            body: None,
        }
    }

    pub fn malformed(text: impl Into<String>) -> Self {
        Self {
            code: 12,
            name: "malformed-request".to_string(),
            definite: true,
            text: Some(text.into()),
            body: None,
        }
    }

    /// An unregistered code observed on the wire. The outcome is unknown, so
    /// the error is indefinite.
    pub fn unregistered(code: u32, text: Option<String>) -> Self {
        Self {
            code,
            name: "unregistered-error".to_string(),
            definite: false,
            text,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table() {
        let errors = standard_errors();
        // all codes within the reserved range, no duplicates
        let mut codes: Vec<_> = errors.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(errors.iter().all(|e| e.code < RESERVED_CODES));

        // the two indefinite kinds
        let indefinite: Vec<_> = errors
            .iter()
            .filter(|e| !e.definite)
            .map(|e| e.name)
            .collect();
        assert_eq!(indefinite, vec!["timeout", "crash"]);
    }

    #[test]
    fn display() {
        let err = RpcError::timeout("rpc to n1");
        assert_eq!(err.to_string(), "timeout (code 0, indefinite): rpc to n1");

        let defs = standard_errors();
        let cas = defs.iter().find(|d| d.code == 22).unwrap();
        let err = RpcError::new(cas, None);
        assert_eq!(err.to_string(), "precondition-failed (code 22, definite)");
    }
}
