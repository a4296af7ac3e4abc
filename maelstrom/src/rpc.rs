use crate::error::{standard_errors, ErrorDef, RpcError};
use crate::schema::Schema;
use crate::HashMap;
use serde_json::Value;

/// A typed RPC: the request body schema, the response body schema, and a
/// one-line doc. Registered schemas drive both validation in the client
/// layer and the emitted workload reference.
#[derive(Debug, Clone)]
pub struct RpcDef {
    /// request body `type` discriminator
    pub name: &'static str,
    pub doc: &'static str,
    pub request: Schema,
    pub response: Schema,
}

/// Process-wide registries of error kinds and RPC schemas. Populated at
/// startup (standard errors plus whatever the selected workload registers)
/// and read-only afterwards; passed explicitly to whoever validates.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    errors: HashMap<u32, ErrorDef>,
    rpcs: HashMap<&'static str, RpcDef>,
    rpc_order: Vec<&'static str>,
}

impl Registry {
    /// Creates a registry holding the standard error taxonomy.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        for def in standard_errors() {
            registry.deferror(def);
        }
        registry
    }

    /// Registers an error kind. Duplicate codes are a harness bug.
    pub fn deferror(&mut self, def: ErrorDef) {
        let code = def.code;
        if self.errors.insert(code, def).is_some() {
            panic!("error code {} registered twice", code);
        }
    }

    /// Registers an RPC schema pair. Duplicate names are a harness bug.
    pub fn defrpc(&mut self, def: RpcDef) {
        let name = def.name;
        if self.rpcs.insert(name, def).is_some() {
            panic!("rpc {:?} registered twice", name);
        }
        self.rpc_order.push(name);
    }

    pub fn error(&self, code: u32) -> Option<&ErrorDef> {
        self.errors.get(&code)
    }

    pub fn rpc(&self, name: &str) -> Option<&RpcDef> {
        self.rpcs.get(name)
    }

    /// Maps a wire error body to a tagged `RpcError`, preserving whether the
    /// failure is definite. Unknown codes are treated as indefinite.
    pub fn rpc_error(&self, body: &Value) -> RpcError {
        let code = body.get("code").and_then(Value::as_u64).unwrap_or(13) as u32;
        let text = body
            .get("text")
            .and_then(Value::as_str)
            .map(|t| t.to_string());
        let err = match self.error(code) {
            Some(def) => RpcError::new(def, text),
            None => RpcError::unregistered(code, text),
        };
        err.with_body(body.clone())
    }

    /// Validates a request body against its registered schema. Unregistered
    /// types pass: bodies are polymorphic and only typed RPCs are enforced.
    pub fn validate_request(&self, body: &Value) -> Result<(), RpcError> {
        let name = match crate::message::body_type(body) {
            Some(name) => name,
            None => {
                return Err(RpcError::malformed(format!(
                    "message body without a type: {}",
                    body
                )))
            }
        };
        let def = match self.rpc(name) {
            Some(def) => def,
            None => return Ok(()),
        };
        if let Err(complaint) = def.request.validate(body) {
            return Err(RpcError::malformed(format!(
                "malformed request {:?}: {}; expected {}; got {}",
                name,
                complaint,
                def.request.render(),
                body
            )));
        }
        Ok(())
    }

    /// Validates a response body against the schema registered for the
    /// request type it answers.
    pub fn validate_response(&self, request_type: &str, body: &Value) -> Result<(), RpcError> {
        let def = match self.rpc(request_type) {
            Some(def) => def,
            None => return Ok(()),
        };
        if let Err(complaint) = def.response.validate(body) {
            return Err(RpcError::malformed(format!(
                "malformed {} response: {}; expected {}; got {}",
                def.name,
                complaint,
                def.response.render(),
                body
            )));
        }
        Ok(())
    }

    /// Emits the workload reference: every registered RPC with its request
    /// and response shapes, then the error table.
    pub fn doc(&self) -> String {
        let mut out = String::new();
        out.push_str("# RPC reference\n\n");
        for name in &self.rpc_order {
            let def = &self.rpcs[name];
            out.push_str(&format!("## {}\n\n{}\n\n", def.name, def.doc));
            out.push_str(&format!("- request: {}\n", def.request.render()));
            out.push_str(&format!("- response: {}\n\n", def.response.render()));
        }
        out.push_str("# Errors\n\n");
        let mut errors: Vec<_> = self.errors.values().collect();
        errors.sort_by_key(|def| def.code);
        for def in errors {
            let kind = if def.definite {
                "definite"
            } else {
                "indefinite"
            };
            out.push_str(&format!(
                "- {} ({}, {}): {}\n",
                def.code, def.name, kind, def.doc
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::obj;
    use serde_json::json;

    fn echo_registry() -> Registry {
        let mut registry = Registry::standard();
        registry.defrpc(RpcDef {
            name: "echo",
            doc: "Echoes the request payload back.",
            request: obj()
                .req("type", Schema::Const("echo"))
                .req("msg_id", Schema::Int)
                .req("echo", Schema::Any)
                .build(),
            response: obj()
                .req("type", Schema::Const("echo_ok"))
                .req("in_reply_to", Schema::Int)
                .req("echo", Schema::Any)
                .build(),
        });
        registry
    }

    #[test]
    fn error_mapping() {
        let registry = Registry::standard();
        let err = registry.rpc_error(&json!({
            "type": "error", "code": 22, "text": "expected 4"
        }));
        assert_eq!(err.code, 22);
        assert_eq!(err.name, "precondition-failed");
        assert!(err.definite);
        assert_eq!(err.text.as_deref(), Some("expected 4"));

        // unknown codes stay indefinite
        let err = registry.rpc_error(&json!({"type": "error", "code": 4000}));
        assert!(!err.definite);
    }

    #[test]
    fn request_validation() {
        let registry = echo_registry();
        assert!(registry
            .validate_request(&json!({"type": "echo", "msg_id": 1, "echo": 42}))
            .is_ok());

        // registered RPCs are enforced
        let err = registry
            .validate_request(&json!({"type": "echo", "msg_id": 1}))
            .unwrap_err();
        assert_eq!(err.code, 12);
        assert!(err.text.as_deref().unwrap().contains("echo"));

        // unregistered types are left alone
        assert!(registry
            .validate_request(&json!({"type": "gossip", "values": [1]}))
            .is_ok());
    }

    #[test]
    fn response_validation() {
        let registry = echo_registry();
        assert!(registry
            .validate_response(
                "echo",
                &json!({"type": "echo_ok", "in_reply_to": 1, "echo": 42})
            )
            .is_ok());
        let err = registry
            .validate_response("echo", &json!({"type": "echo_ok", "in_reply_to": 1}))
            .unwrap_err();
        assert_eq!(err.code, 12);
    }

    #[test]
    #[should_panic]
    fn duplicate_rpc() {
        let mut registry = echo_registry();
        registry.defrpc(RpcDef {
            name: "echo",
            doc: "",
            request: Schema::Any,
            response: Schema::Any,
        });
    }

    #[test]
    fn doc_emission() {
        let registry = echo_registry();
        let doc = registry.doc();
        assert!(doc.contains("## echo"));
        assert!(doc.contains("- request: {type: \"echo\""));
        assert!(doc.contains("- 22 (precondition-failed, definite)"));
    }
}
