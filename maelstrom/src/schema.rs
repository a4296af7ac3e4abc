use serde_json::Value;
use std::fmt;

/// A small schema language for RPC bodies. One validator serves both the
/// client layer (rejecting malformed requests/responses) and the `doc`
/// emitter (rendering the workload reference).
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// any JSON value
    Any,
    Null,
    Bool,
    /// any JSON integer
    Int,
    /// any JSON number
    Num,
    Str,
    /// exactly this string
    Const(&'static str),
    /// array with homogeneous elements
    Array(Box<Schema>),
    /// fixed-length array with per-position schemas
    Tuple(Vec<Schema>),
    /// object with arbitrary string keys and homogeneous values
    Map(Box<Schema>),
    /// object with declared fields
    Object(ObjectSchema),
    /// any one of the alternatives
    OneOf(Vec<Schema>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    pub required: Vec<(&'static str, Schema)>,
    pub optional: Vec<(&'static str, Schema)>,
    /// whether fields beyond the declared ones are allowed; message bodies
    /// are open maps, so this is normally true
    pub open: bool,
}

/// Starts an open object schema.
pub fn obj() -> ObjectSchema {
    ObjectSchema {
        required: Vec::new(),
        optional: Vec::new(),
        open: true,
    }
}

impl ObjectSchema {
    pub fn req(mut self, name: &'static str, schema: Schema) -> Self {
        self.required.push((name, schema));
        self
    }

    pub fn opt(mut self, name: &'static str, schema: Schema) -> Self {
        self.optional.push((name, schema));
        self
    }

    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    pub fn build(self) -> Schema {
        Schema::Object(self)
    }
}

/// A validation failure: where in the value it happened, what the schema
/// expected, and what was found.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaError {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {}: expected {}, found {}",
            self.path, self.expected, self.found
        )
    }
}

impl Schema {
    /// Validates `value`, reporting the first mismatch with its path.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        let fail = |expected: String| {
            Err(SchemaError {
                path: path.to_string(),
                expected,
                found: summarize(value),
            })
        };
        match self {
            Schema::Any => Ok(()),
            Schema::Null => {
                if value.is_null() {
                    Ok(())
                } else {
                    fail("null".to_string())
                }
            }
            Schema::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    fail("a boolean".to_string())
                }
            }
            Schema::Int => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    fail("an integer".to_string())
                }
            }
            Schema::Num => {
                if value.is_number() {
                    Ok(())
                } else {
                    fail("a number".to_string())
                }
            }
            Schema::Str => {
                if value.is_string() {
                    Ok(())
                } else {
                    fail("a string".to_string())
                }
            }
            Schema::Const(s) => {
                if value.as_str() == Some(s) {
                    Ok(())
                } else {
                    fail(format!("the string {:?}", s))
                }
            }
            Schema::Array(elem) => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        elem.validate_at(item, &format!("{}[{}]", path, i))?;
                    }
                    Ok(())
                }
                None => fail("an array".to_string()),
            },
            Schema::Tuple(elems) => match value.as_array() {
                Some(items) if items.len() == elems.len() => {
                    for (i, (item, schema)) in items.iter().zip(elems).enumerate() {
                        schema.validate_at(item, &format!("{}[{}]", path, i))?;
                    }
                    Ok(())
                }
                Some(items) => fail(format!(
                    "an array of length {} (found length {})",
                    elems.len(),
                    items.len()
                )),
                None => fail(format!("an array of length {}", elems.len())),
            },
            Schema::Map(value_schema) => match value.as_object() {
                Some(map) => {
                    for (key, item) in map {
                        value_schema.validate_at(item, &format!("{}.{}", path, key))?;
                    }
                    Ok(())
                }
                None => fail("an object".to_string()),
            },
            Schema::Object(object) => match value.as_object() {
                Some(map) => {
                    for (name, schema) in &object.required {
                        match map.get(*name) {
                            Some(item) => {
                                schema.validate_at(item, &format!("{}.{}", path, name))?
                            }
                            None => {
                                return Err(SchemaError {
                                    path: path.to_string(),
                                    expected: format!("required field {:?}", name),
                                    found: "nothing".to_string(),
                                })
                            }
                        }
                    }
                    for (name, schema) in &object.optional {
                        if let Some(item) = map.get(*name) {
                            schema.validate_at(item, &format!("{}.{}", path, name))?;
                        }
                    }
                    if !object.open {
                        let declared = |k: &str| {
                            object.required.iter().any(|(n, _)| *n == k)
                                || object.optional.iter().any(|(n, _)| *n == k)
                        };
                        if let Some(key) = map.keys().find(|k| !declared(k)) {
                            return Err(SchemaError {
                                path: path.to_string(),
                                expected: "no undeclared fields".to_string(),
                                found: format!("field {:?}", key),
                            });
                        }
                    }
                    Ok(())
                }
                None => fail("an object".to_string()),
            },
            Schema::OneOf(alternatives) => {
                for alternative in alternatives {
                    if alternative.validate_at(value, path).is_ok() {
                        return Ok(());
                    }
                }
                fail(format!("one of: {}", render_alternatives(alternatives)))
            }
        }
    }

    /// Renders the schema for the workload reference.
    pub fn render(&self) -> String {
        match self {
            Schema::Any => "any".to_string(),
            Schema::Null => "null".to_string(),
            Schema::Bool => "bool".to_string(),
            Schema::Int => "int".to_string(),
            Schema::Num => "number".to_string(),
            Schema::Str => "string".to_string(),
            Schema::Const(s) => format!("{:?}", s),
            Schema::Array(elem) => format!("[{}, ...]", elem.render()),
            Schema::Tuple(elems) => {
                let elems: Vec<_> = elems.iter().map(Schema::render).collect();
                format!("[{}]", elems.join(", "))
            }
            Schema::Map(value_schema) => {
                format!("{{<key>: {}, ...}}", value_schema.render())
            }
            Schema::Object(object) => {
                let mut fields: Vec<_> = object
                    .required
                    .iter()
                    .map(|(name, schema)| format!("{}: {}", name, schema.render()))
                    .collect();
                fields.extend(
                    object
                        .optional
                        .iter()
                        .map(|(name, schema)| format!("{}?: {}", name, schema.render())),
                );
                format!("{{{}}}", fields.join(", "))
            }
            Schema::OneOf(alternatives) => render_alternatives(alternatives),
        }
    }
}

fn render_alternatives(alternatives: &[Schema]) -> String {
    let rendered: Vec<_> = alternatives.iter().map(Schema::render).collect();
    rendered.join(" | ")
}

fn summarize(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("{}", b),
        Value::Number(n) => format!("{}", n),
        Value::String(s) => format!("{:?}", s),
        Value::Array(items) => format!("an array of length {}", items.len()),
        Value::Object(_) => "an object".to_string(),
    }
}
