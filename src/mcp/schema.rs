// Declarative tool input schemas
// Each tool describes its fields (type, bounds, defaults) as data; dispatch
// rejects on the first violation with a path-prefixed message

use crate::error::{BridgeError, ErrorKind};
use serde_json::{json, Map, Value};

/// Field type with validation bounds.
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    String,
    Bool,
    Integer { min: i64, max: i64 },
    Enum(&'static [&'static str]),
}

/// Default applied when an optional field is absent.
#[derive(Debug, Clone, Copy)]
pub enum DefaultVal {
    Int(i64),
    Str(&'static str),
    Bool(bool),
}

/// One declared input field.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<DefaultVal>,
}

impl Field {
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
        }
    }

    pub const fn optional(name: &'static str, ty: FieldType, default: Option<DefaultVal>) -> Self {
        Self {
            name,
            ty,
            required: false,
            default,
        }
    }
}

/// Declarative schema for one tool's arguments object.
#[derive(Debug, Clone, Copy)]
pub struct ToolSchema {
    pub fields: &'static [Field],
}

/// Arguments after validation, with defaults injected.
#[derive(Debug, Clone, Default)]
pub struct Args(Map<String, Value>);

impl Args {
    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_str())
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(|v| v.as_i64())
    }

    pub fn u32(&self, name: &str) -> Option<u32> {
        self.i64(name).and_then(|v| u32::try_from(v).ok())
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(|v| v.as_bool())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

impl ToolSchema {
    /// Validate an arguments value against this schema.
    ///
    /// Fails on the first violation with an `args.<field>`-prefixed message.
    /// Unknown fields are ignored; defaults are filled for absent optionals.
    pub fn validate(&self, arguments: &Value) -> Result<Args, BridgeError> {
        let empty = Map::new();
        let input = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(BridgeError::validation(
                    "args: expected an object of tool arguments",
                ));
            }
        };

        let mut out = Map::new();
        for field in self.fields {
            match input.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(BridgeError::validation(format!(
                            "args.{}: required field is missing",
                            field.name
                        )));
                    }
                    if let Some(default) = field.default {
                        out.insert(field.name.to_string(), default_value(default));
                    }
                }
                Some(value) => {
                    let checked = check_type(field, value)?;
                    out.insert(field.name.to_string(), checked);
                }
            }
        }
        Ok(Args(out))
    }

    /// JSON-schema-shaped description served by `list_tools`.
    pub fn describe(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in self.fields {
            let mut prop = Map::new();
            match field.ty {
                FieldType::String => {
                    prop.insert("type".into(), json!("string"));
                }
                FieldType::Bool => {
                    prop.insert("type".into(), json!("boolean"));
                }
                FieldType::Integer { min, max } => {
                    prop.insert("type".into(), json!("integer"));
                    prop.insert("minimum".into(), json!(min));
                    prop.insert("maximum".into(), json!(max));
                }
                FieldType::Enum(options) => {
                    prop.insert("type".into(), json!("string"));
                    prop.insert("enum".into(), json!(options));
                }
            }
            if let Some(default) = field.default {
                prop.insert("default".into(), default_value(default));
            }
            properties.insert(field.name.to_string(), Value::Object(prop));
            if field.required {
                required.push(field.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn default_value(default: DefaultVal) -> Value {
    match default {
        DefaultVal::Int(v) => json!(v),
        DefaultVal::Str(v) => json!(v),
        DefaultVal::Bool(v) => json!(v),
    }
}

fn check_type(field: &Field, value: &Value) -> Result<Value, BridgeError> {
    let fail = |expected: &str| {
        Err(BridgeError::new(
            ErrorKind::Validation,
            format!("args.{}: expected {expected}", field.name),
        ))
    };
    match field.ty {
        FieldType::String => match value.as_str() {
            Some(_) => Ok(value.clone()),
            None => fail("a string"),
        },
        FieldType::Bool => match value.as_bool() {
            Some(_) => Ok(value.clone()),
            None => fail("a boolean"),
        },
        FieldType::Integer { min, max } => match value.as_i64() {
            Some(v) if v >= min && v <= max => Ok(json!(v)),
            Some(v) => Err(BridgeError::validation(format!(
                "args.{}: {v} is outside {min}..{max}",
                field.name
            ))),
            None => fail("an integer"),
        },
        FieldType::Enum(options) => match value.as_str() {
            Some(s) if options.contains(&s) => Ok(value.clone()),
            Some(s) => Err(BridgeError::validation(format!(
                "args.{}: \"{s}\" is not one of {options:?}",
                field.name
            ))),
            None => fail("a string"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: ToolSchema = ToolSchema {
        fields: &[
            Field::required("session_id", FieldType::String),
            Field::optional(
                "since_minutes",
                FieldType::Integer { min: 1, max: 1440 },
                Some(DefaultVal::Int(60)),
            ),
            Field::optional(
                "group_by",
                FieldType::Enum(&["url", "error_type", "domain"]),
                Some(DefaultVal::Str("url")),
            ),
            Field::optional("verbose", FieldType::Bool, None),
        ],
    };

    #[test]
    fn defaults_are_injected() {
        let args = SCHEMA.validate(&json!({"session_id": "s1"})).unwrap();
        assert_eq!(args.str("session_id"), Some("s1"));
        assert_eq!(args.i64("since_minutes"), Some(60));
        assert_eq!(args.str("group_by"), Some("url"));
        assert!(!args.contains("verbose"));
    }

    #[test]
    fn missing_required_field_is_path_prefixed() {
        let err = SCHEMA.validate(&json!({})).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        assert!(err.message.starts_with("args.session_id:"), "{}", err.message);
    }

    #[test]
    fn out_of_bounds_integer_rejected() {
        let err = SCHEMA
            .validate(&json!({"session_id": "s1", "since_minutes": 5000}))
            .unwrap_err();
        assert!(err.message.contains("1..1440"), "{}", err.message);
    }

    #[test]
    fn enum_violation_rejected() {
        let err = SCHEMA
            .validate(&json!({"session_id": "s1", "group_by": "latency"}))
            .unwrap_err();
        assert!(err.message.starts_with("args.group_by:"), "{}", err.message);
    }

    #[test]
    fn wrong_type_rejected() {
        let err = SCHEMA.validate(&json!({"session_id": 7})).unwrap_err();
        assert!(err.message.contains("expected a string"), "{}", err.message);
    }

    #[test]
    fn null_and_missing_arguments_accepted_when_no_required() {
        const LOOSE: ToolSchema = ToolSchema {
            fields: &[Field::optional(
                "limit",
                FieldType::Integer { min: 1, max: 100 },
                Some(DefaultVal::Int(20)),
            )],
        };
        let args = LOOSE.validate(&Value::Null).unwrap();
        assert_eq!(args.i64("limit"), Some(20));
    }

    #[test]
    fn describe_emits_json_schema_shape() {
        let schema = SCHEMA.describe();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["since_minutes"]["type"], "integer");
        assert_eq!(schema["properties"]["since_minutes"]["maximum"], 1440);
        assert_eq!(schema["required"][0], "session_id");
    }
}
