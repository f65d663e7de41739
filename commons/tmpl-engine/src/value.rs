use std::fmt;

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};
use serde::{Deserialize, Serialize};

/// A parameter value: either a 32-bit integer or a string.
///
/// On the wire this is a bare JSON number or string (the Kubernetes
/// int-or-string shape); the variant is never inferred from string content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum TypedValue {
    Int(i32),
    Str(String),
}

impl TypedValue {
    /// The zero value of a declared type.
    pub fn zero(value_type: ValueType) -> Self {
        match value_type {
            ValueType::String => TypedValue::Str(String::new()),
            ValueType::Number => TypedValue::Int(0),
        }
    }

    pub fn is_empty_str(&self) -> bool {
        matches!(self, TypedValue::Str(s) if s.is_empty())
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            TypedValue::Int(i) => Some(*i),
            TypedValue::Str(_) => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Int(i) => write!(f, "{}", i),
            TypedValue::Str(s) => f.write_str(s),
        }
    }
}

impl Default for TypedValue {
    fn default() -> Self {
        TypedValue::Str(String::new())
    }
}

impl From<i32> for TypedValue {
    fn from(v: i32) -> Self {
        TypedValue::Int(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        TypedValue::Str(v.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        TypedValue::Str(v)
    }
}

impl JsonSchema for TypedValue {
    fn schema_name() -> String {
        "TypedValue".into()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        let mut obj = SchemaObject::default();
        obj.extensions
            .insert("x-kubernetes-int-or-string".into(), true.into());
        Schema::Object(obj)
    }
}

/// Declared type of a template parameter. Empty or missing means string.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    #[serde(alias = "")]
    String,
    Number,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_or_string_wire_shape() {
        let v: TypedValue = serde_json::from_str("5").unwrap();
        assert_eq!(v, TypedValue::Int(5));
        let v: TypedValue = serde_json::from_str("\"5\"").unwrap();
        assert_eq!(v, TypedValue::Str("5".into()));
        assert_eq!(serde_json::to_string(&TypedValue::Int(7)).unwrap(), "7");
    }

    #[test]
    fn empty_value_type_reads_as_string() {
        let t: ValueType = serde_json::from_str("\"\"").unwrap();
        assert_eq!(t, ValueType::String);
        let t: ValueType = serde_json::from_str("\"number\"").unwrap();
        assert_eq!(t, ValueType::Number);
    }
}
