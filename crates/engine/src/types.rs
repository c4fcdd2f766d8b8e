//! Literal types and typed interfaces shared by tasks and workflows.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The type of a value flowing along a data edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralType {
    Integer,
    Float,
    Boolean,
    String,
    /// Arbitrary JSON object.
    Struct,
    /// The unit type.
    None,
}

impl LiteralType {
    /// Whether a concrete value inhabits this type.
    ///
    /// Integers are accepted where a float is declared; nothing else is
    /// coerced.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            LiteralType::Integer => value.is_i64() || value.is_u64(),
            LiteralType::Float => value.is_number(),
            LiteralType::Boolean => value.is_boolean(),
            LiteralType::String => value.is_string(),
            LiteralType::Struct => value.is_object(),
            LiteralType::None => value.is_null(),
        }
    }

    /// Whether a value statically typed as `self` may be bound to a
    /// parameter declared as `target`.
    pub fn is_assignable_to(self, target: LiteralType) -> bool {
        self == target || (self == LiteralType::Integer && target == LiteralType::Float)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, LiteralType::Integer | LiteralType::Float)
    }

    /// Best-effort type of a JSON value, used for diagnostics.
    pub fn of(value: &Value) -> LiteralType {
        match value {
            Value::Null => LiteralType::None,
            Value::Bool(_) => LiteralType::Boolean,
            Value::Number(n) if n.is_f64() => LiteralType::Float,
            Value::Number(_) => LiteralType::Integer,
            Value::String(_) => LiteralType::String,
            Value::Array(_) | Value::Object(_) => LiteralType::Struct,
        }
    }
}

impl fmt::Display for LiteralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LiteralType::Integer => "integer",
            LiteralType::Float => "float",
            LiteralType::Boolean => "boolean",
            LiteralType::String => "string",
            LiteralType::Struct => "struct",
            LiteralType::None => "none",
        };
        f.write_str(name)
    }
}

/// A named, typed parameter or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: LiteralType,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: LiteralType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Declared inputs and outputs of a task or workflow, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedInterface {
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
}

impl TypedInterface {
    pub fn input(&self, name: &str) -> Option<&Variable> {
        self.inputs.iter().find(|v| v.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Variable> {
        self.outputs.iter().find(|v| v.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_widen_to_float_but_not_back() {
        assert!(LiteralType::Float.accepts(&json!(3)));
        assert!(!LiteralType::Integer.accepts(&json!(3.5)));
        assert!(LiteralType::Integer.is_assignable_to(LiteralType::Float));
        assert!(!LiteralType::Float.is_assignable_to(LiteralType::Integer));
    }

    #[test]
    fn non_numeric_types_accept_only_their_own_values() {
        assert!(LiteralType::String.accepts(&json!("x")));
        assert!(!LiteralType::String.accepts(&json!(1)));
        assert!(LiteralType::Struct.accepts(&json!({ "k": 1 })));
        assert!(LiteralType::None.accepts(&Value::Null));
        assert!(!LiteralType::Boolean.accepts(&json!("true")));
    }

    #[test]
    fn variables_serialise_with_a_type_field() {
        let v = Variable::new("a", LiteralType::Integer);
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            json!({ "name": "a", "type": "integer" })
        );
    }
}
