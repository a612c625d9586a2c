use std::fmt;

use glam::DVec3;
use serde::Serialize;

use crate::config::Config;

/// Semantic type of a script value, used for signature checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Int,
    Float,
    Bool,
    String,
    Vector,
    Config,
    /// Parameter-only wildcard; never the type of a produced value.
    Any,
    Void,
}

impl Type {
    /// Whether a value of type `found` can be bound to a parameter of this type.
    pub fn accepts(self, found: Type) -> bool {
        match (self, found) {
            (_, Type::Void) => false,
            (Type::Any, _) => true,
            (Type::Float, Type::Int) => true,
            (expected, found) => expected == found,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Type::Int => "int",
            Type::Float => "float",
            Type::Bool => "bool",
            Type::String => "string",
            Type::Vector => "vector",
            Type::Config => "config",
            Type::Any => "any",
            Type::Void => "void",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime value flowing between registered callables.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Vector(DVec3),
    Config(Config),
    Void,
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Bool(_) => Type::Bool,
            Value::String(_) => Type::String,
            Value::Vector(_) => Type::Vector,
            Value::Config(_) => Type::Config,
            Value::Void => Type::Void,
        }
    }

    pub fn as_int(&self) -> Result<i64, EvalError> {
        match self {
            Value::Int(value) => Ok(*value),
            other => Err(EvalError::type_mismatch(Type::Int, other.ty())),
        }
    }

    /// Reads a float, widening integers.
    pub fn as_float(&self) -> Result<f64, EvalError> {
        match self {
            Value::Float(value) => Ok(*value),
            Value::Int(value) => Ok(*value as f64),
            other => Err(EvalError::type_mismatch(Type::Float, other.ty())),
        }
    }

    pub fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Bool(value) => Ok(*value),
            other => Err(EvalError::type_mismatch(Type::Bool, other.ty())),
        }
    }

    pub fn as_vector(&self) -> Result<DVec3, EvalError> {
        match self {
            Value::Vector(value) => Ok(*value),
            other => Err(EvalError::type_mismatch(Type::Vector, other.ty())),
        }
    }

    pub fn as_config(&self) -> Result<&Config, EvalError> {
        match self {
            Value::Config(config) => Ok(config),
            other => Err(EvalError::type_mismatch(Type::Config, other.ty())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:e}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::String(value) => f.write_str(value),
            Value::Vector(v) => write!(f, "({:e}, {:e}, {:e})", v.x, v.y, v.z),
            Value::Config(config) => write!(f, "{config:?}"),
            Value::Void => f.write_str("void"),
        }
    }
}

/// Failure raised while evaluating a statement.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("expected {expected} value, got {found}")]
    TypeMismatch { expected: Type, found: Type },
    #[error("{name} is read-only")]
    ReadOnly { name: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Failed(String),
}

impl EvalError {
    pub fn type_mismatch(expected: Type, found: Type) -> Self {
        EvalError::TypeMismatch { expected, found }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        EvalError::InvalidArgument(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        EvalError::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_parameters_widen_integers_only() {
        assert!(Type::Float.accepts(Type::Int));
        assert!(!Type::Int.accepts(Type::Float));
        assert!(Type::Any.accepts(Type::Config));
        assert!(!Type::Any.accepts(Type::Void));
        assert_eq!(Value::Int(3).as_float(), Ok(3.0));
        assert!(Value::Float(3.5).as_int().is_err());
    }
}
