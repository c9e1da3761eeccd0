//! Runtime values flowing through the expression evaluator and operators.
//!
//! Literals parsed out of SQL text start out `Untyped` — the lexer has no
//! column context to coerce them against. They are coerced to a concrete
//! `Data` the first time they are compared against, or stored into, a typed
//! column. This mirrors the source's `Value{Type,Data,Value}` struct, where
//! a freshly parsed literal carries only its raw text until first used.

use std::cmp::Ordering;

use crate::catalog::ColumnType;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Typed(ColumnType, Data),
    /// Raw source text of a literal that hasn't been coerced to a column
    /// type yet (e.g. a constant in a WHERE clause before planning binds it
    /// to the column it's compared against).
    Untyped(String),
}

impl Value {
    pub fn int(v: i64) -> Self {
        Value::Typed(ColumnType::Int, Data::Int(v))
    }

    pub fn float(v: f64) -> Self {
        Value::Typed(ColumnType::Float, Data::Float(v))
    }

    pub fn str(v: impl Into<String>) -> Self {
        Value::Typed(ColumnType::FixedStr, Data::Str(v.into()))
    }

    pub fn text(v: impl Into<String>) -> Self {
        Value::Typed(ColumnType::Text, Data::Str(v.into()))
    }

    pub fn bool(v: bool) -> Self {
        Value::Typed(ColumnType::Bool, Data::Bool(v))
    }

    pub fn untyped(raw: impl Into<String>) -> Self {
        Value::Untyped(raw.into())
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Typed(ty, _) => Some(*ty),
            Value::Untyped(_) => None,
        }
    }

    /// Coerces an `Untyped` literal to `ty`, leaving an already-typed value
    /// untouched even if its type differs (the caller is expected to have
    /// matched types already; a mismatch surfaces at `compare`/`as_*` time).
    pub fn coerce(&self, ty: ColumnType) -> Result<Value> {
        match self {
            Value::Typed(_, _) => Ok(self.clone()),
            Value::Untyped(raw) => parse_literal(raw, ty),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self.coerce(ColumnType::Int)? {
            Value::Typed(_, Data::Int(v)) => Ok(v),
            _ => Err(EngineError::TypeMismatch(format!("{:?} is not an int", self))),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self.coerce(ColumnType::Float)? {
            Value::Typed(_, Data::Float(v)) => Ok(v),
            Value::Typed(_, Data::Int(v)) => Ok(v as f64),
            _ => Err(EngineError::TypeMismatch(format!("{:?} is not a float", self))),
        }
    }

    pub fn as_str(&self) -> Result<String> {
        match self {
            Value::Typed(_, Data::Str(s)) => Ok(s.clone()),
            Value::Untyped(raw) => Ok(raw.clone()),
            other => Err(EngineError::TypeMismatch(format!("{:?} is not a string", other))),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self.coerce(ColumnType::Bool)? {
            Value::Typed(_, Data::Bool(v)) => Ok(v),
            _ => Err(EngineError::TypeMismatch(format!("{:?} is not a bool", self))),
        }
    }

    /// Compares two values, coercing whichever side is `Untyped` to the
    /// other side's column type first. Two `Untyped` values compare as raw
    /// text.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        let (lhs, rhs) = match (self, other) {
            (Value::Untyped(_), Value::Untyped(_)) => {
                return Ok(self.as_str()?.cmp(&other.as_str()?));
            }
            (Value::Untyped(_), Value::Typed(ty, _)) => (self.coerce(*ty)?, other.clone()),
            (Value::Typed(ty, _), Value::Untyped(_)) => (self.clone(), other.coerce(*ty)?),
            (Value::Typed(_, _), Value::Typed(_, _)) => (self.clone(), other.clone()),
        };
        match (&lhs, &rhs) {
            (Value::Typed(_, Data::Int(a)), Value::Typed(_, Data::Int(b))) => Ok(a.cmp(b)),
            (Value::Typed(_, Data::Float(a)), Value::Typed(_, Data::Float(b))) => {
                a.partial_cmp(b).ok_or_else(|| EngineError::TypeMismatch("NaN comparison".into()))
            }
            (Value::Typed(_, Data::Str(a)), Value::Typed(_, Data::Str(b))) => Ok(a.cmp(b)),
            (Value::Typed(_, Data::Bool(a)), Value::Typed(_, Data::Bool(b))) => Ok(a.cmp(b)),
            _ => Err(EngineError::TypeMismatch(format!("cannot compare {:?} and {:?}", lhs, rhs))),
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Typed(_, Data::Int(v)) => v.to_string(),
            Value::Typed(_, Data::Float(v)) => v.to_string(),
            Value::Typed(_, Data::Str(v)) => v.clone(),
            Value::Typed(_, Data::Bool(v)) => v.to_string(),
            Value::Untyped(raw) => raw.clone(),
        }
    }
}

fn parse_literal(raw: &str, ty: ColumnType) -> Result<Value> {
    match ty {
        ColumnType::Int => raw
            .parse::<i64>()
            .map(Value::int)
            .map_err(|_| EngineError::TypeMismatch(format!("'{}' is not an int literal", raw))),
        ColumnType::Float => raw
            .parse::<f64>()
            .map(Value::float)
            .map_err(|_| EngineError::TypeMismatch(format!("'{}' is not a float literal", raw))),
        ColumnType::Bool => match raw {
            "true" | "TRUE" | "1" => Ok(Value::bool(true)),
            "false" | "FALSE" | "0" => Ok(Value::bool(false)),
            _ => Err(EngineError::TypeMismatch(format!("'{}' is not a bool literal", raw))),
        },
        ColumnType::FixedStr => Ok(Value::str(raw)),
        ColumnType::Text => Ok(Value::text(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untyped_coerces_to_int() {
        let v = Value::untyped("42");
        assert_eq!(v.as_int().unwrap(), 42);
    }

    #[test]
    fn compare_untyped_against_typed_int() {
        let lit = Value::untyped("10");
        let col = Value::int(10);
        assert_eq!(lit.compare(&col).unwrap(), Ordering::Equal);
    }

    #[test]
    fn compare_two_untyped_as_text() {
        let a = Value::untyped("abc");
        let b = Value::untyped("abd");
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);
    }

    #[test]
    fn bad_int_literal_errors() {
        let v = Value::untyped("not-a-number");
        assert!(v.as_int().is_err());
    }

    #[test]
    fn bool_literal_variants() {
        assert_eq!(Value::untyped("true").as_bool().unwrap(), true);
        assert_eq!(Value::untyped("0").as_bool().unwrap(), false);
    }
}
