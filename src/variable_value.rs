//! Variable values
//!
//! A [`VariableValue`] is a tagged union over the four data types that can cross the
//! host/script boundary: 64-bit signed integers, 64-bit floats, UTF-8 strings, and
//! booleans.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value stored in a [`crate::context::Context`]'s variable table.
///
/// There is deliberately no blanket `From<&str>`-like conversion that could collapse to
/// `Bool` by accident: callers always go through [`VariableValue::from_str`] (or the
/// owned-`String`/native `bool`/`i64`/`f64` `From` impls below) to get a string or a
/// boolean, never an implicit one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariableValue {
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// A boolean.
    Bool(bool),
}

impl VariableValue {
    /// Construct a string value from anything that converts to an owned `String`.
    ///
    /// This is the only string constructor the public API exposes; there is no `From<&str>`
    /// so that a string literal can never silently resolve to a different alternative.
    pub fn from_str(value: impl Into<String>) -> Self {
        VariableValue::String(value.into())
    }

    /// Return this value as an `i64` if it is the `Int` alternative.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            VariableValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Return this value as an `f64` if it is the `Float` alternative.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            VariableValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Return this value as a `&str` if it is the `String` alternative.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            VariableValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Return this value as a `bool` if it is the `Bool` alternative.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            VariableValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for VariableValue {
    fn from(value: i64) -> Self {
        VariableValue::Int(value)
    }
}

impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        VariableValue::Float(value)
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        VariableValue::String(value)
    }
}

impl From<bool> for VariableValue {
    fn from(value: bool) -> Self {
        VariableValue::Bool(value)
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Int(v) => write!(f, "{v}"),
            VariableValue::Float(v) => write!(f, "{v}"),
            VariableValue::String(v) => write!(f, "{v}"),
            VariableValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_always_produces_a_string_variant() {
        // The hazard this guards against in the original C++ is a raw `const char*`
        // implicitly converting to `bool`. There is no Rust equivalent, but the
        // dedicated constructor is kept as the idiomatic expression of the same rule.
        let v = VariableValue::from_str("true");
        assert!(matches!(v, VariableValue::String(ref s) if s == "true"));
    }

    #[test]
    fn equality_and_display_follow_the_active_alternative() {
        assert_eq!(VariableValue::Int(42), VariableValue::from(42i64));
        assert_ne!(VariableValue::Int(1), VariableValue::Bool(true));
        assert_eq!(VariableValue::Float(0.5).to_string(), "0.5");
        assert_eq!(VariableValue::Bool(true).to_string(), "true");
    }
}
