//! # DSL Values
//!
//! Result type of expression evaluation. Unit scripts mix integer register
//! contents, fractional scale factors, booleans from `non_zero` and the
//! occasional string literal, so a value keeps the kind it was produced with
//! and converts on demand.
//!
//! | Kind | as number | truthy when |
//! |------|-----------|-------------|
//! | Bool | 0 / 1 | true |
//! | Int | itself | non-zero |
//! | Float | itself | non-zero |
//! | Text | parsed, else 0 | non-empty |

use std::fmt;

/// Dynamically typed evaluation result
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Result of `non_zero`
    Bool(bool),
    /// Register contents, bit operations, rounding
    Int(i64),
    /// Scaled quantities
    Float(f64),
    /// Non-numeric string literal
    Text(String),
}

impl Value {
    /// Numeric view used for arithmetic and variable storage.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Int(v) => *v as f64,
            Value::Float(v) => *v,
            Value::Text(s) => s.trim().parse().unwrap_or(0.0),
        }
    }

    /// Integer view used for bit operations and addresses.
    ///
    /// Floats truncate toward zero; NaN becomes 0.
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Bool(b) => i64::from(*b),
            Value::Int(v) => *v,
            Value::Float(v) => *v as i64,
            Value::Text(_) => self.as_f64() as i64,
        }
    }

    /// Truthiness used by `non_zero` and coil writes.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Text(s) => !s.is_empty(),
        }
    }

    /// Product; stays integral when both sides are integral.
    pub fn multiply(&self, other: &Value) -> Value {
        match (self.integral(), other.integral()) {
            (Some(a), Some(b)) => Value::Int(a.wrapping_mul(b)),
            _ => Value::Float(self.as_f64() * other.as_f64()),
        }
    }

    /// Quotient; division by zero yields `Int(0)`.
    pub fn divide(&self, other: &Value) -> Value {
        let divisor = other.as_f64();
        if divisor == 0.0 {
            return Value::Int(0);
        }
        Value::Float(self.as_f64() / divisor)
    }

    fn integral(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{} (0x{:04x})", v, *v as u16),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
