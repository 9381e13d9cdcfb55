//! Testie Types - Level 1 Foundation Types
//!
//! Pure data structures shared by the grammar, expansion and substitution
//! crates. Nothing in here knows about sections, tags or the config
//! catalogue.
//!
//! ## Contents
//!
//! - [`Value`]: one materialized parameter value
//! - [`Row`]: one row of the expansion matrix (name → value)
//! - [`ValueFormat`]: type descriptor used for schema output
//!
//! Values parsed out of testie text stay strings. Numeric-ness is decided on
//! demand so a substituted value reproduces exactly what the author wrote.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One row of the expansion matrix: every variable bound to a single value.
pub type Row = BTreeMap<String, Value>;

// ============================================================================
// VALUE
// ============================================================================

/// A materialized variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A value carrying a display label (`{64:small,1500:large}`).
    /// Substitutes as its first element.
    Labeled { value: Box<Value>, label: String },
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create a string value
    pub fn text(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Create a labelled value
    pub fn labeled(value: Value, label: impl Into<String>) -> Self {
        Value::Labeled {
            value: Box::new(value),
            label: label.into(),
        }
    }

    /// The value used for substitution: the first element of a labelled pair,
    /// the value itself otherwise.
    pub fn first(&self) -> &Value {
        match self {
            Value::Labeled { value, .. } => value.first(),
            other => other,
        }
    }

    /// Display label, if any
    pub fn label(&self) -> Option<&str> {
        match self {
            Value::Labeled { label, .. } => Some(label),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.first(), Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.first() {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view. Strings are parsed on demand.
    pub fn as_f64(&self) -> Option<f64> {
        match self.first() {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Integer view. Floats qualify only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self.first() {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::Str(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| f as i64)
                })
            }
            _ => None,
        }
    }

    /// Boolean view. Accepts the spellings testie authors use.
    pub fn as_bool(&self) -> Option<bool> {
        match self.first() {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.format(), ValueFormat::Int | ValueFormat::Float)
    }

    /// Type descriptor of this value
    pub fn format(&self) -> ValueFormat {
        match self.first() {
            Value::Null => ValueFormat::Null,
            Value::Bool(_) => ValueFormat::Bool,
            Value::Int(_) => ValueFormat::Int,
            Value::Float(_) => ValueFormat::Float,
            Value::Str(s) => {
                let s = s.trim();
                if s.parse::<i64>().is_ok() {
                    ValueFormat::Int
                } else if !s.is_empty() && s.parse::<f64>().is_ok() {
                    ValueFormat::Float
                } else {
                    ValueFormat::Str
                }
            }
            Value::List(_) => ValueFormat::List,
            Value::Map(_) => ValueFormat::Map,
            Value::Labeled { value, .. } => value.format(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Labeled { value, .. } => write!(f, "{}", value),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Integral floats keep one decimal so `8/2` reads `4.0`, never `4`.
pub fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ============================================================================
// TYPE DESCRIPTORS
// ============================================================================

/// Type descriptor of a value or of a whole variable domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
}

impl ValueFormat {
    /// Smallest format able to hold values of both formats
    pub fn widen(self, other: ValueFormat) -> ValueFormat {
        use ValueFormat::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Null, x) | (x, Null) => x,
            (Int, Float) | (Float, Int) => Float,
            _ => Str,
        }
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueFormat::Null => "null",
            ValueFormat::Bool => "bool",
            ValueFormat::Int => "int",
            ValueFormat::Float => "float",
            ValueFormat::Str => "str",
            ValueFormat::List => "list",
            ValueFormat::Map => "map",
        };
        f.write_str(name)
    }
}
