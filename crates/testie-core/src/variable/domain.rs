use std::collections::BTreeMap;
use testie_types::{Value, ValueFormat};

use crate::error::DomainError;

/// The set of values one variable can take
#[derive(Debug, Clone, PartialEq)]
pub enum VariableDomain {
    /// A single value
    Simple(Value),
    /// Explicit values, possibly labelled
    List(Vec<Value>),
    /// Materialized numeric range
    Range(Vec<Value>),
    /// Key/value table. Counts as one value.
    Dict(BTreeMap<String, Value>),
}

impl VariableDomain {
    pub fn count(&self) -> usize {
        match self {
            VariableDomain::Simple(_) | VariableDomain::Dict(_) => 1,
            VariableDomain::List(values) | VariableDomain::Range(values) => values.len(),
        }
    }

    pub fn values(&self) -> Vec<Value> {
        match self {
            VariableDomain::Simple(v) => vec![v.clone()],
            VariableDomain::List(values) | VariableDomain::Range(values) => values.clone(),
            VariableDomain::Dict(entries) => vec![Value::Map(entries.clone())],
        }
    }

    /// First value, used for single-valued snapshots
    pub fn first(&self) -> Value {
        match self {
            VariableDomain::Simple(v) => v.clone(),
            VariableDomain::List(values) | VariableDomain::Range(values) => {
                values.first().cloned().unwrap_or(Value::Null)
            }
            VariableDomain::Dict(entries) => Value::Map(entries.clone()),
        }
    }

    /// Narrowest format holding every value
    pub fn format(&self) -> ValueFormat {
        match self {
            VariableDomain::Dict(_) => ValueFormat::Map,
            VariableDomain::Simple(v) => v.format(),
            VariableDomain::List(values) | VariableDomain::Range(values) => values
                .iter()
                .map(Value::format)
                .reduce(ValueFormat::widen)
                .unwrap_or(ValueFormat::Null),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.format(), ValueFormat::Int | ValueFormat::Float)
    }

    fn kind(&self) -> &'static str {
        match self {
            VariableDomain::Simple(_) => "simple",
            VariableDomain::List(_) => "list",
            VariableDomain::Range(_) => "range",
            VariableDomain::Dict(_) => "dictionary",
        }
    }

    /// `+=`: dictionaries merge key-wise, everything else concatenates
    pub fn merge(&mut self, other: VariableDomain) -> Result<(), DomainError> {
        match (&mut *self, other) {
            (VariableDomain::Dict(entries), VariableDomain::Dict(more)) => {
                entries.extend(more);
                Ok(())
            }
            (VariableDomain::Dict(_), other) => Err(DomainError::DictionaryMix(other.kind())),
            (this, VariableDomain::Dict(_)) => Err(DomainError::DictionaryMix(this.kind())),
            (this, other) => {
                let mut values = this.values();
                values.extend(other.values());
                *this = VariableDomain::List(values);
                Ok(())
            }
        }
    }

    /// Re-read a labelled list (`{key:value,...}`) as a dictionary.
    ///
    /// An empty list or empty scalar becomes an empty dictionary. Anything
    /// carrying unlabelled items is returned unchanged.
    pub fn into_dict(self) -> VariableDomain {
        let empty = |v: &Value| v.as_str().is_some_and(|s| s.is_empty());
        match self {
            VariableDomain::Simple(ref v) if empty(v) => VariableDomain::Dict(BTreeMap::new()),
            VariableDomain::List(ref values) if values.iter().all(empty) => {
                VariableDomain::Dict(BTreeMap::new())
            }
            VariableDomain::List(values) if values.iter().all(|v| v.label().is_some()) => {
                let entries = values
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::Labeled { value, label } => {
                            Some((value.to_string(), Value::text(label)))
                        }
                        _ => None,
                    })
                    .collect();
                VariableDomain::Dict(entries)
            }
            other => other,
        }
    }
}

impl From<Value> for VariableDomain {
    fn from(value: Value) -> Self {
        match value {
            Value::List(values) => VariableDomain::List(values),
            Value::Map(entries) => VariableDomain::Dict(entries),
            other => VariableDomain::Simple(other),
        }
    }
}
