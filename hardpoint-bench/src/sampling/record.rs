//! Sample records and their field values

use std::fmt;
use std::time::Duration;

use hardware::SymbolValue;

/// Scalar value of one record field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    /// Numeric view; booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Real(r) => Some(*r),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Text(_) => None,
        }
    }

    /// Parse a persisted cell.
    ///
    /// Integers are tried first, then reals, then `True`/`False`. Anything
    /// else is text, so numeric-looking text reads back as a number unless
    /// its column is declared as text to the table reader.
    pub fn parse(cell: &str) -> Self {
        if let Ok(i) = cell.parse::<i64>() {
            return FieldValue::Int(i);
        }
        if let Ok(r) = cell.parse::<f64>() {
            return FieldValue::Real(r);
        }
        match cell {
            "True" => FieldValue::Bool(true),
            "False" => FieldValue::Bool(false),
            _ => FieldValue::Text(cell.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(i) => write!(f, "{i}"),
            // Debug keeps the decimal point so reals re-read as reals
            FieldValue::Real(r) => write!(f, "{r:?}"),
            FieldValue::Bool(b) => f.write_str(if *b { "True" } else { "False" }),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<&SymbolValue> for FieldValue {
    fn from(value: &SymbolValue) -> Self {
        match value {
            SymbolValue::Bool(b) => FieldValue::Bool(*b),
            SymbolValue::Int(i) => FieldValue::Int(*i),
            SymbolValue::Real(r) => FieldValue::Real(*r),
            SymbolValue::Text(s) => FieldValue::Text(s.clone()),
        }
    }
}

/// One row of the output stream: named fields in insertion order.
///
/// Built once per tick and never changed after it is appended to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    index: u64,
    elapsed: Duration,
    fields: Vec<(String, FieldValue)>,
}

impl SampleRecord {
    /// Empty record stamped with its 1-based index and elapsed session time.
    pub fn new(index: u64, elapsed: Duration) -> Self {
        Self {
            index,
            elapsed,
            fields: Vec::new(),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Set a field, keeping its original position if already present.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder form of [`SampleRecord::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
