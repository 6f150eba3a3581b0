//! Attribute filtering over cached records.
//!
//! Collaborators describe the records they want as a list of
//! `attribute = value` conditions. Each filterable entity publishes a fixed
//! enumeration of field names and one accessor per field; names outside that
//! enumeration are rejected with [`UnknownAttributeError`] instead of silently
//! matching everything.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// A scalar read from a record field or supplied in a condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FieldValue {
    fn truthy(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Bool(b) => *b,
            FieldValue::Int(n) => *n != 0,
            FieldValue::Text(s) => !(s.is_empty() || s == "0"),
        }
    }

    /// Loose value equality.
    ///
    /// Same-variant values compare by value. Across variants, booleans compare
    /// by truthiness, integers and numeric strings compare numerically, and
    /// `Null` equals `false`, `0` and the empty string.
    pub fn loose_eq(&self, other: &FieldValue) -> bool {
        use FieldValue::*;

        match (self, other) {
            (Null, Null) => true,
            (Null, Bool(b)) | (Bool(b), Null) => !*b,
            (Null, Int(n)) | (Int(n), Null) => *n == 0,
            (Null, Text(s)) | (Text(s), Null) => s.is_empty(),
            (Bool(a), Bool(b)) => a == b,
            (Bool(a), v) | (v, Bool(a)) => *a == v.truthy(),
            (Int(a), Int(b)) => a == b,
            (Int(n), Text(s)) | (Text(s), Int(n)) => match numeric(s) {
                Some(Numeric::Int(m)) => m == *n,
                Some(Numeric::Float(f)) => f == *n as f64,
                None => false,
            },
            (Text(a), Text(b)) => {
                a == b
                    || match (numeric(a), numeric(b)) {
                        (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                        _ => false,
                    }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(n) => n as f64,
            Numeric::Float(f) => f,
        }
    }
}

fn numeric(s: &str) -> Option<Numeric> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(Numeric::Int(n));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Numeric::Float)
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Int(i64::from(n))
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        // Values above i64::MAX keep their exact digits as text; loose
        // equality still compares them numerically.
        i64::try_from(n).map_or_else(|_| FieldValue::Text(n.to_string()), FieldValue::Int)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// A filter condition named an attribute the entity does not expose.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown attribute '{attribute}' for {entity}")]
pub struct UnknownAttributeError {
    pub entity: &'static str,
    pub attribute: String,
}

/// An entity whose fields can be matched by name.
pub trait Filterable {
    /// Closed enumeration of the fields this entity can be filtered on.
    type Field: Copy + fmt::Debug + Send + Sync + 'static;

    /// Entity name used in error messages.
    const ENTITY: &'static str;

    /// Every filterable field paired with its attribute name.
    const FIELDS: &'static [(&'static str, Self::Field)];

    /// Read one field of this record.
    fn field_value(&self, field: Self::Field) -> FieldValue;

    /// Map an attribute name onto the field enumeration.
    fn resolve_field(name: &str) -> Result<Self::Field, UnknownAttributeError> {
        Self::FIELDS
            .iter()
            .find(|(field_name, _)| *field_name == name)
            .map(|(_, field)| *field)
            .ok_or_else(|| UnknownAttributeError {
                entity: Self::ENTITY,
                attribute: name.to_string(),
            })
    }
}

/// Ordered `attribute = value` conditions. An empty set matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    pairs: Vec<(String, FieldValue)>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition, builder style.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.push(attribute, value);
        self
    }

    pub fn push(&mut self, attribute: impl Into<String>, value: impl Into<FieldValue>) {
        self.pairs.push((attribute.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.pairs.iter().map(|(a, v)| (a.as_str(), v))
    }

    /// Resolve every attribute name against `T`'s field enumeration.
    ///
    /// Fails on the first unknown name, independent of any records.
    pub fn resolve<T: Filterable>(&self) -> Result<ResolvedConditions<T>, UnknownAttributeError> {
        let pairs = self
            .pairs
            .iter()
            .map(|(name, value)| Ok((T::resolve_field(name)?, value.clone())))
            .collect::<Result<Vec<_>, UnknownAttributeError>>()?;
        Ok(ResolvedConditions { pairs })
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Conditions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut conditions = Conditions::new();
        for (attribute, value) in iter {
            conditions.push(attribute, value);
        }
        conditions
    }
}

/// Conditions whose attribute names are known to be valid for `T`.
#[derive(Debug, Clone)]
pub struct ResolvedConditions<T: Filterable> {
    pairs: Vec<(T::Field, FieldValue)>,
}

impl<T: Filterable> ResolvedConditions<T> {
    pub fn matches(&self, record: &T) -> bool {
        self.pairs
            .iter()
            .all(|(field, value)| record.field_value(*field).loose_eq(value))
    }

    /// Clone out the matching records, preserving their order.
    pub fn select(&self, records: &[T]) -> Vec<T>
    where
        T: Clone,
    {
        records
            .iter()
            .filter(|record| self.matches(record))
            .cloned()
            .collect()
    }
}
