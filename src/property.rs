//! Typed key/value attribute bags attached to concepts and conceptions.
//!
//! A [`PropertySet`] has no identity of its own: it lives inside the node or
//! edge that owns it, and mutating it never triggers persistence. The owner
//! (via the [`MetaGraph`](crate::graph::meta::MetaGraph)) marks itself dirty.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PropertyError;

/// A scalar property value.
///
/// Serializes as a bare JSON scalar so collaborator input like
/// `{"occurrences": 2, "source": "frankenstein"}` maps directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    /// Name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::Text(_) => "text",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view of the value (ints widen to `f64`).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(n) => Some(*n as f64),
            PropertyValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyValue::Int(_) | PropertyValue::Float(_))
    }

    /// Sum two numeric values. Int + Int stays integral (saturating);
    /// any float operand promotes the result. Returns `None` for non-numeric input.
    pub fn checked_sum(&self, other: &PropertyValue) -> Option<PropertyValue> {
        match (self, other) {
            (PropertyValue::Int(a), PropertyValue::Int(b)) => {
                Some(PropertyValue::Int(a.saturating_add(*b)))
            }
            _ => Some(PropertyValue::Float(self.as_number()? + other.as_number()?)),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(n) => write!(f, "{n}"),
            PropertyValue::Float(x) => write!(f, "{x}"),
            PropertyValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Int(n)
    }
}

impl From<i32> for PropertyValue {
    fn from(n: i32) -> Self {
        PropertyValue::Int(n.into())
    }
}

impl From<u32> for PropertyValue {
    fn from(n: u32) -> Self {
        PropertyValue::Int(n.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(x: f64) -> Self {
        PropertyValue::Float(x)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

/// How an incoming property value combines with an existing one when a
/// duplicate concept or relation is re-inserted.
pub trait MergePolicy: Send + Sync + fmt::Debug {
    /// Merge `incoming` into `existing` for property `key`.
    fn merge(&self, key: &str, existing: &mut PropertyValue, incoming: PropertyValue);
}

/// Default policy: numeric values are summed (occurrence counters), anything
/// else is overwritten by the newest value.
#[derive(Debug, Clone, Copy, Default)]
pub struct OccurrenceCounting;

impl MergePolicy for OccurrenceCounting {
    fn merge(&self, _key: &str, existing: &mut PropertyValue, incoming: PropertyValue) {
        match existing.checked_sum(&incoming) {
            Some(sum) => *existing = sum,
            None => *existing = incoming,
        }
    }
}

/// Newest value always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overwrite;

impl MergePolicy for Overwrite {
    fn merge(&self, _key: &str, existing: &mut PropertyValue, incoming: PropertyValue) {
        *existing = incoming;
    }
}

/// First value ever written wins; later values only fill in missing keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepExisting;

impl MergePolicy for KeepExisting {
    fn merge(&self, _key: &str, _existing: &mut PropertyValue, _incoming: PropertyValue) {}
}

/// Ordered mapping from string keys to typed scalar values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet {
    entries: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a property, returning the value it replaced.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Look up a property. Absence is explicit, never a default.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    /// Like [`get`](Self::get) but reports absence as an error.
    pub fn try_get(&self, key: &str) -> Result<&PropertyValue, PropertyError> {
        self.entries.get(key).ok_or_else(|| PropertyError::Missing {
            key: key.to_owned(),
        })
    }

    /// Typed integer lookup.
    pub fn int(&self, key: &str) -> Result<i64, PropertyError> {
        let value = self.try_get(key)?;
        value.as_int().ok_or(PropertyError::TypeMismatch {
            key: key.to_owned(),
            expected: "int",
            found: value.type_name(),
        })
    }

    /// Typed text lookup.
    pub fn text(&self, key: &str) -> Result<&str, PropertyError> {
        let value = self.try_get(key)?;
        value.as_text().ok_or(PropertyError::TypeMismatch {
            key: key.to_owned(),
            expected: "text",
            found: value.type_name(),
        })
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge every entry of `other` into this set. Keys absent here are
    /// inserted as-is; keys present on both sides go through `policy`.
    pub fn merge_from(&mut self, other: PropertySet, policy: &dyn MergePolicy) {
        for (key, incoming) in other.entries {
            match self.entries.get_mut(&key) {
                Some(existing) => policy.merge(&key, existing, incoming),
                None => {
                    self.entries.insert(key, incoming);
                }
            }
        }
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for PropertySet {
    type Item = (String, PropertyValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
