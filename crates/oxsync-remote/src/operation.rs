//! Remote object model
//!
//! Property sets pushed over the wire and the objects that carry them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ids::RemoteId;
use crate::types::ObjectKind;

/// Ordered set of remote properties.
///
/// Properties that are absent are left untouched by a modify call; a
/// property explicitly set to [`AttributeValue::Null`] is cleared remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(flatten)]
    attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeSet {
    /// Create a new empty attribute set.
    pub fn new() -> Self {
        Self {
            attributes: BTreeMap::new(),
        }
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute using builder pattern.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_string())
    }

    /// Get a multi-valued string attribute.
    pub fn get_strings(&self, name: &str) -> Option<Vec<&str>> {
        self.get(name).map(|v| v.as_strings())
    }

    /// Get an integer attribute.
    pub fn get_integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.as_integer())
    }

    /// Check if an attribute exists.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(|s| s.as_str())
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Overlay `changes` onto this set: every property present in `changes`
    /// replaces the current value, everything else is kept.
    pub fn merge(&mut self, changes: &AttributeSet) {
        for (name, value) in changes.iter() {
            self.attributes.insert(name.clone(), value.clone());
        }
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// A value for a remote property, which may be single or multi-valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single boolean value.
    Boolean(bool),
    /// Multiple values.
    Array(Vec<AttributeValue>),
    /// Binary data (image payloads).
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Convert a local JSON value into a remote property value.
    ///
    /// Nested objects have no remote counterpart and are carried as their
    /// JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Integer(i),
                None => AttributeValue::String(n.to_string()),
            },
            Value::String(s) => AttributeValue::String(s.clone()),
            Value::Array(items) => {
                AttributeValue::Array(items.iter().map(AttributeValue::from_json).collect())
            }
            Value::Object(_) => AttributeValue::String(value.to_string()),
        }
    }

    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Whether the value carries no data: null, empty string or empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Null => true,
            AttributeValue::String(s) => s.is_empty(),
            AttributeValue::Binary(b) => b.is_empty(),
            AttributeValue::Array(arr) => arr.iter().all(AttributeValue::is_empty),
            AttributeValue::Integer(_) | AttributeValue::Boolean(_) => false,
        }
    }

    /// Get as a string if this is a single string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as strings (works for both single and multi-valued).
    pub fn as_strings(&self) -> Vec<&str> {
        match self {
            AttributeValue::String(s) => vec![s.as_str()],
            AttributeValue::Array(arr) => arr.iter().filter_map(|v| v.as_string()).collect(),
            _ => vec![],
        }
    }

    /// Get as an integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get as integers (works for both single and multi-valued).
    pub fn as_integers(&self) -> Vec<i64> {
        match self {
            AttributeValue::Array(arr) => arr.iter().filter_map(|v| v.as_integer()).collect(),
            other => other.as_integer().into_iter().collect(),
        }
    }

    /// Get as a boolean if this is a boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Check if this is multi-valued.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, AttributeValue::Array(_))
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Integer(i64::from(i))
    }
}

impl From<u16> for AttributeValue {
    fn from(i: u16) -> Self {
        AttributeValue::Integer(i64::from(i))
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(bytes: Vec<u8>) -> Self {
        AttributeValue::Binary(bytes)
    }
}

impl From<RemoteId> for AttributeValue {
    fn from(id: RemoteId) -> Self {
        AttributeValue::Integer(id.get())
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(vec: Vec<T>) -> Self {
        AttributeValue::Array(vec.into_iter().map(Into::into).collect())
    }
}

/// Property holding the remote name (login for users).
pub const PROP_NAME: &str = "name";

/// Property holding the member ids of a group.
pub const PROP_MEMBERS: &str = "members";

/// An object as seen by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Kind of the object.
    pub kind: ObjectKind,
    /// Remote id, absent until the object has been created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RemoteId>,
    /// Properties of the object.
    #[serde(default)]
    pub attributes: AttributeSet,
}

impl RemoteObject {
    /// Create a new, not yet created, object of the given kind.
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            id: None,
            attributes: AttributeSet::new(),
        }
    }

    /// Set a property using builder pattern.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.set(name, value);
        self
    }

    /// The remote name of the object.
    pub fn name(&self) -> Option<&str> {
        self.attributes.get_string(PROP_NAME)
    }

    /// Member ids of a group (empty for other kinds).
    pub fn members(&self) -> Vec<RemoteId> {
        self.attributes
            .get(PROP_MEMBERS)
            .map(|v| v.as_integers().into_iter().map(RemoteId::new).collect())
            .unwrap_or_default()
    }

    /// Replace the member list of a group.
    pub fn set_members(&mut self, members: &[RemoteId]) {
        let values: Vec<AttributeValue> = members.iter().map(|m| (*m).into()).collect();
        self.attributes.set(PROP_MEMBERS, AttributeValue::Array(values));
    }
}
