//! Change events
//!
//! One change notification of the local directory: an old and a new
//! snapshot of a single object, plus the entity type used for dispatch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ReconcileError, ReconcileResult};

/// Entity types the engine reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A tenant ("context").
    Tenant,
    /// A user account.
    User,
    /// A group of users.
    Group,
    /// A bookable resource.
    Resource,
    /// A shared mailbox with associated users.
    FunctionalAccount,
    /// A named set of capability flags.
    AccessProfile,
}

impl EntityType {
    /// Get all entity types.
    #[must_use]
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Tenant,
            EntityType::User,
            EntityType::Group,
            EntityType::Resource,
            EntityType::FunctionalAccount,
            EntityType::AccessProfile,
        ]
    }

    /// The object type string carried in change envelopes.
    #[must_use]
    pub fn object_type(&self) -> &'static str {
        match self {
            EntityType::Tenant => "oxmail/oxcontext",
            EntityType::User => "users/user",
            EntityType::Group => "groups/group",
            EntityType::Resource => "oxresources/oxresources",
            EntityType::FunctionalAccount => "oxmail/functional_account",
            EntityType::AccessProfile => "oxmail/accessprofile",
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Tenant => "tenant",
            EntityType::User => "user",
            EntityType::Group => "group",
            EntityType::Resource => "resource",
            EntityType::FunctionalAccount => "functional_account",
            EntityType::AccessProfile => "access_profile",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::all()
            .iter()
            .find(|t| t.object_type() == s || t.as_str() == s)
            .copied()
            .ok_or_else(|| ReconcileError::invalid_event(format!("unknown object type '{s}'")))
    }
}

/// Snapshot of a local object's attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Set an attribute using builder pattern.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Set an attribute.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Get the raw value of an attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Get a single string value. For multi-valued attributes the first
    /// non-empty string is returned.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .find(|s| !s.is_empty()),
            _ => None,
        }
    }

    /// Get all string values of an attribute, skipping empty ones.
    pub fn get_strings(&self, name: &str) -> Vec<String> {
        match self.0.get(name) {
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Get an integer value, accepting numeric strings.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Array(items) => items.first().and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Interpret an attribute as a flag. Directory flags arrive as `"1"`,
    /// `"TRUE"` or JSON booleans.
    pub fn get_bool(&self, name: &str) -> bool {
        fn truthy(value: &Value) -> bool {
            match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_i64() == Some(1),
                Value::String(s) => matches!(
                    s.trim().to_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                ),
                Value::Array(items) => items.first().is_some_and(truthy),
                _ => false,
            }
        }
        self.0.get(name).is_some_and(truthy)
    }

    /// Whether an attribute is absent or carries no data.
    pub fn is_empty_value(&self, name: &str) -> bool {
        fn empty(value: &Value) -> bool {
            match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                Value::Array(items) => items.iter().all(empty),
                _ => false,
            }
        }
        self.0.get(name).map_or(true, empty)
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Change envelope as delivered by the event source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    /// Durable identifier of the local object.
    pub id: String,
    /// Object type string, e.g. `users/user`.
    pub udm_object_type: String,
    /// Current directory path of the object.
    pub dn: String,
    /// Attributes, or null when the object does not exist in this state.
    #[serde(default)]
    pub object: Option<Map<String, Value>>,
    /// Object options.
    #[serde(default)]
    pub options: Vec<String>,
}

/// One change of one local object.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Durable key of the object (its directory path).
    pub local_key: String,
    /// Entity type used for dispatch.
    pub entity_type: EntityType,
    /// Attributes before the change.
    pub old_attributes: Option<Attributes>,
    /// Attributes after the change.
    pub new_attributes: Option<Attributes>,
    /// Key before the change.
    pub old_local_key: Option<String>,
    /// Key after the change.
    pub new_local_key: Option<String>,
}

/// How an event relates to what is already known about the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Old snapshot absent, new snapshot present.
    Added,
    /// Both snapshots present.
    Modified,
    /// New snapshot absent.
    Deleted,
    /// No old snapshot, but the object is already known remotely (resync).
    /// The new snapshot stands in for the missing prior state.
    UnknownPriorState,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Added => "added",
            Classification::Modified => "modified",
            Classification::Deleted => "deleted",
            Classification::UnknownPriorState => "unknown_prior_state",
        };
        write!(f, "{s}")
    }
}

impl ChangeEvent {
    /// Create an event for `local_key`.
    pub fn new(
        entity_type: EntityType,
        local_key: impl Into<String>,
        old_attributes: Option<Attributes>,
        new_attributes: Option<Attributes>,
    ) -> Self {
        let local_key = local_key.into();
        Self {
            old_local_key: old_attributes.as_ref().map(|_| local_key.clone()),
            new_local_key: new_attributes.as_ref().map(|_| local_key.clone()),
            local_key,
            entity_type,
            old_attributes,
            new_attributes,
        }
    }

    /// Creation of an object.
    pub fn added(entity_type: EntityType, key: impl Into<String>, new: Attributes) -> Self {
        Self::new(entity_type, key, None, Some(new))
    }

    /// Modification of an object.
    pub fn modified(
        entity_type: EntityType,
        key: impl Into<String>,
        old: Attributes,
        new: Attributes,
    ) -> Self {
        Self::new(entity_type, key, Some(old), Some(new))
    }

    /// Removal of an object.
    pub fn deleted(entity_type: EntityType, key: impl Into<String>, old: Attributes) -> Self {
        Self::new(entity_type, key, Some(old), None)
    }

    /// Record that the object moved from `old_key` to the event's key.
    #[must_use]
    pub fn with_old_key(mut self, old_key: impl Into<String>) -> Self {
        self.old_local_key = Some(old_key.into());
        self
    }

    /// Build an event from the old/new envelope pair.
    ///
    /// Returns `Ok(None)` when neither side describes an existing object.
    pub fn from_envelopes(
        old: Option<ChangeEnvelope>,
        new: Option<ChangeEnvelope>,
    ) -> ReconcileResult<Option<Self>> {
        let old = old.filter(|e| e.object.is_some());
        let new = new.filter(|e| e.object.is_some());

        let entity_type = match (&old, &new) {
            (None, None) => return Ok(None),
            (Some(o), Some(n)) => {
                let old_type: EntityType = o.udm_object_type.parse()?;
                let new_type: EntityType = n.udm_object_type.parse()?;
                if old_type != new_type {
                    return Err(ReconcileError::invalid_event(format!(
                        "object type changed from {old_type} to {new_type}"
                    )));
                }
                new_type
            }
            (Some(e), None) | (None, Some(e)) => e.udm_object_type.parse()?,
        };

        let old_local_key = old.as_ref().map(|e| e.dn.clone());
        let new_local_key = new.as_ref().map(|e| e.dn.clone());
        let local_key = new_local_key
            .clone()
            .or_else(|| old_local_key.clone())
            .unwrap_or_default();

        Ok(Some(Self {
            local_key,
            entity_type,
            old_attributes: old.and_then(|e| e.object).map(Attributes::from),
            new_attributes: new.and_then(|e| e.object).map(Attributes::from),
            old_local_key,
            new_local_key,
        }))
    }

    /// Classify the event. `known` tells whether the object is already
    /// known remotely (identity cache hit or remote lookup).
    pub fn classify(&self, known: bool) -> Classification {
        match (&self.old_attributes, &self.new_attributes) {
            (_, None) => Classification::Deleted,
            (Some(_), Some(_)) => Classification::Modified,
            (None, Some(_)) if known => Classification::UnknownPriorState,
            (None, Some(_)) => Classification::Added,
        }
    }

    /// The prior state to compare against: the old snapshot, or the new
    /// snapshot when the prior state is unknown.
    pub fn prior_attributes(&self) -> Option<&Attributes> {
        self.old_attributes
            .as_ref()
            .or(self.new_attributes.as_ref())
    }

    /// Whether the object's key changed (rename or move in the directory).
    pub fn renamed_from(&self) -> Option<&str> {
        match (&self.old_local_key, &self.new_local_key) {
            (Some(old), Some(new)) if old != new => Some(old.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: &str, dn: &str, object: Option<Value>) -> ChangeEnvelope {
        ChangeEnvelope {
            id: "e0b7c7b2-uuid".to_string(),
            udm_object_type: kind.to_string(),
            dn: dn.to_string(),
            object: object.and_then(|v| v.as_object().cloned()),
            options: vec![],
        }
    }

    #[test]
    fn test_entity_type_from_object_type() {
        for t in EntityType::all() {
            assert_eq!(t.object_type().parse::<EntityType>().unwrap(), *t);
        }
        assert!("computers/linux".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_envelope_deserialize() {
        let raw = r#"{
            "id": "1234",
            "udm_object_type": "users/user",
            "dn": "uid=jdoe,cn=users,dc=example,dc=org",
            "object": {"username": "jdoe", "isOxUser": "1"},
            "options": ["default"]
        }"#;
        let env: ChangeEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.udm_object_type, "users/user");
        assert!(env.object.is_some());
    }

    #[test]
    fn test_both_absent_is_ignored() {
        let event = ChangeEvent::from_envelopes(
            Some(envelope("users/user", "uid=a", None)),
            None,
        )
        .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_rename_detected() {
        let event = ChangeEvent::from_envelopes(
            Some(envelope("users/user", "uid=old,dc=x", Some(json!({"username": "old"})))),
            Some(envelope("users/user", "uid=new,dc=x", Some(json!({"username": "new"})))),
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.local_key, "uid=new,dc=x");
        assert_eq!(event.renamed_from(), Some("uid=old,dc=x"));
        assert_eq!(event.classify(true), Classification::Modified);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let result = ChangeEvent::from_envelopes(
            Some(envelope("users/user", "cn=x", Some(json!({})))),
            Some(envelope("groups/group", "cn=x", Some(json!({})))),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_classification() {
        let attrs = Attributes::new().with("username", "jdoe");
        let added = ChangeEvent::added(EntityType::User, "uid=jdoe", attrs.clone());
        assert_eq!(added.classify(false), Classification::Added);
        assert_eq!(added.classify(true), Classification::UnknownPriorState);
        assert_eq!(added.prior_attributes(), Some(&attrs));

        let deleted = ChangeEvent::deleted(EntityType::User, "uid=jdoe", attrs);
        assert_eq!(deleted.classify(true), Classification::Deleted);
    }

    #[test]
    fn test_attribute_helpers() {
        let attrs = Attributes::new()
            .with("isOxUser", "1")
            .with("disabled", json!(["0"]))
            .with("mailAlternativeAddress", json!(["a@x", "", "b@x"]))
            .with("oxContext", "10")
            .with("empty", "");

        assert!(attrs.get_bool("isOxUser"));
        assert!(!attrs.get_bool("disabled"));
        assert!(!attrs.get_bool("missing"));
        assert_eq!(attrs.get_strings("mailAlternativeAddress"), vec!["a@x", "b@x"]);
        assert_eq!(attrs.get_str("mailAlternativeAddress"), Some("a@x"));
        assert_eq!(attrs.get_i64("oxContext"), Some(10));
        assert!(attrs.is_empty_value("empty"));
        assert!(attrs.is_empty_value("missing"));
        assert!(!attrs.is_empty_value("oxContext"));
    }
}
