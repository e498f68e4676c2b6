//! Remote object kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of object held by the remote groupware service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// A tenant ("context").
    Context,
    /// A mailbox user.
    User,
    /// A group of users inside one tenant.
    Group,
    /// A bookable resource (room, device).
    Resource,
    /// A secondary-account registration of a shared mailbox.
    #[serde(rename = "functional_account")]
    SecondaryAccount,
}

impl ObjectKind {
    /// Get all object kinds.
    #[must_use]
    pub fn all() -> &'static [ObjectKind] {
        &[
            ObjectKind::Context,
            ObjectKind::User,
            ObjectKind::Group,
            ObjectKind::Resource,
            ObjectKind::SecondaryAccount,
        ]
    }

    /// Get the string representation used in mapping files.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Context => "context",
            ObjectKind::User => "user",
            ObjectKind::Group => "group",
            ObjectKind::Resource => "resource",
            ObjectKind::SecondaryAccount => "functional_account",
        }
    }

    /// Whether objects of this kind live inside a tenant and are addressed
    /// through [`crate::traits::ObjectOp`].
    #[must_use]
    pub fn is_tenant_scoped_object(&self) -> bool {
        matches!(
            self,
            ObjectKind::User | ObjectKind::Group | ObjectKind::Resource
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = ParseObjectKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "context" => Ok(ObjectKind::Context),
            "user" => Ok(ObjectKind::User),
            "group" => Ok(ObjectKind::Group),
            "resource" => Ok(ObjectKind::Resource),
            "functional_account" => Ok(ObjectKind::SecondaryAccount),
            _ => Err(ParseObjectKindError(s.to_string())),
        }
    }
}

/// Error parsing an object kind from string.
#[derive(Debug, Clone)]
pub struct ParseObjectKindError(String);

impl fmt::Display for ParseObjectKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid object kind '{}', expected one of: context, user, group, resource, functional_account",
            self.0
        )
    }
}

impl std::error::Error for ParseObjectKindError {}
