//! Read access to the local directory.
//!
//! Reconcilers receive snapshots of the changed object only. Cross
//! references (the groups a new user claims, the users of a functional
//! account) are looked up through [`LocalDirectory`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::event::Attributes;

/// Attribute enabling a group for the groupware.
pub const GROUP_ENABLED_ATTRIBUTE: &str = "isOxGroup";
/// Attribute enabling a user for the groupware.
pub const USER_ENABLED_ATTRIBUTE: &str = "isOxUser";

/// Lookup of local objects by key.
#[async_trait]
pub trait LocalDirectory: Send + Sync {
    /// Current attributes of the object at `key`, if it exists.
    async fn lookup(&self, key: &str) -> Option<Attributes>;
}

/// In-memory directory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<BTreeMap<String, Attributes>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub async fn insert(&self, key: impl Into<String>, attributes: Attributes) {
        self.entries.write().await.insert(key.into(), attributes);
    }

    /// Remove an entry.
    pub async fn remove(&self, key: &str) -> Option<Attributes> {
        self.entries.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl LocalDirectory for MemoryDirectory {
    async fn lookup(&self, key: &str) -> Option<Attributes> {
        self.entries.read().await.get(key).cloned()
    }
}
