//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::env::VarError;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use oxsync_provisioning::{
    Attributes, CachedIdentity, ChangeEvent, Dispatcher, EngineConfig, EntityType,
    MemoryDirectory, Outcome,
};
use oxsync_remote::memory::MemoryRemote;
use oxsync_remote::traits::RemoteService;

/// A dispatcher wired to an in-memory remote and directory, with its stores
/// in a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub remote: Arc<MemoryRemote>,
    pub directory: Arc<MemoryDirectory>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(tenants: &[i64]) -> Self {
        Self::build(tenants, HashMap::new(), None)
    }

    /// Harness with extra configuration variables.
    pub fn with_vars(tenants: &[i64], vars: &[(&str, &str)]) -> Self {
        Self::build(
            tenants,
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            None,
        )
    }

    /// Harness whose mapping file holds `mapping`.
    pub fn with_mapping(tenants: &[i64], mapping: serde_json::Value) -> Self {
        Self::build(tenants, HashMap::new(), Some(mapping))
    }

    fn build(
        tenants: &[i64],
        mut vars: HashMap<String, String>,
        mapping: Option<serde_json::Value>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        vars.insert(
            "OX_DATA_DIR".to_string(),
            dir.path().to_string_lossy().into_owned(),
        );
        if let Some(mapping) = mapping {
            std::fs::write(
                dir.path().join("AttributeMapping.json"),
                serde_json::to_string_pretty(&mapping).unwrap(),
            )
            .unwrap();
        }
        let config = EngineConfig::from_reader(move |key| {
            vars.get(key).cloned().ok_or(VarError::NotPresent)
        })
        .unwrap();

        let remote = Arc::new(MemoryRemote::with_tenants(tenants.iter().copied()));
        let directory = Arc::new(MemoryDirectory::new());
        let remote_dyn: Arc<dyn RemoteService> = remote.clone();
        let dispatcher = Dispatcher::new(config, remote_dyn, directory.clone()).unwrap();

        Self {
            dir,
            remote,
            directory,
            dispatcher,
        }
    }

    pub async fn handle(&mut self, event: ChangeEvent) -> Outcome {
        self.dispatcher.handle(&event).await.unwrap()
    }

    pub fn identity(&self, key: &str) -> Option<CachedIdentity> {
        self.dispatcher.cache().get(key).unwrap()
    }

    /// Create a user through the engine and return its cached identity.
    pub async fn add_user(&mut self, login: &str, tenant: i64) -> CachedIdentity {
        let key = user_key(login);
        let attrs = user(login, tenant);
        self.directory.insert(&key, attrs.clone()).await;
        let outcome = self
            .handle(ChangeEvent::added(EntityType::User, &key, attrs))
            .await;
        assert_eq!(outcome, Outcome::Created, "creating {login}");
        self.identity(&key).expect("user is cached after create")
    }

    pub async fn call_count(&self, prefix: &str) -> usize {
        self.remote
            .calls()
            .await
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

pub fn user_key(login: &str) -> String {
    format!("uid={login},cn=users,dc=example,dc=org")
}

pub fn group_key(name: &str) -> String {
    format!("cn={name},cn=groups,dc=example,dc=org")
}

/// A groupware-enabled user in `tenant`.
pub fn user(login: &str, tenant: i64) -> Attributes {
    Attributes::new()
        .with("username", login)
        .with("isOxUser", "1")
        .with("oxContext", tenant.to_string())
        .with("firstname", "Jane")
        .with("lastname", "Doe")
        .with("mailPrimaryAddress", format!("{login}@example.org"))
        .with("entryUUID", format!("uuid-{login}"))
}

/// A groupware-enabled group with the given member logins.
pub fn group(name: &str, members: &[&str]) -> Attributes {
    let keys: Vec<String> = members.iter().map(|m| user_key(m)).collect();
    Attributes::new()
        .with("name", name)
        .with("isOxGroup", "1")
        .with("users", json!(keys))
}
