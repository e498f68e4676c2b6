//! Dispatcher Tests
//!
//! Covers envelope intake, access profile storage, operator mapping files
//! and error propagation from the remote service.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use common::{user, user_key, Harness};
use oxsync_provisioning::{
    Attributes, ChangeEnvelope, ChangeEvent, Dispatcher, EngineConfig, EntityType,
    MappingError, MemoryDirectory, Outcome, ReconcileError,
};
use oxsync_remote::error::{RemoteError, RemoteResult};
use oxsync_remote::ids::{RemoteId, TenantId};
use oxsync_remote::operation::{AttributeSet, RemoteObject};
use oxsync_remote::traits::{ObjectOp, SecondaryAccount, SecondaryAccountOp, TenantOp, UserOp};
use oxsync_remote::types::ObjectKind;

// =============================================================================
// Failing remote
// =============================================================================

/// Remote service whose every call fails with a connection error.
#[derive(Default)]
struct FailingRemote {
    calls: AtomicUsize,
}

impl FailingRemote {
    fn fail<T>(&self) -> RemoteResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::connection_failed("connection refused"))
    }
}

#[async_trait]
impl TenantOp for FailingRemote {
    async fn get_tenant(&self, _tenant: TenantId) -> RemoteResult<Option<RemoteObject>> {
        self.fail()
    }

    async fn create_tenant(&self, _tenant: TenantId, _attributes: AttributeSet) -> RemoteResult<()> {
        self.fail()
    }

    async fn modify_tenant(&self, _tenant: TenantId, _changes: AttributeSet) -> RemoteResult<()> {
        self.fail()
    }

    async fn delete_tenant(&self, _tenant: TenantId) -> RemoteResult<()> {
        self.fail()
    }
}

#[async_trait]
impl ObjectOp for FailingRemote {
    async fn get(
        &self,
        _tenant: TenantId,
        _kind: ObjectKind,
        _id: RemoteId,
    ) -> RemoteResult<Option<RemoteObject>> {
        self.fail()
    }

    async fn find_by_name(
        &self,
        _tenant: TenantId,
        _kind: ObjectKind,
        _name: &str,
    ) -> RemoteResult<Option<RemoteObject>> {
        self.fail()
    }

    async fn list(&self, _tenant: TenantId, _kind: ObjectKind) -> RemoteResult<Vec<RemoteObject>> {
        self.fail()
    }

    async fn create(
        &self,
        _tenant: TenantId,
        _kind: ObjectKind,
        _attributes: AttributeSet,
    ) -> RemoteResult<RemoteId> {
        self.fail()
    }

    async fn modify(
        &self,
        _tenant: TenantId,
        _kind: ObjectKind,
        _id: RemoteId,
        _changes: AttributeSet,
    ) -> RemoteResult<()> {
        self.fail()
    }

    async fn delete(&self, _tenant: TenantId, _kind: ObjectKind, _id: RemoteId) -> RemoteResult<()> {
        self.fail()
    }
}

#[async_trait]
impl UserOp for FailingRemote {
    async fn copy_user(&self, _from: TenantId, _id: RemoteId, _to: TenantId) -> RemoteResult<RemoteId> {
        self.fail()
    }

    async fn change_module_access(
        &self,
        _tenant: TenantId,
        _id: RemoteId,
        _rights: &BTreeSet<String>,
    ) -> RemoteResult<()> {
        self.fail()
    }

    async fn get_module_access(
        &self,
        _tenant: TenantId,
        _id: RemoteId,
    ) -> RemoteResult<Option<BTreeSet<String>>> {
        self.fail()
    }
}

#[async_trait]
impl SecondaryAccountOp for FailingRemote {
    async fn list_secondary_accounts(
        &self,
        _tenant: TenantId,
        _primary_address: &str,
    ) -> RemoteResult<Vec<SecondaryAccount>> {
        self.fail()
    }

    async fn create_secondary_account(
        &self,
        _tenant: TenantId,
        _account: &SecondaryAccount,
    ) -> RemoteResult<()> {
        self.fail()
    }

    async fn delete_secondary_account(
        &self,
        _tenant: TenantId,
        _account: &SecondaryAccount,
    ) -> RemoteResult<()> {
        self.fail()
    }
}

#[tokio::test]
async fn test_remote_failure_is_returned_not_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(FailingRemote::default());
    let mut dispatcher = Dispatcher::new(
        EngineConfig::with_data_dir(dir.path()).unwrap(),
        remote.clone(),
        Arc::new(MemoryDirectory::new()),
    )
    .unwrap();

    let event = ChangeEvent::added(EntityType::User, user_key("jdoe"), user("jdoe", 10));
    let result = dispatcher.handle(&event).await;

    assert!(matches!(result, Err(ReconcileError::Remote(RemoteError::ConnectionFailed { .. }))));
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    assert!(dispatcher.cache().get(&user_key("jdoe")).unwrap().is_none());
}

// =============================================================================
// Envelopes
// =============================================================================

fn envelope(value: serde_json::Value) -> ChangeEnvelope {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_envelope_pair_is_reconciled() {
    let mut h = Harness::new(&[10]);
    let new = envelope(json!({
        "id": "a1b2",
        "udm_object_type": "users/user",
        "dn": user_key("jdoe"),
        "object": {
            "username": "jdoe",
            "isOxUser": true,
            "oxContext": 10,
            "lastname": "Doe",
            "mailPrimaryAddress": "jdoe@example.org"
        }
    }));

    let outcome = h.dispatcher.handle_envelopes(None, Some(new)).await.unwrap();
    assert_eq!(outcome, Outcome::Created);
    assert_eq!(
        h.identity(&user_key("jdoe")).unwrap().tenant,
        TenantId::new(10)
    );
}

#[tokio::test]
async fn test_envelope_without_objects_is_ignored() {
    let mut h = Harness::new(&[10]);
    let gone = envelope(json!({
        "id": "a1b2",
        "udm_object_type": "users/user",
        "dn": user_key("jdoe"),
        "object": null
    }));

    let outcome = h
        .dispatcher
        .handle_envelopes(Some(gone.clone()), Some(gone))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Ignored);
}

#[tokio::test]
async fn test_unknown_object_type_is_rejected() {
    let mut h = Harness::new(&[10]);
    let new = envelope(json!({
        "id": "p1",
        "udm_object_type": "shares/printer",
        "dn": "cn=printer,dc=example,dc=org",
        "object": { "name": "printer" }
    }));

    let result = h.dispatcher.handle_envelopes(None, Some(new)).await;
    assert!(matches!(result, Err(ReconcileError::InvalidEvent { .. })));
}

#[tokio::test]
async fn test_event_without_snapshots_is_ignored() {
    let mut h = Harness::new(&[10]);
    let event = ChangeEvent::new(EntityType::User, user_key("jdoe"), None, None);
    assert_eq!(h.handle(event).await, Outcome::Ignored);
}

// =============================================================================
// Access profiles
// =============================================================================

const PROFILE_KEY: &str = "cn=premium,cn=access,dc=example,dc=org";

fn profile(name: &str, rights: &[&str]) -> Attributes {
    rights
        .iter()
        .fold(Attributes::new().with("name", name), |attrs, right| {
            attrs.with(*right, "1")
        })
        .with("editpassword", "0")
}

#[tokio::test]
async fn test_access_profile_lifecycle() {
    let mut h = Harness::new(&[10]);

    let created = h
        .handle(ChangeEvent::added(
            EntityType::AccessProfile,
            PROFILE_KEY,
            profile("premium", &["webmail", "calendar"]),
        ))
        .await;
    assert_eq!(created, Outcome::Created);
    let stored = h.dispatcher.profiles_mut().get("premium").unwrap().unwrap();
    assert_eq!(
        stored.rights.into_iter().collect::<Vec<_>>(),
        vec!["calendar", "webmail"]
    );

    let renamed = h
        .handle(ChangeEvent::modified(
            EntityType::AccessProfile,
            PROFILE_KEY,
            profile("premium", &["webmail", "calendar"]),
            profile("gold", &["webmail", "calendar", "tasks"]),
        ))
        .await;
    assert_eq!(renamed, Outcome::Created);
    assert_eq!(h.dispatcher.profiles_mut().names().unwrap(), vec!["gold"]);

    let raw = std::fs::read_to_string(&h.dispatcher.config().profiles_file).unwrap();
    assert!(raw.contains("gold=calendar,tasks,webmail"));

    let deleted = h
        .handle(ChangeEvent::deleted(
            EntityType::AccessProfile,
            PROFILE_KEY,
            profile("gold", &[]),
        ))
        .await;
    assert_eq!(deleted, Outcome::Deleted);
    assert!(h.dispatcher.profiles_mut().names().unwrap().is_empty());
}

// =============================================================================
// Mapping file
// =============================================================================

#[tokio::test]
async fn test_mapping_file_replaces_builtin_table() {
    let mut h = Harness::with_mapping(
        &[10],
        json!({
            "user": {
                "name": { "local_attribute": "username", "nilable": false },
                "sur_name": { "local_attribute": "lastname" },
                "display_name": {
                    "local_attribute": "oxDisplayName",
                    "alternate_local_attributes": ["displayName", "username"]
                },
                "title": { "local_attribute": null },
                "email1": { "local_attribute": "mailPrimaryAddress" }
            }
        }),
    );

    let attrs = user("jdoe", 10).with("title", "Dr.");
    h.handle(ChangeEvent::added(EntityType::User, user_key("jdoe"), attrs.clone()))
        .await;

    let users = h.remote.objects(TenantId::new(10), ObjectKind::User).await;
    let remote = &users[0].attributes;
    assert_eq!(remote.get_string("display_name"), Some("jdoe"));
    assert!(!remote.has("title"));
    assert!(!remote.has("given_name"));

    let retitled = ChangeEvent::modified(
        EntityType::User,
        user_key("jdoe"),
        attrs.clone(),
        attrs.with("title", "Prof."),
    );
    assert_eq!(h.handle(retitled).await, Outcome::Ignored);
}

#[tokio::test]
async fn test_malformed_mapping_file_fails_startup() {
    for content in ["{ not json", r#"{ "printer": {} }"#] {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AttributeMapping.json"), content).unwrap();

        let result = Dispatcher::new(
            EngineConfig::with_data_dir(dir.path()).unwrap(),
            Arc::new(FailingRemote::default()),
            Arc::new(MemoryDirectory::new()),
        );
        assert!(matches!(
            result,
            Err(ReconcileError::Mapping(
                MappingError::InvalidFile { .. } | MappingError::UnknownSection { .. }
            ))
        ));
    }
}
