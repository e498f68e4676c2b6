//! User Reconciliation Tests
//!
//! Covers:
//! - create with mapped and computed properties
//! - idempotent re-delivery
//! - tenant move preserving the remote identity, and the duplicate-login path
//! - rights from access profiles
//! - group cascade on create and group cleanup on delete
//! - skip conditions

mod common;

use serde_json::json;

use common::{group, group_key, user, user_key, Harness};
use oxsync_provisioning::{AccessProfile, ChangeEvent, EntityType, Outcome};
use oxsync_remote::ids::TenantId;
use oxsync_remote::operation::AttributeSet;
use oxsync_remote::traits::{ObjectOp, UserOp};
use oxsync_remote::types::ObjectKind;

const T10: TenantId = TenantId::new(10);
const T20: TenantId = TenantId::new(20);

// =============================================================================
// Create / modify
// =============================================================================

#[tokio::test]
async fn test_create_user_pushes_mapped_and_computed_fields() {
    let mut h = Harness::new(&[10]);
    let attrs = user("jdoe", 10).with(
        "mailAlternativeAddress",
        json!(["john@example.org", "jdoe@example.org"]),
    );

    let outcome = h
        .handle(ChangeEvent::added(EntityType::User, user_key("jdoe"), attrs))
        .await;
    assert_eq!(outcome, Outcome::Created);

    let users = h.remote.objects(T10, ObjectKind::User).await;
    assert_eq!(users.len(), 1);
    let remote = &users[0].attributes;
    assert_eq!(remote.get_string("name"), Some("jdoe"));
    assert_eq!(remote.get_string("sur_name"), Some("Doe"));
    assert_eq!(remote.get_string("primary_email"), Some("jdoe@example.org"));
    assert_eq!(
        remote.get_string("default_sender_address"),
        Some("jdoe@example.org")
    );
    assert_eq!(
        remote.get_strings("aliases"),
        Some(vec!["jdoe@example.org", "john@example.org"])
    );
    assert_eq!(remote.get_string("imap_server"), Some("localhost"));
    assert_eq!(remote.get_integer("imap_port"), Some(143));

    let cached = h.identity(&user_key("jdoe")).unwrap();
    assert_eq!(cached.tenant, T10);
    assert_eq!(cached.login, "jdoe");
    assert_eq!(Some(cached.remote_id), users[0].id);
}

#[tokio::test]
async fn test_invalid_transforms_do_not_abort_create() {
    let mut h = Harness::new(&[10]);
    // Base64 of the PNG signature.
    let attrs = user("jdoe", 10)
        .with("birthday", "1850-01-01")
        .with("jpegPhoto", "iVBORw0KGgo=");

    let outcome = h
        .handle(ChangeEvent::added(EntityType::User, user_key("jdoe"), attrs))
        .await;
    assert_eq!(outcome, Outcome::Created);

    let users = h.remote.objects(T10, ObjectKind::User).await;
    assert_eq!(users.len(), 1);
    let remote = &users[0].attributes;
    assert_eq!(remote.get_string("name"), Some("jdoe"));
    assert!(!remote.has("birthday"));
    assert!(remote.get("image1").is_some_and(|v| v.is_null()));
    assert!(remote.get("image1_content_type").is_some_and(|v| v.is_null()));
}

#[tokio::test]
async fn test_replayed_modify_is_idempotent() {
    let mut h = Harness::new(&[10]);
    h.add_user("jdoe", 10).await;

    let old = user("jdoe", 10);
    let new = user("jdoe", 10)
        .with("title", "Dr.")
        .with("mailAlternativeAddress", json!(["jd@example.org"]));
    let event = ChangeEvent::modified(EntityType::User, user_key("jdoe"), old, new);

    assert_eq!(h.handle(event.clone()).await, Outcome::Modified);
    let after_first = h.remote.objects(T10, ObjectKind::User).await;
    let modifies = h.call_count("modify ").await;

    assert_eq!(h.handle(event).await, Outcome::Ignored);
    let after_second = h.remote.objects(T10, ObjectKind::User).await;

    assert_eq!(after_first, after_second);
    assert_eq!(h.call_count("modify ").await, modifies);
    assert_eq!(
        after_second[0].attributes.get_strings("aliases"),
        Some(vec!["jdoe@example.org", "jd@example.org"])
    );
}

#[tokio::test]
async fn test_resync_without_prior_state_modifies_existing_user() {
    let mut h = Harness::new(&[10]);
    let identity = h.add_user("jdoe", 10).await;

    let attrs = user("jdoe", 10).with("oxDisplayName", "Jane D.");
    let outcome = h
        .handle(ChangeEvent::added(EntityType::User, user_key("jdoe"), attrs))
        .await;

    assert_eq!(outcome, Outcome::Modified);
    let users = h.remote.objects(T10, ObjectKind::User).await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, Some(identity.remote_id));
    assert_eq!(users[0].attributes.get_string("display_name"), Some("Jane D."));
}

#[tokio::test]
async fn test_cached_user_missing_remotely_is_recreated() {
    let mut h = Harness::new(&[10]);
    let identity = h.add_user("jdoe", 10).await;
    h.remote
        .delete(T10, ObjectKind::User, identity.remote_id)
        .await
        .unwrap();

    let event = ChangeEvent::modified(
        EntityType::User,
        user_key("jdoe"),
        user("jdoe", 10),
        user("jdoe", 10),
    );
    assert_eq!(h.handle(event).await, Outcome::Created);

    let recreated = h.identity(&user_key("jdoe")).unwrap();
    assert_ne!(recreated.remote_id, identity.remote_id);
    assert_eq!(h.remote.objects(T10, ObjectKind::User).await.len(), 1);
}

#[tokio::test]
async fn test_rename_moves_cache_entry() {
    let mut h = Harness::new(&[10]);
    let identity = h.add_user("jdoe", 10).await;
    let new_key = "uid=jdoe,ou=staff,dc=example,dc=org";

    let event = ChangeEvent::modified(
        EntityType::User,
        new_key,
        user("jdoe", 10),
        user("jdoe", 10),
    )
    .with_old_key(user_key("jdoe"));
    h.handle(event).await;

    assert!(h.identity(&user_key("jdoe")).is_none());
    assert_eq!(h.identity(new_key).unwrap().remote_id, identity.remote_id);
}

// =============================================================================
// Tenant move
// =============================================================================

#[tokio::test]
async fn test_tenant_move_preserves_identity() {
    let mut h = Harness::new(&[10, 20]);
    let before = h.add_user("jdoe", 10).await;

    let event = ChangeEvent::modified(
        EntityType::User,
        user_key("jdoe"),
        user("jdoe", 10),
        user("jdoe", 20),
    );
    assert_eq!(h.handle(event).await, Outcome::Moved);

    let after = h.identity(&user_key("jdoe")).unwrap();
    assert_eq!(after.remote_id, before.remote_id);
    assert_eq!(after.tenant, T20);
    assert!(h.remote.objects(T10, ObjectKind::User).await.is_empty());

    let moved = h.remote.objects(T20, ObjectKind::User).await;
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].id, Some(before.remote_id));
    assert_eq!(h.call_count("copy_user").await, 1);
}

#[tokio::test]
async fn test_tenant_move_replaces_duplicate_login() {
    let mut h = Harness::new(&[10, 20]);
    let before = h.add_user("jdoe", 10).await;
    let duplicate = h
        .remote
        .create(
            T20,
            ObjectKind::User,
            AttributeSet::new().with("name", "jdoe"),
        )
        .await
        .unwrap();

    let event = ChangeEvent::modified(
        EntityType::User,
        user_key("jdoe"),
        user("jdoe", 10),
        user("jdoe", 20),
    );
    assert_eq!(h.handle(event).await, Outcome::Moved);

    let in_target = h.remote.objects(T20, ObjectKind::User).await;
    assert_eq!(in_target.len(), 1);
    let fresh = in_target[0].id.unwrap();
    assert_ne!(fresh, duplicate);
    assert_ne!(fresh, before.remote_id);
    assert_eq!(in_target[0].attributes.get_string("sur_name"), Some("Doe"));
    assert!(h.remote.objects(T10, ObjectKind::User).await.is_empty());
    assert_eq!(h.call_count("copy_user").await, 0);

    let cached = h.identity(&user_key("jdoe")).unwrap();
    assert_eq!((cached.remote_id, cached.tenant), (fresh, T20));
}

// =============================================================================
// Rights
// =============================================================================

#[tokio::test]
async fn test_rights_pushed_from_access_profile() {
    let mut h = Harness::new(&[10]);
    h.dispatcher
        .profiles_mut()
        .set(AccessProfile::new("premium", ["webmail", "calendar"]))
        .unwrap();

    let attrs = user("jdoe", 10).with("oxAccess", "premium");
    h.handle(ChangeEvent::added(EntityType::User, user_key("jdoe"), attrs.clone()))
        .await;

    let id = h.identity(&user_key("jdoe")).unwrap().remote_id;
    let rights = h.remote.get_module_access(T10, id).await.unwrap().unwrap();
    assert_eq!(
        rights.into_iter().collect::<Vec<_>>(),
        vec!["calendar", "webmail"]
    );
    assert_eq!(h.call_count("change_module_access").await, 1);

    let replay = ChangeEvent::modified(EntityType::User, user_key("jdoe"), attrs.clone(), attrs);
    h.handle(replay).await;
    assert_eq!(h.call_count("change_module_access").await, 1);
}

#[tokio::test]
async fn test_unknown_profile_leaves_rights_untouched() {
    let mut h = Harness::new(&[10]);
    let attrs = user("jdoe", 10).with("oxAccess", "missing");
    let outcome = h
        .handle(ChangeEvent::added(EntityType::User, user_key("jdoe"), attrs))
        .await;
    assert_eq!(outcome, Outcome::Created);
    assert_eq!(h.call_count("change_module_access").await, 0);
}

// =============================================================================
// Groups
// =============================================================================

#[tokio::test]
async fn test_create_joins_enabled_groups() {
    let mut h = Harness::new(&[10]);
    h.directory
        .insert(group_key("staff"), group("staff", &[]))
        .await;
    h.directory
        .insert(
            group_key("plain"),
            group("plain", &[]).with("isOxGroup", "0"),
        )
        .await;

    let first = user("alice", 10).with("groups", json!([group_key("staff"), group_key("plain")]));
    h.handle(ChangeEvent::added(EntityType::User, user_key("alice"), first))
        .await;
    let alice = h.identity(&user_key("alice")).unwrap().remote_id;

    let groups = h.remote.objects(T10, ObjectKind::Group).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name(), Some("staff"));
    assert_eq!(groups[0].members(), vec![alice]);

    let second = user("bob", 10).with("groups", json!([group_key("staff")]));
    h.handle(ChangeEvent::added(EntityType::User, user_key("bob"), second))
        .await;
    let bob = h.identity(&user_key("bob")).unwrap().remote_id;

    let groups = h.remote.objects(T10, ObjectKind::Group).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members(), vec![alice, bob]);
}

#[tokio::test]
async fn test_delete_strips_user_from_groups() {
    let mut h = Harness::new(&[10]);
    h.add_user("alice", 10).await;
    let bob = h.add_user("bob", 10).await;
    h.handle(ChangeEvent::added(
        EntityType::Group,
        group_key("staff"),
        group("staff", &["alice", "bob"]),
    ))
    .await;

    let outcome = h
        .handle(ChangeEvent::deleted(
            EntityType::User,
            user_key("alice"),
            user("alice", 10),
        ))
        .await;
    assert_eq!(outcome, Outcome::Deleted);

    let groups = h.remote.objects(T10, ObjectKind::Group).await;
    assert_eq!(groups[0].members(), vec![bob.remote_id]);

    h.handle(ChangeEvent::deleted(
        EntityType::User,
        user_key("bob"),
        user("bob", 10),
    ))
    .await;
    assert!(h.remote.objects(T10, ObjectKind::Group).await.is_empty());
    assert!(h.remote.objects(T10, ObjectKind::User).await.is_empty());
}

#[tokio::test]
async fn test_delete_resets_cache_to_default_tenant() {
    let mut h = Harness::new(&[10, 20]);
    h.add_user("jdoe", 20).await;

    h.handle(ChangeEvent::deleted(
        EntityType::User,
        user_key("jdoe"),
        user("jdoe", 20),
    ))
    .await;

    assert!(h.identity(&user_key("jdoe")).is_none());
    assert_eq!(
        h.dispatcher.cache().tenant_of(&user_key("jdoe")).unwrap(),
        Some(T10)
    );
}

// =============================================================================
// Enablement and skips
// =============================================================================

#[tokio::test]
async fn test_disabling_user_deletes_it() {
    let mut h = Harness::new(&[10]);
    h.add_user("jdoe", 10).await;

    let disabled = user("jdoe", 10).with("isOxUser", "0");
    let event = ChangeEvent::modified(EntityType::User, user_key("jdoe"), user("jdoe", 10), disabled);

    assert_eq!(h.handle(event).await, Outcome::Deleted);
    assert!(h.remote.objects(T10, ObjectKind::User).await.is_empty());
}

#[tokio::test]
async fn test_non_groupware_user_ignored() {
    let mut h = Harness::new(&[10]);
    let attrs = user("jdoe", 10).with("isOxUser", "0");
    let outcome = h
        .handle(ChangeEvent::added(EntityType::User, user_key("jdoe"), attrs))
        .await;
    assert_eq!(outcome, Outcome::Ignored);
    assert!(h.remote.calls().await.is_empty());
}

#[tokio::test]
async fn test_missing_tenant_is_skipped() {
    let mut h = Harness::new(&[10]);
    let attrs = user("jdoe", 10).with("oxContext", "");

    let outcome = h
        .handle(ChangeEvent::added(EntityType::User, user_key("jdoe"), attrs))
        .await;

    assert!(matches!(outcome, Outcome::Skipped(_)));
    assert!(h.remote.calls().await.is_empty());
    assert!(h.identity(&user_key("jdoe")).is_none());
}

#[tokio::test]
async fn test_missing_credentials_is_skipped() {
    let mut h = Harness::new(&[10]);
    h.remote.deny_credentials(T10).await;

    let outcome = h
        .handle(ChangeEvent::added(
            EntityType::User,
            user_key("jdoe"),
            user("jdoe", 10),
        ))
        .await;

    assert!(matches!(outcome, Outcome::Skipped(_)));
    assert!(h.identity(&user_key("jdoe")).is_none());
}
