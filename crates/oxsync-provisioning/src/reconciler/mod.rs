//! Per-entity reconciliation.
//!
//! Each entity type has one [`Reconciler`]. A reconciler receives one
//! [`ChangeEvent`] together with a [`ReconcileContext`] holding the stores
//! and collaborators it may use, and decides which remote calls to issue.

pub mod access_profile;
pub mod functional_account;
pub mod group;
pub mod resource;
pub mod tenant;
pub mod user;

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use oxsync_remote::error::RemoteResult;
use oxsync_remote::ids::RemoteId;
use oxsync_remote::operation::{AttributeSet, AttributeValue, RemoteObject};
use oxsync_remote::traits::RemoteService;
use oxsync_remote::types::ObjectKind;

use crate::config::EngineConfig;
use crate::directory::LocalDirectory;
use crate::error::ReconcileResult;
use crate::event::{Attributes, ChangeEvent, EntityType};
use crate::identity::IdentityCache;
use crate::mapping::AttributeMapper;
use crate::profiles::AccessProfileStore;
use crate::tenant::TenantResolver;

pub use access_profile::AccessProfileReconciler;
pub use functional_account::FunctionalAccountReconciler;
pub use group::GroupReconciler;
pub use resource::ResourceReconciler;
pub use tenant::TenantReconciler;
pub use user::UserReconciler;

/// What a reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Modified,
    Deleted,
    /// The object moved to another tenant.
    Moved,
    /// Nothing to do.
    Ignored,
    /// A cross-reference could not be resolved; nothing was changed.
    Skipped(String),
}

impl Outcome {
    /// Whether any remote or local state was changed.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            Outcome::Created | Outcome::Modified | Outcome::Deleted | Outcome::Moved
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::Modified => write!(f, "modified"),
            Outcome::Deleted => write!(f, "deleted"),
            Outcome::Moved => write!(f, "moved"),
            Outcome::Ignored => write!(f, "ignored"),
            Outcome::Skipped(reason) => write!(f, "skipped ({reason})"),
        }
    }
}

/// Stores and collaborators available to a reconciler for one event.
pub struct ReconcileContext<'a> {
    pub config: &'a EngineConfig,
    pub cache: &'a mut IdentityCache,
    pub mapper: &'a mut AttributeMapper,
    pub profiles: &'a mut AccessProfileStore,
    pub tenants: &'a TenantResolver,
    pub remote: &'a dyn RemoteService,
    pub directory: &'a dyn LocalDirectory,
}

impl ReconcileContext<'_> {
    /// Map `source` through the table of `kind`. Warnings are logged by the
    /// mapper and otherwise ignored.
    pub fn map(&mut self, kind: ObjectKind, source: &Attributes) -> ReconcileResult<AttributeSet> {
        let mut target = AttributeSet::new();
        let warnings = self.mapper.apply(kind, &mut target, source)?;
        if !warnings.is_empty() {
            debug!(kind = %kind, warnings = warnings.len(), "mapped with degraded properties");
        }
        Ok(target)
    }
}

/// Reconciler for one entity type.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The entity type handled.
    fn entity_type(&self) -> EntityType;

    /// Reconcile one change event.
    async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
    ) -> ReconcileResult<Outcome>;
}

/// Properties of `desired` that differ from `current`.
///
/// A null desired value for a property the remote object does not have is
/// not a change.
pub fn delta(current: &AttributeSet, desired: &AttributeSet) -> AttributeSet {
    desired
        .iter()
        .filter(|(name, value)| match current.get(name) {
            Some(existing) => existing != *value,
            None => !value.is_null(),
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Treat a remote "not found" as success.
pub fn ignore_not_found(result: RemoteResult<()>) -> RemoteResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// A change replacing the member list of a group.
pub(crate) fn members_change(members: &[RemoteId]) -> AttributeSet {
    let mut group = RemoteObject::new(ObjectKind::Group);
    group.set_members(members);
    group.attributes
}

/// Whether a property value is absent or empty.
pub(crate) fn is_unset(value: Option<&AttributeValue>) -> bool {
    value.map_or(true, AttributeValue::is_empty)
}
