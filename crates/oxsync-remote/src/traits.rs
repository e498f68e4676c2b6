//! Remote service capability traits
//!
//! Capability-based seams to the remote groupware service. A wire client
//! implements each capability; the reconciliation engine only ever talks to
//! [`RemoteService`].
//!
//! "Not found" faults are translated at this boundary: lookups return
//! `Ok(None)` instead of an error.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteResult;
use crate::ids::{RemoteId, TenantId};
use crate::operation::{AttributeSet, RemoteObject};
use crate::types::ObjectKind;

/// Capability for managing tenants.
#[async_trait]
pub trait TenantOp: Send + Sync {
    /// Get a tenant by id.
    async fn get_tenant(&self, tenant: TenantId) -> RemoteResult<Option<RemoteObject>>;

    /// Create a tenant with the given id.
    async fn create_tenant(&self, tenant: TenantId, attributes: AttributeSet)
        -> RemoteResult<()>;

    /// Change properties of an existing tenant.
    async fn modify_tenant(&self, tenant: TenantId, changes: AttributeSet) -> RemoteResult<()>;

    /// Delete a tenant and everything in it.
    async fn delete_tenant(&self, tenant: TenantId) -> RemoteResult<()>;

    /// Check whether a tenant exists.
    async fn tenant_exists(&self, tenant: TenantId) -> RemoteResult<bool> {
        Ok(self.get_tenant(tenant).await?.is_some())
    }
}

/// Capability for tenant-scoped objects (users, groups, resources).
#[async_trait]
pub trait ObjectOp: Send + Sync {
    /// Get an object by its remote id.
    async fn get(
        &self,
        tenant: TenantId,
        kind: ObjectKind,
        id: RemoteId,
    ) -> RemoteResult<Option<RemoteObject>>;

    /// Look an object up by its name (the login for users).
    async fn find_by_name(
        &self,
        tenant: TenantId,
        kind: ObjectKind,
        name: &str,
    ) -> RemoteResult<Option<RemoteObject>>;

    /// List all objects of a kind in a tenant.
    async fn list(&self, tenant: TenantId, kind: ObjectKind) -> RemoteResult<Vec<RemoteObject>>;

    /// Create an object, returning its remote id.
    async fn create(
        &self,
        tenant: TenantId,
        kind: ObjectKind,
        attributes: AttributeSet,
    ) -> RemoteResult<RemoteId>;

    /// Change properties of an object. Properties absent from `changes` are
    /// left untouched.
    async fn modify(
        &self,
        tenant: TenantId,
        kind: ObjectKind,
        id: RemoteId,
        changes: AttributeSet,
    ) -> RemoteResult<()>;

    /// Delete an object.
    async fn delete(&self, tenant: TenantId, kind: ObjectKind, id: RemoteId) -> RemoteResult<()>;

    /// Check whether an object exists.
    async fn exists(&self, tenant: TenantId, kind: ObjectKind, id: RemoteId) -> RemoteResult<bool> {
        Ok(self.get(tenant, kind, id).await?.is_some())
    }
}

/// User-specific capabilities the generic object calls do not cover.
#[async_trait]
pub trait UserOp: ObjectOp {
    /// Copy a user into another tenant, keeping its remote identity mapping.
    ///
    /// Returns the id of the user inside the destination tenant.
    async fn copy_user(
        &self,
        from: TenantId,
        id: RemoteId,
        to: TenantId,
    ) -> RemoteResult<RemoteId>;

    /// Replace the capability flags ("module access") of a user.
    async fn change_module_access(
        &self,
        tenant: TenantId,
        id: RemoteId,
        rights: &BTreeSet<String>,
    ) -> RemoteResult<()>;

    /// Get the capability flags of a user.
    async fn get_module_access(
        &self,
        tenant: TenantId,
        id: RemoteId,
    ) -> RemoteResult<Option<BTreeSet<String>>>;

    /// List the groups of a tenant that contain the user.
    async fn groups_of_user(&self, tenant: TenantId, id: RemoteId) -> RemoteResult<Vec<RemoteObject>> {
        let groups = self.list(tenant, ObjectKind::Group).await?;
        Ok(groups
            .into_iter()
            .filter(|g| g.members().contains(&id))
            .collect())
    }
}

/// One user's registration of a shared mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryAccount {
    /// Address of the shared mailbox.
    pub primary_address: String,
    /// Login used to access the mailbox.
    pub login: String,
    /// The user the registration belongs to.
    pub user_id: RemoteId,
    /// Display name of the mailbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Capability for secondary-account registrations.
#[async_trait]
pub trait SecondaryAccountOp: Send + Sync {
    /// List the registrations of one shared mailbox.
    async fn list_secondary_accounts(
        &self,
        tenant: TenantId,
        primary_address: &str,
    ) -> RemoteResult<Vec<SecondaryAccount>>;

    /// Register a shared mailbox for one user.
    async fn create_secondary_account(
        &self,
        tenant: TenantId,
        account: &SecondaryAccount,
    ) -> RemoteResult<()>;

    /// Remove one registration.
    async fn delete_secondary_account(
        &self,
        tenant: TenantId,
        account: &SecondaryAccount,
    ) -> RemoteResult<()>;
}

/// Marker trait for clients that support every capability.
pub trait RemoteService: TenantOp + ObjectOp + UserOp + SecondaryAccountOp {}

impl<T> RemoteService for T where T: TenantOp + ObjectOp + UserOp + SecondaryAccountOp {}
