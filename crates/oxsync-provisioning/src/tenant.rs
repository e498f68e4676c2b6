//! Tenant resolution from local attributes.

use oxsync_remote::ids::TenantId;

use crate::error::{ReconcileError, ReconcileResult};
use crate::event::Attributes;

/// Attribute naming the tenant of users, groups and resources.
pub const TENANT_ATTRIBUTE: &str = "oxContext";
/// Attribute holding the id of a tenant object itself.
pub const TENANT_ID_ATTRIBUTE: &str = "contextid";

/// Extracts the owning tenant from an object's attributes.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    member_attribute: String,
    tenant_attribute: String,
}

impl Default for TenantResolver {
    fn default() -> Self {
        Self {
            member_attribute: TENANT_ATTRIBUTE.to_string(),
            tenant_attribute: TENANT_ID_ATTRIBUTE.to_string(),
        }
    }
}

impl TenantResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenant owning a user, group member or resource.
    ///
    /// Absent or non-numeric values are a skip condition.
    pub fn tenant_of(&self, attributes: &Attributes) -> ReconcileResult<TenantId> {
        Self::read(attributes, &self.member_attribute)
    }

    /// Id of a tenant object.
    pub fn tenant_id(&self, attributes: &Attributes) -> ReconcileResult<TenantId> {
        Self::read(attributes, &self.tenant_attribute)
    }

    fn read(attributes: &Attributes, name: &str) -> ReconcileResult<TenantId> {
        attributes
            .get_i64(name)
            .filter(|id| *id > 0)
            .map(TenantId::new)
            .ok_or_else(|| {
                ReconcileError::skip(format!("tenant attribute {name} missing or invalid"))
            })
    }
}
