//! Bookable resource reconciliation.

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use oxsync_remote::ids::{RemoteId, TenantId};
use oxsync_remote::operation::RemoteObject;
use oxsync_remote::types::ObjectKind;

use super::{delta, ignore_not_found, Outcome, ReconcileContext, Reconciler};
use crate::error::{ReconcileError, ReconcileResult};
use crate::event::{ChangeEvent, EntityType};
use crate::identity::CachedIdentity;

/// Resource name attribute.
pub const RESOURCE_NAME_ATTRIBUTE: &str = "name";
/// Key of the user administering the resource.
pub const RESOURCE_ADMIN_ATTRIBUTE: &str = "resourceAdmin";
/// Remote property holding the administrator's id.
pub const PROP_RESOURCE_ADMIN: &str = "resource_admin";

/// Resources map 1:1. A change of tenant recreates the resource since
/// resources have no cross-tenant identity.
#[derive(Debug, Default)]
pub struct ResourceReconciler;

impl ResourceReconciler {
    /// Find the resource in `tenant`, by cached id when the cache places it
    /// there, otherwise by name.
    async fn find(
        ctx: &mut ReconcileContext<'_>,
        key: &str,
        tenant: TenantId,
        name: Option<&str>,
    ) -> ReconcileResult<Option<(RemoteId, RemoteObject)>> {
        if let Some(cached) = ctx.cache.get(key)? {
            if cached.tenant == tenant {
                if let Some(object) = ctx
                    .remote
                    .get(tenant, ObjectKind::Resource, cached.remote_id)
                    .await?
                {
                    return Ok(Some((cached.remote_id, object)));
                }
            }
        }
        let Some(name) = name else {
            return Ok(None);
        };
        Ok(ctx
            .remote
            .find_by_name(tenant, ObjectKind::Resource, name)
            .await?
            .and_then(|object| object.id.map(|id| (id, object))))
    }
}

#[async_trait]
impl Reconciler for ResourceReconciler {
    fn entity_type(&self) -> EntityType {
        EntityType::Resource
    }

    #[instrument(skip(self, ctx, event), fields(local_key = %event.local_key))]
    async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
    ) -> ReconcileResult<Outcome> {
        if let Some(old_key) = event.renamed_from() {
            ctx.cache.rename(old_key, &event.local_key)?;
        }
        let key = event.local_key.as_str();
        let old = event.old_attributes.as_ref();
        let old_name = old.and_then(|a| a.get_str(RESOURCE_NAME_ATTRIBUTE));
        let old_tenant = match old.map(|a| ctx.tenants.tenant_of(a)).transpose() {
            Ok(Some(tenant)) => Some(tenant),
            _ => ctx.cache.tenant_of(key)?,
        };

        let Some(new) = &event.new_attributes else {
            let tenant = old_tenant.ok_or_else(|| ReconcileError::skip("resource has no tenant"))?;
            let default_tenant = ctx.config.default_tenant;
            let Some((id, _)) = Self::find(ctx, key, tenant, old_name).await? else {
                ctx.cache.reset(key, default_tenant)?;
                return Ok(Outcome::Ignored);
            };
            ignore_not_found(ctx.remote.delete(tenant, ObjectKind::Resource, id).await)?;
            ctx.cache.reset(key, default_tenant)?;
            info!(tenant = %tenant, remote_id = %id, "deleted resource");
            return Ok(Outcome::Deleted);
        };

        let tenant = ctx.tenants.tenant_of(new)?;
        let name = new
            .get_str(RESOURCE_NAME_ATTRIBUTE)
            .ok_or_else(|| ReconcileError::skip("resource has no name"))?;
        let admin_key = new
            .get_str(RESOURCE_ADMIN_ATTRIBUTE)
            .ok_or_else(|| ReconcileError::skip("resource has no administrator"))?;
        let admin = ctx.cache.get(admin_key)?.ok_or_else(|| {
            ReconcileError::skip(format!("administrator {admin_key} not provisioned"))
        })?;
        if admin.tenant != tenant {
            return Err(ReconcileError::skip(format!(
                "administrator {admin_key} belongs to tenant {}",
                admin.tenant
            )));
        }

        let mut desired = ctx.map(ObjectKind::Resource, new)?;
        desired.set(PROP_RESOURCE_ADMIN, admin.remote_id);

        let moved_from = old_tenant.filter(|t| *t != tenant);
        let mut removed_old = false;
        if let Some(source) = moved_from {
            if let Some((id, _)) = Self::find(ctx, key, source, old_name.or(Some(name))).await? {
                info!(from = %source, to = %tenant, remote_id = %id, "removing resource from previous tenant");
                ignore_not_found(ctx.remote.delete(source, ObjectKind::Resource, id).await)?;
                removed_old = true;
            }
        }

        let current = Self::find(ctx, key, tenant, old_name.or(Some(name))).await?;
        let current = match current {
            Some(found) => Some(found),
            None if old_name.is_some_and(|n| n != name) => {
                Self::find(ctx, key, tenant, Some(name)).await?
            }
            None => None,
        };

        let (id, outcome) = match current {
            Some((id, object)) => {
                if removed_old {
                    warn!(tenant = %tenant, remote_id = %id, "resource present in both tenants, keeping the new one");
                }
                let changes = delta(&object.attributes, &desired);
                let outcome = if changes.is_empty() {
                    debug!(tenant = %tenant, remote_id = %id, "resource up to date");
                    Outcome::Ignored
                } else {
                    info!(tenant = %tenant, remote_id = %id, changes = changes.len(), "modifying resource");
                    ctx.remote
                        .modify(tenant, ObjectKind::Resource, id, changes)
                        .await?;
                    Outcome::Modified
                };
                (id, outcome)
            }
            None => {
                info!(tenant = %tenant, resource = %name, "creating resource");
                let id = ctx
                    .remote
                    .create(tenant, ObjectKind::Resource, desired)
                    .await?;
                (id, Outcome::Created)
            }
        };

        ctx.cache
            .set(key, Some(CachedIdentity::new(id, tenant, name)))?;
        Ok(if moved_from.is_some() {
            Outcome::Moved
        } else {
            outcome
        })
    }
}
