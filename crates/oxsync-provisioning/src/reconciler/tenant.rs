//! Tenant ("context") reconciliation.

use async_trait::async_trait;
use tracing::{info, instrument};

use oxsync_remote::operation::AttributeSet;
use oxsync_remote::types::ObjectKind;

use super::{delta, is_unset, Outcome, ReconcileContext, Reconciler};
use crate::error::ReconcileResult;
use crate::event::{Attributes, ChangeEvent, EntityType};

/// Remote property holding the tenant quota in MiB.
pub const PROP_QUOTA: &str = "max_quota";

/// Tenants map 1:1 onto remote tenants keyed by their numeric id.
#[derive(Debug, Default)]
pub struct TenantReconciler;

impl TenantReconciler {
    fn desired(
        ctx: &mut ReconcileContext<'_>,
        attributes: &Attributes,
    ) -> ReconcileResult<AttributeSet> {
        let mut desired = ctx.map(ObjectKind::Context, attributes)?;
        if is_unset(desired.get(PROP_QUOTA)) {
            desired.set(PROP_QUOTA, ctx.config.default_quota);
        }
        Ok(desired)
    }
}

#[async_trait]
impl Reconciler for TenantReconciler {
    fn entity_type(&self) -> EntityType {
        EntityType::Tenant
    }

    #[instrument(skip(self, ctx, event), fields(local_key = %event.local_key))]
    async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
    ) -> ReconcileResult<Outcome> {
        let Some(new) = &event.new_attributes else {
            let Some(old) = &event.old_attributes else {
                return Ok(Outcome::Ignored);
            };
            let tenant = ctx.tenants.tenant_id(old)?;
            if !ctx.remote.tenant_exists(tenant).await? {
                info!(tenant = %tenant, "tenant already absent");
                return Ok(Outcome::Ignored);
            }
            ctx.remote.delete_tenant(tenant).await?;
            info!(tenant = %tenant, "deleted tenant");
            return Ok(Outcome::Deleted);
        };

        let tenant = ctx.tenants.tenant_id(new)?;
        let desired = Self::desired(ctx, new)?;

        match ctx.remote.get_tenant(tenant).await? {
            Some(current) => {
                let changes = delta(&current.attributes, &desired);
                if changes.is_empty() {
                    info!(tenant = %tenant, "tenant up to date");
                    return Ok(Outcome::Ignored);
                }
                info!(tenant = %tenant, changes = changes.len(), "modifying tenant");
                ctx.remote.modify_tenant(tenant, changes).await?;
                Ok(Outcome::Modified)
            }
            None => {
                info!(tenant = %tenant, classification = %event.classify(false), "creating tenant");
                ctx.remote.create_tenant(tenant, desired).await?;
                Ok(Outcome::Created)
            }
        }
    }
}
