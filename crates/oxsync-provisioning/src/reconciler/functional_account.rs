//! Functional account (shared mailbox) reconciliation.
//!
//! Every event fully replaces the account's registrations: all existing
//! ones are removed, then one is created per listed user that resolves to a
//! remote user of the account's tenant.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use oxsync_remote::ids::TenantId;
use oxsync_remote::traits::SecondaryAccount;
use oxsync_remote::types::ObjectKind;

use super::{ignore_not_found, Outcome, ReconcileContext, Reconciler};
use crate::error::{ReconcileError, ReconcileResult};
use crate::event::{Attributes, ChangeEvent, EntityType};
use crate::template::{TemplateContext, ENTRY_UUID_ATTRIBUTE};

/// Address of the shared mailbox.
pub const ACCOUNT_MAIL_ATTRIBUTE: &str = "mailPrimaryAddress";
/// Keys of the users the mailbox is shared with.
pub const ACCOUNT_USERS_ATTRIBUTE: &str = "users";
/// Remote property naming the mailbox for its users.
pub const PROP_PERSONAL: &str = "personal";

#[derive(Debug, Default)]
pub struct FunctionalAccountReconciler;

impl FunctionalAccountReconciler {
    fn address(attributes: &Attributes) -> Option<&str> {
        attributes.get_str(ACCOUNT_MAIL_ATTRIBUTE)
    }

    /// Remove every registration of `address` in `tenant`.
    async fn clear(
        ctx: &mut ReconcileContext<'_>,
        tenant: TenantId,
        address: &str,
    ) -> ReconcileResult<usize> {
        let existing = ctx.remote.list_secondary_accounts(tenant, address).await?;
        let mut removed = 0;
        for account in &existing {
            if ignore_not_found(ctx.remote.delete_secondary_account(tenant, account).await)? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(tenant = %tenant, address, removed, "removed registrations");
        }
        Ok(removed)
    }

    /// Create one registration per resolvable user.
    async fn register(
        ctx: &mut ReconcileContext<'_>,
        tenant: TenantId,
        address: &str,
        account: &Attributes,
    ) -> ReconcileResult<usize> {
        let mapped = ctx.map(ObjectKind::SecondaryAccount, account)?;
        let personal = mapped.get_string(PROP_PERSONAL).map(str::to_string);
        let template = ctx.config.login_template.clone();
        let mut created = 0;

        for user_key in account.get_strings(ACCOUNT_USERS_ATTRIBUTE) {
            let Some(identity) = ctx.cache.get(&user_key)? else {
                info!(user = %user_key, "user not provisioned, no registration");
                continue;
            };
            if identity.tenant != tenant {
                info!(user = %user_key, user_tenant = %identity.tenant, "user belongs to another tenant, no registration");
                continue;
            }

            let user = ctx.directory.lookup(&user_key).await.unwrap_or_default();
            let login = match template.render(&TemplateContext {
                account_entry_uuid: account.get_str(ENTRY_UUID_ATTRIBUTE),
                account_email: Some(address),
                user_dn: &user_key,
                user: &user,
            }) {
                Ok(login) => login,
                Err(e) => {
                    warn!(user = %user_key, error = %e, "cannot build registration login");
                    continue;
                }
            };

            let registration = SecondaryAccount {
                primary_address: address.to_string(),
                login,
                user_id: identity.remote_id,
                name: personal.clone(),
            };
            ctx.remote
                .create_secondary_account(tenant, &registration)
                .await?;
            created += 1;
        }
        Ok(created)
    }
}

#[async_trait]
impl Reconciler for FunctionalAccountReconciler {
    fn entity_type(&self) -> EntityType {
        EntityType::FunctionalAccount
    }

    #[instrument(skip(self, ctx, event), fields(local_key = %event.local_key))]
    async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
    ) -> ReconcileResult<Outcome> {
        // Resolve the new side before touching anything remotely.
        let target = match &event.new_attributes {
            Some(new) => {
                let tenant = ctx.tenants.tenant_of(new)?;
                let address = Self::address(new)
                    .ok_or_else(|| ReconcileError::skip("functional account has no address"))?;
                Some((tenant, address, new))
            }
            None => None,
        };

        let mut registrations: BTreeSet<(TenantId, &str)> = BTreeSet::new();
        if let Some(old) = &event.old_attributes {
            if let (Ok(tenant), Some(address)) = (ctx.tenants.tenant_of(old), Self::address(old)) {
                registrations.insert((tenant, address));
            }
        }
        if let Some((tenant, address, _)) = target {
            registrations.insert((tenant, address));
        }

        let mut removed = 0;
        for (tenant, address) in registrations {
            removed += Self::clear(ctx, tenant, address).await?;
        }

        let Some((tenant, address, new)) = target else {
            info!(removed, "functional account removed");
            return Ok(if removed > 0 {
                Outcome::Deleted
            } else {
                Outcome::Ignored
            });
        };

        let created = Self::register(ctx, tenant, address, new).await?;
        info!(tenant = %tenant, address, removed, created, "functional account registrations replaced");
        Ok(if event.old_attributes.is_some() {
            Outcome::Modified
        } else {
            Outcome::Created
        })
    }
}
