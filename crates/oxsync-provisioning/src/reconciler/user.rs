//! User reconciliation.
//!
//! Users are resolved through the identity cache first and by login inside
//! their tenant second. A change of tenant copies the user so its remote
//! identity survives; rights and group memberships are pushed after the
//! user itself.

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use oxsync_remote::ids::{RemoteId, TenantId};
use oxsync_remote::operation::{AttributeSet, AttributeValue, RemoteObject};
use oxsync_remote::types::ObjectKind;

use super::{delta, ignore_not_found, members_change, Outcome, ReconcileContext, Reconciler};
use crate::directory::{GROUP_ENABLED_ATTRIBUTE, USER_ENABLED_ATTRIBUTE};
use crate::error::{ReconcileError, ReconcileResult};
use crate::event::{Attributes, ChangeEvent, EntityType};
use crate::identity::CachedIdentity;
use crate::reconciler::group::{GROUP_NAME_ATTRIBUTE, RESERVED_GROUP_NAME};

/// Login attribute.
pub const USERNAME_ATTRIBUTE: &str = "username";
/// Primary mail address.
pub const PRIMARY_MAIL_ATTRIBUTE: &str = "mailPrimaryAddress";
/// Additional mail addresses.
pub const ALTERNATIVE_MAIL_ATTRIBUTE: &str = "mailAlternativeAddress";
/// Name of the access profile granted to the user.
pub const ACCESS_PROFILE_ATTRIBUTE: &str = "oxAccess";
/// Keys of the groups the user belongs to.
pub const GROUPS_ATTRIBUTE: &str = "groups";

/// Computed sender address.
pub const PROP_DEFAULT_SENDER: &str = "default_sender_address";
/// Computed alias list.
pub const PROP_ALIASES: &str = "aliases";

/// A user found remotely.
struct Located {
    tenant: TenantId,
    object: RemoteObject,
    id: RemoteId,
}

#[derive(Debug, Default)]
pub struct UserReconciler;

impl UserReconciler {
    /// Resolve the remote user: cached id first, then login in `tenant`.
    async fn locate(
        ctx: &mut ReconcileContext<'_>,
        key: &str,
        tenant: Option<TenantId>,
        login: Option<&str>,
    ) -> ReconcileResult<Option<Located>> {
        if let Some(cached) = ctx.cache.get(key)? {
            if let Some(object) = ctx
                .remote
                .get(cached.tenant, ObjectKind::User, cached.remote_id)
                .await?
            {
                debug!(tenant = %cached.tenant, remote_id = %cached.remote_id, "resolved user from cache");
                return Ok(Some(Located {
                    tenant: cached.tenant,
                    id: cached.remote_id,
                    object,
                }));
            }
            debug!(remote_id = %cached.remote_id, "cached user no longer exists remotely");
        }

        let (Some(tenant), Some(login)) = (tenant.or(ctx.cache.tenant_of(key)?), login) else {
            return Ok(None);
        };
        let found = ctx
            .remote
            .find_by_name(tenant, ObjectKind::User, login)
            .await?;
        Ok(found.and_then(|object| {
            let id = object.id?;
            debug!(tenant = %tenant, remote_id = %id, "resolved user by login");
            Some(Located { tenant, object, id })
        }))
    }

    /// Mapped attributes plus computed fields.
    fn desired(
        ctx: &mut ReconcileContext<'_>,
        attributes: &Attributes,
    ) -> ReconcileResult<AttributeSet> {
        let mut desired = ctx.map(ObjectKind::User, attributes)?;

        let primary = attributes.get_str(PRIMARY_MAIL_ATTRIBUTE);
        desired.set(
            PROP_DEFAULT_SENDER,
            primary.map_or(AttributeValue::Null, AttributeValue::from),
        );

        desired.set(PROP_ALIASES, aliases(attributes));
        Ok(desired)
    }

    /// Push the rights of the user's access profile if they differ.
    async fn apply_rights(
        ctx: &mut ReconcileContext<'_>,
        tenant: TenantId,
        id: RemoteId,
        attributes: &Attributes,
    ) -> ReconcileResult<()> {
        let Some(name) = attributes.get_str(ACCESS_PROFILE_ATTRIBUTE) else {
            debug!("no access profile assigned");
            return Ok(());
        };
        let Some(profile) = ctx.profiles.get(name)? else {
            warn!(profile = %name, "access profile unknown, rights not changed");
            return Ok(());
        };
        let current = ctx.remote.get_module_access(tenant, id).await?;
        if current.as_ref() == Some(&profile.rights) {
            debug!(profile = %name, "rights up to date");
            return Ok(());
        }
        info!(tenant = %tenant, remote_id = %id, profile = %name, "changing module access");
        ctx.remote
            .change_module_access(tenant, id, &profile.rights)
            .await?;
        Ok(())
    }

    /// Add the user to every enabled group it claims membership in.
    async fn join_groups(
        ctx: &mut ReconcileContext<'_>,
        tenant: TenantId,
        id: RemoteId,
        attributes: &Attributes,
    ) -> ReconcileResult<()> {
        for group_key in attributes.get_strings(GROUPS_ATTRIBUTE) {
            let Some(group) = ctx.directory.lookup(&group_key).await else {
                debug!(group = %group_key, "group not in directory");
                continue;
            };
            if !group.get_bool(GROUP_ENABLED_ATTRIBUTE) {
                continue;
            }
            let Some(name) = group.get_str(GROUP_NAME_ATTRIBUTE) else {
                continue;
            };
            if name == RESERVED_GROUP_NAME {
                continue;
            }

            match ctx
                .remote
                .find_by_name(tenant, ObjectKind::Group, name)
                .await?
            {
                Some(existing) => {
                    let mut members = existing.members();
                    if members.contains(&id) {
                        continue;
                    }
                    let Some(group_id) = existing.id else { continue };
                    members.push(id);
                    members.sort();
                    info!(tenant = %tenant, group = %name, "adding user to group");
                    ctx.remote
                        .modify(tenant, ObjectKind::Group, group_id, members_change(&members))
                        .await?;
                }
                None => {
                    let mut object = RemoteObject::new(ObjectKind::Group);
                    object.attributes = ctx.map(ObjectKind::Group, &group)?;
                    object.set_members(&[id]);
                    info!(tenant = %tenant, group = %name, "creating group with user as sole member");
                    ctx.remote
                        .create(tenant, ObjectKind::Group, object.attributes)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Remove the user from its groups in `tenant`, deleting emptied groups.
    async fn leave_groups(
        ctx: &mut ReconcileContext<'_>,
        tenant: TenantId,
        id: RemoteId,
    ) -> ReconcileResult<()> {
        for group in ctx.remote.groups_of_user(tenant, id).await? {
            let Some(group_id) = group.id else { continue };
            let members: Vec<RemoteId> =
                group.members().into_iter().filter(|m| *m != id).collect();
            if members.is_empty() {
                info!(tenant = %tenant, group = ?group.name(), "deleting emptied group");
                ignore_not_found(ctx.remote.delete(tenant, ObjectKind::Group, group_id).await)?;
            } else {
                debug!(tenant = %tenant, group = ?group.name(), "removing user from group");
                ctx.remote
                    .modify(tenant, ObjectKind::Group, group_id, members_change(&members))
                    .await?;
            }
        }
        Ok(())
    }

    async fn remove(
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
    ) -> ReconcileResult<Outcome> {
        let prior = event.prior_attributes();
        let tenant = prior.and_then(|a| ctx.tenants.tenant_of(a).ok());
        let login = prior.and_then(|a| a.get_str(USERNAME_ATTRIBUTE));
        let key = event.local_key.as_str();

        let located = Self::locate(ctx, key, tenant, login).await?;
        let default_tenant = ctx.config.default_tenant;
        let Some(located) = located else {
            info!(local_key = %key, "user not present remotely");
            ctx.cache.reset(key, default_tenant)?;
            return Ok(Outcome::Ignored);
        };

        Self::leave_groups(ctx, located.tenant, located.id).await?;
        ignore_not_found(
            ctx.remote
                .delete(located.tenant, ObjectKind::User, located.id)
                .await,
        )?;
        ctx.cache.reset(key, default_tenant)?;
        info!(tenant = %located.tenant, remote_id = %located.id, "deleted user");
        Ok(Outcome::Deleted)
    }

    async fn upsert(
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
        new: &Attributes,
    ) -> ReconcileResult<Outcome> {
        let key = event.local_key.as_str();
        let tenant = ctx.tenants.tenant_of(new)?;
        let login = new
            .get_str(USERNAME_ATTRIBUTE)
            .ok_or_else(|| ReconcileError::skip("user has no login"))?
            .to_string();

        let prior = event.old_attributes.as_ref();
        let prior_tenant = prior.and_then(|a| ctx.tenants.tenant_of(a).ok());
        let prior_login = prior
            .and_then(|a| a.get_str(USERNAME_ATTRIBUTE))
            .unwrap_or(login.as_str())
            .to_string();

        let mut located = Self::locate(ctx, key, prior_tenant, Some(&prior_login)).await?;
        if located.is_none() && prior_tenant.is_some_and(|t| t != tenant) {
            located = Self::locate(ctx, key, Some(tenant), Some(&login)).await?;
        }
        let classification = event.classify(located.is_some());
        let desired = Self::desired(ctx, new)?;

        let (id, outcome) = match located {
            None => {
                let id = match ctx
                    .remote
                    .find_by_name(tenant, ObjectKind::User, &login)
                    .await?
                    .and_then(|o| o.id)
                {
                    Some(existing) => {
                        info!(tenant = %tenant, remote_id = %existing, %classification, "adopting existing user");
                        Self::push(ctx, tenant, existing, &AttributeSet::new(), &desired).await?;
                        existing
                    }
                    None => {
                        info!(tenant = %tenant, login = %login, %classification, "creating user");
                        ctx.remote
                            .create(tenant, ObjectKind::User, desired.clone())
                            .await?
                    }
                };
                (id, Outcome::Created)
            }
            Some(found) if found.tenant == tenant => {
                let changed =
                    Self::push(ctx, tenant, found.id, &found.object.attributes, &desired).await?;
                let outcome = if changed {
                    Outcome::Modified
                } else {
                    Outcome::Ignored
                };
                (found.id, outcome)
            }
            Some(found) => (Self::move_user(ctx, found, tenant, &login, &desired).await?, Outcome::Moved),
        };

        ctx.cache
            .set(key, Some(CachedIdentity::new(id, tenant, login)))?;
        Self::apply_rights(ctx, tenant, id, new).await?;
        if matches!(outcome, Outcome::Created | Outcome::Moved) {
            Self::join_groups(ctx, tenant, id, new).await?;
        }
        Ok(outcome)
    }

    /// Push the properties that changed. Returns whether anything was sent.
    async fn push(
        ctx: &mut ReconcileContext<'_>,
        tenant: TenantId,
        id: RemoteId,
        current: &AttributeSet,
        desired: &AttributeSet,
    ) -> ReconcileResult<bool> {
        let changes = delta(current, desired);
        if changes.is_empty() {
            debug!(tenant = %tenant, remote_id = %id, "user up to date");
            return Ok(false);
        }
        info!(tenant = %tenant, remote_id = %id, changes = changes.len(), "modifying user");
        ctx.remote
            .modify(tenant, ObjectKind::User, id, changes)
            .await?;
        Ok(true)
    }

    /// Move a user into `target`, keeping its identity unless a same-login
    /// user already occupies the target tenant.
    async fn move_user(
        ctx: &mut ReconcileContext<'_>,
        found: Located,
        target: TenantId,
        login: &str,
        desired: &AttributeSet,
    ) -> ReconcileResult<RemoteId> {
        let source = found.tenant;
        Self::leave_groups(ctx, source, found.id).await?;

        let duplicate = ctx
            .remote
            .find_by_name(target, ObjectKind::User, login)
            .await?
            .and_then(|o| o.id);

        let id = match duplicate {
            Some(stale) => {
                warn!(
                    from = %source,
                    to = %target,
                    remote_id = %stale,
                    login = %login,
                    "login already taken in target tenant, replacing the duplicate"
                );
                Self::leave_groups(ctx, target, stale).await?;
                ignore_not_found(ctx.remote.delete(target, ObjectKind::User, stale).await)?;
                ctx.remote
                    .create(target, ObjectKind::User, desired.clone())
                    .await?
            }
            None => {
                let id = ctx.remote.copy_user(source, found.id, target).await?;
                info!(from = %source, to = %target, remote_id = %id, "copied user");
                Self::push(ctx, target, id, &found.object.attributes, desired).await?;
                id
            }
        };

        ignore_not_found(
            ctx.remote
                .delete(source, ObjectKind::User, found.id)
                .await,
        )?;
        info!(from = %source, to = %target, remote_id = %id, "moved user");
        Ok(id)
    }
}

#[async_trait]
impl Reconciler for UserReconciler {
    fn entity_type(&self) -> EntityType {
        EntityType::User
    }

    #[instrument(skip(self, ctx, event), fields(local_key = %event.local_key))]
    async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
    ) -> ReconcileResult<Outcome> {
        if let Some(old_key) = event.renamed_from() {
            debug!(old_key, "user renamed");
            ctx.cache.rename(old_key, &event.local_key)?;
        }

        let enabled = |a: &Option<Attributes>| {
            a.as_ref()
                .is_some_and(|a| a.get_bool(USER_ENABLED_ATTRIBUTE))
        };

        match &event.new_attributes {
            Some(new) if enabled(&event.new_attributes) => Self::upsert(ctx, event, new).await,
            _ => {
                let known = ctx.cache.get(&event.local_key)?.is_some();
                if !enabled(&event.old_attributes) && !known {
                    debug!("not a groupware user");
                    return Ok(Outcome::Ignored);
                }
                Self::remove(ctx, event).await
            }
        }
    }
}

/// Primary address followed by the alternative addresses, without
/// duplicates.
fn aliases(attributes: &Attributes) -> Vec<String> {
    let mut aliases: Vec<String> = Vec::new();
    let primary = attributes.get_str(PRIMARY_MAIL_ATTRIBUTE).map(str::to_string);
    for address in primary
        .into_iter()
        .chain(attributes.get_strings(ALTERNATIVE_MAIL_ATTRIBUTE))
    {
        if !aliases.contains(&address) {
            aliases.push(address);
        }
    }
    aliases
}
