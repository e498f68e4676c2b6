//! Group reconciliation with per-tenant fan-out.
//!
//! A local group may hold users of several tenants. It is represented by
//! one remote group per tenant, each holding the members of that tenant.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use oxsync_remote::ids::{RemoteId, TenantId};
use oxsync_remote::types::ObjectKind;

use super::{delta, ignore_not_found, members_change, Outcome, ReconcileContext, Reconciler};
use crate::directory::GROUP_ENABLED_ATTRIBUTE;
use crate::error::{ReconcileError, ReconcileResult};
use crate::event::{Attributes, ChangeEvent, EntityType};

/// Group name attribute.
pub const GROUP_NAME_ATTRIBUTE: &str = "name";
/// Keys of the member users.
pub const GROUP_MEMBERS_ATTRIBUTE: &str = "users";
/// Name of the remote service's built-in group.
pub const RESERVED_GROUP_NAME: &str = "users";

#[derive(Debug, Default)]
pub struct GroupReconciler;

#[derive(Debug, Default)]
struct Tally {
    created: usize,
    modified: usize,
    deleted: usize,
}

fn active(attributes: &Option<Attributes>) -> Option<&Attributes> {
    attributes
        .as_ref()
        .filter(|a| a.get_bool(GROUP_ENABLED_ATTRIBUTE))
}

fn member_keys(attributes: Option<&Attributes>) -> BTreeSet<String> {
    attributes
        .map(|a| a.get_strings(GROUP_MEMBERS_ATTRIBUTE).into_iter().collect())
        .unwrap_or_default()
}

#[async_trait]
impl Reconciler for GroupReconciler {
    fn entity_type(&self) -> EntityType {
        EntityType::Group
    }

    #[instrument(skip(self, ctx, event), fields(local_key = %event.local_key))]
    async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
    ) -> ReconcileResult<Outcome> {
        let old = active(&event.old_attributes);
        let new = active(&event.new_attributes);
        if old.is_none() && new.is_none() {
            debug!("not a groupware group");
            return Ok(Outcome::Ignored);
        }

        let old_name = old.and_then(|a| a.get_str(GROUP_NAME_ATTRIBUTE));
        let new_name = new.and_then(|a| a.get_str(GROUP_NAME_ATTRIBUTE));
        if old_name == Some(RESERVED_GROUP_NAME) || new_name == Some(RESERVED_GROUP_NAME) {
            info!("ignoring reserved group name");
            return Ok(Outcome::Ignored);
        }
        let name = new_name
            .or(old_name)
            .ok_or_else(|| ReconcileError::skip("group has no name"))?;
        let lookup_name = old_name.unwrap_or(name);

        let old_members = member_keys(old);
        let new_members = member_keys(new);

        let mut touched: BTreeSet<TenantId> = BTreeSet::new();
        let mut desired: BTreeMap<TenantId, BTreeSet<RemoteId>> = BTreeMap::new();
        for key in old_members.union(&new_members) {
            if new_members.contains(key) {
                if let Some(identity) = ctx.cache.get(key)? {
                    touched.insert(identity.tenant);
                    desired
                        .entry(identity.tenant)
                        .or_default()
                        .insert(identity.remote_id);
                    continue;
                }
                info!(member = %key, "dropping unresolved member");
            }
            if let Some(tenant) = ctx.cache.tenant_of(key)? {
                touched.insert(tenant);
            }
        }

        let attributes = match new {
            Some(new) => Some(ctx.map(ObjectKind::Group, new)?),
            None => None,
        };

        let mut tally = Tally::default();
        for tenant in touched {
            let members: Vec<RemoteId> = desired
                .get(&tenant)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();

            let mut existing = ctx
                .remote
                .find_by_name(tenant, ObjectKind::Group, lookup_name)
                .await?;
            if existing.is_none() && lookup_name != name {
                existing = ctx
                    .remote
                    .find_by_name(tenant, ObjectKind::Group, name)
                    .await?;
            }
            let existing = existing.and_then(|g| g.id.map(|id| (id, g)));

            if members.is_empty() {
                if let Some((id, _)) = existing {
                    info!(tenant = %tenant, group = %lookup_name, "deleting group without members");
                    ignore_not_found(ctx.remote.delete(tenant, ObjectKind::Group, id).await)?;
                    tally.deleted += 1;
                }
                continue;
            }

            let Some(attributes) = &attributes else { continue };
            let mut want = attributes.clone();
            want.merge(&members_change(&members));

            match existing {
                Some((id, group)) => {
                    let changes = delta(&group.attributes, &want);
                    if changes.is_empty() {
                        debug!(tenant = %tenant, group = %name, "group up to date");
                        continue;
                    }
                    info!(tenant = %tenant, group = %name, members = members.len(), "modifying group");
                    ctx.remote
                        .modify(tenant, ObjectKind::Group, id, changes)
                        .await?;
                    tally.modified += 1;
                }
                None => {
                    info!(tenant = %tenant, group = %name, members = members.len(), "creating group");
                    ctx.remote.create(tenant, ObjectKind::Group, want).await?;
                    tally.created += 1;
                }
            }
        }

        let outcome = if tally.created + tally.modified + tally.deleted == 0 {
            Outcome::Ignored
        } else if new.is_none() {
            Outcome::Deleted
        } else if tally.modified == 0 && tally.deleted == 0 {
            Outcome::Created
        } else {
            Outcome::Modified
        };
        Ok(outcome)
    }
}
