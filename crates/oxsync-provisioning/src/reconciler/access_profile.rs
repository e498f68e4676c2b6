//! Access profile reconciliation. Purely local: profiles are stored for
//! later use by user reconciliation.

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{Outcome, ReconcileContext, Reconciler};
use crate::error::{ReconcileError, ReconcileResult};
use crate::event::{Attributes, ChangeEvent, EntityType};
use crate::profiles::{AccessProfile, KNOWN_RIGHTS};

/// Profile name attribute.
pub const PROFILE_NAME_ATTRIBUTE: &str = "name";

#[derive(Debug, Default)]
pub struct AccessProfileReconciler;

/// Rights whose flag is set on the local object.
pub fn rights_of(attributes: &Attributes) -> AccessProfile {
    let name = attributes.get_str(PROFILE_NAME_ATTRIBUTE).unwrap_or_default();
    AccessProfile::new(
        name,
        KNOWN_RIGHTS
            .iter()
            .copied()
            .filter(|right| attributes.get_bool(right)),
    )
}

#[async_trait]
impl Reconciler for AccessProfileReconciler {
    fn entity_type(&self) -> EntityType {
        EntityType::AccessProfile
    }

    #[instrument(skip(self, ctx, event), fields(local_key = %event.local_key))]
    async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        event: &ChangeEvent,
    ) -> ReconcileResult<Outcome> {
        let old_name = event
            .old_attributes
            .as_ref()
            .and_then(|a| a.get_str(PROFILE_NAME_ATTRIBUTE));

        let Some(new) = &event.new_attributes else {
            let name = old_name.ok_or_else(|| ReconcileError::skip("access profile has no name"))?;
            let removed = ctx.profiles.remove(name)?;
            ctx.profiles.reload()?;
            return Ok(if removed {
                Outcome::Deleted
            } else {
                Outcome::Ignored
            });
        };

        let profile = rights_of(new);
        if profile.name.is_empty() {
            return Err(ReconcileError::skip("access profile has no name"));
        }
        if let Some(old_name) = old_name.filter(|n| *n != profile.name) {
            info!(old = %old_name, new = %profile.name, "access profile renamed");
            ctx.profiles.remove(old_name)?;
        }

        let existed = ctx.profiles.get(&profile.name)?.is_some();
        ctx.profiles.set(profile)?;
        ctx.profiles.reload()?;
        Ok(if existed {
            Outcome::Modified
        } else {
            Outcome::Created
        })
    }
}
