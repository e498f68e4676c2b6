//! Event dispatch.
//!
//! The [`Dispatcher`] owns the stores and the reconciler table and handles
//! one event at a time. Skips are logged and reported as
//! [`Outcome::Skipped`]; every other error is returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use oxsync_remote::traits::RemoteService;

use crate::config::EngineConfig;
use crate::directory::LocalDirectory;
use crate::error::{ReconcileError, ReconcileResult};
use crate::event::{ChangeEnvelope, ChangeEvent, EntityType};
use crate::identity::IdentityCache;
use crate::mapping::AttributeMapper;
use crate::profiles::AccessProfileStore;
use crate::reconciler::{
    AccessProfileReconciler, FunctionalAccountReconciler, GroupReconciler, Outcome,
    ReconcileContext, Reconciler, ResourceReconciler, TenantReconciler, UserReconciler,
};
use crate::tenant::TenantResolver;

/// Routes change events to the reconciler of their entity type.
pub struct Dispatcher {
    config: EngineConfig,
    cache: IdentityCache,
    mapper: AttributeMapper,
    profiles: AccessProfileStore,
    tenants: TenantResolver,
    remote: Arc<dyn RemoteService>,
    directory: Arc<dyn LocalDirectory>,
    reconcilers: HashMap<EntityType, Box<dyn Reconciler>>,
}

impl Dispatcher {
    /// Open the stores named by `config` and build the reconciler table.
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteService>,
        directory: Arc<dyn LocalDirectory>,
    ) -> ReconcileResult<Self> {
        let cache = IdentityCache::open(&config.data_dir)?;
        let mapper = AttributeMapper::from_config(&config)?;
        let profiles = AccessProfileStore::open(&config.profiles_file)?;
        info!(
            data_dir = %config.data_dir.display(),
            default_tenant = %config.default_tenant,
            "dispatcher ready"
        );
        Ok(Self {
            config,
            cache,
            mapper,
            profiles,
            tenants: TenantResolver::new(),
            remote,
            directory,
            reconcilers: default_reconcilers(),
        })
    }

    /// Reconcile one event.
    #[instrument(skip(self, event), fields(entity = %event.entity_type, local_key = %event.local_key))]
    pub async fn handle(&mut self, event: &ChangeEvent) -> ReconcileResult<Outcome> {
        if event.old_attributes.is_none() && event.new_attributes.is_none() {
            debug!("event without snapshots");
            return Ok(Outcome::Ignored);
        }

        let Some(reconciler) = self.reconcilers.get(&event.entity_type) else {
            return Err(ReconcileError::invalid_event(format!(
                "no reconciler for {}",
                event.entity_type
            )));
        };

        let mut ctx = ReconcileContext {
            config: &self.config,
            cache: &mut self.cache,
            mapper: &mut self.mapper,
            profiles: &mut self.profiles,
            tenants: &self.tenants,
            remote: self.remote.as_ref(),
            directory: self.directory.as_ref(),
        };

        match reconciler.reconcile(&mut ctx, event).await {
            Ok(outcome) => {
                info!(%outcome, "event reconciled");
                Ok(outcome)
            }
            Err(e) if e.is_skip() => {
                let reason = match e {
                    ReconcileError::Skip { reason } => reason,
                    other => other.to_string(),
                };
                info!(reason = %reason, "event skipped");
                Ok(Outcome::Skipped(reason))
            }
            Err(e) => {
                error!(error = %e, configuration = e.is_configuration(), "reconciliation failed");
                Err(e)
            }
        }
    }

    /// Reconcile an old/new envelope pair.
    pub async fn handle_envelopes(
        &mut self,
        old: Option<ChangeEnvelope>,
        new: Option<ChangeEnvelope>,
    ) -> ReconcileResult<Outcome> {
        let envelope_id = new.as_ref().or(old.as_ref()).map(|e| e.id.clone());
        match ChangeEvent::from_envelopes(old, new)? {
            Some(event) => {
                debug!(envelope_id = ?envelope_id, key = %event.local_key, "handling change");
                self.handle(&event).await
            }
            None => {
                debug!(envelope_id = ?envelope_id, "neither state carries an object");
                Ok(Outcome::Ignored)
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// The attribute mapper, e.g. to invalidate it after the operator
    /// edited the mapping file.
    pub fn mapper_mut(&mut self) -> &mut AttributeMapper {
        &mut self.mapper
    }

    pub fn profiles_mut(&mut self) -> &mut AccessProfileStore {
        &mut self.profiles
    }
}

fn default_reconcilers() -> HashMap<EntityType, Box<dyn Reconciler>> {
    let reconcilers: Vec<Box<dyn Reconciler>> = vec![
        Box::new(TenantReconciler),
        Box::new(UserReconciler),
        Box::new(GroupReconciler),
        Box::new(ResourceReconciler),
        Box::new(FunctionalAccountReconciler),
        Box::new(AccessProfileReconciler),
    ];
    reconcilers
        .into_iter()
        .map(|r| (r.entity_type(), r))
        .collect()
}
