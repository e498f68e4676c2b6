//! In-process remote service.
//!
//! Keeps tenants, objects, capability flags and secondary accounts in memory
//! and honours the same contracts as a wire client: name uniqueness per
//! tenant, not-found translation, missing credentials. Used for dry-run
//! replays and as the test double of the engine.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};
use crate::ids::{RemoteId, TenantId};
use crate::operation::{AttributeSet, RemoteObject};
use crate::traits::{ObjectOp, SecondaryAccount, SecondaryAccountOp, TenantOp, UserOp};
use crate::types::ObjectKind;

#[derive(Debug, Default)]
struct TenantState {
    attributes: AttributeSet,
    objects: BTreeMap<ObjectKind, BTreeMap<RemoteId, AttributeSet>>,
    module_access: BTreeMap<RemoteId, BTreeSet<String>>,
    secondary_accounts: Vec<SecondaryAccount>,
}

impl TenantState {
    fn objects_of(&self, kind: ObjectKind) -> impl Iterator<Item = (&RemoteId, &AttributeSet)> {
        self.objects.get(&kind).into_iter().flat_map(|m| m.iter())
    }

    fn find_by_name(&self, kind: ObjectKind, name: &str) -> Option<RemoteId> {
        self.objects_of(kind)
            .find(|(_, attrs)| attrs.get_string(crate::operation::PROP_NAME) == Some(name))
            .map(|(id, _)| *id)
    }
}

#[derive(Debug, Default)]
struct State {
    tenants: BTreeMap<TenantId, TenantState>,
    no_credentials: BTreeSet<TenantId>,
    next_id: i64,
    calls: Vec<String>,
}

impl State {
    fn tenant(&self, tenant: TenantId) -> RemoteResult<&TenantState> {
        if self.no_credentials.contains(&tenant) {
            return Err(RemoteError::MissingCredentials { tenant });
        }
        self.tenants
            .get(&tenant)
            .ok_or(RemoteError::TenantNotFound { tenant })
    }

    fn tenant_mut(&mut self, tenant: TenantId) -> RemoteResult<&mut TenantState> {
        if self.no_credentials.contains(&tenant) {
            return Err(RemoteError::MissingCredentials { tenant });
        }
        self.tenants
            .get_mut(&tenant)
            .ok_or(RemoteError::TenantNotFound { tenant })
    }

    fn allocate_id(&mut self) -> RemoteId {
        self.next_id += 1;
        RemoteId::new(self.next_id)
    }
}

fn check_kind(kind: ObjectKind) -> RemoteResult<()> {
    if kind.is_tenant_scoped_object() {
        Ok(())
    } else {
        Err(RemoteError::invalid_request(format!(
            "{kind} is not a tenant-scoped object"
        )))
    }
}

/// Remote service held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: RwLock<State>,
}

impl MemoryRemote {
    /// Create an empty remote service without any tenant.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a remote service with the given (empty) tenants.
    pub fn with_tenants(tenants: impl IntoIterator<Item = i64>) -> Self {
        let mut state = State::default();
        for id in tenants {
            state
                .tenants
                .insert(TenantId::new(id), TenantState::default());
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Make every call against `tenant` fail with missing credentials.
    pub async fn deny_credentials(&self, tenant: TenantId) {
        self.state.write().await.no_credentials.insert(tenant);
    }

    /// Properties of a tenant, if it exists.
    pub async fn tenant(&self, tenant: TenantId) -> Option<AttributeSet> {
        let state = self.state.read().await;
        state.tenants.get(&tenant).map(|t| t.attributes.clone())
    }

    /// All objects of a kind in a tenant, ordered by id.
    pub async fn objects(&self, tenant: TenantId, kind: ObjectKind) -> Vec<RemoteObject> {
        let state = self.state.read().await;
        state
            .tenants
            .get(&tenant)
            .map(|t| {
                t.objects_of(kind)
                    .map(|(id, attrs)| RemoteObject {
                        kind,
                        id: Some(*id),
                        attributes: attrs.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All secondary-account registrations of a tenant.
    pub async fn secondary_accounts(&self, tenant: TenantId) -> Vec<SecondaryAccount> {
        let state = self.state.read().await;
        state
            .tenants
            .get(&tenant)
            .map(|t| t.secondary_accounts.clone())
            .unwrap_or_default()
    }

    /// Calls received so far, as `operation tenant kind` lines.
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    /// Dump the complete state as JSON.
    pub async fn snapshot(&self) -> Value {
        let state = self.state.read().await;
        let mut tenants = serde_json::Map::new();
        for (id, tenant) in &state.tenants {
            let mut objects = serde_json::Map::new();
            for (kind, entries) in &tenant.objects {
                let list: Vec<Value> = entries
                    .iter()
                    .map(|(oid, attrs)| json!({ "id": oid, "attributes": attrs }))
                    .collect();
                objects.insert(kind.as_str().to_string(), Value::Array(list));
            }
            let module_access: serde_json::Map<String, Value> = tenant
                .module_access
                .iter()
                .map(|(uid, rights)| (uid.to_string(), json!(rights)))
                .collect();
            tenants.insert(
                id.to_string(),
                json!({
                    "attributes": tenant.attributes,
                    "objects": objects,
                    "module_access": module_access,
                    "secondary_accounts": tenant.secondary_accounts,
                }),
            );
        }
        Value::Object(tenants)
    }

    async fn record(&self, call: String) {
        debug!(call = %call, "remote call");
        self.state.write().await.calls.push(call);
    }
}

#[async_trait]
impl TenantOp for MemoryRemote {
    async fn get_tenant(&self, tenant: TenantId) -> RemoteResult<Option<RemoteObject>> {
        let state = self.state.read().await;
        if state.no_credentials.contains(&tenant) {
            return Err(RemoteError::MissingCredentials { tenant });
        }
        Ok(state.tenants.get(&tenant).map(|t| RemoteObject {
            kind: ObjectKind::Context,
            id: Some(RemoteId::new(tenant.get())),
            attributes: t.attributes.clone(),
        }))
    }

    async fn create_tenant(
        &self,
        tenant: TenantId,
        attributes: AttributeSet,
    ) -> RemoteResult<()> {
        self.record(format!("create_tenant {tenant}")).await;
        let mut state = self.state.write().await;
        if state.tenants.contains_key(&tenant) {
            return Err(RemoteError::already_exists(
                ObjectKind::Context,
                tenant.to_string(),
            ));
        }
        state.tenants.insert(
            tenant,
            TenantState {
                attributes,
                ..TenantState::default()
            },
        );
        Ok(())
    }

    async fn modify_tenant(&self, tenant: TenantId, changes: AttributeSet) -> RemoteResult<()> {
        self.record(format!("modify_tenant {tenant}")).await;
        let mut state = self.state.write().await;
        state.tenant_mut(tenant)?.attributes.merge(&changes);
        Ok(())
    }

    async fn delete_tenant(&self, tenant: TenantId) -> RemoteResult<()> {
        self.record(format!("delete_tenant {tenant}")).await;
        let mut state = self.state.write().await;
        state.tenant(tenant)?;
        state.tenants.remove(&tenant);
        Ok(())
    }
}

#[async_trait]
impl ObjectOp for MemoryRemote {
    async fn get(
        &self,
        tenant: TenantId,
        kind: ObjectKind,
        id: RemoteId,
    ) -> RemoteResult<Option<RemoteObject>> {
        check_kind(kind)?;
        let state = self.state.read().await;
        let t = match state.tenant(tenant) {
            Ok(t) => t,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(t
            .objects
            .get(&kind)
            .and_then(|m| m.get(&id))
            .map(|attrs| RemoteObject {
                kind,
                id: Some(id),
                attributes: attrs.clone(),
            }))
    }

    async fn find_by_name(
        &self,
        tenant: TenantId,
        kind: ObjectKind,
        name: &str,
    ) -> RemoteResult<Option<RemoteObject>> {
        check_kind(kind)?;
        let id = {
            let state = self.state.read().await;
            match state.tenant(tenant) {
                Ok(t) => t.find_by_name(kind, name),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            }
        };
        match id {
            Some(id) => self.get(tenant, kind, id).await,
            None => Ok(None),
        }
    }

    async fn list(&self, tenant: TenantId, kind: ObjectKind) -> RemoteResult<Vec<RemoteObject>> {
        check_kind(kind)?;
        {
            let state = self.state.read().await;
            match state.tenant(tenant) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Ok(Vec::new()),
                Err(e) => return Err(e),
            }
        }
        Ok(self.objects(tenant, kind).await)
    }

    async fn create(
        &self,
        tenant: TenantId,
        kind: ObjectKind,
        attributes: AttributeSet,
    ) -> RemoteResult<RemoteId> {
        check_kind(kind)?;
        self.record(format!("create {tenant} {kind}")).await;
        let mut state = self.state.write().await;
        let name = attributes
            .get_string(crate::operation::PROP_NAME)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::invalid_request(format!("{kind} without a name")))?;
        if state.tenant(tenant)?.find_by_name(kind, &name).is_some() {
            return Err(RemoteError::already_exists(kind, name));
        }
        let id = state.allocate_id();
        state
            .tenant_mut(tenant)?
            .objects
            .entry(kind)
            .or_default()
            .insert(id, attributes);
        Ok(id)
    }

    async fn modify(
        &self,
        tenant: TenantId,
        kind: ObjectKind,
        id: RemoteId,
        changes: AttributeSet,
    ) -> RemoteResult<()> {
        check_kind(kind)?;
        self.record(format!("modify {tenant} {kind} {id}")).await;
        let mut state = self.state.write().await;
        let t = state.tenant_mut(tenant)?;
        if let Some(name) = changes.get_string(crate::operation::PROP_NAME) {
            if matches!(t.find_by_name(kind, name), Some(other) if other != id) {
                return Err(RemoteError::already_exists(kind, name));
            }
        }
        let attrs = t
            .objects
            .get_mut(&kind)
            .and_then(|m| m.get_mut(&id))
            .ok_or_else(|| RemoteError::not_found(kind, id.to_string()))?;
        attrs.merge(&changes);
        Ok(())
    }

    async fn delete(&self, tenant: TenantId, kind: ObjectKind, id: RemoteId) -> RemoteResult<()> {
        check_kind(kind)?;
        self.record(format!("delete {tenant} {kind} {id}")).await;
        let mut state = self.state.write().await;
        let t = state.tenant_mut(tenant)?;
        t.objects
            .get_mut(&kind)
            .and_then(|m| m.remove(&id))
            .ok_or_else(|| RemoteError::not_found(kind, id.to_string()))?;
        if kind == ObjectKind::User {
            t.module_access.remove(&id);
        }
        Ok(())
    }
}

#[async_trait]
impl UserOp for MemoryRemote {
    async fn copy_user(
        &self,
        from: TenantId,
        id: RemoteId,
        to: TenantId,
    ) -> RemoteResult<RemoteId> {
        self.record(format!("copy_user {from} {id} {to}")).await;
        let mut state = self.state.write().await;
        let source = state.tenant(from)?;
        let attributes = source
            .objects
            .get(&ObjectKind::User)
            .and_then(|m| m.get(&id))
            .cloned()
            .ok_or_else(|| RemoteError::not_found(ObjectKind::User, id.to_string()))?;
        let rights = source.module_access.get(&id).cloned();
        let name = attributes
            .get_string(crate::operation::PROP_NAME)
            .unwrap_or_default()
            .to_string();

        let dest = state.tenant_mut(to)?;
        if dest.find_by_name(ObjectKind::User, &name).is_some() {
            return Err(RemoteError::already_exists(ObjectKind::User, name));
        }
        let users = dest.objects.entry(ObjectKind::User).or_default();
        let new_id = if users.contains_key(&id) {
            None
        } else {
            users.insert(id, attributes.clone());
            Some(id)
        };
        let new_id = match new_id {
            Some(id) => id,
            None => {
                let allocated = state.allocate_id();
                state
                    .tenant_mut(to)?
                    .objects
                    .entry(ObjectKind::User)
                    .or_default()
                    .insert(allocated, attributes);
                allocated
            }
        };
        if let Some(rights) = rights {
            state.tenant_mut(to)?.module_access.insert(new_id, rights);
        }
        Ok(new_id)
    }

    async fn change_module_access(
        &self,
        tenant: TenantId,
        id: RemoteId,
        rights: &BTreeSet<String>,
    ) -> RemoteResult<()> {
        self.record(format!("change_module_access {tenant} {id}")).await;
        let mut state = self.state.write().await;
        let t = state.tenant_mut(tenant)?;
        let known = t
            .objects
            .get(&ObjectKind::User)
            .is_some_and(|m| m.contains_key(&id));
        if !known {
            return Err(RemoteError::not_found(ObjectKind::User, id.to_string()));
        }
        t.module_access.insert(id, rights.clone());
        Ok(())
    }

    async fn get_module_access(
        &self,
        tenant: TenantId,
        id: RemoteId,
    ) -> RemoteResult<Option<BTreeSet<String>>> {
        let state = self.state.read().await;
        match state.tenant(tenant) {
            Ok(t) => Ok(t.module_access.get(&id).cloned()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SecondaryAccountOp for MemoryRemote {
    async fn list_secondary_accounts(
        &self,
        tenant: TenantId,
        primary_address: &str,
    ) -> RemoteResult<Vec<SecondaryAccount>> {
        let state = self.state.read().await;
        match state.tenant(tenant) {
            Ok(t) => Ok(t
                .secondary_accounts
                .iter()
                .filter(|a| a.primary_address == primary_address)
                .cloned()
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn create_secondary_account(
        &self,
        tenant: TenantId,
        account: &SecondaryAccount,
    ) -> RemoteResult<()> {
        self.record(format!(
            "create_secondary_account {tenant} {}",
            account.user_id
        ))
        .await;
        let mut state = self.state.write().await;
        let t = state.tenant_mut(tenant)?;
        let duplicate = t.secondary_accounts.iter().any(|a| {
            a.primary_address == account.primary_address && a.user_id == account.user_id
        });
        if duplicate {
            return Err(RemoteError::already_exists(
                ObjectKind::SecondaryAccount,
                format!("{} for user {}", account.primary_address, account.user_id),
            ));
        }
        t.secondary_accounts.push(account.clone());
        Ok(())
    }

    async fn delete_secondary_account(
        &self,
        tenant: TenantId,
        account: &SecondaryAccount,
    ) -> RemoteResult<()> {
        self.record(format!(
            "delete_secondary_account {tenant} {}",
            account.user_id
        ))
        .await;
        let mut state = self.state.write().await;
        let t = state.tenant_mut(tenant)?;
        let before = t.secondary_accounts.len();
        t.secondary_accounts.retain(|a| {
            !(a.primary_address == account.primary_address && a.user_id == account.user_id)
        });
        if t.secondary_accounts.len() == before {
            return Err(RemoteError::not_found(
                ObjectKind::SecondaryAccount,
                account.primary_address.clone(),
            ));
        }
        Ok(())
    }
}
