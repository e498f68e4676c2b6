//! # Provisioning Engine
//!
//! Reconciliation of local directory changes into the remote multi-tenant
//! groupware service.
//!
//! This crate provides:
//! - Change events built from old/new envelope pairs
//! - A persistent identity cache (local key → remote id, tenant, login)
//! - Declarative attribute mapping with special value transforms
//! - One reconciler per entity type, routed by the [`Dispatcher`]
//! - A file-backed access profile store and the registration login template
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────┐     ┌───────────────┐
//! │  Event Source   │────►│  Dispatcher  │────►│  Reconciler   │
//! │  (old/new pair) │     │              │     │  (per entity) │
//! └─────────────────┘     └──────────────┘     └───────┬───────┘
//!                                                      │
//!                              ┌───────────────────────┼───────────────────────┐
//!                              │                       ▼                       │
//!                         ┌────────────┐        ┌───────────────┐        ┌─────────────┐
//!                         │  Identity  │◄──────►│ Remote Service│◄───────│  Attribute  │
//!                         │   Cache    │        │               │        │   Mapper    │
//!                         └────────────┘        └───────────────┘        └─────────────┘
//! ```
//!
//! Events are handled strictly one at a time; [`Dispatcher::handle`] takes
//! `&mut self`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use oxsync_provisioning::{Dispatcher, EngineConfig, MemoryDirectory};
//! use oxsync_remote::memory::MemoryRemote;
//!
//! let config = EngineConfig::from_env()?;
//! let mut dispatcher = Dispatcher::new(
//!     config,
//!     Arc::new(MemoryRemote::with_tenants([10])),
//!     Arc::new(MemoryDirectory::new()),
//! )?;
//!
//! let outcome = dispatcher.handle_envelopes(old, new).await?;
//! ```

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod identity;
pub mod mapping;
pub mod profiles;
pub mod reconciler;
pub mod template;
pub mod tenant;

pub use config::{ConfigError, EngineConfig};
pub use directory::{LocalDirectory, MemoryDirectory};
pub use dispatcher::Dispatcher;
pub use error::{ReconcileError, ReconcileResult};
pub use event::{Attributes, ChangeEnvelope, ChangeEvent, Classification, EntityType};
pub use identity::{CacheError, CacheResult, CachedIdentity, IdentityCache, KvFile};
pub use mapping::{
    AttributeMapper, MappingError, MappingResult, MappingTable, MappingWarning, PropertyMapping,
    SpecialHandling,
};
pub use profiles::{AccessProfile, AccessProfileStore, ProfileError, ProfileResult};
pub use reconciler::{Outcome, ReconcileContext, Reconciler};
pub use template::{LoginTemplate, TemplateContext, TemplateError};
pub use tenant::TenantResolver;
