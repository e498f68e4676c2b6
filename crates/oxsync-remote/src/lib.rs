//! # Remote Service Seam
//!
//! Object model and capability traits for the remote multi-tenant groupware
//! service that the provisioning engine keeps in sync.
//!
//! ## Architecture
//!
//! The remote API is split into capabilities, the same way a wire client
//! exposes it:
//!
//! - [`TenantOp`] - Create, modify and delete tenants ("contexts")
//! - [`ObjectOp`] - Tenant-scoped users, groups and resources
//! - [`UserOp`] - Cross-tenant user copy and module access flags
//! - [`SecondaryAccountOp`] - Shared mailbox registrations
//!
//! [`RemoteService`] bundles all of them. [`memory::MemoryRemote`] is a
//! complete in-process implementation.
//!
//! ## Example
//!
//! ```ignore
//! use oxsync_remote::prelude::*;
//!
//! let remote = MemoryRemote::with_tenants([10]);
//! let attrs = AttributeSet::new()
//!     .with("name", "jdoe")
//!     .with("primary_email", "jdoe@example.com");
//! let id = remote.create(TenantId::new(10), ObjectKind::User, attrs).await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`ids`] - Numeric identifiers (`RemoteId`, `TenantId`)
//! - [`types`] - Object kinds
//! - [`error`] - Error types with not-found and credential classification
//! - [`operation`] - Property sets and remote objects
//! - [`traits`] - Capability traits
//! - [`memory`] - In-process remote service

pub mod error;
pub mod ids;
pub mod memory;
pub mod operation;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use oxsync_remote::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{RemoteError, RemoteResult};
    pub use crate::ids::{RemoteId, TenantId};
    pub use crate::memory::MemoryRemote;
    pub use crate::operation::{AttributeSet, AttributeValue, RemoteObject, PROP_MEMBERS, PROP_NAME};
    pub use crate::traits::{
        ObjectOp, RemoteService, SecondaryAccount, SecondaryAccountOp, TenantOp, UserOp,
    };
    pub use crate::types::ObjectKind;
}

pub use async_trait::async_trait;
