//! Identity cache
//!
//! Persistent mapping from a local object's durable key to its remote
//! identity: remote id, owning tenant and remote login. Backed by three
//! ordered string maps on disk, one per logical cache, each rewritten on
//! every `set`. Single writer, last write wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use oxsync_remote::ids::{RemoteId, TenantId};

/// File holding remote ids by local key.
pub const REMOTE_IDS_FILE: &str = "remote_ids.json";
/// File holding owning tenants by local key.
pub const REMOTE_TENANTS_FILE: &str = "remote_tenants.json";
/// File holding remote logins by local key.
pub const REMOTE_LOGINS_FILE: &str = "remote_logins.json";

/// Identity cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not a valid map.
    #[error("cache file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value does not parse.
    #[error("invalid cached value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// An ordered string→string map persisted as one JSON file.
#[derive(Debug)]
pub struct KvFile {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl KvFile {
    /// Open the map at `path`, creating an empty file if absent.
    pub fn open(path: impl Into<PathBuf>) -> CacheResult<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let file = Self {
                path,
                entries: BTreeMap::new(),
            };
            file.persist()?;
            return Ok(file);
        }

        let raw = fs::read_to_string(&path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        let entries = if raw.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&raw).map_err(|source| CacheError::Corrupt {
                path: path.clone(),
                source,
            })?
        };
        Ok(Self { path, entries })
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set (`Some`) or remove (`None`) a value and persist immediately.
    pub fn set(&mut self, key: &str, value: Option<String>) -> CacheResult<()> {
        match value {
            Some(v) => {
                self.entries.insert(key.to_string(), v);
            }
            None => {
                if self.entries.remove(key).is_none() {
                    return Ok(());
                }
            }
        }
        self.persist()
    }

    fn persist(&self) -> CacheResult<()> {
        let tmp = self.path.with_extension("tmp");
        let raw = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            CacheError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&tmp, raw).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Remote identity of one local object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedIdentity {
    /// Remote id inside the tenant.
    pub remote_id: RemoteId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Remote login (users) or name (groups, resources).
    pub login: String,
}

impl CachedIdentity {
    /// Create a cached identity.
    pub fn new(remote_id: RemoteId, tenant: TenantId, login: impl Into<String>) -> Self {
        Self {
            remote_id,
            tenant,
            login: login.into(),
        }
    }
}

/// The identity cache.
#[derive(Debug)]
pub struct IdentityCache {
    ids: KvFile,
    tenants: KvFile,
    logins: KvFile,
}

impl IdentityCache {
    /// Open (or create) the three cache files inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> CacheResult<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            ids: KvFile::open(dir.join(REMOTE_IDS_FILE))?,
            tenants: KvFile::open(dir.join(REMOTE_TENANTS_FILE))?,
            logins: KvFile::open(dir.join(REMOTE_LOGINS_FILE))?,
        })
    }

    /// Look up the remote identity of `key`. Entries without a remote id
    /// (never created, or reset after a delete) yield `None`.
    pub fn get(&self, key: &str) -> CacheResult<Option<CachedIdentity>> {
        let Some(raw_id) = self.ids.get(key) else {
            return Ok(None);
        };
        let remote_id = raw_id.parse().map_err(|_| CacheError::InvalidValue {
            key: key.to_string(),
            value: raw_id.to_string(),
        })?;
        let Some(tenant) = self.tenant_of(key)? else {
            return Ok(None);
        };
        let login = self.logins.get(key).unwrap_or_default().to_string();
        Ok(Some(CachedIdentity {
            remote_id,
            tenant,
            login,
        }))
    }

    /// Store (`Some`) or remove (`None`) the identity of `key`.
    #[instrument(skip(self, value))]
    pub fn set(&mut self, key: &str, value: Option<CachedIdentity>) -> CacheResult<()> {
        match value {
            Some(identity) => {
                debug!(tenant = %identity.tenant, "caching remote identity");
                self.ids.set(key, Some(identity.remote_id.to_string()))?;
                self.tenants.set(key, Some(identity.tenant.to_string()))?;
                self.logins.set(key, Some(identity.login))?;
            }
            None => {
                debug!("dropping remote identity");
                self.ids.set(key, None)?;
                self.tenants.set(key, None)?;
                self.logins.set(key, None)?;
            }
        }
        Ok(())
    }

    /// The tenant last recorded for `key`, even after a reset.
    pub fn tenant_of(&self, key: &str) -> CacheResult<Option<TenantId>> {
        match self.tenants.get(key) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| CacheError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Move the entry of `old_key` to `new_key`.
    pub fn rename(&mut self, old_key: &str, new_key: &str) -> CacheResult<()> {
        if old_key == new_key {
            return Ok(());
        }
        if let Some(identity) = self.get(old_key)? {
            debug!(old_key, new_key, "moving cached identity");
            self.set(new_key, Some(identity))?;
        }
        self.set(old_key, None)
    }

    /// Forget the remote id and login of a deleted object, leaving the
    /// default tenant as a sentinel.
    pub fn reset(&mut self, key: &str, default_tenant: TenantId) -> CacheResult<()> {
        self.ids.set(key, None)?;
        self.logins.set(key, None)?;
        self.tenants.set(key, Some(default_tenant.to_string()))
    }
}
