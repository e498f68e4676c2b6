//! Access profile store
//!
//! Named sets of module rights, kept in a flat file:
//!
//! ```text
//! # Module access definitions. Generated, do not edit.
//!
//! premium=calendar,contacts,infostore,webmail
//!
//! basic=webmail
//! ```
//!
//! The file is rewritten in full on every change.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

/// Rights a profile can grant. Local access-profile objects carry one
/// boolean flag per right.
pub const KNOWN_RIGHTS: &[&str] = &[
    "activesync",
    "calendar",
    "collectemailaddresses",
    "contacts",
    "deniedportal",
    "delegatetask",
    "editgroup",
    "editpassword",
    "editpublicfolders",
    "editresource",
    "globaladdressbookdisabled",
    "ical",
    "infostore",
    "multiplemailaccounts",
    "publication",
    "publicfoldereditable",
    "readcreatesharedfolders",
    "subscription",
    "syncml",
    "tasks",
    "usm",
    "vcard",
    "webdav",
    "webdavxml",
    "webmail",
];

const HEADER: &str = "# Module access definitions. Generated, do not edit.";

/// Access profile store errors.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: expected name=rights, got '{content}'")]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("invalid profile name '{0}'")]
    InvalidName(String),
}

/// Result type for profile store operations.
pub type ProfileResult<T> = Result<T, ProfileError>;

/// A named set of rights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessProfile {
    pub name: String,
    pub rights: BTreeSet<String>,
}

impl AccessProfile {
    pub fn new<I, S>(name: impl Into<String>, rights: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            rights: rights.into_iter().map(Into::into).collect(),
        }
    }
}

/// File-backed access profile store.
#[derive(Debug)]
pub struct AccessProfileStore {
    path: PathBuf,
    profiles: BTreeMap<String, BTreeSet<String>>,
    stale: bool,
}

impl AccessProfileStore {
    /// Open the store. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> ProfileResult<Self> {
        let mut store = Self {
            path: path.into(),
            profiles: BTreeMap::new(),
            stale: false,
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-read the file.
    pub fn reload(&mut self) -> ProfileResult<()> {
        self.profiles = if self.path.exists() {
            let raw = fs::read_to_string(&self.path).map_err(|source| ProfileError::Io {
                path: self.path.clone(),
                source,
            })?;
            self.parse(&raw)?
        } else {
            BTreeMap::new()
        };
        self.stale = false;
        debug!(path = %self.path.display(), profiles = self.profiles.len(), "access profiles loaded");
        Ok(())
    }

    /// Mark the in-memory table stale; the next access re-reads the file.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    fn ensure_fresh(&mut self) -> ProfileResult<()> {
        if self.stale {
            self.reload()?;
        }
        Ok(())
    }

    /// Look up a profile.
    pub fn get(&mut self, name: &str) -> ProfileResult<Option<AccessProfile>> {
        self.ensure_fresh()?;
        Ok(self.profiles.get(name).map(|rights| AccessProfile {
            name: name.to_string(),
            rights: rights.clone(),
        }))
    }

    /// Profile names in order.
    pub fn names(&mut self) -> ProfileResult<Vec<String>> {
        self.ensure_fresh()?;
        Ok(self.profiles.keys().cloned().collect())
    }

    /// Create or overwrite a profile.
    pub fn set(&mut self, profile: AccessProfile) -> ProfileResult<()> {
        validate_name(&profile.name)?;
        self.ensure_fresh()?;
        info!(profile = %profile.name, rights = profile.rights.len(), "storing access profile");
        self.profiles.insert(profile.name, profile.rights);
        self.persist()
    }

    /// Remove a profile. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> ProfileResult<bool> {
        self.ensure_fresh()?;
        if self.profiles.remove(name).is_none() {
            return Ok(false);
        }
        info!(profile = %name, "removing access profile");
        self.persist()?;
        Ok(true)
    }

    fn parse(&self, raw: &str) -> ProfileResult<BTreeMap<String, BTreeSet<String>>> {
        let mut profiles = BTreeMap::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, rights)) = line.split_once('=') else {
                return Err(ProfileError::Malformed {
                    path: self.path.clone(),
                    line: index + 1,
                    content: line.to_string(),
                });
            };
            let rights = rights
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
            profiles.insert(name.trim().to_string(), rights);
        }
        Ok(profiles)
    }

    fn persist(&self) -> ProfileResult<()> {
        let mut out = String::from(HEADER);
        out.push('\n');
        for (name, rights) in &self.profiles {
            out.push('\n');
            out.push_str(name);
            out.push('=');
            out.push_str(&rights.iter().cloned().collect::<Vec<_>>().join(","));
            out.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ProfileError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, out).map_err(|source| ProfileError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn validate_name(name: &str) -> ProfileResult<()> {
    if name.is_empty() || name.contains(|c: char| matches!(c, '=' | '\n' | '#')) || name.trim() != name {
        return Err(ProfileError::InvalidName(name.to_string()));
    }
    Ok(())
}
