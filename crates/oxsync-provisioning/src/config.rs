use std::path::PathBuf;

use url::Url;

use oxsync_remote::ids::TenantId;

use crate::template::LoginTemplate;

/// Default data directory for the identity cache and local stores.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/oxsync";
/// Default tenant for objects without one.
pub const DEFAULT_TENANT: i64 = 10;
/// Default mail quota in MiB for new tenants.
pub const DEFAULT_QUOTA: i64 = 1000;
pub const DEFAULT_IMAP_SERVER: &str = "imap://localhost:143";
pub const DEFAULT_SMTP_SERVER: &str = "smtp://localhost:587";

const MAPPING_FILE: &str = "AttributeMapping.json";
const PROFILES_FILE: &str = "ModuleAccessDefinitions.properties";

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the identity cache files.
    pub data_dir: PathBuf,

    /// Tenant recorded for objects removed from the remote service.
    pub default_tenant: TenantId,

    /// Quota in MiB applied to tenants created without one.
    pub default_quota: i64,

    /// Default IMAP server; scheme, host and port fill gaps in user values.
    pub imap_server: Url,

    /// Default SMTP server.
    pub smtp_server: Url,

    /// Login template for functional-account registrations.
    pub login_template: LoginTemplate,

    /// Attribute mapping file. Missing file means built-in tables.
    pub mapping_file: PathBuf,

    /// Access profile store file.
    pub profiles_file: PathBuf,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let data_dir = PathBuf::from(
            reader("OX_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string()),
        );

        let default_tenant = reader("DEFAULT_CONTEXT")
            .unwrap_or_else(|_| DEFAULT_TENANT.to_string())
            .parse::<TenantId>()
            .map_err(|e| ConfigError::InvalidValue("DEFAULT_CONTEXT".into(), e.to_string()))?;

        let default_quota = reader("DEFAULT_QUOTA")
            .unwrap_or_else(|_| DEFAULT_QUOTA.to_string())
            .trim()
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidValue("DEFAULT_QUOTA".into(), e.to_string()))?;
        if default_quota < 0 {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_QUOTA".into(),
                "must not be negative".into(),
            ));
        }

        let imap_server = parse_server(&reader, "OX_IMAP_SERVER", DEFAULT_IMAP_SERVER)?;
        let smtp_server = parse_server(&reader, "OX_SMTP_SERVER", DEFAULT_SMTP_SERVER)?;

        let login_template = match reader("OX_FUNCTIONAL_ACCOUNT_LOGIN_TEMPLATE") {
            Ok(text) => LoginTemplate::parse(&text).map_err(|e| {
                ConfigError::InvalidValue(
                    "OX_FUNCTIONAL_ACCOUNT_LOGIN_TEMPLATE".into(),
                    e.to_string(),
                )
            })?,
            Err(_) => LoginTemplate::default(),
        };

        let mapping_file = reader("OX_ATTRIBUTE_MAPPING")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(MAPPING_FILE));

        let profiles_file = reader("OX_ACCESS_PROFILES")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(PROFILES_FILE));

        Ok(Self {
            data_dir,
            default_tenant,
            default_quota,
            imap_server,
            smtp_server,
            login_template,
            mapping_file,
            profiles_file,
        })
    }

    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = data_dir.into().to_string_lossy().into_owned();
        Self::from_reader(move |key| match key {
            "OX_DATA_DIR" => Ok(data_dir.clone()),
            _ => Err(std::env::VarError::NotPresent),
        })
    }
}

fn parse_server<F>(reader: &F, key: &str, default: &str) -> Result<Url, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let raw = reader(key).unwrap_or_else(|_| default.to_string());
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "server URL has no host".into(),
        ));
    }
    Ok(url)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
