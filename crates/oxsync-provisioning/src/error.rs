//! Reconciliation error types.

use thiserror::Error;

use oxsync_remote::error::RemoteError;

use crate::config::ConfigError;
use crate::identity::CacheError;
use crate::mapping::MappingError;
use crate::profiles::ProfileError;
use crate::template::TemplateError;

/// Errors that can occur while reconciling one change event.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A required cross-reference could not be resolved. Not a failure:
    /// the event is dropped without side effects.
    #[error("skipped: {reason}")]
    Skip { reason: String },

    /// Remote service error.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Identity cache error.
    #[error("Identity cache error: {0}")]
    Cache(#[from] CacheError),

    /// Attribute mapping configuration error.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Access profile store error.
    #[error("Access profile error: {0}")]
    Profile(#[from] ProfileError),

    /// Login template error.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The change event itself is malformed.
    #[error("Invalid event: {message}")]
    InvalidEvent { message: String },
}

impl ReconcileError {
    /// Create a skip condition.
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }

    /// Create an invalid event error.
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            message: message.into(),
        }
    }

    /// Whether the event should be abandoned quietly rather than reported.
    ///
    /// Missing tenant credentials are treated like a skip.
    pub fn is_skip(&self) -> bool {
        match self {
            ReconcileError::Skip { .. } => true,
            ReconcileError::Remote(e) => e.is_missing_credentials(),
            _ => false,
        }
    }

    /// Whether the error stems from operator misconfiguration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReconcileError::Mapping(_) | ReconcileError::Template(_) | ReconcileError::Config(_)
        )
    }
}

/// Result type for reconciliation.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use oxsync_remote::ids::TenantId;

    #[test]
    fn test_skip_classification() {
        assert!(ReconcileError::skip("no tenant").is_skip());
        assert!(ReconcileError::Remote(RemoteError::MissingCredentials {
            tenant: TenantId::new(3)
        })
        .is_skip());
        assert!(!ReconcileError::Remote(RemoteError::connection_failed("refused")).is_skip());
    }

    #[test]
    fn test_configuration_classification() {
        let err = ReconcileError::Template(TemplateError::EmptyPlaceholder { position: 0 });
        assert!(err.is_configuration());
        assert!(!err.is_skip());
    }

    #[test]
    fn test_error_display() {
        let err = ReconcileError::skip("tenant attribute missing");
        assert_eq!(err.to_string(), "skipped: tenant attribute missing");
    }
}
