//! Remote service error types
//!
//! Errors raised by remote service clients, classified so the engine can
//! tell "skip this event" apart from real failures.

use thiserror::Error;

use crate::ids::TenantId;
use crate::types::ObjectKind;

/// Error that can occur during a remote service call.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// No admin credentials are known for the tenant.
    #[error("no credentials configured for tenant {tenant}")]
    MissingCredentials { tenant: TenantId },

    /// Failed to reach the remote service.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Tenant does not exist remotely.
    #[error("tenant not found: {tenant}")]
    TenantNotFound { tenant: TenantId },

    /// Object not found in the remote service (modify/delete target missing).
    #[error("{kind} not found: {identifier}")]
    ObjectNotFound { kind: ObjectKind, identifier: String },

    /// An object with the same name already exists in the tenant.
    #[error("{kind} already exists: {identifier}")]
    ObjectAlreadyExists { kind: ObjectKind, identifier: String },

    /// The request was rejected as malformed.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The remote call failed for another reason.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RemoteError {
    /// Whether the error means the addressed object or tenant is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RemoteError::ObjectNotFound { .. } | RemoteError::TenantNotFound { .. }
        )
    }

    /// Whether the task for this tenant has to be abandoned because no
    /// credentials are available.
    pub fn is_missing_credentials(&self) -> bool {
        matches!(self, RemoteError::MissingCredentials { .. })
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            RemoteError::MissingCredentials { .. } => "MISSING_CREDENTIALS",
            RemoteError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            RemoteError::TenantNotFound { .. } => "TENANT_NOT_FOUND",
            RemoteError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            RemoteError::ObjectAlreadyExists { .. } => "OBJECT_EXISTS",
            RemoteError::InvalidRequest { .. } => "INVALID_REQUEST",
            RemoteError::OperationFailed { .. } => "OPERATION_FAILED",
        }
    }

    // Convenience constructors

    /// Create a not found error.
    pub fn not_found(kind: ObjectKind, identifier: impl Into<String>) -> Self {
        RemoteError::ObjectNotFound {
            kind,
            identifier: identifier.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: ObjectKind, identifier: impl Into<String>) -> Self {
        RemoteError::ObjectAlreadyExists {
            kind,
            identifier: identifier.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        RemoteError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        RemoteError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        RemoteError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error with source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RemoteError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for remote service calls.
pub type RemoteResult<T> = Result<T, RemoteError>;
