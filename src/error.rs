//! Error taxonomy shared by all connectors.
//!
//! Two layers:
//! - [`ApiError`] is what a remote client returns (status codes, transport
//!   failures, undecodable bodies).
//! - [`ConnectorError`] is what a connector surfaces to the driver. Each
//!   boundary failure maps to exactly one variant so a scheduler can tell a
//!   secret that needs rotating apart from a connectivity problem.
//!
//! Per-item failures mid-stream are not errors at all: they become
//! [`ConnectorFailure`](crate::models::ConnectorFailure) records via
//! [`ConnectorError::to_failure`].

use crate::models::ConnectorFailure;

/// Failure of a single remote request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The remote answered with a non-success status.
    #[error("request to {endpoint} failed with HTTP {status}: {message}")]
    RequestFailed {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// Connection, TLS, or timeout failure.
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The body was not the JSON shape we expected.
    #[error("malformed response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RequestFailed { status, .. } => Some(*status),
            ApiError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            ApiError::Malformed { .. } => None,
        }
    }

    pub fn malformed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Malformed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

/// Error surfaced by a connector to its driver.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Credentials were never loaded, or a required secret is absent.
    #[error("missing credentials for {0}")]
    MissingCredential(String),

    /// The remote rejected authentication (HTTP 401).
    #[error("credentials expired or invalid: {0}")]
    CredentialExpired(String),

    /// The remote rejected the operation for this principal (HTTP 403).
    #[error("insufficient permissions: {0}")]
    InsufficientPermissions(String),

    /// Any other validation-time failure. The original cause is preserved.
    #[error("connector validation failed: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A remote call failed while producing batches.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A checkpoint blob this connector cannot interpret.
    #[error("incompatible checkpoint: {0}")]
    IncompatibleCheckpoint(String),

    /// The next checkpoint was requested before the item stream was drained.
    #[error("checkpoint is only available after the item stream is exhausted")]
    CheckpointNotReady,

    /// The connector does not support the requested capability or input.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, ConnectorError>;

impl ConnectorError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConnectorError::Validation {
            message: message.into(),
            source: None,
        }
    }

    pub fn validation_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Validation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Stable snake_case tag for logs and failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorError::MissingCredential(_) => "missing_credential",
            ConnectorError::CredentialExpired(_) => "credential_expired",
            ConnectorError::InsufficientPermissions(_) => "insufficient_permissions",
            ConnectorError::Validation { .. } => "validation",
            ConnectorError::Api(ApiError::RequestFailed { .. }) => "request_failed",
            ConnectorError::Api(ApiError::Transport { .. }) => "transport",
            ConnectorError::Api(ApiError::Malformed { .. }) => "malformed_response",
            ConnectorError::IncompatibleCheckpoint(_) => "incompatible_checkpoint",
            ConnectorError::CheckpointNotReady => "checkpoint_not_ready",
            ConnectorError::Unsupported(_) => "unsupported",
        }
    }

    /// Whether an operator must act on credentials before retrying.
    pub fn is_credential_problem(&self) -> bool {
        matches!(
            self,
            ConnectorError::MissingCredential(_)
                | ConnectorError::CredentialExpired(_)
                | ConnectorError::InsufficientPermissions(_)
        )
    }

    /// Record this error against a single document, for inline emission.
    pub fn to_failure(&self, document_id: impl Into<String>) -> ConnectorFailure {
        ConnectorFailure::document(document_id, self.kind(), self.to_string())
    }
}

/// Map a failure of the validation probe into the shared taxonomy.
///
/// `source_name` is used in messages only, e.g. `"wiki"`.
pub fn classify_validation_error(source_name: &str, err: ApiError) -> ConnectorError {
    match err.status() {
        Some(401) => ConnectorError::CredentialExpired(format!(
            "your {} credentials appear to be invalid or expired (HTTP 401)",
            source_name
        )),
        Some(403) => ConnectorError::InsufficientPermissions(format!(
            "the configured {} token does not have sufficient permissions (HTTP 403)",
            source_name
        )),
        Some(status) => ConnectorError::validation_with(
            format!("unexpected {} error (status={})", source_name, status),
            err,
        ),
        None => ConnectorError::validation_with(
            format!(
                "unexpected error while validating {} connector settings",
                source_name
            ),
            err,
        ),
    }
}
