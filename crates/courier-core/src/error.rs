//! Error types for courier operations.
//!
//! Errors carry a structured [`ErrorCode`] so callers (the management API,
//! the worker's log entries) can tell configuration problems apart from
//! transient storage or network failures.

use thiserror::Error;

/// Result type alias for courier operations.
pub type CourierResult<T> = Result<T, CourierError>;

/// Main error type for all courier operations.
#[derive(Error, Debug)]
pub enum CourierError {
    /// Endpoint or service configuration is unusable (missing secret,
    /// malformed URL, disabled endpoint). Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String, code: ErrorCode },

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation { message: String, code: ErrorCode },

    /// A requested record does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String, code: ErrorCode },

    /// The caller does not own the requested record.
    #[error("Forbidden: {message}")]
    Forbidden { message: String, code: ErrorCode },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Outbound HTTP failed before a response was received.
    #[error("Network error: {message}")]
    Network { message: String, code: ErrorCode },

    /// Scheduler could not be created, started or stopped.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Configuration (CFG_xxx)
    CfgMissingSecret,
    CfgInvalidUrl,
    CfgEndpointDisabled,
    CfgInvalidFile,

    // Validation (VAL_xxx)
    ValInvalidInput,
    ValUnknownEventType,

    // Lookup (NF_xxx)
    NfJob,
    NfDeliveryLog,
    NfEndpoint,
    NfEvent,

    // Ownership
    AuthNotOwner,

    // Database (DB_xxx)
    DbOperationFailed,
    DbCorruptRow,

    // Network (NET_xxx)
    NetTimeout,
    NetConnectionFailed,
    NetRequestFailed,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CfgMissingSecret => "CFG_001",
            ErrorCode::CfgInvalidUrl => "CFG_002",
            ErrorCode::CfgEndpointDisabled => "CFG_003",
            ErrorCode::CfgInvalidFile => "CFG_004",
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValUnknownEventType => "VAL_002",
            ErrorCode::NfJob => "NF_001",
            ErrorCode::NfDeliveryLog => "NF_002",
            ErrorCode::NfEndpoint => "NF_003",
            ErrorCode::NfEvent => "NF_004",
            ErrorCode::AuthNotOwner => "AUTH_001",
            ErrorCode::DbOperationFailed => "DB_001",
            ErrorCode::DbCorruptRow => "DB_002",
            ErrorCode::NetTimeout => "NET_001",
            ErrorCode::NetConnectionFailed => "NET_002",
            ErrorCode::NetRequestFailed => "NET_003",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl CourierError {
    /// Create a configuration error with a specific code.
    pub fn configuration(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            code,
        }
    }

    /// Create an error for an endpoint that has no signing secret.
    pub fn missing_secret(endpoint_id: impl std::fmt::Display) -> Self {
        Self::configuration(
            ErrorCode::CfgMissingSecret,
            format!("endpoint {} has no signing secret", endpoint_id),
        )
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
        }
    }

    /// Create an error for an event type with no known test payload.
    pub fn unknown_event_type(event_type: &str) -> Self {
        Self::Validation {
            message: format!("unknown event type '{}'", event_type),
            code: ErrorCode::ValUnknownEventType,
        }
    }

    /// Create a not found error with a specific code.
    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            code,
        }
    }

    /// Create an ownership error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            code: ErrorCode::AuthNotOwner,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create an error for a stored row that cannot be decoded.
    pub fn corrupt_row(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbCorruptRow,
            source: None,
        }
    }

    /// Create a network error.
    pub fn network(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::Forbidden { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::Network { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether the failure is worth another delivery attempt.
    ///
    /// Configuration and validation problems will fail the same way every
    /// time, so they go straight to a terminal state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Database { .. })
    }
}

impl From<rusqlite::Error> for CourierError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for CourierError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_secret_is_configuration() {
        let err = CourierError::missing_secret("ep-1");
        assert_eq!(err.code(), ErrorCode::CfgMissingSecret);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("ep-1"));
    }

    #[test]
    fn test_network_error_is_retryable() {
        let err = CourierError::network(ErrorCode::NetTimeout, "timed out");
        assert!(err.is_retryable());
        assert_eq!(err.code().as_str(), "NET_001");
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::CfgInvalidUrl.as_str(), "CFG_002");
        assert_eq!(ErrorCode::NfDeliveryLog.as_str(), "NF_002");
        assert_eq!(ErrorCode::Internal.as_str(), "INT_001");
    }
}
