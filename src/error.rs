//! Error types for the LUN orchestrator
//!
//! Provides structured error types for volume management, backing store
//! provisioning, target binding and the control plane API.

use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid backend type: {0} (must be lvm, block, or fileio)")]
    InvalidBackend(String),

    #[error("Invalid initiator name: {0} (must start with 'iqn.' or 'eui.')")]
    InvalidInitiator(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Insufficient capacity: requested {requested} bytes, available {available} bytes")]
    InsufficientCapacity { requested: u64, available: u64 },

    #[error("Refusing to modify system volume group: {name}")]
    SystemVolumeGroup { name: String },

    // =========================================================================
    // External Tool Errors
    // =========================================================================
    #[error("Tool not available: {tool}")]
    ToolUnavailable { tool: String },

    #[error("Failed to spawn {command}: {reason}")]
    CommandSpawn { command: String, reason: String },

    #[error("{command} failed (exit {status}): {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("iSCSI target unavailable: {0}")]
    TargetUnavailable(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Unexpected {tool} output: {reason}")]
    OutputParse { tool: String, reason: String },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classification used by callers to decide how to report an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any external operation; the caller can fix the input
    Validation,
    /// The named resource does not exist
    NotFound,
    /// Not enough free capacity to satisfy the request
    ResourceExhausted,
    /// A privileged tool failed or the storage stack misbehaved
    External,
    /// Bug or misconfiguration inside the orchestrator
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::NotFound => "not_found",
            ErrorClass::ResourceExhausted => "resource_exhausted",
            ErrorClass::External => "external",
            ErrorClass::Internal => "internal",
        }
    }
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_)
            | Error::InvalidBackend(_)
            | Error::InvalidInitiator(_)
            | Error::ResourceExists { .. }
            | Error::SystemVolumeGroup { .. } => ErrorClass::Validation,

            Error::ResourceNotFound { .. } => ErrorClass::NotFound,

            Error::InsufficientCapacity { .. } => ErrorClass::ResourceExhausted,

            Error::ToolUnavailable { .. }
            | Error::CommandSpawn { .. }
            | Error::CommandFailed { .. }
            | Error::TargetUnavailable(_)
            | Error::OutputParse { .. }
            | Error::Io(_) => ErrorClass::External,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorClass::Internal,
        }
    }

    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CommandFailed { .. } | Error::CommandSpawn { .. } | Error::TargetUnavailable(_)
        )
    }

    /// Check if this error was caused by the caller's input
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Validation | ErrorClass::NotFound | ErrorClass::ResourceExhausted
        )
    }

    /// Shorthand for a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Shorthand for an already-exists error
    pub fn exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ResourceExists {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;
