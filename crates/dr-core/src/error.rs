//! Unified error type for docrelay.
//!
//! Every synchronous operation (submit, status, fetch, cleanup, config
//! loading) returns [`Error`], which carries enough context for API handlers
//! to derive an HTTP status code via [`Error::http_status`]. Failures that
//! happen in the background after submission are recorded on the job as
//! [`crate::job::JobError`] instead.

use std::fmt;
use std::time::Duration;

/// Unified error type covering all synchronous failure modes in docrelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "artifact").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A job with the same id already exists.
    #[error("Job already exists: {id}")]
    DuplicateId {
        /// The conflicting job id.
        id: String,
    },

    /// The uploaded file does not have an accepted extension.
    #[error("Invalid file type: {filename} (expected {expected})")]
    InvalidFileType {
        /// File name as supplied by the caller.
        filename: String,
        /// Human-readable list of accepted extensions.
        expected: String,
    },

    /// The uploaded file exceeds the configured size ceiling.
    #[error("File too large: maximum size is {max} bytes")]
    FileTooLarge {
        /// The configured ceiling in bytes.
        max: u64,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An artifact was requested before the job completed.
    #[error("Job {id} is not ready: status is {status}")]
    NotReady {
        /// The job id.
        id: String,
        /// The job's current status.
        status: String,
    },

    /// A job status transition that the state machine does not allow.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status before the attempted transition.
        from: String,
        /// Requested target status.
        to: String,
    },

    /// An external tool (soffice, docx2pdf) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool exceeded its wall-clock budget and was killed.
    #[error("Tool error [{tool}]: timed out after {timeout:?}")]
    ToolTimeout {
        /// Name of the tool that timed out.
        tool: String,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::DuplicateId { .. } => 409,
            Error::InvalidFileType { .. } => 400,
            Error::FileTooLarge { .. } => 413,
            Error::Validation(_) => 400,
            Error::NotReady { .. } => 400,
            Error::InvalidTransition { .. } => 409,
            Error::Tool { .. } => 502,
            Error::ToolTimeout { .. } => 504,
            Error::Config(_) => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::DuplicateId { .. } => "duplicate_id",
            Error::InvalidFileType { .. } => "invalid_file_type",
            Error::FileTooLarge { .. } => "file_too_large",
            Error::Validation(_) => "validation_error",
            Error::NotReady { .. } => "not_ready",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Tool { .. } => "tool_error",
            Error::ToolTimeout { .. } => "tool_timeout",
            Error::Config(_) => "config_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::NotReady`].
    pub fn not_ready(id: impl fmt::Display, status: impl fmt::Display) -> Self {
        Error::NotReady {
            id: id.to_string(),
            status: status.to_string(),
        }
    }

    /// Whether this error means the entity is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
