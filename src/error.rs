//! Error types for the rendering and delivery pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering or delivering an image
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed or empty input. Not retryable.
    #[error("Invalid request: {0}")]
    ValidationFailure(String),

    /// Quiescence, context permit or capture exceeded the deadline
    #[error("Rendering timed out after {0}ms")]
    RenderTimeout(u64),

    /// The engine process crashed, disconnected or failed to launch
    #[error("Rendering engine failure: {0}")]
    RenderEngineFailure(String),

    /// Storage destination is missing required settings
    #[error("Storage not configured: {0}")]
    NotConfigured(String),

    /// Upstream storage rejected the request
    #[error("Storage upload failed ({code}): {message}")]
    StorageUploadFailure { code: String, message: String },

    /// Upstream storage refused to remove an object
    #[error("Storage delete failed ({code}): {message}")]
    StorageDeleteFailure { code: String, message: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Anything not covered above
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code, used in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ValidationFailure(_) => "VALIDATION_ERROR",
            Error::RenderTimeout(_) => "RENDER_TIMEOUT",
            Error::RenderEngineFailure(_) => "RENDER_ENGINE_FAILURE",
            Error::NotConfigured(_) => "NOT_CONFIGURED",
            Error::StorageUploadFailure { .. } => "STORAGE_UPLOAD_FAILURE",
            Error::StorageDeleteFailure { .. } => "STORAGE_DELETE_FAILURE",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may reasonably retry the whole request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RenderTimeout(_)
                | Error::RenderEngineFailure(_)
                | Error::StorageUploadFailure { .. }
                | Error::StorageDeleteFailure { .. }
        )
    }
}

// The browser driver reports everything as `anyhow::Error`.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::RenderEngineFailure(format!("{:#}", err))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::ValidationFailure("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(Error::RenderTimeout(10).code(), "RENDER_TIMEOUT");
        assert_eq!(
            Error::StorageUploadFailure { code: "AccessDenied".into(), message: "nope".into() }.code(),
            "STORAGE_UPLOAD_FAILURE"
        );
    }

    #[test]
    fn upstream_code_is_part_of_message() {
        let e = Error::StorageUploadFailure { code: "NoSuchBucket".into(), message: "missing".into() };
        assert_eq!(e.to_string(), "Storage upload failed (NoSuchBucket): missing");
    }

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(Error::RenderTimeout(1).is_retryable());
        assert!(!Error::NotConfigured("bucket".into()).is_retryable());
        assert!(!Error::ValidationFailure("empty".into()).is_retryable());
    }
}
