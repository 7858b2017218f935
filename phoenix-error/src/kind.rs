//! Error kinds for phoenix operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on ErrorKind to decide what to show the user and whether
/// resubmitting could help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// Missing or placeholder credential, or an unparsable setting
    ConfigInvalid,

    /// Invalid argument passed to function
    InvalidArgument,

    /// A referenced run or task does not exist
    NotFound,

    /// The resource is busy with another operation
    Conflict,

    // =========================================================================
    // Pipeline errors
    // =========================================================================
    /// A pipeline stage failed (LLM or tool failure inside Fix/Verify)
    StageFailed,

    /// A pipeline stage exceeded its time budget
    StageTimeout,

    /// Stage output could not be normalized to text
    MalformedOutput,

    /// The run was cancelled between stages
    Cancelled,

    // =========================================================================
    // Inference/LLM errors
    // =========================================================================
    /// LLM inference failed
    InferenceFailed,

    /// Provider rejected the credential
    AuthenticationFailed,

    /// Provider not available
    ProviderUnavailable,

    /// Rate limit exceeded
    RateLimited,

    /// Network error
    NetworkFailed,

    // =========================================================================
    // Tool errors
    // =========================================================================
    /// Sandboxed tool failed to run
    ToolFailed,

    /// Sandboxed tool timed out
    ToolTimeout,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// IO operation failed
    IoFailed,

    /// Serialization/deserialization failed
    SerializationFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",

            // Pipeline
            ErrorKind::StageFailed => "StageFailed",
            ErrorKind::StageTimeout => "StageTimeout",
            ErrorKind::MalformedOutput => "MalformedOutput",
            ErrorKind::Cancelled => "Cancelled",

            // Inference
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::NetworkFailed => "NetworkFailed",

            // Tool
            ErrorKind::ToolFailed => "ToolFailed",
            ErrorKind::ToolTimeout => "ToolTimeout",

            // IO
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::StageTimeout
                | ErrorKind::ToolTimeout
                | ErrorKind::ProviderUnavailable
        )
    }

    /// Whether this kind originates inside a pipeline stage.
    ///
    /// Malformed output counts as a stage failure.
    pub fn is_stage_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::StageFailed | ErrorKind::StageTimeout | ErrorKind::MalformedOutput
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
