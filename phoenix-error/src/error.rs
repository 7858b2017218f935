//! The main Error type for phoenix

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// Context key under which the failing pipeline stage is recorded.
const STAGE_KEY: &str = "stage";

/// The unified error type for all phoenix operations.
///
/// This error type provides:
/// - `kind`: What type of error occurred
/// - `message`: Human-readable description
/// - `status`: Whether the error is retryable
/// - `operation`: What operation caused the error
/// - `context`: Key-value pairs for debugging (including the pipeline stage)
/// - `source`: The underlying error (if any)
///
/// # Example
///
/// ```rust
/// use phoenix_error::{Error, ErrorKind, ErrorStatus};
///
/// let err = Error::new(ErrorKind::InferenceFailed, "model returned empty response")
///     .with_operation("agent::execute")
///     .with_status(ErrorStatus::Temporary)
///     .with_stage("verifying")
///     .with_context("model", "gemini-1.5-flash");
///
/// assert_eq!(err.kind(), ErrorKind::InferenceFailed);
/// assert_eq!(err.stage(), Some("verifying"));
/// assert!(err.status().is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = if kind.is_retryable() {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        };

        Self {
            kind,
            message: message.into(),
            status,
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error status
    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Get the operation that caused this error
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Get the context key-value pairs
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Look up a context value by key (first match wins)
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The pipeline stage this error was raised in, if any
    pub fn stage(&self) -> Option<&str> {
        self.context_value(STAGE_KEY)
    }

    /// Get the source error (if any)
    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    // =========================================================================
    // Builders (chainable)
    // =========================================================================

    /// Set the error status
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as temporary (retryable)
    pub fn temporary(mut self) -> Self {
        self.status = ErrorStatus::Temporary;
        self
    }

    /// Mark as permanent (not retryable)
    pub fn permanent(mut self) -> Self {
        self.status = ErrorStatus::Permanent;
        self
    }

    /// Set the operation that caused this error.
    ///
    /// If an operation was already set, the previous one is moved to context
    /// as "called" to preserve the call chain.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Record the pipeline stage. An already recorded stage is kept, so the
    /// innermost stage wins when an error crosses several layers.
    pub fn with_stage(self, stage: impl Into<String>) -> Self {
        if self.stage().is_some() {
            return self;
        }
        self.with_context(STAGE_KEY, stage)
    }

    /// Set the source error.
    ///
    /// # Panics (debug only)
    /// Panics in debug mode if source was already set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }

    // =========================================================================
    // Status mutations
    // =========================================================================

    /// Mark as persistent after failed retries
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}

// =============================================================================
// Display - compact, single-line format for logs
// =============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.context.is_empty() {
            write!(f, ", context {{ ")?;
            for (i, (key, value)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", key, value)?;
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        Ok(())
    }
}

// =============================================================================
// Debug - verbose, multi-line format for debugging
// =============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.message.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Message: {}", self.message)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Context:")?;
            for (key, value) in &self.context {
                writeln!(f, "        {}: {}", key, value)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "    Source: {:?}", source)?;
        }

        Ok(())
    }
}

// =============================================================================
// std::error::Error implementation
// =============================================================================

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// =============================================================================
// Convenient From implementations (be careful not to leak raw errors!)
// =============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::IoFailed, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

// =============================================================================
// Convenience constructors
// =============================================================================

impl Error {
    /// Create an Unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    /// Create a ConfigInvalid error naming the offending setting
    pub fn config_invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message).with_context("key", key)
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Create a NotFound error
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorKind::NotFound, format!("{} '{}' not found", what, id))
            .with_context(what, id)
    }

    /// Create a Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create a StageTimeout error for the given stage
    pub fn stage_timeout(stage: impl Into<String>, secs: u64) -> Self {
        let stage = stage.into();
        Self::new(
            ErrorKind::StageTimeout,
            format!("stage '{}' exceeded {}s", stage, secs),
        )
        .with_stage(stage)
        .with_context("timeout_secs", secs.to_string())
    }

    /// Create a MalformedOutput error
    pub fn malformed_output(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedOutput, message)
    }

    /// Create a Cancelled error, naming the stage that would have started next
    pub fn cancelled(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self::new(ErrorKind::Cancelled, format!("run cancelled before '{}'", stage))
            .with_stage(stage)
    }

    /// Create an InferenceFailed error
    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InferenceFailed, message)
    }

    /// Create a ToolFailed error
    pub fn tool_failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolFailed, reason).with_context("tool", tool)
    }

    /// Create a ToolTimeout error
    pub fn tool_timeout(tool: impl Into<String>, secs: u64) -> Self {
        let tool = tool.into();
        Self::new(
            ErrorKind::ToolTimeout,
            format!("tool '{}' timed out after {}s", tool, secs),
        )
        .with_context("tool", tool)
    }

    /// Create a SerializationFailed error
    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationFailed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::new(ErrorKind::ConfigInvalid, "GOOGLE_API_KEY is not set");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.message(), "GOOGLE_API_KEY is not set");
        assert_eq!(err.status(), ErrorStatus::Permanent);
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::new(ErrorKind::InferenceFailed, "timeout")
            .with_operation("agent::execute")
            .with_context("model", "gemini-1.5-flash")
            .with_context("turn", "3");

        assert_eq!(err.operation(), "agent::execute");
        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context()[0], ("model", "gemini-1.5-flash".to_string()));
        assert_eq!(err.context_value("turn"), Some("3"));
    }

    #[test]
    fn test_operation_chaining() {
        let err = Error::new(ErrorKind::IoFailed, "write failed")
            .with_operation("store::save")
            .with_operation("cli::replay");

        assert_eq!(err.operation(), "cli::replay");
        assert_eq!(err.context().len(), 1);
        assert_eq!(err.context()[0], ("called", "store::save".to_string()));
    }

    #[test]
    fn test_innermost_stage_wins() {
        let err = Error::inference_failed("empty response")
            .with_stage("fixing")
            .with_stage("verifying");

        assert_eq!(err.stage(), Some("fixing"));
    }

    #[test]
    fn test_temporary_status() {
        let err = Error::new(ErrorKind::InferenceFailed, "rate limited");
        assert!(err.is_retryable());

        let err = Error::new(ErrorKind::MalformedOutput, "empty");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_persist() {
        let err = Error::new(ErrorKind::NetworkFailed, "connection refused").temporary();
        assert!(err.is_retryable());

        let err = err.persist();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_display() {
        let err = Error::stage_timeout("fixing", 300).with_operation("pipeline::run");

        let display = format!("{}", err);
        assert!(display.contains("StageTimeout"));
        assert!(display.contains("temporary"));
        assert!(display.contains("pipeline::run"));
        assert!(display.contains("stage: fixing"));
        assert!(display.contains("timeout_secs: 300"));
    }

    #[test]
    fn test_convenience_constructors() {
        let err = Error::config_invalid("GOOGLE_API_KEY", "placeholder credential");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("key"), Some("GOOGLE_API_KEY"));

        let err = Error::cancelled("verifying");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.stage(), Some("verifying"));

        let err = Error::not_found("task", "1234");
        assert!(err.message().contains("1234"));

        let err = Error::tool_timeout("code_interpreter", 30);
        assert_eq!(err.kind(), ErrorKind::ToolTimeout);
    }

    #[test]
    fn test_set_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::new(ErrorKind::IoFailed, "runs.json not readable").set_source(io_err);

        assert!(err.source_ref().is_some());
        assert!(std::error::Error::source(&err).is_some());
    }
}
