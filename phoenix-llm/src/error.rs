//! LLM error types
//!
//! Re-exports phoenix-error and maps provider failures onto it.

pub use phoenix_error::{Error, ErrorKind, ErrorStatus, Result};

use crate::provider::ProviderError;

impl ProviderError {
    /// Convert into the unified error, keeping the provider message.
    ///
    /// Done explicitly instead of through `From` so raw provider errors never
    /// leak through a stray `?`.
    pub fn into_error(self) -> Error {
        let kind = match &self {
            ProviderError::Network(_) => ErrorKind::NetworkFailed,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            ProviderError::Api { status, .. } if *status >= 500 => ErrorKind::ProviderUnavailable,
            ProviderError::Parse(_) => ErrorKind::MalformedOutput,
            ProviderError::InvalidRequest(_) => ErrorKind::InvalidArgument,
            ProviderError::ModelNotFound(_) => ErrorKind::ConfigInvalid,
            ProviderError::Api { .. } | ProviderError::Other(_) => ErrorKind::InferenceFailed,
        };

        let mut err = Error::new(kind, self.to_string()).with_operation("provider::complete");
        if let ProviderError::RateLimited { retry_after: Some(secs) } = &self {
            err = err.with_context("retry_after_secs", secs.to_string());
        }
        if let ProviderError::Api { status, .. } = &self {
            err = err.with_context("http_status", status.to_string());
        }
        err
    }
}
