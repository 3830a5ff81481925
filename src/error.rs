//! Error types for the provider and the secret source boundary.

use std::time::Duration;

/// Failure reported by a [`SecretSource`](crate::client::SecretSource).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Credentials were rejected or the access token expired.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("service returned {status}: {message}")]
    Service { status: u16, message: String },

    /// The response body could not be understood.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The same secret key appeared twice in one listing.
    #[error("duplicate secret key '{0}' in listing")]
    DuplicateKey(String),
}

/// Errors surfaced by [`RefreshProvider`](crate::provider::RefreshProvider).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// A required option is missing or malformed. Never swallowed.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The client factory failed on first use.
    #[error("failed to construct secret client: {0}")]
    Client(String),

    #[error("failed to load secrets: {0}")]
    Fetch(#[from] SourceError),

    #[error("timed out after {0:?} while loading secrets")]
    Timeout(Duration),

    /// The fetch task panicked or was cancelled.
    #[error("secret fetch task failed: {0}")]
    Task(String),

    /// A reload interval was configured outside a tokio runtime.
    #[error("a tokio runtime is required to schedule background reloads")]
    NoRuntime,

    /// The provider was disposed before or during the attempt.
    #[error("provider has been disposed")]
    Disposed,
}

impl ProviderError {
    /// Whether this error came from validating options rather than from a load attempt.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProviderError::Configuration(_))
    }

    /// Whether this error is the bounded wait expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, ProviderError::Disposed)
    }
}
