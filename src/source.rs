//! Builder for an Infisical configuration source.

use crate::client::{http_client_factory, ClientFactory};
use crate::config::{InfisicalOptions, SourceOptions};
use crate::error::ProviderError;
use crate::provider::RefreshProvider;
use std::time::Duration;

/// Describes where secrets come from and how failures are treated.
/// [`build`](Self::build) turns it into a [`RefreshProvider`].
///
/// ```no_run
/// # async fn run() -> Result<(), infisical_config::ProviderError> {
/// use infisical_config::{InfisicalOptions, InfisicalSource};
/// use std::time::Duration;
///
/// let provider = InfisicalSource::new(InfisicalOptions::new("id", "secret", "project", "prod"))
///     .optional(true)
///     .reload_after(Duration::from_secs(300))
///     .build()?;
/// provider.load().await?;
/// let db_password = provider.get("DB_PASSWORD");
/// # Ok(())
/// # }
/// ```
pub struct InfisicalSource {
    options: SourceOptions,
    factory: ClientFactory,
}

impl InfisicalSource {
    pub fn new(infisical: InfisicalOptions) -> Self {
        Self::from_options(SourceOptions::new(infisical))
    }

    pub fn from_options(options: SourceOptions) -> Self {
        Self {
            options,
            factory: http_client_factory(),
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.options.optional = optional;
        self
    }

    pub fn reload_after(mut self, period: Duration) -> Self {
        self.options.reload_after_ms = Some(duration_to_ms(period));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Replace the HTTP client, e.g. with a stub in tests.
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    pub fn build(self) -> Result<RefreshProvider, ProviderError> {
        RefreshProvider::new(self.options, self.factory)
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
