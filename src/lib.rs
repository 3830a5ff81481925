//! Configuration provider that serves secrets from Infisical.
//!
//! The provider loads a flat key/value snapshot with a bounded wait, can
//! refresh it on a fixed interval in the background, and hands readers the
//! latest complete snapshot without locking.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod source;

pub use client::{ClientFactory, ListSecretsRequest, SecretElement, SecretSource};
pub use config::{InfisicalOptions, SourceOptions};
pub use error::{ProviderError, SourceError};
pub use provider::{ProviderEvent, RefreshOutcome, RefreshProvider, SkipReason, Snapshot};
pub use source::InfisicalSource;
