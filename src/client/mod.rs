//! Secret source boundary.
//!
//! A [`SecretSource`] lists the secrets stored under one project, environment
//! and folder. The provider builds its source lazily through a
//! [`ClientFactory`] and shares it between the initial load and every
//! background refresh.

pub mod http;

pub use http::InfisicalHttpClient;

use crate::config::InfisicalOptions;
use crate::error::{ProviderError, SourceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Parameters for one listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSecretsRequest {
    pub project_id: String,
    pub environment: String,
    pub path: String,
    pub recursive: bool,
}

impl From<&InfisicalOptions> for ListSecretsRequest {
    fn from(options: &InfisicalOptions) -> Self {
        Self {
            project_id: options.project_id.clone(),
            environment: options.environment.clone(),
            path: options.path.clone(),
            recursive: options.recursive,
        }
    }
}

/// A single secret as returned by the service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretElement {
    pub secret_key: String,
    pub secret_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_path: Option<String>,
}

impl SecretElement {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            secret_key: key.into(),
            secret_value: value.into(),
            secret_path: None,
        }
    }
}

impl std::fmt::Debug for SecretElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretElement")
            .field("secret_key", &self.secret_key)
            .field("secret_value", &"***")
            .field("secret_path", &self.secret_path)
            .finish()
    }
}

// ============================================================================
// Source Trait
// ============================================================================

/// Capability to list secrets from a remote store.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// List the secrets matching `request`.
    async fn list_secrets(
        &self,
        request: &ListSecretsRequest,
    ) -> Result<Vec<SecretElement>, SourceError>;

    /// Release held resources. Called once, when the owning provider is disposed.
    fn close(&self) {}
}

/// Builds a source from connection options. Called at most once per provider.
pub type ClientFactory =
    Arc<dyn Fn(&InfisicalOptions) -> Result<Arc<dyn SecretSource>, ProviderError> + Send + Sync>;

/// Factory producing [`InfisicalHttpClient`] instances.
pub fn http_client_factory() -> ClientFactory {
    Arc::new(|options: &InfisicalOptions| {
        let client = InfisicalHttpClient::new(options)?;
        Ok(Arc::new(client) as Arc<dyn SecretSource>)
    })
}

/// Flatten a listing into `key -> value`, keys taken verbatim.
pub fn secrets_to_map(secrets: Vec<SecretElement>) -> Result<HashMap<String, String>, SourceError> {
    let mut data = HashMap::with_capacity(secrets.len());
    for secret in secrets {
        if data.contains_key(&secret.secret_key) {
            return Err(SourceError::DuplicateKey(secret.secret_key));
        }
        data.insert(secret.secret_key, secret.secret_value);
    }
    Ok(data)
}
