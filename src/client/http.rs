//! Infisical REST client.
//!
//! Authenticates with universal auth (client id + secret), caches the access
//! token until shortly before it expires, and lists raw secret values.

use super::{ListSecretsRequest, SecretElement, SecretSource};
use crate::config::{InfisicalOptions, TOKEN_EXPIRY_MARGIN_SECS};
use crate::error::{ProviderError, SourceError};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

const LOGIN_PATH: &str = "/api/v1/auth/universal-auth/login";
const LIST_SECRETS_PATH: &str = "/api/v3/secrets/raw";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Deserialize)]
struct ListSecretsResponse {
    #[serde(default)]
    secrets: Vec<SecretElement>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct InfisicalHttpClient {
    base_url: String,
    client_id: String,
    client_secret: String,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl InfisicalHttpClient {
    pub fn new(options: &InfisicalOptions) -> Result<Self, ProviderError> {
        url::Url::parse(&options.site_url)
            .map_err(|e| ProviderError::Client(format!("invalid site URL: {e}")))?;

        let client = Client::builder()
            .user_agent(concat!("infisical-config/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self {
            base_url: options.site_url.trim_end_matches('/').to_string(),
            client_id: options.client_id.clone(),
            client_secret: options.client_secret.clone(),
            client,
            token: Mutex::new(None),
        })
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.lock();
        guard
            .as_ref()
            .filter(|t| Instant::now() < t.refresh_at)
            .map(|t| t.value.clone())
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        debug!("Authenticating with Infisical at {}", self.base_url);
        let resp = self
            .client
            .post(format!("{}{LOGIN_PATH}", self.base_url))
            .json(&LoginRequest {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(if is_auth_status(status) {
                SourceError::Auth(format!("login rejected ({status}): {text}"))
            } else {
                SourceError::Service {
                    status: status.as_u16(),
                    message: text,
                }
            });
        }

        let login: LoginResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let lifetime = Duration::from_secs(login.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));
        *self.token.lock() = Some(CachedToken {
            value: login.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(login.access_token)
    }
}

#[async_trait]
impl SecretSource for InfisicalHttpClient {
    async fn list_secrets(
        &self,
        request: &ListSecretsRequest,
    ) -> Result<Vec<SecretElement>, SourceError> {
        let token = self.access_token().await?;

        let recursive = if request.recursive { "true" } else { "false" };
        let resp = self
            .client
            .get(format!("{}{LIST_SECRETS_PATH}", self.base_url))
            .bearer_auth(&token)
            .query(&[
                ("workspaceId", request.project_id.as_str()),
                ("environment", request.environment.as_str()),
                ("secretPath", request.path.as_str()),
                ("recursive", recursive),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if is_auth_status(status) {
                self.token.lock().take();
                return Err(SourceError::Auth(format!("listing rejected ({status}): {text}")));
            }
            return Err(SourceError::Service {
                status: status.as_u16(),
                message: text,
            });
        }

        let body: ListSecretsResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        debug!(
            "Listed {} secret(s) from {}:{}",
            body.secrets.len(),
            request.environment,
            request.path
        );
        Ok(body.secrets)
    }

    fn close(&self) {
        self.token.lock().take();
    }
}

fn is_auth_status(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}
