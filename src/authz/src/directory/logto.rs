//! Logto management API client

use super::{DirectoryRole, DirectoryScope, RoleDirectory, UserDirectory};
use crate::error::{AuthzError, Result};
use crate::types::Record;
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are refreshed this long before they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Management API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogtoConfig {
    /// Logto endpoint, e.g. `https://auth.example.com`
    pub base_url: String,

    /// Machine-to-machine application id
    pub app_id: String,

    /// Machine-to-machine application secret
    pub app_secret: String,

    /// Management API resource indicator
    pub resource: String,
}

impl Default for LogtoConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            resource: "https://default.logto.app/api".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Role directory backed by the Logto management API
pub struct LogtoDirectory {
    client: Client,
    config: LogtoConfig,
    token: Mutex<Option<AccessToken>>,
}

impl LogtoDirectory {
    /// Create a client with default HTTP settings
    pub fn new(config: LogtoConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a client on top of an existing `reqwest::Client`
    pub fn with_client(client: Client, config: LogtoConfig) -> Self {
        Self {
            client,
            config,
            token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref().filter(|t| t.is_fresh()) {
            return Ok(current.value.clone());
        }

        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *token = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        let path = "/oidc/token";
        debug!(app_id = %self.config.app_id, "requesting management API token");

        let response = self
            .client
            .post(self.url(path))
            .basic_auth(&self.config.app_id, Some(&self.config.app_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("resource", self.config.resource.as_str()),
                ("scope", "all"),
            ])
            .send()
            .await?;

        let body: TokenResponse = ensure_success(path, response).await?.json().await?;
        Ok(AccessToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }

    /// Authenticated management API call; non-2xx answers become errors
    pub async fn call_api(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let token = self.access_token().await?;
        let mut request = self.client.request(method, self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        ensure_success(path, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.call_api(Method::GET, path, None).await?.json().await?)
    }
}

async fn ensure_success(path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AuthzError::Directory {
        status: status.as_u16(),
        path: path.to_string(),
        body,
    })
}

#[async_trait]
impl RoleDirectory for LogtoDirectory {
    async fn list_roles(&self) -> Result<Vec<DirectoryRole>> {
        self.get_json("/api/roles?type=User").await
    }

    async fn list_scopes(&self, role_id: &str) -> Result<Vec<DirectoryScope>> {
        self.get_json(&format!("/api/roles/{}/scopes", role_id)).await
    }
}

#[async_trait]
impl UserDirectory for LogtoDirectory {
    async fn custom_data(&self, user_id: &str) -> Result<Record> {
        let user: Value = self.get_json(&format!("/api/users/{}", user_id)).await?;
        Ok(user
            .get("customData")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_custom_data(&self, user_id: &str, data: Record) -> Result<()> {
        let body = json!({ "customData": data });
        self.call_api(Method::PATCH, &format!("/api/users/{}", user_id), Some(&body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join_trims_slash() {
        let directory = LogtoDirectory::with_client(
            Client::new(),
            LogtoConfig {
                base_url: "http://auth.local/".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(directory.url("/api/roles"), "http://auth.local/api/roles");
    }

    #[test]
    fn test_token_freshness_margin() {
        let stale = AccessToken {
            value: "t".into(),
            expires_at: Instant::now() + Duration::from_secs(5),
        };
        assert!(!stale.is_fresh());

        let fresh = AccessToken {
            value: "t".into(),
            expires_at: Instant::now() + Duration::from_secs(600),
        };
        assert!(fresh.is_fresh());
    }
}
