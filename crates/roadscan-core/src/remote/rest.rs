//! HTTP remote store
//!
//! Talks to a PostgREST-style backend (`/rest/v1/<table>`) with GoTrue-style
//! authentication (`/auth/v1/user`). Creates are upserts on `client_id`, so
//! retrying after a lost response is safe.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{
    NewRemoteSession, RemoteError, RemoteSegmentRow, RemoteSessionRow, RemoteStore, SessionUpdate,
};

/// Connection settings for the hosted backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestConfig {
    /// Project URL, e.g. `https://example.supabase.co`
    pub base_url: String,
    /// Public API key sent with every request
    pub api_key: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

/// Remote store over HTTP
pub struct RestRemoteStore {
    client: reqwest::Client,
    config: RestConfig,
    access_token: RwLock<Option<String>>,
}

impl RestRemoteStore {
    /// Create a client; no request is made until first use
    ///
    /// Fails if the HTTP client cannot be built with the configured timeout.
    pub fn new(config: RestConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("RoadScan/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            config,
            access_token: RwLock::new(None),
        })
    }

    /// Settings this client was built with
    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Set or clear the signed-in user's access token
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteError> {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or(RemoteError::NotAuthenticated)?;
        Ok(self
            .client
            .request(method, self.url(path))
            .header("apikey", &self.config.api_key)
            .bearer_auth(token))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                RemoteError::Unreachable(e.to_string())
            } else {
                RemoteError::Http(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::NotAuthenticated);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    fn backend_tag(&self) -> &'static str {
        "rest"
    }

    async fn current_user(&self) -> Result<Option<String>, RemoteError> {
        let builder = match self.request(Method::GET, "auth/v1/user").await {
            Ok(builder) => builder,
            Err(RemoteError::NotAuthenticated) => return Ok(None),
            Err(e) => return Err(e),
        };
        match Self::send(builder).await {
            Ok(response) => {
                let user: AuthUser = response.json().await?;
                Ok(Some(user.id))
            }
            Err(RemoteError::NotAuthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_session(
        &self,
        session: &NewRemoteSession,
    ) -> Result<RemoteSessionRow, RemoteError> {
        let builder = self
            .request(Method::POST, "rest/v1/scan_sessions?on_conflict=client_id")
            .await?
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&[session]);
        let rows: Vec<RemoteSessionRow> = Self::send(builder).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::InvalidResponse("create returned no rows".to_string()))
    }

    async fn update_session(
        &self,
        remote_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::PATCH, &format!("rest/v1/scan_sessions?id=eq.{}", remote_id))
            .await?
            .header("Prefer", "return=representation")
            .json(update);
        let rows: Vec<serde_json::Value> = Self::send(builder).await?.json().await?;
        if rows.is_empty() {
            return Err(RemoteError::NotFound(remote_id.to_string()));
        }
        Ok(())
    }

    async fn insert_segment(&self, segment: &RemoteSegmentRow) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::POST, "rest/v1/scan_segments?on_conflict=client_id")
            .await?
            .header("Prefer", "return=minimal,resolution=ignore-duplicates")
            .json(&[segment]);
        Self::send(builder).await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<RemoteSessionRow>, RemoteError> {
        let builder = self
            .request(
                Method::GET,
                "rest/v1/scan_sessions?select=*&order=started_at.desc",
            )
            .await?;
        Ok(Self::send(builder).await?.json().await?)
    }

    async fn list_segments(&self, remote_id: &str) -> Result<Vec<RemoteSegmentRow>, RemoteError> {
        let builder = self
            .request(
                Method::GET,
                &format!(
                    "rest/v1/scan_segments?select=*&session_id=eq.{}&order=created_at.asc",
                    remote_id
                ),
            )
            .await?;
        Ok(Self::send(builder).await?.json().await?)
    }

    async fn delete_session(&self, remote_id: &str) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::DELETE, &format!("rest/v1/scan_sessions?id=eq.{}", remote_id))
            .await?;
        Self::send(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RestRemoteStore {
        RestRemoteStore::new(RestConfig {
            base_url: "https://example.invalid/".to_string(),
            api_key: "anon".to_string(),
            timeout_ms: default_timeout_ms(),
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        assert_eq!(
            store().url("rest/v1/scan_sessions"),
            "https://example.invalid/rest/v1/scan_sessions"
        );
    }

    #[tokio::test]
    async fn test_signed_out_without_token() {
        let remote = store();
        assert_eq!(remote.current_user().await.unwrap(), None);
        assert!(matches!(
            remote.list_sessions().await,
            Err(RemoteError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_new_keeps_configured_settings() {
        let remote = RestRemoteStore::new(RestConfig {
            base_url: "https://example.invalid".to_string(),
            api_key: "anon".to_string(),
            timeout_ms: 2_500,
        })
        .unwrap();
        assert_eq!(remote.config().timeout_ms, 2_500);
        assert_eq!(remote.backend_tag(), "rest");
    }

    #[test]
    fn test_config_timeout_defaults() {
        let config: RestConfig =
            serde_json::from_str(r#"{"base_url":"https://x","api_key":"k"}"#).unwrap();
        assert_eq!(config.timeout_ms, 10_000);
    }
}
