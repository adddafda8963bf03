//! Avatar engine REST client.
//!
//! Three calls bracket every session: create a session token, start the
//! session (which yields the WebSocket address), and kill it afterwards.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{error, info, warn};
use zeroize::Zeroize;

use super::messages::{
    KillSessionRequest, SessionTokenRequest, SessionTokenResponse, StartSessionResponse,
};
use crate::core::session::Session;

/// Default bound on each REST request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause before killing a session, letting in-flight media drain.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

const PROTECTION_BYPASS_HEADER: &str = "x-vercel-protection-bypass";

// =============================================================================
// Errors
// =============================================================================

/// Failures of the REST handshake and teardown calls.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The request never produced a response (DNS, refused, timeout)
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    /// The server answered with a non-success status
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The body was not the expected JSON
    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    /// A required field was absent or empty
    #[error("Response from {endpoint} is missing '{field}'")]
    MissingField {
        endpoint: String,
        field: &'static str,
    },

    /// The HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Remote teardown of a session, run after the channel has closed.
#[async_trait]
pub trait SessionTeardown: Send + Sync {
    async fn stop_session(&self, session_id: &str) -> Result<(), HandshakeError>;
}

// =============================================================================
// Client
// =============================================================================

/// Client for the avatar engine REST API.
pub struct AvatarApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    protection_bypass: Option<String>,
    stop_grace: Duration,
}

impl AvatarApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, HandshakeError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HandshakeError::Client(e.to_string()))?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            protection_bypass: None,
            stop_grace: DEFAULT_STOP_GRACE,
        })
    }

    /// Attach the deployment protection bypass header to handshake calls.
    pub fn with_protection_bypass(mut self, token: Option<String>) -> Self {
        self.protection_bypass = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B, T>(
        &self,
        endpoint: &str,
        bearer: &str,
        body: &B,
        bypass: bool,
    ) -> Result<T, HandshakeError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(endpoint)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
            .json(body);

        if bypass {
            if let Some(token) = &self.protection_bypass {
                request = request.header(PROTECTION_BYPASS_HEADER, token);
            }
        }

        let response = request.send().await.map_err(|e| {
            error!("Could not reach {}: {}", endpoint, e);
            HandshakeError::Transport {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HandshakeError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| HandshakeError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    /// Step 1: exchange the API key and avatar settings for a session token.
    pub async fn create_session_token(
        &self,
        request: &SessionTokenRequest,
    ) -> Result<String, HandshakeError> {
        let endpoint = self.endpoint("/auth/session-token");
        info!("Creating session token...");

        let response: SessionTokenResponse =
            self.post(&endpoint, &self.api_key, request, true).await?;
        let token = non_empty(response.session_token).ok_or(HandshakeError::MissingField {
            endpoint,
            field: "sessionToken",
        })?;

        let preview: String = token.chars().take(20).collect();
        info!("Session token created: {}...", preview);
        Ok(token)
    }

    /// Step 2: start the session and learn where to connect.
    pub async fn start_session(&self, session_token: &str) -> Result<Session, HandshakeError> {
        let endpoint = self.endpoint("/engine/session");
        info!("Starting session...");

        let empty = serde_json::Map::new();
        let response: StartSessionResponse =
            self.post(&endpoint, session_token, &empty, true).await?;

        let session_id = non_empty(response.session_id).ok_or(HandshakeError::MissingField {
            endpoint: endpoint.clone(),
            field: "sessionId",
        })?;
        let websocket_address =
            non_empty(response.websocket_address).ok_or(HandshakeError::MissingField {
                endpoint,
                field: "websocketAddress",
            })?;

        info!("Session started: {}", session_id);
        info!("WebSocket address: {}", websocket_address);
        Ok(Session::new(session_id, websocket_address))
    }

    /// Both handshake steps.
    pub async fn open_session(
        &self,
        request: &SessionTokenRequest,
    ) -> Result<Session, HandshakeError> {
        let token = self.create_session_token(request).await?;
        self.start_session(&token).await
    }

    /// Kill a session after the grace delay.
    pub async fn kill_session(&self, session_id: &str) -> Result<(), HandshakeError> {
        info!("Stopping session {}...", session_id);
        tokio::time::sleep(self.stop_grace).await;

        let endpoint = self.endpoint(&format!("/engine/session/{session_id}/kill"));
        let body = KillSessionRequest { session_id };
        match self
            .post::<_, serde::de::IgnoredAny>(&endpoint, &self.api_key, &body, false)
            .await
        {
            Ok(_) => {
                info!("Session stopped successfully");
                Ok(())
            }
            // An empty or non-JSON success body still counts
            Err(HandshakeError::InvalidResponse { .. }) => {
                info!("Session stopped successfully");
                Ok(())
            }
            Err(e) => {
                warn!("Session stop failed: {}", e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SessionTeardown for AvatarApiClient {
    async fn stop_session(&self, session_id: &str) -> Result<(), HandshakeError> {
        self.kill_session(session_id).await
    }
}

impl Drop for AvatarApiClient {
    fn drop(&mut self) {
        self.api_key.zeroize();
        if let Some(token) = self.protection_bypass.as_mut() {
            token.zeroize();
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            AvatarApiClient::new("http://localhost:8764/", "key", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8764");
        assert_eq!(
            client.endpoint("/engine/session"),
            "http://localhost:8764/engine/session"
        );
    }

    #[test]
    fn test_empty_bypass_token_ignored() {
        let client = AvatarApiClient::new("http://localhost", "key", DEFAULT_REQUEST_TIMEOUT)
            .unwrap()
            .with_protection_bypass(Some(String::new()));
        assert!(client.protection_bypass.is_none());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("a".into())), Some("a".to_string()));
        assert_eq!(non_empty(Some(String::new())), None);
        assert_eq!(non_empty(None), None);
    }
}
