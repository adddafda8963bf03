//! REST request and response bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /auth/session-token`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenRequest {
    pub persona_config: PersonaConfig,
    pub environment: SessionEnvironment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    pub avatar_id: String,
}

/// Where the avatar runs and how it publishes video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnvironment {
    pub cluster: String,
    pub pod_name: String,
    pub agora_settings: AgoraSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgoraSettings {
    pub app_id: String,
    pub token: String,
    pub channel: String,
    pub uid: String,
    pub quality: String,
    pub video_encoding: String,
    pub enable_string_uids: bool,
    pub activity_idle_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionTokenResponse {
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartSessionResponse {
    pub session_id: Option<String>,
    pub websocket_address: Option<String>,
}

/// Body of `POST /engine/session/{id}/kill`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KillSessionRequest<'a> {
    pub session_id: &'a str,
}
