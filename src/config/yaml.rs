use serde::Deserialize;
use std::path::Path;

/// Complete YAML configuration structure
///
/// Every field is optional; anything present overrides the environment.
///
/// # Example YAML structure
/// ```yaml
/// api:
///   base_url: "https://engine.example.com"
///   api_key: "your-api-key"
///   protection_bypass_token: "bypass-token"
///   request_timeout_secs: 30
///   stop_grace_secs: 5
///
/// avatar:
///   avatar_id: "16cb73e7de08"
///   cluster: "devspace"
///   pod: ""
///   quality: "high"
///   video_encoding: "H264"
///   activity_idle_timeout: 120
///
/// agora:
///   app_id: "your-app-id"
///   token: "your-token"
///   channel: "room1"
///   uid: "333"
///   enable_string_uids: false
///
/// session:
///   websocket_address: "ws://localhost:8765"
///   session_id: "test_session_id_12345"
///   heartbeat_interval_secs: 5
///   chunk_seconds: 0.5
///   chunk_delay_ms: 100
///   connect_timeout_secs: 30
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api: Option<ApiYaml>,
    pub avatar: Option<AvatarYaml>,
    pub agora: Option<AgoraYaml>,
    pub session: Option<SessionYaml>,
}

/// REST endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApiYaml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub protection_bypass_token: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub stop_grace_secs: Option<u64>,
}

/// Avatar placement and video settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AvatarYaml {
    pub avatar_id: Option<String>,
    pub cluster: Option<String>,
    pub pod: Option<String>,
    pub quality: Option<String>,
    pub video_encoding: Option<String>,
    pub activity_idle_timeout: Option<u64>,
}

/// Agora publishing credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgoraYaml {
    pub app_id: Option<String>,
    pub token: Option<String>,
    pub channel: Option<String>,
    pub uid: Option<String>,
    pub enable_string_uids: Option<bool>,
}

/// WebSocket session tunables from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub websocket_address: Option<String>,
    pub session_id: Option<String>,
    pub heartbeat_interval_secs: Option<u64>,
    pub chunk_seconds: Option<f64>,
    pub chunk_delay_ms: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
