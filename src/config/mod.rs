//! Configuration module for the avatar session client
//!
//! Settings come from several sources. Priority: YAML > ENV vars > .env values > defaults.
//! The `.env` file is loaded in `main.rs` before anything reads the environment.
//!
//! # Example
//! ```rust,no_run
//! use avatar_session::config::ClientConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(Path::new("config.yaml"))?;
//!
//! println!("Engine API at {}", config.base_url);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde_json::{Map, Value, json};
use zeroize::Zeroize;

mod yaml;

pub use yaml::{AgoraYaml, ApiYaml, AvatarYaml, SessionYaml, YamlConfig};

use crate::api::{
    AgoraSettings, AvatarApiClient, HandshakeError, PersonaConfig, SessionEnvironment,
    SessionTokenRequest,
};
use crate::core::session::{SessionOptions, WireDialect};

/// Protocol version announced in receiver `init` messages.
const RECEIVER_PROTOCOL_VERSION: &str = "v1";

/// Upper bound on `HEARTBEAT_INTERVAL_SECS`.
const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3600);

/// Upper bound on `CHUNK_SECONDS`.
const MAX_CHUNK_SECONDS: f64 = 60.0;

/// Client configuration, built once at startup and passed down.
#[derive(Clone)]
pub struct ClientConfig {
    // REST API
    pub base_url: String,
    pub api_key: String,
    pub protection_bypass_token: Option<String>,
    pub request_timeout: Duration,
    pub stop_grace: Duration,

    // Avatar placement
    pub avatar_id: String,
    pub cluster: String,
    pub pod_name: String,
    pub video_quality: String,
    pub video_encoding: String,
    pub activity_idle_timeout: u64,

    // Agora publishing
    pub agora_app_id: String,
    pub agora_token: String,
    pub agora_channel: String,
    pub agora_uid: String,
    pub enable_string_uids: bool,

    // WebSocket session
    pub websocket_address: String,
    pub session_id: String,
    pub heartbeat_interval: Duration,
    pub chunk_seconds: f64,
    pub chunk_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8764".to_string(),
            api_key: "test-api-key-123".to_string(),
            protection_bypass_token: None,
            request_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),

            avatar_id: "16cb73e7de08".to_string(),
            cluster: "devspace".to_string(),
            pod_name: String::new(),
            video_quality: "high".to_string(),
            video_encoding: "H264".to_string(),
            activity_idle_timeout: 120,

            agora_app_id: "dllkSlkdmmppollalepls".to_string(),
            agora_token: "lkmmopplek".to_string(),
            agora_channel: "room1".to_string(),
            agora_uid: "333".to_string(),
            enable_string_uids: false,

            websocket_address: "ws://oai.agora.io:8765".to_string(),
            session_id: "test_session_id_12345".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            chunk_seconds: 0.5,
            chunk_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Implement Drop to zeroize all secret fields when ClientConfig is dropped.
impl Drop for ClientConfig {
    fn drop(&mut self) {
        self.api_key.zeroize();
        self.agora_token.zeroize();
        if let Some(token) = self.protection_bypass_token.as_mut() {
            token.zeroize();
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field(
                "protection_bypass_token",
                &self.protection_bypass_token.as_ref().map(|_| "<redacted>"),
            )
            .field("avatar_id", &self.avatar_id)
            .field("cluster", &self.cluster)
            .field("pod_name", &self.pod_name)
            .field("agora_channel", &self.agora_channel)
            .field("agora_uid", &self.agora_uid)
            .field("websocket_address", &self.websocket_address)
            .field("session_id", &self.session_id)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("chunk_seconds", &self.chunk_seconds)
            .field("chunk_delay", &self.chunk_delay)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables (with defaults).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.apply_yaml(yaml_config);
        config.validate()?;

        Ok(config)
    }

    /// Build from defaults overridden by whatever `lookup` returns.
    ///
    /// Empty values are treated as unset, except `ANAM_POD` which defaults
    /// to empty anyway.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("BASE_URL") {
            config.base_url = v;
        }
        if let Some(v) = get("API_KEY") {
            config.api_key = v;
        }
        config.protection_bypass_token = get("PROTECTION_BYPASS_TOKEN");
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_number("REQUEST_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("STOP_GRACE_SECS") {
            config.stop_grace = Duration::from_secs(parse_number("STOP_GRACE_SECS", &v)?);
        }

        if let Some(v) = get("AVATAR_ID") {
            config.avatar_id = v;
        }
        if let Some(v) = get("ANAM_CLUSTER") {
            config.cluster = v;
        }
        if let Some(v) = get("ANAM_POD") {
            config.pod_name = v;
        }
        if let Some(v) = get("VIDEO_QUALITY") {
            config.video_quality = v;
        }
        if let Some(v) = get("VIDEO_ENCODING") {
            config.video_encoding = v;
        }
        if let Some(v) = get("ACTIVITY_IDLE_TIMEOUT") {
            config.activity_idle_timeout = parse_number("ACTIVITY_IDLE_TIMEOUT", &v)?;
        }

        if let Some(v) = get("AGORA_APP_ID") {
            config.agora_app_id = v;
        }
        if let Some(v) = get("AGORA_TOKEN") {
            config.agora_token = v;
        }
        if let Some(v) = get("AGORA_CHANNEL") {
            config.agora_channel = v;
        }
        if let Some(v) = get("AGORA_UID") {
            config.agora_uid = v;
        }
        if let Some(v) = get("ENABLE_STRING_UIDS") {
            config.enable_string_uids = parse_bool("ENABLE_STRING_UIDS", &v)?;
        }

        if let Some(v) = get("WEBSOCKET_ADDRESS") {
            config.websocket_address = v;
        }
        if let Some(v) = get("SESSION_ID") {
            config.session_id = v;
        }
        if let Some(v) = get("HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval =
                Duration::from_secs(parse_number("HEARTBEAT_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("CHUNK_SECONDS") {
            config.chunk_seconds = parse_number("CHUNK_SECONDS", &v)?;
        }
        if let Some(v) = get("CHUNK_DELAY_MS") {
            config.chunk_delay = Duration::from_millis(parse_number("CHUNK_DELAY_MS", &v)?);
        }
        if let Some(v) = get("CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(parse_number("CONNECT_TIMEOUT_SECS", &v)?);
        }

        Ok(config)
    }

    /// Overlay every value present in `yaml`.
    pub fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(api) = yaml.api {
            if let Some(v) = api.base_url {
                self.base_url = v;
            }
            if let Some(v) = api.api_key {
                self.api_key = v;
            }
            if let Some(v) = api.protection_bypass_token {
                self.protection_bypass_token = Some(v);
            }
            if let Some(v) = api.request_timeout_secs {
                self.request_timeout = Duration::from_secs(v);
            }
            if let Some(v) = api.stop_grace_secs {
                self.stop_grace = Duration::from_secs(v);
            }
        }

        if let Some(avatar) = yaml.avatar {
            if let Some(v) = avatar.avatar_id {
                self.avatar_id = v;
            }
            if let Some(v) = avatar.cluster {
                self.cluster = v;
            }
            if let Some(v) = avatar.pod {
                self.pod_name = v;
            }
            if let Some(v) = avatar.quality {
                self.video_quality = v;
            }
            if let Some(v) = avatar.video_encoding {
                self.video_encoding = v;
            }
            if let Some(v) = avatar.activity_idle_timeout {
                self.activity_idle_timeout = v;
            }
        }

        if let Some(agora) = yaml.agora {
            if let Some(v) = agora.app_id {
                self.agora_app_id = v;
            }
            if let Some(v) = agora.token {
                self.agora_token = v;
            }
            if let Some(v) = agora.channel {
                self.agora_channel = v;
            }
            if let Some(v) = agora.uid {
                self.agora_uid = v;
            }
            if let Some(v) = agora.enable_string_uids {
                self.enable_string_uids = v;
            }
        }

        if let Some(session) = yaml.session {
            if let Some(v) = session.websocket_address {
                self.websocket_address = v;
            }
            if let Some(v) = session.session_id {
                self.session_id = v;
            }
            if let Some(v) = session.heartbeat_interval_secs {
                self.heartbeat_interval = Duration::from_secs(v);
            }
            if let Some(v) = session.chunk_seconds {
                self.chunk_seconds = v;
            }
            if let Some(v) = session.chunk_delay_ms {
                self.chunk_delay = Duration::from_millis(v);
            }
            if let Some(v) = session.connect_timeout_secs {
                self.connect_timeout = Duration::from_secs(v);
            }
        }
    }

    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<(), String> {
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| format!("BASE_URL '{}' is not a valid URL: {e}", self.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(format!(
                "BASE_URL '{}' must use http or https",
                self.base_url
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval > MAX_HEARTBEAT_INTERVAL {
            return Err(format!(
                "HEARTBEAT_INTERVAL_SECS must be between 1 and {}, got {}",
                MAX_HEARTBEAT_INTERVAL.as_secs(),
                self.heartbeat_interval.as_secs()
            ));
        }
        if !self.chunk_seconds.is_finite()
            || self.chunk_seconds <= 0.0
            || self.chunk_seconds > MAX_CHUNK_SECONDS
        {
            return Err(format!(
                "CHUNK_SECONDS must be positive and at most {MAX_CHUNK_SECONDS}, got {}",
                self.chunk_seconds
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err("CONNECT_TIMEOUT_SECS must be positive".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("REQUEST_TIMEOUT_SECS must be positive".to_string());
        }
        Ok(())
    }

    /// Body for the session token request.
    pub fn session_token_request(&self) -> SessionTokenRequest {
        SessionTokenRequest {
            persona_config: PersonaConfig {
                avatar_id: self.avatar_id.clone(),
            },
            environment: SessionEnvironment {
                cluster: self.cluster.clone(),
                pod_name: self.pod_name.clone(),
                agora_settings: AgoraSettings {
                    app_id: self.agora_app_id.clone(),
                    token: self.agora_token.clone(),
                    channel: self.agora_channel.clone(),
                    uid: self.agora_uid.clone(),
                    quality: self.video_quality.clone(),
                    video_encoding: self.video_encoding.clone(),
                    enable_string_uids: self.enable_string_uids,
                    activity_idle_timeout: self.activity_idle_timeout,
                },
            },
        }
    }

    /// Settings the standalone receiver expects inside `init`.
    pub fn receiver_init_settings(&self) -> Map<String, Value> {
        let settings = json!({
            "avatar_id": self.avatar_id,
            "quality": self.video_quality,
            "version": RECEIVER_PROTOCOL_VERSION,
            "video_encoding": self.video_encoding,
            "activity_idle_timeout": self.activity_idle_timeout,
            "agora_settings": {
                "app_id": self.agora_app_id,
                "token": self.agora_token,
                "channel": self.agora_channel,
                "uid": self.agora_uid,
                "enable_string_uid": self.enable_string_uids,
            }
        });
        match settings {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Session tunables for the given dialect. Only the receiver dialect
    /// carries settings in `init`.
    pub fn session_options(&self, dialect: WireDialect) -> SessionOptions {
        let init_settings = match dialect {
            WireDialect::Engine => Map::new(),
            WireDialect::Receiver => self.receiver_init_settings(),
        };
        SessionOptions {
            dialect,
            init_settings,
            heartbeat_interval: self.heartbeat_interval,
            chunk_seconds: self.chunk_seconds,
            chunk_delay: self.chunk_delay,
            connect_timeout: self.connect_timeout,
        }
    }

    /// REST client for the configured engine.
    pub fn api_client(&self) -> Result<AvatarApiClient, HandshakeError> {
        Ok(
            AvatarApiClient::new(&self.base_url, &self.api_key, self.request_timeout)?
                .with_protection_bypass(self.protection_bypass_token.clone())
                .with_stop_grace(self.stop_grace),
        )
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| format!("Invalid {key} value '{value}': {e}"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("Invalid {key} value '{value}': expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url, "http://localhost:8764");
        assert_eq!(config.avatar_id, "16cb73e7de08");
        assert_eq!(config.agora_uid, "333");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.chunk_delay, Duration::from_millis(100));
        assert!(config.protection_bypass_token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("BASE_URL", "https://engine.example.com"),
            ("AGORA_CHANNEL", "lobby"),
            ("ENABLE_STRING_UIDS", "TRUE"),
            ("ACTIVITY_IDLE_TIMEOUT", "300"),
            ("CHUNK_SECONDS", "0.25"),
            ("PROTECTION_BYPASS_TOKEN", "bypass"),
            ("VIDEO_QUALITY", ""),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://engine.example.com");
        assert_eq!(config.agora_channel, "lobby");
        assert!(config.enable_string_uids);
        assert_eq!(config.activity_idle_timeout, 300);
        assert_eq!(config.chunk_seconds, 0.25);
        assert_eq!(config.protection_bypass_token.as_deref(), Some("bypass"));
        // Empty values fall back to defaults
        assert_eq!(config.video_quality, "high");
    }

    #[test]
    fn test_invalid_env_values() {
        let err = ClientConfig::from_lookup(lookup(&[("ACTIVITY_IDLE_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("ACTIVITY_IDLE_TIMEOUT"));

        assert!(ClientConfig::from_lookup(lookup(&[("ENABLE_STRING_UIDS", "maybe")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("CHUNK_DELAY_MS", "-1")])).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        config.heartbeat_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        config.chunk_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        config.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_values() {
        let huge = u64::MAX.to_string();
        let config =
            ClientConfig::from_lookup(lookup(&[("HEARTBEAT_INTERVAL_SECS", huge.as_str())])).unwrap();
        assert!(config.validate().is_err());

        let config = ClientConfig::from_lookup(lookup(&[("CHUNK_SECONDS", "1e300")])).unwrap();
        assert!(config.validate().is_err());

        let config = ClientConfig::from_lookup(lookup(&[
            ("HEARTBEAT_INTERVAL_SECS", "3600"),
            ("CHUNK_SECONDS", "60"),
        ]))
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides_env() {
        let mut config =
            ClientConfig::from_lookup(lookup(&[("AVATAR_ID", "from-env"), ("AGORA_UID", "7")]))
                .unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "avatar:\n  avatar_id: \"from-yaml\"\nsession:\n  heartbeat_interval_secs: 10\n",
        )
        .unwrap();
        config.apply_yaml(YamlConfig::from_file(&path).unwrap());

        assert_eq!(config.avatar_id, "from-yaml");
        assert_eq!(config.agora_uid, "7");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_receiver_init_settings() {
        let config = ClientConfig::from_lookup(lookup(&[("AGORA_UID", "200")])).unwrap();
        let settings = Value::Object(config.receiver_init_settings());

        assert_eq!(settings["avatar_id"], "16cb73e7de08");
        assert_eq!(settings["version"], "v1");
        assert_eq!(settings["activity_idle_timeout"], 120);
        assert_eq!(settings["agora_settings"]["uid"], "200");
        assert_eq!(settings["agora_settings"]["enable_string_uid"], false);
    }

    #[test]
    fn test_session_options_by_dialect() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.session_options(WireDialect::Engine).init_settings.is_empty());

        let options = config.session_options(WireDialect::Receiver);
        assert_eq!(options.dialect, WireDialect::Receiver);
        assert!(options.init_settings.contains_key("agora_settings"));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ClientConfig::from_lookup(lookup(&[("API_KEY", "super-secret")])).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
