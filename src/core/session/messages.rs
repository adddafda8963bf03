//! Avatar session WebSocket message types.
//!
//! Every message is a JSON object sharing one envelope:
//! `{"command": <name>, "event_id": <uuid>, ...command specific fields}`.
//!
//! # Protocol Overview
//!
//! Client commands (sent to the avatar service):
//! - init - Bind the connection to a session
//! - voice - One base64 PCM16 audio chunk
//! - voice_end - End of the current utterance
//! - voice_interrupt - Stop the avatar speaking
//! - heartbeat - Keepalive carrying a Unix millisecond timestamp
//! - any other name - Custom command with free-form fields
//!
//! Server messages have no fixed schema and are surfaced as [`InboundMessage`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::base::{SessionError, SessionResult};

/// Longest slice of an offending frame kept in a [`MalformedMessage`].
const MAX_FRAME_EXCERPT: usize = 200;

/// Command names with a fixed payload; custom commands may not use them.
pub const RESERVED_COMMANDS: [&str; 5] =
    ["init", "voice", "voice_end", "voice_interrupt", "heartbeat"];

/// Keys the `init` envelope owns in either dialect.
const INIT_ENVELOPE_KEYS: [&str; 4] = ["command", "event_id", "sessionId", "session_id"];

// =============================================================================
// Errors
// =============================================================================

/// An inbound frame that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed message: {reason} (frame: {frame})")]
pub struct MalformedMessage {
    /// Parser diagnostic
    pub reason: String,
    /// Leading part of the frame
    pub frame: String,
}

impl MalformedMessage {
    pub fn new(frame: &str, reason: impl Into<String>) -> Self {
        let frame = match frame.char_indices().nth(MAX_FRAME_EXCERPT) {
            Some((idx, _)) => format!("{}...", &frame[..idx]),
            None => frame.to_string(),
        };
        Self {
            reason: reason.into(),
            frame,
        }
    }
}

// =============================================================================
// Dialects
// =============================================================================

/// Outbound field naming.
///
/// The engine session API and the standalone test receiver disagree on two
/// keys; decoding accepts either spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireDialect {
    /// `sessionId` / `sample_rate`
    #[default]
    Engine,
    /// `session_id` / `sampleRate`
    Receiver,
}

impl WireDialect {
    #[inline]
    fn session_id_key(self) -> &'static str {
        match self {
            WireDialect::Engine => "sessionId",
            WireDialect::Receiver => "session_id",
        }
    }

    #[inline]
    fn sample_rate_key(self) -> &'static str {
        match self {
            WireDialect::Engine => "sample_rate",
            WireDialect::Receiver => "sampleRate",
        }
    }
}

impl fmt::Display for WireDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireDialect::Engine => write!(f, "engine"),
            WireDialect::Receiver => write!(f, "receiver"),
        }
    }
}

/// Audio encoding carried by `voice` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioEncoding {
    /// 16-bit signed little-endian PCM
    #[default]
    Pcm16,
}

impl AudioEncoding {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Pcm16 => "PCM16",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PCM16" => Some(AudioEncoding::Pcm16),
            _ => None,
        }
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// A control message sent over the session channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Bind the connection to a session
    Init {
        event_id: String,
        session_id: String,
        /// Environment / codec settings merged into the envelope
        settings: Map<String, Value>,
    },
    /// One chunk of base64 encoded audio
    Voice {
        event_id: String,
        audio: String,
        sample_rate: u32,
        encoding: AudioEncoding,
    },
    /// End of the current utterance
    VoiceEnd { event_id: String },
    /// Interrupt the avatar
    VoiceInterrupt { event_id: String },
    /// Keepalive
    Heartbeat { event_id: String, timestamp: i64 },
    /// Any other command
    Custom {
        event_id: String,
        command: String,
        data: Map<String, Value>,
    },
}

impl ControlMessage {
    /// `init` for `session_id`. Envelope keys in `settings` are dropped.
    pub fn init(session_id: impl Into<String>, mut settings: Map<String, Value>) -> Self {
        for key in INIT_ENVELOPE_KEYS {
            settings.remove(key);
        }
        ControlMessage::Init {
            event_id: new_event_id(),
            session_id: session_id.into(),
            settings,
        }
    }

    pub fn voice(audio: String, sample_rate: u32) -> Self {
        ControlMessage::Voice {
            event_id: new_event_id(),
            audio,
            sample_rate,
            encoding: AudioEncoding::Pcm16,
        }
    }

    pub fn voice_end() -> Self {
        ControlMessage::VoiceEnd {
            event_id: new_event_id(),
        }
    }

    pub fn voice_interrupt() -> Self {
        ControlMessage::VoiceInterrupt {
            event_id: new_event_id(),
        }
    }

    /// Heartbeat stamped with the current time.
    pub fn heartbeat() -> Self {
        ControlMessage::Heartbeat {
            event_id: new_event_id(),
            timestamp: unix_millis(),
        }
    }

    /// Custom command. `command` and `event_id` keys in `data` are dropped.
    ///
    /// Fails for an empty name or one of [`RESERVED_COMMANDS`], which would
    /// read back as a different message.
    pub fn custom(
        command: impl Into<String>,
        mut data: Map<String, Value>,
    ) -> SessionResult<Self> {
        let command = command.into();
        if command.is_empty() || RESERVED_COMMANDS.iter().any(|reserved| *reserved == command) {
            return Err(SessionError::ReservedCommand(command));
        }
        data.remove("command");
        data.remove("event_id");
        Ok(ControlMessage::Custom {
            event_id: new_event_id(),
            command,
            data,
        })
    }

    /// Wire name of the command.
    pub fn command(&self) -> &str {
        match self {
            ControlMessage::Init { .. } => "init",
            ControlMessage::Voice { .. } => "voice",
            ControlMessage::VoiceEnd { .. } => "voice_end",
            ControlMessage::VoiceInterrupt { .. } => "voice_interrupt",
            ControlMessage::Heartbeat { .. } => "heartbeat",
            ControlMessage::Custom { command, .. } => command,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            ControlMessage::Init { event_id, .. }
            | ControlMessage::Voice { event_id, .. }
            | ControlMessage::VoiceEnd { event_id }
            | ControlMessage::VoiceInterrupt { event_id }
            | ControlMessage::Heartbeat { event_id, .. }
            | ControlMessage::Custom { event_id, .. } => event_id,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, ControlMessage::Heartbeat { .. })
    }
}

/// Fresh correlation id for an outbound message.
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

// =============================================================================
// Codec
// =============================================================================

/// Serialize a control message into JSON text.
pub fn encode(message: &ControlMessage, dialect: WireDialect) -> String {
    let mut envelope = Map::new();
    envelope.insert(
        "command".to_string(),
        Value::String(message.command().to_string()),
    );

    match message {
        ControlMessage::Init {
            session_id,
            settings,
            ..
        } => {
            envelope.insert(
                dialect.session_id_key().to_string(),
                Value::String(session_id.clone()),
            );
            for (key, value) in settings {
                envelope
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        ControlMessage::Voice {
            audio,
            sample_rate,
            encoding,
            ..
        } => {
            envelope.insert("audio".to_string(), Value::String(audio.clone()));
            envelope.insert(
                dialect.sample_rate_key().to_string(),
                Value::from(*sample_rate),
            );
            envelope.insert(
                "encoding".to_string(),
                Value::String(encoding.as_str().to_string()),
            );
        }
        ControlMessage::Heartbeat { timestamp, .. } => {
            envelope.insert("timestamp".to_string(), Value::from(*timestamp));
        }
        ControlMessage::Custom { data, .. } => {
            for (key, value) in data {
                envelope
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        ControlMessage::VoiceEnd { .. } | ControlMessage::VoiceInterrupt { .. } => {}
    }

    envelope.insert(
        "event_id".to_string(),
        Value::String(message.event_id().to_string()),
    );
    Value::Object(envelope).to_string()
}

/// Parse JSON text back into a control message.
///
/// Accepts both dialects. Unknown command names decode as `Custom`.
pub fn decode_control(text: &str) -> Result<ControlMessage, MalformedMessage> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| MalformedMessage::new(text, e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(MalformedMessage::new(text, "expected a JSON object"));
    };

    let command = take_string(&mut fields, "command", text)?;
    let event_id = take_string(&mut fields, "event_id", text)?;
    if event_id.is_empty() {
        return Err(MalformedMessage::new(text, "empty event_id"));
    }

    let message = match command.as_str() {
        "init" => {
            let session_id = match fields.remove("sessionId") {
                Some(v) => v,
                None => fields
                    .remove("session_id")
                    .ok_or_else(|| MalformedMessage::new(text, "missing session id"))?,
            };
            let session_id = session_id
                .as_str()
                .ok_or_else(|| MalformedMessage::new(text, "session id is not a string"))?
                .to_string();
            ControlMessage::Init {
                event_id,
                session_id,
                settings: fields,
            }
        }
        "voice" => {
            let audio = take_string(&mut fields, "audio", text)?;
            let sample_rate = fields
                .get("sample_rate")
                .or_else(|| fields.get("sampleRate"))
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| MalformedMessage::new(text, "missing or invalid sample rate"))?;
            let encoding = take_string(&mut fields, "encoding", text)?;
            let encoding = AudioEncoding::parse(&encoding).ok_or_else(|| {
                MalformedMessage::new(text, format!("unsupported encoding '{encoding}'"))
            })?;
            ControlMessage::Voice {
                event_id,
                audio,
                sample_rate,
                encoding,
            }
        }
        "voice_end" => ControlMessage::VoiceEnd { event_id },
        "voice_interrupt" => ControlMessage::VoiceInterrupt { event_id },
        "heartbeat" => {
            let timestamp = fields
                .get("timestamp")
                .and_then(Value::as_i64)
                .ok_or_else(|| MalformedMessage::new(text, "missing or invalid timestamp"))?;
            ControlMessage::Heartbeat {
                event_id,
                timestamp,
            }
        }
        _ => ControlMessage::Custom {
            event_id,
            command,
            data: fields,
        },
    };

    Ok(message)
}

fn take_string(
    fields: &mut Map<String, Value>,
    key: &str,
    frame: &str,
) -> Result<String, MalformedMessage> {
    match fields.remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(MalformedMessage::new(frame, format!("'{key}' is not a string"))),
        None => Err(MalformedMessage::new(frame, format!("missing '{key}'"))),
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// A message received from the avatar service.
///
/// No schema is imposed; any JSON value is accepted and forwarded as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage(Value);

impl InboundMessage {
    /// The `command` (or `type`) field, if present.
    pub fn command(&self) -> Option<&str> {
        self.0
            .get("command")
            .or_else(|| self.0.get("type"))
            .and_then(Value::as_str)
    }

    pub fn event_id(&self) -> Option<&str> {
        self.0.get("event_id").and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Indented JSON for logging.
    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

/// Parse an inbound frame.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, MalformedMessage> {
    serde_json::from_str::<Value>(text)
        .map(InboundMessage)
        .map_err(|e| MalformedMessage::new(text, e.to_string()))
}
