//! REST handshake with the avatar engine.

mod client;
mod messages;

pub use client::{
    AvatarApiClient, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STOP_GRACE, HandshakeError, SessionTeardown,
};
pub use messages::{AgoraSettings, PersonaConfig, SessionEnvironment, SessionTokenRequest};
