//! Base traits and types for the avatar session channel.
//!
//! This module defines the error taxonomy, the channel state machine and the
//! `SessionTransport` seam shared by the WebSocket channel, the background
//! tasks and the controller.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use super::messages::{ControlMessage, InboundMessage, MalformedMessage};
use crate::api::HandshakeError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while running an avatar session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Opening the transport failed (refused, DNS, TLS, bad address, timeout)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A write was attempted while the channel was not `Connected`
    #[error("Not connected (channel is {0})")]
    NotConnected(ChannelState),

    /// The transport failed while writing
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// An inbound frame could not be parsed
    #[error(transparent)]
    MalformedMessage(#[from] MalformedMessage),

    /// The REST handshake failed
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Reading or chunking the audio source failed
    #[error("Audio error: {0}")]
    Audio(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A custom command used a name with a fixed meaning
    #[error("Command '{0}' is reserved")]
    ReservedCommand(String),

    /// The controller is not in a state that accepts the operation
    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl SessionError {
    /// Whether the error means the channel can no longer carry traffic.
    ///
    /// Fatal errors end the session; the rest only abort the operation
    /// that produced them.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::ConnectionFailed(_) | SessionError::WebSocket(_) => true,
            SessionError::NotConnected(state) => *state >= ChannelState::Closing,
            _ => false,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Channel State
// =============================================================================

/// Lifecycle of a session channel.
///
/// Transitions only move forward:
/// `Disconnected -> Connected -> Closing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ChannelState {
    /// No transport has been opened
    #[default]
    Disconnected,
    /// Open and accepting sends
    Connected,
    /// Close initiated by either side
    Closing,
    /// Transport confirmed closure
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "Disconnected"),
            ChannelState::Connected => write!(f, "Connected"),
            ChannelState::Closing => write!(f, "Closing"),
            ChannelState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Transport Seam
// =============================================================================

/// Inbound text frames, in transport order. Ends when either side closes.
pub type InboundFrames = Pin<Box<dyn Stream<Item = String> + Send>>;

/// A live control/data connection to the avatar service.
///
/// `send` must be safe to call from several tasks at once; implementations
/// serialize writes internally. `receive` hands out the inbound sequence
/// exactly once.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Serialize and write one message.
    async fn send(&self, message: &ControlMessage) -> SessionResult<()>;

    /// Take the inbound frame sequence.
    fn receive(&self) -> SessionResult<InboundFrames>;

    /// Close the transport. Idempotent.
    async fn close(&self);

    /// Current channel state.
    fn state(&self) -> ChannelState;
}

/// Shared handle to a transport.
pub type BoxedTransport = Arc<dyn SessionTransport>;

// =============================================================================
// Callback Types
// =============================================================================

/// Handler invoked for every successfully parsed inbound message.
pub type InboundCallback =
    Arc<dyn Fn(InboundMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
