//! Avatar session channel and its background tasks.
//!
//! # Architecture
//!
//! - `SessionTransport` trait over the live connection, implemented by the
//!   WebSocket `SessionChannel`
//! - `HeartbeatTask` and `InboundListener` run as independent tokio tasks that
//!   share the channel with the controller
//! - `SessionController` owns the lifecycle and the shutdown ordering
//!
//! # Example
//!
//! ```rust,ignore
//! use avatar_session::core::session::{Session, SessionController, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = Session::new("sess-123", "wss://engine.example.com/ws");
//!     let controller = SessionController::new(session, SessionOptions::default());
//!     controller.start().await.unwrap();
//!
//!     controller.send_audio_file("input.wav".as_ref()).await.unwrap();
//!     controller.quit().await;
//! }
//! ```

mod base;
mod channel;
mod controller;
mod heartbeat;
mod listener;
pub mod messages;
#[cfg(test)]
mod mock;

pub use base::{
    BoxedTransport, ChannelState, InboundCallback, InboundFrames, SessionError, SessionResult,
    SessionTransport,
};
pub use channel::{DEFAULT_CONNECT_TIMEOUT, SessionChannel, validate_address};
pub use controller::{
    ControllerState, DEFAULT_CHUNK_DELAY, Session, SessionController, SessionOptions,
    ShutdownReason, ShutdownReport,
};
pub use heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, HeartbeatOutcome, HeartbeatTask, run_heartbeat};
pub use listener::{InboundListener, ListenerReport, logging_callback, run_listener};
pub use messages::{
    AudioEncoding, ControlMessage, InboundMessage, MalformedMessage, WireDialect, decode_control,
    decode_inbound, encode,
};
