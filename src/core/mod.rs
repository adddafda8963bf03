pub mod audio;
pub mod session;

// Re-export commonly used types for convenience
pub use audio::{AudioChunker, PcmAudio, PcmFormat};
pub use session::{
    ControlMessage, Session, SessionChannel, SessionController, SessionError, SessionOptions,
    SessionResult, SessionTransport, ShutdownReason, WireDialect,
};
