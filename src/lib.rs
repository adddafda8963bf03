pub mod api;
pub mod config;
pub mod console;
pub mod core;

// Re-export commonly used items for convenience
pub use api::{AvatarApiClient, HandshakeError, SessionTeardown};
pub use config::ClientConfig;
pub use core::*;
