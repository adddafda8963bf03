//! Session controller.
//!
//! Turns a handshake result into a live session: opens the channel, sends
//! `init`, runs the heartbeat and inbound listener alongside caller-driven
//! commands, and tears everything down in a fixed order:
//!
//! 1. cancel the heartbeat and wait for it to exit
//! 2. close the channel, which ends the listener
//! 3. stop the remote session

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::base::{
    BoxedTransport, InboundCallback, SessionError, SessionResult, SessionTransport,
};
use super::channel::{DEFAULT_CONNECT_TIMEOUT, SessionChannel};
use super::heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, HeartbeatOutcome, HeartbeatTask};
use super::listener::{InboundListener, ListenerReport, logging_callback};
use super::messages::{ControlMessage, WireDialect};
use crate::api::SessionTeardown;
use crate::core::audio::{AudioChunker, DEFAULT_CHUNK_SECONDS, PcmAudio, encode_chunk, read_wav_file};

/// Default pause between audio chunks.
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(100);

// =============================================================================
// Session Data
// =============================================================================

/// Identifiers returned by the REST handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub websocket_address: String,
}

impl Session {
    pub fn new(session_id: impl Into<String>, websocket_address: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            websocket_address: websocket_address.into(),
        }
    }
}

/// Tunables for a running session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Outbound field naming
    pub dialect: WireDialect,
    /// Extra keys merged into the `init` message
    pub init_settings: Map<String, Value>,
    pub heartbeat_interval: Duration,
    pub chunk_seconds: f64,
    pub chunk_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            dialect: WireDialect::Engine,
            init_settings: Map::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            chunk_seconds: DEFAULT_CHUNK_SECONDS,
            chunk_delay: DEFAULT_CHUNK_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Controller lifecycle. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ControllerState {
    Idle,
    Connecting,
    Active,
    Stopping,
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "Idle"),
            ControllerState::Connecting => write!(f, "Connecting"),
            ControllerState::Active => write!(f, "Active"),
            ControllerState::Stopping => write!(f, "Stopping"),
            ControllerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// What triggered shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The caller asked to quit
    Quit,
    /// The channel failed or the remote side closed it
    ChannelError,
    /// A signal from outside the session (e.g. Ctrl-C)
    ExternalStop,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Quit => write!(f, "quit"),
            ShutdownReason::ChannelError => write!(f, "channel error"),
            ShutdownReason::ExternalStop => write!(f, "external stop"),
        }
    }
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub heartbeat: HeartbeatOutcome,
    pub listener: ListenerReport,
    /// Whether the remote session was stopped successfully
    pub teardown_ok: bool,
}

/// Background tasks of an active session.
struct Running {
    transport: BoxedTransport,
    heartbeat: HeartbeatTask,
    listener: InboundListener,
}

// =============================================================================
// Controller
// =============================================================================

/// Drives one avatar session from connect to teardown.
///
/// Commands take `&self`, so an `Arc<SessionController>` can stream audio
/// from one task while another interrupts or quits.
pub struct SessionController {
    session: Session,
    options: SessionOptions,
    teardown: Option<Arc<dyn SessionTeardown>>,
    callback: InboundCallback,
    state: RwLock<ControllerState>,
    /// Send handle, cleared as soon as shutdown starts
    transport: RwLock<Option<BoxedTransport>>,
    running: Mutex<Option<Running>>,
    connection_lost: CancellationToken,
}

impl SessionController {
    pub fn new(session: Session, options: SessionOptions) -> Self {
        Self {
            session,
            options,
            teardown: None,
            callback: logging_callback(),
            state: RwLock::new(ControllerState::Idle),
            transport: RwLock::new(None),
            running: Mutex::new(None),
            connection_lost: CancellationToken::new(),
        }
    }

    /// Remote session teardown run as the last shutdown step.
    pub fn with_teardown(mut self, teardown: Arc<dyn SessionTeardown>) -> Self {
        self.teardown = Some(teardown);
        self
    }

    /// Replace the default logging handler for inbound messages.
    pub fn with_callback(mut self, callback: InboundCallback) -> Self {
        self.callback = callback;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    /// Cancelled when the inbound stream ends, for whatever reason.
    pub fn connection_lost(&self) -> CancellationToken {
        self.connection_lost.clone()
    }

    /// Open a WebSocket channel to the session address and start it.
    pub async fn start(&self) -> SessionResult<()> {
        self.begin()?;

        let channel = match SessionChannel::open(
            &self.session.websocket_address,
            self.options.dialect,
            self.options.connect_timeout,
        )
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open session channel: {}", e);
                self.abort_start().await;
                return Err(e);
            }
        };

        self.attach(Arc::new(channel)).await
    }

    /// Start the session over an already connected transport.
    pub async fn start_with(&self, transport: BoxedTransport) -> SessionResult<()> {
        self.begin()?;
        self.attach(transport).await
    }

    fn begin(&self) -> SessionResult<()> {
        let mut state = self.state.write();
        if *state != ControllerState::Idle {
            return Err(SessionError::InvalidState(format!(
                "cannot start a session that is {}",
                *state
            )));
        }
        *state = ControllerState::Connecting;
        Ok(())
    }

    async fn attach(&self, transport: BoxedTransport) -> SessionResult<()> {
        let init = ControlMessage::init(
            self.session.session_id.clone(),
            self.options.init_settings.clone(),
        );
        if let Err(e) = transport.send(&init).await {
            error!("Failed to send init message: {}", e);
            transport.close().await;
            self.abort_start().await;
            return Err(e);
        }
        info!(
            "Sent init message for session {} ({})",
            self.session.session_id,
            init.event_id()
        );

        let frames = match transport.receive() {
            Ok(frames) => frames,
            Err(e) => {
                transport.close().await;
                self.abort_start().await;
                return Err(e);
            }
        };

        let listener = InboundListener::spawn(
            frames,
            self.callback.clone(),
            self.connection_lost.clone(),
        );
        let heartbeat = HeartbeatTask::spawn(transport.clone(), self.options.heartbeat_interval);

        *self.transport.write() = Some(transport.clone());
        *self.running.lock() = Some(Running {
            transport,
            heartbeat,
            listener,
        });

        let activated = {
            let mut state = self.state.write();
            if *state == ControllerState::Connecting {
                *state = ControllerState::Active;
                true
            } else {
                false
            }
        };

        if !activated {
            // Stopped while connecting; the remote session still exists
            self.transport.write().take();
            let running = self.running.lock().take();
            if let Some(running) = running {
                running.heartbeat.stop().await;
                running.transport.close().await;
                running.listener.join().await;
            }
            self.run_teardown().await;
            return Err(SessionError::InvalidState(
                "session stopped during startup".to_string(),
            ));
        }

        info!("Session {} is active", self.session.session_id);
        Ok(())
    }

    /// Startup failed: no channel survives, but the remote session does.
    async fn abort_start(&self) {
        *self.state.write() = ControllerState::Stopped;
        self.run_teardown().await;
    }

    fn active_transport(&self) -> SessionResult<BoxedTransport> {
        let state = *self.state.read();
        if state != ControllerState::Active {
            return Err(SessionError::InvalidState(format!(
                "session is {state}, not Active"
            )));
        }
        self.transport
            .read()
            .clone()
            .ok_or_else(|| SessionError::InvalidState("session has no channel".to_string()))
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Read a WAV file and stream it. See [`SessionController::send_audio`].
    pub async fn send_audio_file(&self, path: &Path) -> SessionResult<usize> {
        if !path.exists() {
            return Err(SessionError::Audio(format!(
                "Audio file {} not found",
                path.display()
            )));
        }

        let owned = path.to_path_buf();
        let audio = tokio::task::spawn_blocking(move || read_wav_file(&owned))
            .await
            .map_err(|e| SessionError::Audio(format!("WAV reader task failed: {e}")))??;

        info!(
            "Sending {} ({:.2}s, {} Hz, {} ch)",
            path.display(),
            audio.duration_secs(),
            audio.format.sample_rate,
            audio.format.channels
        );
        self.send_audio(&audio).await
    }

    /// Stream `audio` as `voice` chunks followed by `voice_end`.
    ///
    /// Returns the number of `voice` messages sent. `interrupt` does not
    /// stop a stream in progress.
    pub async fn send_audio(&self, audio: &PcmAudio) -> SessionResult<usize> {
        let chunker = AudioChunker::new(audio.format, self.options.chunk_seconds)?;
        let transport = self.active_transport()?;

        if audio.format.sample_width != 2 {
            warn!(
                "Audio is {}-byte samples but is labelled PCM16",
                audio.format.sample_width
            );
        }

        let total = chunker.chunk_count(&audio.data);
        let mut sent = 0;
        for chunk in chunker.chunks(&audio.data) {
            let message = ControlMessage::voice(encode_chunk(chunk), audio.format.sample_rate);
            transport.send(&message).await?;
            sent += 1;
            info!(
                "Sent voice chunk {}/{} ({} bytes, {})",
                sent,
                total,
                chunk.len(),
                message.event_id()
            );
            tokio::time::sleep(self.options.chunk_delay).await;
        }

        let end = ControlMessage::voice_end();
        transport.send(&end).await?;
        info!("Sent voice_end ({})", end.event_id());
        Ok(sent)
    }

    /// Ask the avatar to stop speaking.
    pub async fn interrupt(&self) -> SessionResult<()> {
        let message = ControlMessage::voice_interrupt();
        self.active_transport()?.send(&message).await?;
        info!("Sent voice_interrupt ({})", message.event_id());
        Ok(())
    }

    /// Send an arbitrary command with a JSON object payload.
    pub async fn send_custom(
        &self,
        command: impl Into<String>,
        data: Map<String, Value>,
    ) -> SessionResult<()> {
        let message = ControlMessage::custom(command, data)?;
        self.active_transport()?.send(&message).await?;
        info!(
            "Sent custom command '{}' ({})",
            message.command(),
            message.event_id()
        );
        Ok(())
    }

    /// Send one heartbeat outside the periodic schedule.
    pub async fn send_heartbeat(&self) -> SessionResult<()> {
        let message = ControlMessage::heartbeat();
        self.active_transport()?.send(&message).await?;
        info!("Sent heartbeat ({})", message.event_id());
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop because the caller asked to.
    pub async fn quit(&self) -> Option<ShutdownReport> {
        self.stop(ShutdownReason::Quit).await
    }

    /// Shut the session down.
    ///
    /// Returns `None` if the session never became active or shutdown already
    /// ran; repeated calls are no-ops.
    pub async fn stop(&self, reason: ShutdownReason) -> Option<ShutdownReport> {
        {
            let mut state = self.state.write();
            match *state {
                ControllerState::Active => *state = ControllerState::Stopping,
                ControllerState::Idle | ControllerState::Connecting => {
                    *state = ControllerState::Stopped;
                    return None;
                }
                ControllerState::Stopping | ControllerState::Stopped => return None,
            }
        }

        info!("Stopping session {} ({})", self.session.session_id, reason);
        self.transport.write().take();
        let running = self.running.lock().take();

        let (heartbeat, listener) = match running {
            Some(Running {
                transport,
                heartbeat,
                listener,
            }) => {
                let heartbeat = heartbeat.stop().await;
                info!("Heartbeat stopped ({} sent)", heartbeat.sent());

                transport.close().await;
                let listener = listener.join().await;
                (heartbeat, listener)
            }
            None => (HeartbeatOutcome::Aborted, ListenerReport::default()),
        };

        let teardown_ok = self.run_teardown().await;
        *self.state.write() = ControllerState::Stopped;
        info!("Session {} stopped", self.session.session_id);

        Some(ShutdownReport {
            reason,
            heartbeat,
            listener,
            teardown_ok,
        })
    }

    async fn run_teardown(&self) -> bool {
        let Some(teardown) = &self.teardown else {
            return true;
        };
        match teardown.stop_session(&self.session.session_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to stop session {}: {}", self.session.session_id, e);
                false
            }
        }
    }
}
