//! In-memory transport for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::base::{ChannelState, InboundFrames, SessionError, SessionResult, SessionTransport};
use super::messages::ControlMessage;

/// Records every send and close in a shared event log.
pub(crate) struct RecordingTransport {
    log: Arc<Mutex<Vec<String>>>,
    sent: Mutex<Vec<ControlMessage>>,
    attempts: Mutex<Vec<String>>,
    state: RwLock<ChannelState>,
    fail: AtomicBool,
    heartbeat_delay: Option<Duration>,
    init_delay: Option<Duration>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    closed: CancellationToken,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_log(Arc::new(Mutex::new(Vec::new())))
    }

    /// Share `log` with other recorders (e.g. a teardown double).
    pub fn with_log(log: Arc<Mutex<Vec<String>>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            log,
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            state: RwLock::new(ChannelState::Connected),
            fail: AtomicBool::new(false),
            heartbeat_delay: None,
            init_delay: None,
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
            closed: CancellationToken::new(),
        }
    }

    /// Heartbeat sends take `delay` and log their start and end.
    pub fn slow_heartbeats(mut self, delay: Duration) -> Self {
        self.heartbeat_delay = Some(delay);
        self
    }

    /// The `init` send takes `delay` before it is recorded.
    pub fn slow_init(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.write() = state;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Queue an inbound frame.
    pub fn push_inbound(&self, frame: &str) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(frame.to_string());
        }
    }

    /// Simulate the remote side closing the connection.
    pub fn remote_close(&self) {
        *self.state.write() = ChannelState::Closed;
        self.inbound_tx.lock().take();
    }

    pub fn sent(&self) -> Vec<ControlMessage> {
        self.sent.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|m| m.command().to_string())
            .collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.command() == command)
            .count()
    }

    pub fn attempts(&self, command: &str) -> usize {
        self.attempts.lock().iter().filter(|c| *c == command).count()
    }
}

#[async_trait]
impl SessionTransport for RecordingTransport {
    async fn send(&self, message: &ControlMessage) -> SessionResult<()> {
        let state = *self.state.read();
        if state != ChannelState::Connected {
            return Err(SessionError::NotConnected(state));
        }
        self.attempts.lock().push(message.command().to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::WebSocket("broken pipe".to_string()));
        }

        if let (ControlMessage::Init { .. }, Some(delay)) = (message, self.init_delay) {
            tokio::time::sleep(delay).await;
        }

        match (message.is_heartbeat(), self.heartbeat_delay) {
            (true, Some(delay)) => {
                self.log.lock().push("heartbeat:start".to_string());
                tokio::time::sleep(delay).await;
                self.log.lock().push("heartbeat:end".to_string());
            }
            _ => self.log.lock().push(format!("send:{}", message.command())),
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn receive(&self) -> SessionResult<InboundFrames> {
        let mut rx = self
            .inbound_rx
            .lock()
            .take()
            .ok_or_else(|| SessionError::InvalidState("inbound stream already taken".into()))?;
        let closed = self.closed.clone();

        Ok(Box::pin(async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = closed.cancelled() => None,
                    frame = rx.recv() => frame,
                };
                match next {
                    Some(frame) => yield frame,
                    None => break,
                }
            }
        }))
    }

    async fn close(&self) {
        self.log.lock().push("close".to_string());
        *self.state.write() = ChannelState::Closed;
        self.inbound_tx.lock().take();
        self.closed.cancel();
    }

    fn state(&self) -> ChannelState {
        *self.state.read()
    }
}
