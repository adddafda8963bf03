//! WebSocket session channel.
//!
//! Owns exactly one live connection to the avatar service. Writes from any
//! number of tasks are serialized through a mutex around the sink half;
//! the stream half is handed out once as the inbound frame sequence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{ChannelState, InboundFrames, SessionError, SessionResult, SessionTransport};
use super::messages::{ControlMessage, WireDialect, encode};

/// Default bound on establishing the connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// A WebSocket connection to the avatar service.
pub struct SessionChannel {
    address: String,
    dialect: WireDialect,
    /// Send exclusion; also used to answer pings
    sink: Arc<Mutex<WsSink>>,
    /// Taken by the first `receive` call
    source: SyncMutex<Option<WsSource>>,
    state: Arc<RwLock<ChannelState>>,
    /// Cancelled once the channel stops carrying traffic
    closed: CancellationToken,
}

impl SessionChannel {
    /// Connect to `address`. No retry is attempted.
    pub async fn open(
        address: &str,
        dialect: WireDialect,
        connect_timeout: Duration,
    ) -> SessionResult<Self> {
        let url = validate_address(address)?;
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _response) = match timeout(connect_timeout, connect_async(url.as_str()))
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Failed to connect to WebSocket server at {}: {}", url, e);
                return Err(SessionError::ConnectionFailed(format!("{url}: {e}")));
            }
            Err(_) => {
                error!("Connection to {} timed out", url);
                return Err(SessionError::ConnectionFailed(format!(
                    "{url}: timed out after {}s",
                    connect_timeout.as_secs_f64()
                )));
            }
        };

        info!("WebSocket connected successfully");
        let (sink, source) = ws_stream.split();

        Ok(Self {
            address: url.to_string(),
            dialect,
            sink: Arc::new(Mutex::new(sink)),
            source: SyncMutex::new(Some(source)),
            state: Arc::new(RwLock::new(ChannelState::Connected)),
            closed: CancellationToken::new(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn dialect(&self) -> WireDialect {
        self.dialect
    }

    fn ensure_connected(&self) -> SessionResult<()> {
        let state = *self.state.read();
        if state == ChannelState::Connected {
            Ok(())
        } else {
            Err(SessionError::NotConnected(state))
        }
    }

    fn mark_closed(&self) {
        close_out(&self.state);
        self.closed.cancel();
    }
}

#[async_trait]
impl SessionTransport for SessionChannel {
    async fn send(&self, message: &ControlMessage) -> SessionResult<()> {
        self.ensure_connected()?;
        let text = encode(message, self.dialect);

        let mut sink = self.sink.lock().await;
        // The channel may have closed while we waited for the lock
        self.ensure_connected()?;

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            error!(
                "Failed to send '{}' ({}): {}",
                message.command(),
                message.event_id(),
                e
            );
            drop(sink);
            self.mark_closed();
            return Err(SessionError::WebSocket(e.to_string()));
        }

        debug!(
            command = message.command(),
            event_id = message.event_id(),
            "Sent control message"
        );
        Ok(())
    }

    fn receive(&self) -> SessionResult<InboundFrames> {
        let mut source = self.source.lock().take().ok_or_else(|| {
            SessionError::InvalidState("inbound stream already taken".to_string())
        })?;

        let sink = self.sink.clone();
        let state = self.state.clone();
        let closed = self.closed.clone();

        let frames = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = closed.cancelled() => break,
                    next = source.next() => next,
                };

                match next {
                    Some(Ok(Message::Text(text))) => {
                        yield text.to_string();
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            yield text;
                        }
                        Err(_) => warn!("Dropping non UTF-8 binary frame ({} bytes)", data.len()),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.lock().await.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!("WebSocket connection closed by server: {:?}", frame);
                        advance(&state, ChannelState::Closing);
                        // Flushes the close reply tungstenite queued
                        let _ = sink.lock().await.close().await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Error listening to messages: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            close_out(&state);
            closed.cancel();
        };

        Ok(Box::pin(frames))
    }

    async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state >= ChannelState::Closing {
                return;
            }
            *state = ChannelState::Closing;
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!("WebSocket close returned: {}", e);
        }
        drop(sink);

        self.mark_closed();
        info!("WebSocket connection closed");
    }

    fn state(&self) -> ChannelState {
        *self.state.read()
    }
}

/// Move `state` forward; never backwards. Returns whether it moved.
fn advance(state: &RwLock<ChannelState>, next: ChannelState) -> bool {
    let mut current = state.write();
    if next > *current {
        *current = next;
        true
    } else {
        false
    }
}

/// Walk `state` to `Closed` by way of `Closing`. Returns the states entered.
fn close_out(state: &RwLock<ChannelState>) -> Vec<ChannelState> {
    let entered: Vec<ChannelState> = [ChannelState::Closing, ChannelState::Closed]
        .into_iter()
        .filter(|next| advance(state, *next))
        .collect();
    if !entered.is_empty() {
        debug!("Channel state advanced through {:?}", entered);
    }
    entered
}

/// Accept only absolute `ws://` / `wss://` URLs with a host.
pub fn validate_address(address: &str) -> SessionResult<Url> {
    let url = Url::parse(address).map_err(|e| {
        SessionError::ConnectionFailed(format!("invalid WebSocket address '{address}': {e}"))
    })?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(SessionError::ConnectionFailed(format!(
                "unsupported scheme '{other}' in '{address}' (expected ws or wss)"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(SessionError::ConnectionFailed(format!(
            "WebSocket address '{address}' has no host"
        )));
    }

    Ok(url)
}
