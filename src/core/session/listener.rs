//! Inbound message listener.
//!
//! Drains the channel's inbound frames, parses each as JSON and hands it to
//! the registered callback. A frame that fails to parse is logged and
//! skipped; it never ends the listener.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::base::{InboundCallback, InboundFrames};
use super::messages::{InboundMessage, decode_inbound};

/// Counters reported when the inbound stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerReport {
    /// Frames parsed and handed to the callback
    pub handled: u64,
    /// Frames that failed to parse
    pub malformed: u64,
}

/// Handle to a running listener task.
pub struct InboundListener {
    handle: JoinHandle<ListenerReport>,
}

impl InboundListener {
    /// Consume `frames` on a background task. `done` is cancelled once the
    /// stream ends, whichever side closed it.
    pub fn spawn(frames: InboundFrames, callback: InboundCallback, done: CancellationToken) -> Self {
        let handle = tokio::spawn(async move {
            let report = run_listener(frames, callback).await;
            done.cancel();
            report
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the inbound stream to end.
    pub async fn join(self) -> ListenerReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!("Listener task failed: {}", e);
                ListenerReport::default()
            }
        }
    }

    /// Stop listening without waiting for the stream to end.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Listener loop. Returns once the frame sequence ends.
pub async fn run_listener(mut frames: InboundFrames, callback: InboundCallback) -> ListenerReport {
    let mut report = ListenerReport::default();

    while let Some(frame) = frames.next().await {
        match decode_inbound(&frame) {
            Ok(message) => {
                report.handled += 1;
                callback(message).await;
            }
            Err(e) => {
                report.malformed += 1;
                warn!("Failed to parse message: {}", e);
            }
        }
    }

    info!(
        "Inbound stream ended ({} handled, {} malformed)",
        report.handled, report.malformed
    );
    report
}

/// Callback that logs every inbound message.
pub fn logging_callback() -> InboundCallback {
    Arc::new(|message: InboundMessage| {
        Box::pin(async move {
            match message.command() {
                Some(command) => info!("Received '{}':\n{}", command, message.pretty()),
                None => info!("Received message:\n{}", message.pretty()),
            }
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    })
}
