//! Periodic heartbeat keepalive.
//!
//! A background task that sends a `heartbeat` command every interval while the
//! channel is connected. Cancellation is cooperative: a send already in
//! flight completes, no further sends are scheduled, and no final heartbeat
//! is sent.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::base::{BoxedTransport, ChannelState};
use super::messages::ControlMessage;

/// Default spacing between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Why the heartbeat loop ended, with the number of heartbeats it sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Stopped by its owner
    Cancelled { sent: u64 },
    /// The channel left `Connected`
    ChannelClosed { sent: u64 },
    /// A send failed; the task does not retry
    SendFailed { sent: u64 },
    /// The task panicked or was aborted
    Aborted,
}

impl HeartbeatOutcome {
    pub fn sent(&self) -> u64 {
        match self {
            HeartbeatOutcome::Cancelled { sent }
            | HeartbeatOutcome::ChannelClosed { sent }
            | HeartbeatOutcome::SendFailed { sent } => *sent,
            HeartbeatOutcome::Aborted => 0,
        }
    }
}

/// Handle to a running heartbeat task.
pub struct HeartbeatTask {
    cancel: CancellationToken,
    handle: JoinHandle<HeartbeatOutcome>,
}

impl HeartbeatTask {
    /// Start sending heartbeats on `transport` every `interval`.
    pub fn spawn(transport: BoxedTransport, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(transport, interval, cancel.clone()));
        info!(
            "Started automatic heartbeat (every {} seconds)",
            interval.as_secs_f64()
        );
        Self { cancel, handle }
    }

    /// Whether the task has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(self) -> HeartbeatOutcome {
        self.cancel.cancel();
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Heartbeat task failed: {}", e);
                HeartbeatOutcome::Aborted
            }
        }
    }
}

/// Heartbeat loop. The first heartbeat goes out one full interval after start.
pub async fn run_heartbeat(
    transport: BoxedTransport,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatOutcome {
    let first = match Instant::now().checked_add(interval) {
        Some(first) if !interval.is_zero() => first,
        _ => {
            warn!("Heartbeat interval {:?} is unusable, heartbeat disabled", interval);
            cancel.cancelled().await;
            return HeartbeatOutcome::Cancelled { sent: 0 };
        }
    };
    let mut ticker = time::interval_at(first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Heartbeat task cancelled");
                return HeartbeatOutcome::Cancelled { sent };
            }
            _ = ticker.tick() => {}
        }

        let state = transport.state();
        if state != ChannelState::Connected {
            info!("Heartbeat stopping, channel is {}", state);
            return HeartbeatOutcome::ChannelClosed { sent };
        }

        let message = ControlMessage::heartbeat();
        match transport.send(&message).await {
            Ok(()) => {
                sent += 1;
                if let ControlMessage::Heartbeat { timestamp, .. } = &message {
                    info!("Heartbeat sent (timestamp: {})", timestamp);
                }
            }
            Err(e) => {
                warn!("Error in heartbeat loop, stopping: {}", e);
                return HeartbeatOutcome::SendFailed { sent };
            }
        }
    }
}
