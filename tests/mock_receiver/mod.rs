//! WebSocket mock of the avatar session receiver.
//!
//! Accepts a single connection, records every text frame the client sends
//! and optionally greets it or closes the connection after N frames.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How the mock behaves once a client connects.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Frames sent as soon as the client connects
    pub greeting: Vec<String>,
    /// Close the connection after receiving this many frames
    pub close_after: Option<usize>,
}

/// A running mock receiver.
pub struct MockReceiver {
    pub address: String,
    frames: mpsc::UnboundedReceiver<Value>,
}

impl MockReceiver {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws_stream) = accept_async(stream).await else {
                return;
            };
            let (mut write, mut read) = ws_stream.split();

            for frame in behavior.greeting {
                if write.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }

            let mut received = 0usize;
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let value = serde_json::from_str(&text)
                            .unwrap_or_else(|_| Value::String(text.to_string()));
                        let _ = tx.send(value);
                        received += 1;
                        if behavior.close_after == Some(received) {
                            let _ = write.send(Message::Close(None)).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        Self { address, frames: rx }
    }

    /// Next frame the client sent, if one arrives within five seconds.
    pub async fn next_frame(&mut self) -> Option<Value> {
        timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    /// Every frame the client sent, once its connection has ended.
    pub async fn all_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame);
        }
        frames
    }
}

/// Commands of `frames`, in order.
pub fn commands(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f["command"].as_str().unwrap_or_default().to_string())
        .collect()
}
