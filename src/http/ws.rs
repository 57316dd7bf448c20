//! Adapts an upgraded device WebSocket to the relay's frame transport.
//!
//! Binary messages carry raw audio; text messages carry the tagged JSON
//! control vocabulary. Text that doesn't parse as a control frame is
//! passed through as free-form text rather than dropped.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::relay::{ControlFrame, Frame, FrameSink, FrameSource, TransportError};

/// Sending half, shared with the handler so it can attach a close code
/// after the session ends.
pub type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

pub struct WsFrameSource {
    stream: SplitStream<WebSocket>,
}

pub struct WsFrameSink {
    sender: SharedSink,
}

/// Split an upgraded socket into the relay-facing halves plus the shared
/// sink handle for the final close frame.
pub fn split(socket: WebSocket) -> (WsFrameSource, WsFrameSink, SharedSink) {
    let (sink, stream) = socket.split();
    let shared = Arc::new(Mutex::new(sink));
    (
        WsFrameSource { stream },
        WsFrameSink {
            sender: Arc::clone(&shared),
        },
        shared,
    )
}

/// Close the device socket with a specific code and reason. Errors are
/// ignored; the peer may already be gone.
pub async fn close(sink: &SharedSink, code: u16, reason: &'static str) {
    let mut sender = sink.lock().await;
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}

#[async_trait::async_trait]
impl FrameSource for WsFrameSource {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Binary(audio))) => {
                    return Ok(Some(Frame::Audio(Bytes::from(audio))))
                }
                Some(Ok(Message::Text(text))) => {
                    let frame = match serde_json::from_str::<ControlFrame>(&text) {
                        Ok(control) => Frame::Control(control),
                        Err(_) => Frame::Text(text),
                    };
                    return Ok(Some(frame));
                }
                // The websocket layer answers pings itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "device socket receive failed");
                    return Err(TransportError::ConnectionLost(e.to_string()));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Audio(audio) => Message::Binary(audio.to_vec()),
            Frame::Text(text) => Message::Text(text),
            Frame::Control(control) => {
                let json = serde_json::to_string(&control)
                    .map_err(|e| TransportError::SendFailed(e.to_string()))?;
                Message::Text(json)
            }
        };

        self.sender
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}
