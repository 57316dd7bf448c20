use thiserror::Error;
use tokio::sync::mpsc;

use super::frame::Frame;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer went away: {0}")]
    ConnectionLost(String),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Receiving half of a frame transport. `Ok(None)` means the peer closed
/// cleanly; an error means the connection was lost mid-stream.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// Sending half of a frame transport. `send` awaits until the peer has
/// accepted the frame, which is what gives the relay its backpressure.
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
}

/// A transport's two halves, bundled for handing to the bridge.
pub struct Duplex {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn FrameSink>,
}

impl Duplex {
    pub fn new(source: impl FrameSource + 'static, sink: impl FrameSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }
}

/// In-process transport over bounded channels. Used by the backend
/// connector's translator task and throughout the tests.
pub struct ChannelSource {
    rx: mpsc::Receiver<Frame>,
}

pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
}

#[async_trait::async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait::async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("channel closed".into()))
    }
}

/// Build a connected pair of duplex endpoints. Frames sent into one side
/// come out of the other. Dropping an endpoint closes its outgoing stream.
pub fn channel_duplex(capacity: usize) -> (Duplex, Duplex) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);

    let a = Duplex::new(ChannelSource { rx: a_rx }, ChannelSink { tx: a_tx });
    let b = Duplex::new(ChannelSource { rx: b_rx }, ChannelSink { tx: b_tx });
    (a, b)
}
