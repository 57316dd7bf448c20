//! Bidirectional frame relay between a device transport and the AI backend
//!
//! The bridge owns both transports for the session's lifetime, pumps frames
//! both ways concurrently, delivers every frame to an observer (the
//! transcript recorder), and reports why the exchange ended. Backpressure
//! is inherent: each direction awaits the downstream send before reading
//! the next frame, so a slow peer slows its feeder instead of growing an
//! unbounded buffer.

mod bridge;
mod frame;
mod transport;

pub use bridge::{FrameObserver, ObserverError, RelayBridge, RelayOutcome};
pub use frame::{ControlFrame, Frame, FrameDirection, TerminationReason, TranscriptRole};
pub use transport::{channel_duplex, ChannelSink, ChannelSource, Duplex, FrameSink, FrameSource, TransportError};
