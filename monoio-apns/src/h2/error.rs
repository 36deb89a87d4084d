use thiserror::Error as ThisError;

use super::StreamId;

/// Errors reported by a protocol engine when asked to send or parse frames.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The peer's flow-control window cannot take the frame right now.
    #[error("flow control window exhausted")]
    FlowControl,
    #[error("stream {0} is closed")]
    StreamClosed(StreamId),
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// The next client stream id would exceed the protocol maximum.
    #[error("no stream id available on this connection")]
    Exhausted,
    #[error("stream slots closed")]
    Closed,
}
