//! Seam between push connections and an HTTP/2 protocol engine.
//!
//! The engine is sans-io: the connection feeds it inbound bytes and gets
//! [`Event`]s back, and asks it to encode frames which are later collected
//! with [`ProtocolEngine::data_to_send`] and written to the transport.

mod error;
mod event;
pub mod slots;

use bytes::Bytes;
use http::Request;

pub use self::{
    error::{EngineError, SlotError},
    event::{Event, Setting},
    slots::StreamSlotAllocator,
};

pub type StreamId = u32;

/// Highest stream identifier a client may open (2^31 - 1).
pub const HIGHEST_ALLOWED_STREAM_ID: StreamId = (1 << 31) - 1;

/// Concurrency bound used until the peer advertises MAX_CONCURRENT_STREAMS.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 1000;

/// RST_STREAM / GOAWAY error codes used by this crate.
pub mod reason {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
}

pub trait ProtocolEngine {
    /// Queue the connection preface and initial SETTINGS.
    fn initiate_connection(&mut self);

    /// Queue a HEADERS frame carrying the request head.
    ///
    /// Method, scheme, path and authority are taken from the request line,
    /// regular headers from the header map.
    fn send_headers(
        &mut self,
        stream_id: StreamId,
        head: Request<()>,
        end_stream: bool,
    ) -> Result<(), EngineError>;

    fn send_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), EngineError>;

    fn reset_stream(&mut self, stream_id: StreamId, error_code: u32) -> Result<(), EngineError>;

    /// Take every byte queued for the transport so far.
    fn data_to_send(&mut self) -> Bytes;

    fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>, EngineError>;
}

impl<E: ProtocolEngine + ?Sized> ProtocolEngine for Box<E> {
    fn initiate_connection(&mut self) {
        (**self).initiate_connection()
    }

    fn send_headers(
        &mut self,
        stream_id: StreamId,
        head: Request<()>,
        end_stream: bool,
    ) -> Result<(), EngineError> {
        (**self).send_headers(stream_id, head, end_stream)
    }

    fn send_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), EngineError> {
        (**self).send_data(stream_id, data, end_stream)
    }

    fn reset_stream(&mut self, stream_id: StreamId, error_code: u32) -> Result<(), EngineError> {
        (**self).reset_stream(stream_id, error_code)
    }

    fn data_to_send(&mut self) -> Bytes {
        (**self).data_to_send()
    }

    fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>, EngineError> {
        (**self).receive_data(data)
    }
}
