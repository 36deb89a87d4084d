use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use super::StreamId;

/// A structured event produced by a [`ProtocolEngine`](super::ProtocolEngine)
/// after parsing inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ResponseReceived {
        stream_id: StreamId,
        status: StatusCode,
        headers: HeaderMap,
    },
    DataReceived {
        stream_id: StreamId,
        data: Bytes,
    },
    RemoteSettingsChanged(Vec<Setting>),
    StreamEnded {
        stream_id: StreamId,
    },
    StreamReset {
        stream_id: StreamId,
        error_code: u32,
    },
    WindowUpdated {
        stream_id: StreamId,
        delta: u32,
    },
    SettingsAcknowledged,
    ConnectionTerminated {
        error_code: u32,
        last_stream_id: StreamId,
        additional_data: Option<Bytes>,
    },
}

/// A single changed value from a remote SETTINGS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    HeaderTableSize(u32),
    EnablePush(u32),
    MaxConcurrentStreams(u32),
    InitialWindowSize(u32),
    MaxFrameSize(u32),
    MaxHeaderListSize(u32),
    Other(u16, u32),
}

impl Setting {
    /// Build a setting from its wire identifier.
    pub fn from_id(id: u16, value: u32) -> Self {
        match id {
            0x1 => Self::HeaderTableSize(value),
            0x2 => Self::EnablePush(value),
            0x3 => Self::MaxConcurrentStreams(value),
            0x4 => Self::InitialWindowSize(value),
            0x5 => Self::MaxFrameSize(value),
            0x6 => Self::MaxHeaderListSize(value),
            other => Self::Other(other, value),
        }
    }
}
