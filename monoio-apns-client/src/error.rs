use monoio_apns::h2::{EngineError, SlotError};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("connection has no stream id left")]
    StreamExhausted,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("could not connect to server: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("flow control window exhausted")]
    FlowControl,
    #[error("stream reset by peer with code {error_code}")]
    StreamReset { error_code: u32 },
    #[error("notification {0} is already in flight on this connection")]
    DuplicateNotificationId(String),
    #[error("protocol engine error {0}")]
    Engine(EngineError),
    #[error("http error {0}")]
    Http(#[from] http::Error),
    #[error("invalid header value {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("serde_json error {0}")]
    Json(#[from] serde_json::Error),
    #[error("jwt error {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("io error {0}")]
    Io(#[from] std::io::Error),
    #[error("rustls error {0}")]
    Rustls(#[from] rustls::Error),
    #[error("tls error {0}")]
    Tls(#[from] monoio_rustls::TlsError),
    #[error("invalid credential: {0}")]
    Credential(String),
}

impl From<SlotError> for Error {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::Exhausted => Self::StreamExhausted,
            SlotError::Closed => Self::ConnectionClosed,
        }
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::FlowControl => Self::FlowControl,
            other => Self::Engine(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
