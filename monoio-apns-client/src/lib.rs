//! Push notification client for Monoio over pooled HTTP/2 connections.
//!
//! No HTTP/2 framing engine is bundled. Callers bring their own
//! [`ProtocolEngine`](monoio_apns::h2::ProtocolEngine) and hand a factory for
//! it to [`Builder::build_with_certificate`] or [`Builder::build_with_key`],
//! or implement [`MakeConnection`] for full control over connection setup.
//!
//! A pool built from a client certificate takes its `apns-topic` from the
//! certificate subject when no topic is configured. Token auth requires one.

mod auth;
pub mod client;
mod error;
mod request;
mod response;

pub use auth::{AuthHeaderProvider, JwtAuthHeaderProvider, TOKEN_TTL};
pub use client::{
    connection::{Connection, ConnectionId, OnConnectionLost},
    connector::{ApnsConnector, ClientCertificate, Connector, TcpConnector, TlsConnector},
    key::Endpoint,
    pool::{ConnectionPool, MakeConnection},
    Builder, ConnectionConfig, PoolConfig,
};
pub use error::{Error, Result};
pub use request::{NotificationRequest, Priority, PushType};
pub use response::NotificationResult;
