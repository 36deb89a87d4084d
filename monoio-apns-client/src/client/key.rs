use std::{fmt, net::ToSocketAddrs};

use http::Uri;
use rustls::pki_types::ServerName;
use service_async::Param;
use smol_str::SmolStr;
use thiserror::Error as ThisError;

pub const PRODUCTION_HOST: &str = "api.push.apple.com";
pub const DEVELOPMENT_HOST: &str = "api.development.push.apple.com";
pub const DEFAULT_PORT: u16 = 443;

/// Address of a push gateway.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: SmolStr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<SmolStr>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn production() -> Self {
        Self::new(PRODUCTION_HOST, DEFAULT_PORT)
    }

    pub fn development() -> Self {
        Self::new(DEVELOPMENT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl ToSocketAddrs for Endpoint {
    type Iter = <(&'static str, u16) as ToSocketAddrs>::Iter;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

impl Param<Option<ServerName<'static>>> for Endpoint {
    fn param(&self) -> Option<ServerName<'static>> {
        ServerName::try_from(self.host.to_string()).ok()
    }
}

#[derive(ThisError, Debug)]
pub enum FromUriError {
    #[error("Scheme not supported")]
    UnsupportScheme,
    #[error("Missing authority in uri")]
    NoAuthority,
}

impl TryFrom<&Uri> for Endpoint {
    type Error = FromUriError;

    fn try_from(uri: &Uri) -> Result<Self, Self::Error> {
        match uri.scheme() {
            Some(scheme) if scheme == &http::uri::Scheme::HTTPS => {}
            None => {}
            _ => return Err(FromUriError::UnsupportScheme),
        }
        let host = uri.host().ok_or(FromUriError::NoAuthority)?;
        Ok(Self::new(host, uri.port_u16().unwrap_or(DEFAULT_PORT)))
    }
}

impl TryFrom<Uri> for Endpoint {
    type Error = FromUriError;

    fn try_from(value: Uri) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}
