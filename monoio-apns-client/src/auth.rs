//! Authorization headers for token based authentication.
//!
//! Certificate based connections authenticate during the TLS handshake and
//! need no header at all.

use std::{
    cell::RefCell,
    path::Path,
    time::{Duration, Instant},
};

use http::HeaderValue;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use smol_str::SmolStr;

use crate::request::unix_now;

/// How long a signed token is reused before a new one is minted.
pub const TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

pub trait AuthHeaderProvider {
    /// Value for the `authorization` header of the next request.
    fn header(&self) -> crate::Result<HeaderValue>;
}

/// Memoizes a header value for a fixed time.
#[derive(Debug)]
pub(crate) struct HeaderCache {
    ttl: Duration,
    slot: RefCell<Option<(Instant, HeaderValue)>>,
}

impl HeaderCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RefCell::new(None),
        }
    }

    pub(crate) fn get_or_refresh<F>(&self, now: Instant, refresh: F) -> crate::Result<HeaderValue>
    where
        F: FnOnce() -> crate::Result<HeaderValue>,
    {
        if let Some((issued_at, value)) = &*self.slot.borrow() {
            if now.saturating_duration_since(*issued_at) <= self.ttl {
                return Ok(value.clone());
            }
        }
        let value = refresh()?;
        *self.slot.borrow_mut() = Some((now, value.clone()));
        Ok(value)
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: u64,
}

/// Signs ES256 provider tokens with a `.p8` signing key.
pub struct JwtAuthHeaderProvider {
    key: EncodingKey,
    key_id: SmolStr,
    team_id: SmolStr,
    cache: HeaderCache,
}

impl JwtAuthHeaderProvider {
    pub fn new(
        key_pem: &[u8],
        key_id: impl Into<SmolStr>,
        team_id: impl Into<SmolStr>,
    ) -> crate::Result<Self> {
        Ok(Self {
            key: EncodingKey::from_ec_pem(key_pem)?,
            key_id: key_id.into(),
            team_id: team_id.into(),
            cache: HeaderCache::new(TOKEN_TTL),
        })
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        key_id: impl Into<SmolStr>,
        team_id: impl Into<SmolStr>,
    ) -> crate::Result<Self> {
        let pem = std::fs::read(path)?;
        Self::new(&pem, key_id, team_id)
    }

    fn sign(&self, issued_at: u64) -> crate::Result<HeaderValue> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.to_string());
        let claims = Claims {
            iss: &self.team_id,
            iat: issued_at,
        };
        let token = jsonwebtoken::encode(&header, &claims, &self.key)?;
        let mut value = HeaderValue::try_from(format!("bearer {token}"))?;
        value.set_sensitive(true);
        #[cfg(feature = "logging")]
        tracing::debug!("minted provider token for key {}", self.key_id);
        Ok(value)
    }
}

impl AuthHeaderProvider for JwtAuthHeaderProvider {
    fn header(&self) -> crate::Result<HeaderValue> {
        self.cache
            .get_or_refresh(Instant::now(), || self.sign(unix_now()))
    }
}

impl std::fmt::Debug for JwtAuthHeaderProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtAuthHeaderProvider({}:{})", self.team_id, self.key_id)
    }
}
