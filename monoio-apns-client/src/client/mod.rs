pub mod connection;
pub mod connector;
pub mod key;
#[cfg(test)]
pub(crate) mod mock;
pub mod pool;

use std::{rc::Rc, time::Duration};

use monoio_apns::h2::{ProtocolEngine, DEFAULT_MAX_CONCURRENT_STREAMS};
use smol_str::SmolStr;

use self::{
    connector::{ApnsConnector, ClientCertificate, TlsConnector},
    key::Endpoint,
    pool::{ConnectionPool, MakeConnection},
};
use crate::{auth::AuthHeaderProvider, Error};

// Per connection settings.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    /// Sent as `apns-topic`; required with token auth.
    pub topic: Option<SmolStr>,
    pub auth: Option<Rc<dyn AuthHeaderProvider>>,
    pub inactivity_timeout: Duration,
    /// Stream bound used until the peer's SETTINGS arrive.
    pub initial_max_concurrent_streams: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::production(),
            topic: None,
            auth: None,
            inactivity_timeout: Duration::from_secs(10),
            initial_max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("topic", &self.topic)
            .field("auth", &self.auth.is_some())
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field(
                "initial_max_concurrent_streams",
                &self.initial_max_concurrent_streams,
            )
            .finish()
    }
}

// Settings shared by all connections of a pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    /// Failed connects and refused streams tolerated per notification.
    /// None or 0 retries forever.
    pub max_connection_attempts: Option<usize>,
    pub connect_retry_delay: Duration,
    /// Delay before sending again on a connection that pushed back, by flow
    /// control or by refusing the stream.
    pub flow_control_retry_delay: Duration,
    pub busy_poll_interval: Duration,
}

impl PoolConfig {
    pub(crate) fn attempts_exceeded(&self, failed_attempts: usize) -> bool {
        matches!(self.max_connection_attempts, Some(max) if max > 0 && failed_attempts > max)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_connection_attempts: None,
            connect_retry_delay: Duration::from_secs(1),
            flow_control_retry_delay: Duration::from_millis(100),
            busy_poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Default, Debug, Clone)]
pub struct Builder {
    connection_config: ConnectionConfig,
    pool_config: PoolConfig,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(&mut self, topic: impl Into<SmolStr>) -> &mut Self {
        self.connection_config.topic = Some(topic.into());
        self
    }

    pub fn max_connections(&mut self, max: usize) -> &mut Self {
        self.pool_config.max_connections = max;
        self
    }

    pub fn max_connection_attempts(&mut self, attempts: Option<usize>) -> &mut Self {
        self.pool_config.max_connection_attempts = attempts;
        self
    }

    /// Talk to the development gateway instead of production.
    pub fn sandbox(&mut self, sandbox: bool) -> &mut Self {
        self.connection_config.endpoint = if sandbox {
            Endpoint::development()
        } else {
            Endpoint::production()
        };
        self
    }

    pub fn endpoint(&mut self, endpoint: Endpoint) -> &mut Self {
        self.connection_config.endpoint = endpoint;
        self
    }

    pub fn inactivity_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connection_config.inactivity_timeout = timeout;
        self
    }

    pub fn initial_max_concurrent_streams(&mut self, max: usize) -> &mut Self {
        self.connection_config.initial_max_concurrent_streams = max;
        self
    }

    pub fn connect_retry_delay(&mut self, delay: Duration) -> &mut Self {
        self.pool_config.connect_retry_delay = delay;
        self
    }

    pub fn flow_control_retry_delay(&mut self, delay: Duration) -> &mut Self {
        self.pool_config.flow_control_retry_delay = delay;
        self
    }

    pub fn busy_poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.pool_config.busy_poll_interval = interval;
        self
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection_config
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// Pool whose connections authenticate with a client certificate.
    ///
    /// Without an explicit topic, the UID of the certificate subject is used.
    pub fn build_with_certificate<F, E>(
        mut self,
        certificate: &ClientCertificate,
        new_engine: F,
    ) -> crate::Result<ConnectionPool<ApnsConnector<TlsConnector, F>>>
    where
        F: Fn() -> E + 'static,
        E: ProtocolEngine + 'static,
    {
        let tls = TlsConnector::with_client_auth(certificate)?;
        if self.connection_config.topic.is_none() {
            self.connection_config.topic = certificate.topic()?;
        }
        Ok(ConnectionPool::new(
            ApnsConnector::new(tls, self.connection_config, new_engine),
            self.pool_config,
        ))
    }

    /// Pool whose requests carry a provider token. A topic must be set.
    pub fn build_with_key<P, F, E>(
        mut self,
        provider: P,
        new_engine: F,
    ) -> crate::Result<ConnectionPool<ApnsConnector<TlsConnector, F>>>
    where
        P: AuthHeaderProvider + 'static,
        F: Fn() -> E + 'static,
        E: ProtocolEngine + 'static,
    {
        if self.connection_config.topic.is_none() {
            return Err(Error::Credential("token auth needs a topic".into()));
        }
        let tls = TlsConnector::new()?;
        self.connection_config.auth = Some(Rc::new(provider));
        Ok(ConnectionPool::new(
            ApnsConnector::new(tls, self.connection_config, new_engine),
            self.pool_config,
        ))
    }

    /// Pool over a custom way of making connections. The connection config
    /// is available from [`Builder::connection_config`] beforehand.
    pub fn build_with_connector<M: MakeConnection + 'static>(self, maker: M) -> ConnectionPool<M> {
        ConnectionPool::new(maker, self.pool_config)
    }
}
