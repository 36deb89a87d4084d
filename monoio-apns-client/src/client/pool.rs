use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use monoio::time::sleep;
use monoio_apns::{
    h2::{reason, ProtocolEngine},
    util::DynamicSemaphore,
};

use super::{
    connection::{Connection, ConnectionId, OnConnectionLost},
    PoolConfig,
};
use crate::{request::NotificationRequest, response::NotificationResult, Error};

/// Opens new connections for a [`ConnectionPool`].
///
/// `on_lost` must be handed to the connection so the pool hears about its
/// termination.
pub trait MakeConnection {
    type Engine: ProtocolEngine + 'static;

    #[allow(async_fn_in_trait)]
    async fn make_connection(
        &self,
        on_lost: OnConnectionLost,
    ) -> crate::Result<Connection<Self::Engine>>;
}

/// A bounded set of connections sharing one endpoint and credential.
///
/// Cloning yields another handle to the same pool.
pub struct ConnectionPool<M: MakeConnection> {
    shared: Rc<PoolShared<M>>,
}

impl<M: MakeConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct PoolShared<M: MakeConnection> {
    maker: M,
    config: PoolConfig,
    connections: RefCell<Vec<Connection<M::Engine>>>,
    // serializes selection and creation
    lock: DynamicSemaphore,
}

impl<M: MakeConnection + 'static> ConnectionPool<M> {
    pub fn new(maker: M, config: PoolConfig) -> Self {
        Self {
            shared: Rc::new(PoolShared {
                maker,
                config,
                connections: RefCell::new(Vec::new()),
                lock: DynamicSemaphore::new(1),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn maker(&self) -> &M {
        &self.shared.maker
    }

    /// Connections currently held by the pool.
    pub fn len(&self) -> usize {
        self.shared.connections.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send one notification, retrying on other connections until it gets a
    /// result or a failure that retrying can not fix.
    pub async fn send(&self, request: &NotificationRequest) -> crate::Result<NotificationResult> {
        let config = &self.shared.config;
        let mut failed_attempts = 0;
        loop {
            let connection = match self.acquire().await {
                Ok(connection) => connection,
                Err(Error::Connect(e)) => {
                    failed_attempts += 1;
                    if config.attempts_exceeded(failed_attempts) {
                        #[cfg(feature = "logging")]
                        tracing::error!("could not connect after {} attempts", failed_attempts);
                        return Err(Error::Connect(e));
                    }
                    #[cfg(feature = "logging")]
                    tracing::warn!("could not connect: {}, attempt {}", e, failed_attempts);
                    sleep(config.connect_retry_delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match connection.send(request).await {
                Ok(result) => return Ok(result),
                Err(Error::StreamExhausted) => {
                    #[cfg(feature = "logging")]
                    tracing::info!("connection {} ran out of stream ids", connection.id());
                    connection.close();
                }
                Err(Error::ConnectionClosed) => {
                    #[cfg(feature = "logging")]
                    tracing::warn!(
                        "connection {} closed while sending {}",
                        connection.id(),
                        request.id()
                    );
                }
                Err(Error::StreamReset {
                    error_code: reason::REFUSED_STREAM,
                }) => {
                    // the peer did not process the stream, sending again is safe
                    failed_attempts += 1;
                    if config.attempts_exceeded(failed_attempts) {
                        return Err(Error::StreamReset {
                            error_code: reason::REFUSED_STREAM,
                        });
                    }
                    #[cfg(feature = "logging")]
                    tracing::warn!("notification {} refused, retrying", request.id());
                    sleep(config.flow_control_retry_delay).await;
                }
                Err(Error::FlowControl) => {
                    #[cfg(feature = "logging")]
                    tracing::debug!("flow control window full, retrying {}", request.id());
                    sleep(config.flow_control_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Close every connection. Connections opened afterwards are not
    /// affected.
    pub fn close(&self) {
        let connections = self.shared.connections.borrow().clone();
        for connection in connections {
            connection.close();
        }
    }

    async fn acquire(&self) -> crate::Result<Connection<M::Engine>> {
        if let Some(connection) = self.shared.idle() {
            return Ok(connection);
        }
        let _permit = self
            .shared
            .lock
            .acquire_permit()
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        loop {
            if let Some(connection) = self.shared.idle() {
                return Ok(connection);
            }
            if self.len() < self.shared.config.max_connections {
                return self.connect().await;
            }
            // every connection is busy and the pool is full
            sleep(self.shared.config.busy_poll_interval).await;
        }
    }

    async fn connect(&self) -> crate::Result<Connection<M::Engine>> {
        let pool = Rc::downgrade(&self.shared);
        let on_lost: OnConnectionLost = Box::new(move |id| {
            if let Some(pool) = Weak::upgrade(&pool) {
                pool.discard(id);
            }
        });
        let connection = match self.shared.maker.make_connection(on_lost).await {
            Ok(connection) => connection,
            Err(e @ Error::Connect(_)) => return Err(e),
            Err(e) => return Err(Error::Connect(Box::new(e))),
        };
        if connection.is_closed() {
            return Err(Error::Connect("connection closed during setup".into()));
        }
        self.shared.connections.borrow_mut().push(connection.clone());
        #[cfg(feature = "logging")]
        tracing::info!(
            "connection {} established, total {}",
            connection.id(),
            self.len()
        );
        Ok(connection)
    }
}

impl<M: MakeConnection> PoolShared<M> {
    fn idle(&self) -> Option<Connection<M::Engine>> {
        self.connections
            .borrow()
            .iter()
            .find(|connection| !connection.is_busy() && !connection.is_closed())
            .cloned()
    }

    fn discard(&self, id: ConnectionId) {
        self.connections
            .borrow_mut()
            .retain(|connection| connection.id() != id);
        #[cfg(feature = "logging")]
        tracing::info!(
            "connection {} lost, {} left",
            id,
            self.connections.borrow().len()
        );
    }
}
