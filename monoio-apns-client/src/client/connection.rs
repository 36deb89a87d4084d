use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use local_sync::{mpsc::unbounded, oneshot};
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, Split, Splitable};
use monoio_apns::h2::{
    reason, EngineError, Event, ProtocolEngine, Setting, StreamId, StreamSlotAllocator,
};

use super::ConnectionConfig;
use crate::{
    request::{NotificationRequest, APNS_ID},
    response::{ErrorBody, NotificationResult},
    Error,
};

const READ_BUFFER_SIZE: usize = 16 * 1024;

pub type ConnectionId = u64;

/// Called once when a connection goes away, with the id of that connection.
pub type OnConnectionLost = Box<dyn FnOnce(ConnectionId)>;

type ResultSender = oneshot::Sender<crate::Result<NotificationResult>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One HTTP/2 connection to the gateway, multiplexing many notifications.
///
/// Cloning is cheap and yields a handle to the same connection.
pub struct Connection<E> {
    shared: Rc<Shared<E>>,
}

impl<E> Clone for Connection<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<E> std::fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection({})", self.shared.id)
    }
}

struct Shared<E> {
    id: ConnectionId,
    config: ConnectionConfig,
    slots: StreamSlotAllocator,
    state: RefCell<State<E>>,
    outbound: RefCell<Option<unbounded::Tx<Bytes>>>,
    last_activity: Cell<Instant>,
    closed: Cell<bool>,
    on_lost: RefCell<Option<OnConnectionLost>>,
}

struct State<E> {
    engine: E,
    // notification id -> waiting caller
    requests: HashMap<String, ResultSender>,
    request_streams: HashMap<StreamId, String>,
    // non-success statuses waiting for their reason
    request_statuses: HashMap<String, StatusCode>,
    bodies: HashMap<StreamId, BytesMut>,
}

impl<E: ProtocolEngine + 'static> Connection<E> {
    /// Create a connection whose outbound bytes are delivered to the returned
    /// receiver. Nothing is spawned; see [`Connection::handshake`] for a
    /// connection bound to a transport.
    pub fn new(
        engine: E,
        config: ConnectionConfig,
        on_lost: Option<OnConnectionLost>,
    ) -> (Self, unbounded::Rx<Bytes>) {
        let slots = StreamSlotAllocator::new(config.initial_max_concurrent_streams);
        Self::with_slots(engine, config, slots, on_lost)
    }

    pub(crate) fn with_slots(
        mut engine: E,
        config: ConnectionConfig,
        slots: StreamSlotAllocator,
        on_lost: Option<OnConnectionLost>,
    ) -> (Self, unbounded::Rx<Bytes>) {
        let (tx, rx) = unbounded::channel();
        engine.initiate_connection();
        let shared = Rc::new(Shared {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            slots,
            state: RefCell::new(State {
                engine,
                requests: HashMap::new(),
                request_streams: HashMap::new(),
                request_statuses: HashMap::new(),
                bodies: HashMap::new(),
            }),
            outbound: RefCell::new(Some(tx)),
            last_activity: Cell::new(Instant::now()),
            closed: Cell::new(false),
            on_lost: RefCell::new(on_lost),
        });
        shared.flush();
        (Self { shared }, rx)
    }

    /// Bind a connection to an established transport: spawns the reader, the
    /// writer and the inactivity timer.
    pub fn handshake<IO>(
        io: IO,
        engine: E,
        config: ConnectionConfig,
        on_lost: Option<OnConnectionLost>,
    ) -> Self
    where
        IO: Split + AsyncReadRent + AsyncWriteRent + 'static,
    {
        let (connection, outbound) = Self::new(engine, config, on_lost);
        let (reader, writer) = io.into_split();
        monoio::spawn(write_loop(
            writer,
            outbound,
            Rc::downgrade(&connection.shared),
        ));
        monoio::spawn(read_loop(reader, Rc::downgrade(&connection.shared)));
        connection.spawn_inactivity_timer();
        connection
    }

    /// Close the connection once nothing was sent or received for
    /// `inactivity_timeout`.
    pub fn spawn_inactivity_timer(&self) {
        let shared = Rc::downgrade(&self.shared);
        let timeout = self.shared.config.inactivity_timeout;
        monoio::spawn(async move {
            let mut wait = timeout;
            loop {
                monoio::time::sleep(wait).await;
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                if shared.closed.get() {
                    return;
                }
                let idle = shared.last_activity.get().elapsed();
                if idle >= timeout {
                    #[cfg(feature = "logging")]
                    tracing::debug!("connection {} inactive for {:?}", shared.id, idle);
                    shared.teardown();
                    return;
                }
                wait = timeout - idle;
            }
        });
    }

    /// Send one notification and wait for the gateway's answer.
    ///
    /// Fails with [`Error::StreamExhausted`] or [`Error::ConnectionClosed`]
    /// when this connection can not carry the notification; both are worth
    /// retrying on another connection.
    pub async fn send(&self, request: &NotificationRequest) -> crate::Result<NotificationResult> {
        let shared = &self.shared;
        if shared.closed.get() {
            return Err(Error::ConnectionClosed);
        }
        let stream_id = shared.slots.acquire().await?;
        let response = match shared.start_request(stream_id, request) {
            Ok(response) => response,
            Err(e) => {
                shared.slots.release(stream_id);
                return Err(e);
            }
        };
        match response.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Feed bytes read from the transport.
    pub fn receive(&self, data: &[u8]) {
        self.shared.receive(data);
    }

    pub fn handle_event(&self, event: Event) {
        self.shared.handle_event(event);
    }
}

impl<E> Connection<E> {
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// No stream slot is free right now.
    pub fn is_busy(&self) -> bool {
        self.shared.slots.is_busy()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.get()
    }

    /// Streams whose notification still waits for its result.
    pub fn in_flight(&self) -> usize {
        self.shared.state.borrow().request_streams.len()
    }

    /// Streams holding a slot, including answered ones not yet ended.
    pub fn open_streams(&self) -> usize {
        self.shared.slots.in_flight()
    }

    /// Notifications still waiting for a result.
    pub fn pending(&self) -> usize {
        self.shared.state.borrow().requests.len()
    }

    pub fn close(&self) {
        self.shared.teardown();
    }
}

impl<E: ProtocolEngine> Shared<E> {
    fn start_request(
        &self,
        stream_id: StreamId,
        request: &NotificationRequest,
    ) -> crate::Result<oneshot::Receiver<crate::Result<NotificationResult>>> {
        if self.closed.get() {
            return Err(Error::ConnectionClosed);
        }
        let authorization = match &self.config.auth {
            Some(provider) => Some(provider.header()?),
            None => None,
        };
        let head = request.build_head(
            &self.config.endpoint,
            self.config.topic.as_deref(),
            authorization,
        )?;
        let body = request.build_body()?;
        let notification_id = request.id().to_owned();

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.borrow_mut();
            if state.requests.contains_key(&notification_id) {
                return Err(Error::DuplicateNotificationId(notification_id));
            }
            let sent = match state.engine.send_headers(stream_id, head, false) {
                Ok(()) => state.engine.send_data(stream_id, body, true),
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                #[cfg(feature = "logging")]
                tracing::debug!("stream {} not sent: {}", stream_id, e);
                let _ = state.engine.reset_stream(stream_id, reason::CANCEL);
                drop(state);
                self.flush();
                return Err(e.into());
            }
            state.requests.insert(notification_id.clone(), tx);
            state.request_streams.insert(stream_id, notification_id);
        }
        self.flush();
        #[cfg(feature = "logging")]
        tracing::debug!(
            "notification {} sent on stream {} of connection {}",
            request.id(),
            stream_id,
            self.id
        );
        Ok(rx)
    }

    fn receive(&self, data: &[u8]) {
        if self.closed.get() {
            return;
        }
        let events = self.state.borrow_mut().engine.receive_data(data);
        match events {
            Ok(events) => {
                for event in events {
                    self.handle_event(event);
                    if self.closed.get() {
                        return;
                    }
                }
                self.flush();
            }
            Err(_e) => {
                #[cfg(feature = "logging")]
                tracing::warn!("connection {} protocol failure: {}", self.id, _e);
                self.teardown();
            }
        }
    }

    fn handle_event(&self, event: Event) {
        match event {
            Event::ResponseReceived {
                stream_id,
                status,
                headers,
            } => self.on_response_received(stream_id, status, &headers),
            Event::DataReceived { stream_id, data } => self.on_data_received(stream_id, &data),
            Event::RemoteSettingsChanged(settings) => self.on_remote_settings_changed(&settings),
            Event::StreamEnded { stream_id } => self.on_stream_ended(stream_id),
            Event::StreamReset {
                stream_id,
                error_code,
            } => self.on_stream_reset(stream_id, error_code),
            Event::WindowUpdated { .. } | Event::SettingsAcknowledged => {}
            Event::ConnectionTerminated {
                error_code: _error_code,
                last_stream_id: _last_stream_id,
                additional_data: _additional_data,
            } => {
                #[cfg(feature = "logging")]
                tracing::warn!(
                    "connection {} terminated: code={}, additional_data={:?}, last_stream_id={}",
                    self.id,
                    _error_code,
                    _additional_data,
                    _last_stream_id
                );
                self.teardown();
            }
        }
    }

    fn on_response_received(&self, stream_id: StreamId, status: StatusCode, headers: &HeaderMap) {
        let (sender, result) = {
            let mut state = self.state.borrow_mut();
            // the stream we opened is authoritative, the echoed header is a fallback
            let notification_id = match state.request_streams.get(&stream_id) {
                Some(id) => id.clone(),
                None => match headers.get(APNS_ID).and_then(|v| v.to_str().ok()) {
                    Some(id) => id.to_owned(),
                    None => {
                        #[cfg(feature = "logging")]
                        tracing::warn!("response on stream {} matches no notification", stream_id);
                        return;
                    }
                },
            };
            if !state.requests.contains_key(&notification_id) {
                #[cfg(feature = "logging")]
                tracing::warn!(
                    "got response for unknown notification request {}",
                    notification_id
                );
                state.request_streams.remove(&stream_id);
                return;
            }
            if status != StatusCode::OK {
                state.request_statuses.insert(notification_id, status);
                return;
            }
            state.request_streams.remove(&stream_id);
            match state.requests.remove(&notification_id) {
                Some(sender) => (sender, NotificationResult::new(notification_id, status)),
                None => return,
            }
        };
        resolve(sender, Ok(result));
    }

    fn on_data_received(&self, stream_id: StreamId, data: &[u8]) {
        self.touch();
        let (sender, result) = {
            let mut state = self.state.borrow_mut();
            let body = state.bodies.entry(stream_id).or_default();
            body.extend_from_slice(data);
            let Some(parsed) = ErrorBody::parse(body) else {
                return;
            };
            state.bodies.remove(&stream_id);

            let Some(notification_id) = state.request_streams.remove(&stream_id) else {
                #[cfg(feature = "logging")]
                tracing::warn!("could not find notification by stream {}", stream_id);
                return;
            };
            let status = state.request_statuses.remove(&notification_id);
            let Some(sender) = state.requests.remove(&notification_id) else {
                #[cfg(feature = "logging")]
                tracing::warn!("could not find request {}", notification_id);
                return;
            };
            // HEADERS always precede DATA, a missing status means the peer broke that
            let status = status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut result = NotificationResult::new(notification_id, status);
            result.description = Some(parsed.reason);
            result.timestamp = parsed.timestamp;
            (sender, result)
        };
        resolve(sender, Ok(result));
    }

    fn on_remote_settings_changed(&self, settings: &[Setting]) {
        for setting in settings {
            #[cfg(feature = "logging")]
            tracing::debug!("remote setting changed: {:?}", setting);
            if let Setting::MaxConcurrentStreams(max) = setting {
                self.slots.set_bound(*max as usize);
            }
        }
    }

    fn on_stream_ended(&self, stream_id: StreamId) {
        if stream_id % 2 == 0 {
            #[cfg(feature = "logging")]
            tracing::warn!("end stream: {}", stream_id);
        }
        self.slots.release(stream_id);

        let (sender, result) = {
            let mut state = self.state.borrow_mut();
            state.bodies.remove(&stream_id);
            let Some(notification_id) = state.request_streams.remove(&stream_id) else {
                return;
            };
            let status = state.request_statuses.remove(&notification_id);
            let Some(sender) = state.requests.remove(&notification_id) else {
                return;
            };
            let result = match status {
                Some(status) => Ok(NotificationResult::new(notification_id, status)),
                None => Err(Error::Engine(EngineError::Protocol(format!(
                    "stream {stream_id} ended without a response"
                )))),
            };
            (sender, result)
        };
        resolve(sender, result);
    }

    fn on_stream_reset(&self, stream_id: StreamId, error_code: u32) {
        #[cfg(feature = "logging")]
        tracing::warn!("stream {} reset with code {}", stream_id, error_code);
        self.slots.release(stream_id);

        let sender = {
            let mut state = self.state.borrow_mut();
            state.bodies.remove(&stream_id);
            let Some(notification_id) = state.request_streams.remove(&stream_id) else {
                return;
            };
            state.request_statuses.remove(&notification_id);
            let Some(sender) = state.requests.remove(&notification_id) else {
                return;
            };
            sender
        };
        resolve(sender, Err(Error::StreamReset { error_code }));
    }

    fn flush(&self) {
        self.touch();
        let data = self.state.borrow_mut().engine.data_to_send();
        if data.is_empty() {
            return;
        }
        if let Some(outbound) = &*self.outbound.borrow() {
            if outbound.send(data).is_err() {
                #[cfg(feature = "logging")]
                tracing::debug!("connection {} writer is gone", self.id);
            }
        }
    }
}

impl<E> Shared<E> {
    fn touch(&self) {
        self.last_activity.set(Instant::now());
    }

    /// Fail everything still pending. Runs at most once; a termination racing
    /// with a half received rejection wins and drops the stashed status.
    fn teardown(&self) {
        if self.closed.replace(true) {
            return;
        }
        #[cfg(feature = "logging")]
        tracing::debug!("connection {} lost", self.id);

        self.outbound.borrow_mut().take();
        self.slots.destroy();

        let on_lost = self.on_lost.borrow_mut().take();
        if let Some(on_lost) = on_lost {
            on_lost(self.id);
        }

        let pending = {
            let mut state = self.state.borrow_mut();
            state.request_streams.clear();
            state.request_statuses.clear();
            state.bodies.clear();
            std::mem::take(&mut state.requests)
        };
        for (_, sender) in pending {
            resolve(sender, Err(Error::ConnectionClosed));
        }
    }
}

fn resolve(sender: ResultSender, result: crate::Result<NotificationResult>) {
    if sender.send(result).is_err() {
        // the caller stopped waiting; the bookkeeping is already gone
        #[cfg(feature = "logging")]
        tracing::debug!("result delivered after the caller went away");
    }
}

async fn read_loop<R, E>(mut reader: R, shared: Weak<Shared<E>>)
where
    R: AsyncReadRent,
    E: ProtocolEngine,
{
    let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);
    loop {
        buf.clear();
        let (res, returned) = reader.read(buf).await;
        buf = returned;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.closed.get() {
            return;
        }
        match res {
            Ok(0) => {
                shared.teardown();
                return;
            }
            Ok(_) => shared.receive(&buf),
            Err(_e) => {
                #[cfg(feature = "logging")]
                tracing::debug!("connection {} read error {:?}", shared.id, _e);
                shared.teardown();
                return;
            }
        }
    }
}

async fn write_loop<W, E>(mut writer: W, mut outbound: unbounded::Rx<Bytes>, shared: Weak<Shared<E>>)
where
    W: AsyncWriteRent,
{
    while let Some(data) = outbound.recv().await {
        let (res, _) = writer.write_all(data).await;
        if let Err(_e) = res {
            #[cfg(feature = "logging")]
            tracing::debug!("write error {:?}", _e);
            if let Some(shared) = shared.upgrade() {
                shared.teardown();
            }
            break;
        }
    }
    let _ = writer.shutdown().await;
}
