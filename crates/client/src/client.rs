//! The gateway client: one socket, its handshake, the requests in flight on it
//! and the reconnect loop around it.
//!
//! All mutable state lives behind a single mutex. Socket-scoped callbacks carry
//! the generation of the socket they belong to and are ignored once that
//! socket has been replaced or torn down, so a stale reader can never touch
//! its successor's state.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use {
    serde_json::Value,
    tokio::{
        sync::{broadcast, mpsc, oneshot, watch},
        time::{Duration, Instant},
    },
    tracing::{debug, info, warn},
    url::Url,
};

use deckhand_protocol::{
    CONNECT_METHOD, EventFrameInner, GatewayEvent, GatewayFrame, KnownEvent, ResponseFrameInner,
    events::{ChallengePayload, names},
    subscriptions::WILDCARD,
};

use crate::{
    backoff::{Backoff, ReconnectTimer},
    codec,
    config::{ClientConfig, Credential},
    device::DeviceSigner,
    error::{Error, Result},
    handshake::{self, ServerInfo, Session},
    pending::{self, HandshakeOutcome, PendingRequest, PendingRequests, Reply},
    router::{EventHandler, EventRouter, Subscription},
    status::ConnectionStatus,
    transport::{Connection, Connector, TransportEvent, WsConnector},
};

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Parse a gateway URL, accepting only WebSocket schemes.
pub fn parse_gateway_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::message(format!(
            "unsupported gateway url scheme '{other}' (expected ws or wss)"
        ))),
    }
}

// ── State ────────────────────────────────────────────────────────────────────

struct Target {
    url: String,
    credential: Credential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    AwaitingChallenge,
    InFlight,
    Authenticated,
}

struct Socket {
    generation: u64,
    task: tokio::task::AbortHandle,
    /// `None` until the transport reports the socket open.
    outbound: Option<mpsc::UnboundedSender<String>>,
    handshake: HandshakeState,
}

struct State {
    status: ConnectionStatus,
    /// Where to (re)connect. `None` after an explicit disconnect.
    target: Option<Target>,
    generation: u64,
    socket: Option<Socket>,
    next_id: u64,
    pending: PendingRequests,
    session: Option<Session>,
    backoff: Backoff,
    reconnect: ReconnectTimer,
    last_tick: Option<Instant>,
}

impl State {
    fn is_current(&self, generation: u64) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|socket| socket.generation == generation)
    }
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    signer: Option<Arc<dyn DeviceSigner>>,
    router: EventRouter,
    state: Mutex<State>,
    status_tx: watch::Sender<ConnectionStatus>,
    transitions: broadcast::Sender<ConnectionStatus>,
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Configures a [`GatewayClient`] before it is shared.
pub struct GatewayClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    signer: Option<Arc<dyn DeviceSigner>>,
}

impl GatewayClientBuilder {
    /// Replace the WebSocket transport, e.g. with an in-memory one.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Attach a device identity to every `connect` request.
    pub fn device_signer(mut self, signer: Arc<dyn DeviceSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(self) -> GatewayClient {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (transitions, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let backoff = Backoff::new(self.config.reconnect.policy());
        GatewayClient {
            inner: Arc::new(Inner {
                connector: self.connector.unwrap_or_else(|| Arc::new(WsConnector)),
                signer: self.signer,
                router: EventRouter::new(),
                state: Mutex::new(State {
                    status: ConnectionStatus::Disconnected,
                    target: None,
                    generation: 0,
                    socket: None,
                    next_id: 0,
                    pending: PendingRequests::default(),
                    session: None,
                    backoff,
                    reconnect: ReconnectTimer::default(),
                    last_tick: None,
                }),
                status_tx,
                transitions,
                config: self.config,
            }),
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Handle to a gateway connection. Cheap to clone; clones share the socket,
/// the subscriptions and the pending requests.
///
/// [`GatewayClient::connect`] and everything that schedules timers must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

impl GatewayClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> GatewayClientBuilder {
        GatewayClientBuilder {
            config,
            connector: None,
            signer: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open a socket to `url`. Any existing socket is torn down first and its
    /// in-flight requests are rejected.
    ///
    /// Returns immediately; progress is visible through [`Self::status`].
    /// Failures, including an unparsable URL, put the client in
    /// [`ConnectionStatus::Error`] and schedule a reconnect.
    pub fn connect(&self, url: impl Into<String>, credential: Credential) {
        let url = url.into();
        let flushed = {
            let mut state = self.inner.lock();
            state.reconnect.cancel();
            let flushed = self.inner.teardown(&mut state);
            state.target = Some(Target { url, credential });
            self.inner.open(&mut state);
            flushed
        };
        pending::reject_all(flushed);
    }

    /// [`Self::connect`] using the URL and token from the client config.
    pub fn connect_configured(&self) {
        let config = &self.inner.config;
        self.connect(config.url.clone(), config.credential());
    }

    /// Close the socket, cancel any pending reconnect and reject every
    /// in-flight request with [`Error::Disconnected`]. Subscriptions are kept.
    pub fn disconnect(&self) {
        let flushed = {
            let mut state = self.inner.lock();
            state.reconnect.cancel();
            state.target = None;
            let flushed = self.inner.teardown(&mut state);
            self.inner.set_status(&mut state, ConnectionStatus::Disconnected);
            flushed
        };
        if !flushed.is_empty() {
            info!(count = flushed.len(), "rejecting in-flight gateway requests");
        }
        pending::reject_all(flushed);
    }

    /// Send `method` and wait for its response.
    ///
    /// Fails immediately with [`Error::NotConnected`] when no socket is open.
    /// Otherwise resolves with the response payload, the server's error, a
    /// [`Error::Timeout`] naming the method, or [`Error::Disconnected`] if
    /// the socket goes away first.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.lock();
            self.inner
                .dispatch(&mut state, method, params, Reply::Caller(tx), None)?;
        }
        rx.await.unwrap_or(Err(Error::Disconnected))
    }

    /// Subscribe `handler` to `event`, or to every event with `"*"`.
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.inner.router.on(event, Arc::new(handler))
    }

    /// Like [`Self::on`], for a shared handler. Registering the same handler
    /// twice under one name keeps a single registration.
    pub fn on_handler(&self, event: &str, handler: EventHandler) -> Subscription {
        self.inner.router.on(event, handler)
    }

    /// Subscribe to every event.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.on(WILDCARD, handler)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }

    /// Latest-value view of the status.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Every status transition, in order.
    pub fn status_changes(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.transitions.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Server facts from the last handshake on the current socket.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.server.clone())
    }

    /// Initial state snapshot delivered with the hello payload.
    pub fn snapshot(&self) -> Option<Value> {
        self.inner
            .lock()
            .session
            .as_ref()
            .and_then(|session| session.snapshot.clone())
    }

    pub fn granted_scopes(&self) -> Vec<String> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.scopes.as_slice().to_vec())
            .unwrap_or_default()
    }

    /// Whether the current session was granted `scope`. Always `false`
    /// before a handshake completes.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.inner
            .lock()
            .session
            .as_ref()
            .is_some_and(|session| session.scopes.contains(scope))
    }

    /// When the server last sent a `tick` on the current socket.
    pub fn last_tick(&self) -> Option<Instant> {
        self.inner.lock().last_tick
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

// ── Internals ────────────────────────────────────────────────────────────────

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, state: &mut State, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        debug!(from = %state.status, to = %status, "gateway status changed");
        state.status = status;
        self.status_tx.send_replace(status);
        // No receivers is fine.
        let _ = self.transitions.send(status);
    }

    /// Drop the current socket and session and hand back the requests that
    /// were waiting on it. The caller rejects them after unlocking.
    fn teardown(&self, state: &mut State) -> Vec<PendingRequest> {
        if close_socket(state) {
            self.set_status(state, ConnectionStatus::Disconnected);
        }
        clear_session(state)
    }

    /// Start a socket to the current target.
    fn open(self: &Arc<Self>, state: &mut State) {
        let Some(raw) = state.target.as_ref().map(|target| target.url.clone()) else {
            return;
        };
        self.set_status(state, ConnectionStatus::Connecting);
        state.generation += 1;
        let generation = state.generation;

        match parse_gateway_url(&raw) {
            Ok(url) => {
                info!(generation, url = %url, "connecting to gateway");
                let task = tokio::spawn(run_connection(Arc::downgrade(self), generation, url));
                state.socket = Some(Socket {
                    generation,
                    task: task.abort_handle(),
                    outbound: None,
                    handshake: HandshakeState::AwaitingChallenge,
                });
            },
            Err(e) => {
                warn!(url = %raw, error = %e, "invalid gateway url");
                self.set_status(state, ConnectionStatus::Error);
                self.schedule_reconnect(state);
            },
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut State) {
        if state.target.is_none() || state.reconnect.is_armed() {
            return;
        }
        let delay = state.backoff.next_delay();
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling gateway reconnect"
        );
        let weak = Arc::downgrade(self);
        state.reconnect.arm_with(|token| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    inner.fire_reconnect(token);
                }
            })
            .abort_handle()
        });
    }

    fn fire_reconnect(self: &Arc<Self>, token: u64) {
        let flushed = {
            let mut state = self.lock();
            if !state.reconnect.fire(token) {
                return;
            }
            if state.status == ConnectionStatus::Connected || state.target.is_none() {
                return;
            }
            let flushed = self.teardown(&mut state);
            self.open(&mut state);
            flushed
        };
        pending::reject_all(flushed);
    }

    /// Register and send one request on the current socket (or on socket
    /// `generation`, when given). No id is consumed when nothing is open.
    fn dispatch(
        self: &Arc<Self>,
        state: &mut State,
        method: &str,
        params: Value,
        reply: Reply,
        generation: Option<u64>,
    ) -> Result<()> {
        let outbound = state
            .socket
            .as_ref()
            .filter(|socket| generation.is_none_or(|g| g == socket.generation))
            .and_then(|socket| socket.outbound.clone())
            .filter(|outbound| !outbound.is_closed())
            .ok_or(Error::NotConnected)?;

        state.next_id += 1;
        let id = state.next_id;
        let text = codec::encode_request(id, method, params)?;
        state.pending.insert(id, PendingRequest::new(method, reply));
        if outbound.send(text).is_err() {
            state.pending.take(id);
            return Err(Error::NotConnected);
        }

        let deadline = tokio::spawn(expire_after(
            Arc::downgrade(self),
            id,
            self.config.request_timeout(),
        ));
        state.pending.set_deadline(id, deadline.abort_handle());
        debug!(id, method, "gateway request sent");
        Ok(())
    }

    fn on_open(&self, generation: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut state = self.lock();
        match state.socket.as_mut() {
            Some(socket) if socket.generation == generation => {
                debug!(generation, "gateway socket open");
                socket.outbound = Some(outbound);
                true
            },
            _ => false,
        }
    }

    fn on_open_failed(self: &Arc<Self>, generation: u64, error: &Error) {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return;
        }
        warn!(generation, error = %error, "gateway connection failed");
        state.socket = None;
        self.set_status(&mut state, ConnectionStatus::Error);
        self.schedule_reconnect(&mut state);
    }

    fn on_transport_error(&self, generation: u64, message: &str) {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return;
        }
        warn!(generation, error = message, "gateway socket error");
        self.set_status(&mut state, ConnectionStatus::Error);
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        let flushed = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                return;
            }
            info!(generation, "gateway socket closed");
            state.socket = None;
            state.session = None;
            state.last_tick = None;
            let flushed = state.pending.drain();
            self.set_status(&mut state, ConnectionStatus::Disconnected);
            self.schedule_reconnect(&mut state);
            flushed
        };
        pending::reject_all(flushed);
    }

    fn handle_text(self: &Arc<Self>, generation: u64, text: &str) {
        let frame = match codec::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(generation, error = %e, "dropping malformed gateway frame");
                return;
            },
        };
        match frame {
            GatewayFrame::Response(response) => self.handle_response(generation, response),
            GatewayFrame::Event(event) => self.handle_event(generation, event),
            GatewayFrame::Request(request) => {
                debug!(method = %request.method, "ignoring server-initiated request");
            },
        }
    }

    fn handle_response(self: &Arc<Self>, generation: u64, response: ResponseFrameInner) {
        let Some(id) = response.id.as_u64() else {
            debug!(id = %response.id, "dropping response with foreign id");
            return;
        };
        let entry = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                return;
            }
            state.pending.take(id)
        };
        let Some(entry) = entry else {
            debug!(id, "dropping response for unknown request");
            return;
        };

        let outcome = if response.ok {
            Ok(response.payload.unwrap_or(Value::Null))
        } else {
            Err(response.error.unwrap_or_default().into())
        };
        if let Some(handshake) = entry.settle(outcome) {
            self.finish_handshake(handshake);
        }
    }

    fn handle_event(self: &Arc<Self>, generation: u64, frame: EventFrameInner) {
        let event = GatewayEvent::new(frame.event, frame.payload.unwrap_or(Value::Null));

        if event.is_tick() {
            let mut state = self.lock();
            if state.is_current(generation) {
                state.last_tick = Some(Instant::now());
            }
            return;
        }

        let flushed = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                return;
            }
            if event.name == names::CONNECT_CHALLENGE {
                let challenge: ChallengePayload = match event.typed() {
                    KnownEvent::Challenge(challenge) => challenge,
                    _ => ChallengePayload::default(),
                };
                self.begin_handshake(&mut state, generation, &challenge)
            } else {
                Vec::new()
            }
        };
        pending::reject_all(flushed);

        self.router.emit(&event);
    }

    /// Answer a challenge with the `connect` request. A challenge that
    /// arrives while a handshake is in flight or done is ignored. Returns the
    /// requests flushed if the handshake could not be sent.
    fn begin_handshake(
        self: &Arc<Self>,
        state: &mut State,
        generation: u64,
        challenge: &ChallengePayload,
    ) -> Vec<PendingRequest> {
        let Some(socket) = state.socket.as_mut() else {
            return Vec::new();
        };
        if socket.handshake != HandshakeState::AwaitingChallenge {
            debug!(generation, "ignoring repeated connect challenge");
            return Vec::new();
        }
        socket.handshake = HandshakeState::InFlight;

        let credential = state
            .target
            .as_ref()
            .map(|target| target.credential.clone())
            .unwrap_or_default();
        let sent = handshake::connect_params(
            &self.config,
            &credential,
            self.signer.as_deref(),
            challenge,
        )
        .and_then(|params| serde_json::to_value(params).map_err(Error::from))
        .and_then(|params| {
            self.dispatch(
                state,
                CONNECT_METHOD,
                params,
                Reply::Handshake { generation },
                Some(generation),
            )
        });
        match sent {
            Ok(()) => Vec::new(),
            Err(e) => self.fail_handshake(state, generation, &e),
        }
    }

    fn finish_handshake(self: &Arc<Self>, outcome: HandshakeOutcome) {
        let HandshakeOutcome { generation, result } = outcome;
        let established =
            result.and_then(|payload| Session::from_hello(&payload).map(|session| (session, payload)));

        let payload = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                debug!(generation, "discarding handshake result for stale socket");
                return;
            }
            match established {
                Ok((session, payload)) => {
                    if let Some(socket) = state.socket.as_mut() {
                        socket.handshake = HandshakeState::Authenticated;
                    }
                    info!(
                        generation,
                        server_version = session.server.server_version.as_deref().unwrap_or("unknown"),
                        protocol = ?session.server.protocol_version,
                        scopes = ?session.scopes.as_slice(),
                        "gateway handshake complete"
                    );
                    state.session = Some(session);
                    state.backoff.reset();
                    self.set_status(&mut state, ConnectionStatus::Connected);
                    Ok(payload)
                },
                Err(e) => Err(self.fail_handshake(&mut state, generation, &e)),
            }
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(flushed) => {
                pending::reject_all(flushed);
                return;
            },
        };

        self.router
            .emit(&GatewayEvent::new(names::CONNECTED, payload));
    }

    /// Give up on socket `generation`: drop it, report `error` and let the
    /// reconnect loop open a fresh one. The caller rejects the returned
    /// requests after unlocking.
    fn fail_handshake(
        self: &Arc<Self>,
        state: &mut State,
        generation: u64,
        error: &Error,
    ) -> Vec<PendingRequest> {
        warn!(generation, error = %error, "gateway handshake failed");
        close_socket(state);
        let flushed = clear_session(state);
        self.set_status(state, ConnectionStatus::Error);
        self.schedule_reconnect(state);
        flushed
    }
}

/// Abort the current socket's task. Returns whether there was one.
fn close_socket(state: &mut State) -> bool {
    match state.socket.take() {
        Some(socket) => {
            debug!(generation = socket.generation, "closing gateway socket");
            socket.task.abort();
            true
        },
        None => false,
    }
}

fn clear_session(state: &mut State) -> Vec<PendingRequest> {
    state.session = None;
    state.last_tick = None;
    state.pending.drain()
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.reconnect.cancel();
        if let Some(socket) = state.socket.take() {
            socket.task.abort();
        }
    }
}

// ── Tasks ────────────────────────────────────────────────────────────────────

/// Open the socket for `generation` and pump its events until it closes.
async fn run_connection(weak: Weak<Inner>, generation: u64, url: Url) {
    let Some(connector) = weak.upgrade().map(|inner| Arc::clone(&inner.connector)) else {
        return;
    };
    let opened = connector.open(&url).await;

    let Some(inner) = weak.upgrade() else {
        return;
    };
    let Connection {
        outbound,
        mut inbound,
    } = match opened {
        Ok(connection) => connection,
        Err(e) => {
            inner.on_open_failed(generation, &e);
            return;
        },
    };
    if !inner.on_open(generation, outbound) {
        return;
    }
    drop(inner);

    while let Some(event) = inbound.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message(text) => inner.handle_text(generation, &text),
            TransportEvent::Error(message) => inner.on_transport_error(generation, &message),
            TransportEvent::Closed => break,
        }
    }

    if let Some(inner) = weak.upgrade() {
        inner.on_closed(generation);
    }
}

/// Reject request `id` once `timeout` elapses, unless it settled first.
async fn expire_after(weak: Weak<Inner>, id: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let Some(entry) = inner.lock().pending.take(id) else {
        return;
    };
    let method = entry.method().to_string();
    warn!(id, method = %method, "gateway request timed out");
    if let Some(outcome) = entry.settle(Err(Error::timeout(method))) {
        inner.finish_handshake(outcome);
    }
}
