//! Client builder and public facade.
//!
//! The [`ClientBuilder`] configures identity, endpoint, and per-message
//! defaults, then spawns the connection engine. The [`HeraldClient`] is a
//! cheap-to-clone handle to that engine; every send-initiating operation
//! funnels into its single command channel.
//!
//! # Example
//!
//! ```ignore
//! use herald_client::{ActionCall, HeraldClient, Options};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> herald_client::Result<()> {
//!     let client = HeraldClient::builder()
//!         .name("worker")
//!         .start();
//!
//!     client.add_rpc_worker("sum", |_caller, args, responder| async move {
//!         let a = args["a"].as_i64().unwrap_or(0);
//!         let b = args["b"].as_i64().unwrap_or(0);
//!         responder.ok(json!(a + b)).await;
//!     });
//!
//!     client.wait_connected().await;
//!     let result = client
//!         .rpc("peer", ActionCall::new("echo", json!({"x": 1})), Options::default())
//!         .await?;
//!     println!("echo -> {result}");
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::codec::{JsonCodec, MessageCodec};
use crate::conn::{self, lock, CallTarget, Command, ConnState};
use crate::error::{HeraldError, Result};
use crate::protocol::{
    Identity, Route, ACTION_SUBSCRIBE, ACTION_UNSUBSCRIBE, BROKER_NAME, DEFAULT_RETRY,
    DEFAULT_TIMEOUT_MS,
};
use crate::rpc::CallReply;
use crate::subscription::{wrap_handler, SubscriptionState};
use crate::transport::Endpoint;
use crate::worker::{wrap_worker, Responder, RpcWorkerTable};

/// Delay between a connection loss and the next dial attempt.
///
/// Deliberately a fixed delay rather than exponential backoff: clients talk
/// to a small set of known brokers.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Shared phrase presented with the authorize call.
pub const DEFAULT_WELL_KNOWN_PHRASE: &str = "pHrAsE";

/// Default writer channel capacity (frames in flight to the socket).
pub const DEFAULT_WRITER_CAPACITY: usize = 64;

/// Per-call options; unset fields fall back to the client defaults.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Broker-side redelivery hint.
    pub retry: Option<u32>,
    /// Send + response deadline for this message.
    pub timeout: Option<Duration>,
    /// Ask the broker to acknowledge delivery.
    pub ack: bool,
}

/// A named remote action plus its arguments.
#[derive(Debug, Clone)]
pub struct ActionCall {
    pub name: String,
    pub args: Value,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Engine configuration assembled by the builder.
pub(crate) struct ClientConfig {
    pub(crate) endpoint: Endpoint,
    pub(crate) default_retry: u32,
    pub(crate) default_timeout: Duration,
    pub(crate) reconnect_delay: Duration,
    pub(crate) well_known_phrase: String,
    pub(crate) writer_capacity: usize,
    pub(crate) codec: Arc<dyn MessageCodec>,
}

/// Builder for configuring and creating a Herald client.
pub struct ClientBuilder {
    name: Option<String>,
    uid: Option<String>,
    endpoint: Endpoint,
    default_retry: u32,
    default_timeout: Duration,
    reconnect_delay: Duration,
    well_known_phrase: String,
    writer_capacity: usize,
    codec: Arc<dyn MessageCodec>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            uid: None,
            endpoint: Endpoint::default(),
            default_retry: DEFAULT_RETRY,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            well_known_phrase: DEFAULT_WELL_KNOWN_PHRASE.to_string(),
            writer_capacity: DEFAULT_WRITER_CAPACITY,
            codec: Arc::new(JsonCodec::new()),
        }
    }

    /// Application name; shared by instances of the same application.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Unique instance id; generated from the name when not set.
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Broker endpoint. Default: `127.0.0.1:8765`.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Default `retry` hint for messages without an explicit option.
    pub fn default_retry(mut self, retry: u32) -> Self {
        self.default_retry = retry;
        self
    }

    /// Default per-message deadline. Default: 15 s.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Delay before a reconnect attempt. Default: 1 s.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Phrase presented with the authorize call.
    pub fn well_known_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.well_known_phrase = phrase.into();
        self
    }

    /// Writer channel capacity before queue backpressure.
    pub fn writer_capacity(mut self, capacity: usize) -> Self {
        self.writer_capacity = capacity.max(1);
        self
    }

    /// Replace the default JSON codec (e.g. with an encrypting one).
    pub fn codec<C: MessageCodec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Build the client and spawn its engine, without dialing yet.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> HeraldClient {
        let identity = Identity::generate(self.name, self.uid);
        let workers = Arc::new(Mutex::new(RpcWorkerTable::new()));
        let subscriptions = Arc::new(Mutex::new(SubscriptionState::new()));

        let config = ClientConfig {
            endpoint: self.endpoint,
            default_retry: self.default_retry,
            default_timeout: self.default_timeout,
            reconnect_delay: self.reconnect_delay,
            well_known_phrase: self.well_known_phrase,
            writer_capacity: self.writer_capacity,
            codec: self.codec,
        };

        let (cmd_tx, state_rx, errors, alive) =
            conn::spawn_engine(config, identity.clone(), workers.clone(), subscriptions.clone());

        HeraldClient {
            cmd_tx,
            identity,
            workers,
            subscriptions,
            state_rx,
            errors,
            _alive: alive,
        }
    }

    /// Build and immediately start connecting.
    pub fn start(self) -> HeraldClient {
        let client = self.build();
        client.kick_connect();
        client
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running Herald client.
///
/// Cloning is cheap; all clones drive the same connection. The engine
/// stops once every clone is dropped.
#[derive(Clone)]
pub struct HeraldClient {
    cmd_tx: mpsc::Sender<Command>,
    identity: Identity,
    workers: Arc<Mutex<RpcWorkerTable>>,
    subscriptions: Arc<Mutex<SubscriptionState>>,
    state_rx: watch::Receiver<ConnState>,
    errors: broadcast::Sender<Arc<HeraldError>>,
    // Liveness token observed by the engine's reconnect path.
    _alive: Arc<()>,
}

impl HeraldClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a default client connected to `endpoint`.
    pub fn connect_to(endpoint: Endpoint) -> HeraldClient {
        ClientBuilder::new().endpoint(endpoint).start()
    }

    /// This client's `(name, uid)` pair.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    /// Wait until the client is connected and authorized.
    pub async fn wait_connected(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow_and_update() == ConnState::Connected {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Receive errors from fire-and-forget paths (failed event sends,
    /// responder failures, transport errors).
    pub fn subscribe_errors(&self) -> broadcast::Receiver<Arc<HeraldError>> {
        self.errors.subscribe()
    }

    /// Start connecting (or re-arm reconnection after `close`). An
    /// endpoint given here replaces the configured one.
    pub async fn connect(&self, endpoint: Option<Endpoint>) -> Result<()> {
        self.send(Command::Connect { endpoint }).await
    }

    pub(crate) fn kick_connect(&self) {
        let _ = self.cmd_tx.try_send(Command::Connect { endpoint: None });
    }

    /// Close the connection and stop reconnecting. Every queued send and
    /// pending call fails immediately with a connection-closed error.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Close { done: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Call an action on one instance of the named application.
    pub async fn rpc(&self, target: &str, call: ActionCall, opts: Options) -> Result<Value> {
        if target.is_empty() {
            return Err(HeraldError::InvalidArguments("rpc target name is empty"));
        }
        self.call(CallTarget::Name(target.to_string()), call, opts)
            .await
    }

    /// Call an action on the instance with this uid.
    pub async fn rpc_by_uid(&self, target_uid: &str, call: ActionCall, opts: Options) -> Result<Value> {
        if target_uid.is_empty() {
            return Err(HeraldError::InvalidArguments("rpc target uid is empty"));
        }
        self.call(CallTarget::Uid(target_uid.to_string()), call, opts)
            .await
    }

    async fn call(&self, target: CallTarget, call: ActionCall, opts: Options) -> Result<Value> {
        if call.name.is_empty() {
            return Err(HeraldError::InvalidArguments("action name is empty"));
        }
        let (tx, rx) = oneshot::channel();
        self.send(Command::Call {
            target,
            action: call.name,
            args: call.args,
            opts,
            reply: CallReply::Caller(tx),
        })
        .await?;
        rx.await.map_err(|_| HeraldError::ConnectionClosed)?
    }

    /// Send an arbitrary routed message. Resolves once the frame was
    /// written to the transport.
    pub async fn write(&self, route: Route, body: Value, opts: Options) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Write {
            route,
            body,
            opts,
            done: Some(tx),
        })
        .await?;
        rx.await.map_err(|_| HeraldError::ConnectionClosed)?
    }

    /// Publish an event to every subscriber.
    ///
    /// Delivery always goes through the broker: publishing an event this
    /// client is itself subscribed to does not self-deliver unless the
    /// broker echoes it back.
    pub async fn publish(&self, event: &str, body: Value) -> Result<()> {
        if event.is_empty() {
            return Err(HeraldError::InvalidArguments("event name is empty"));
        }
        self.write(
            Route::Event {
                event: event.to_string(),
            },
            body,
            Options::default(),
        )
        .await
    }

    /// Send a targeted event to one instance of the named application.
    pub async fn whisper(&self, target: &str, event: &str, body: Value) -> Result<()> {
        self.whisper_to(target, event, body).await
    }

    /// Send a targeted event to the instance with this uid.
    pub async fn whisper_by_uid(&self, target_uid: &str, event: &str, body: Value) -> Result<()> {
        self.whisper_to(target_uid, event, body).await
    }

    async fn whisper_to(&self, target: &str, event: &str, body: Value) -> Result<()> {
        if target.is_empty() {
            return Err(HeraldError::InvalidArguments("whisper target is empty"));
        }
        if event.is_empty() {
            return Err(HeraldError::InvalidArguments("event name is empty"));
        }
        self.write(
            Route::Whisper {
                whisper_to: target.to_string(),
                event: event.to_string(),
            },
            body,
            Options::default(),
        )
        .await
    }

    /// Register a local handler and subscribe at the broker.
    ///
    /// Subscribing twice to the same event registers the handler twice
    /// locally but issues the broker rpc only once. The event stays in the
    /// replayed subscription set even when the broker rpc fails, so the
    /// next reconnect retries it; the failure still reaches the caller.
    pub async fn subscribe<F>(&self, event: &str, handler: F) -> Result<()>
    where
        F: Fn(Identity, Value) + Send + Sync + 'static,
    {
        if event.is_empty() {
            return Err(HeraldError::InvalidArguments("event name is empty"));
        }
        let newly_listening = lock(&self.subscriptions).add_local(event, wrap_handler(handler));
        if !newly_listening {
            return Ok(());
        }
        self.rpc(
            BROKER_NAME,
            ActionCall::new(ACTION_SUBSCRIBE, json!({ "event": event })),
            Options::default(),
        )
        .await
        .map(|_| ())
    }

    /// Drop local handlers and unsubscribe at the broker. The event leaves
    /// the replayed subscription set only when the broker rpc succeeds.
    pub async fn unsubscribe(&self, event: &str) -> Result<()> {
        if event.is_empty() {
            return Err(HeraldError::InvalidArguments("event name is empty"));
        }
        lock(&self.subscriptions).remove_local(event);
        self.rpc(
            BROKER_NAME,
            ActionCall::new(ACTION_UNSUBSCRIBE, json!({ "event": event })),
            Options::default(),
        )
        .await?;
        lock(&self.subscriptions).confirm_unsubscribed(event);
        Ok(())
    }

    /// Register a worker for inbound calls of `action`.
    ///
    /// Returns `false` when a worker under this name already exists; the
    /// existing one stays registered.
    pub fn add_rpc_worker<F, Fut>(&self, action: &str, worker: F) -> bool
    where
        F: Fn(Identity, Value, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        lock(&self.workers).insert(action, wrap_worker(worker)).is_ok()
    }

    /// Remove a worker, reporting whether one was registered.
    pub fn remove_rpc_worker(&self, action: &str) -> bool {
        lock(&self.workers).remove(action)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| HeraldError::ConnectionClosed)
    }
}
