//! Connection engine.
//!
//! One task per client owns every piece of mutable engine state: the
//! connection state machine, the message/action counters, the outbound
//! queue and the rpc correlation table. The facade, the per-connection
//! reader/writer tasks and all timers talk to it over a single command
//! channel, so no engine state is ever touched concurrently and outbound
//! frames leave in exactly command order.
//!
//! Lifecycle: `Disconnected → Connecting → Authenticating → Connected`,
//! back to `Disconnected` on any transport failure. Transport failures are
//! always transient — unless `close` was called, a reconnect attempt is
//! scheduled after a fixed delay. Each physical connection gets a
//! generation number; events tagged with a stale generation are ignored.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::client::{ClientConfig, Options};
use crate::error::{HeraldError, Result};
use crate::protocol::{
    CallBody, Header, Identity, Message, ResultBody, Route, ACTION_AUTHORIZE, ACTION_PING,
    ACTION_SUBSCRIBE, BROKER_NAME, EVENT_PONG,
};
use crate::queue::{OnSent, SendQueue};
use crate::rpc::{CallReply, RpcTable};
use crate::subscription::SubscriptionState;
use crate::transport::{self, Endpoint};
use crate::worker::{Responder, RpcWorkerTable};
use crate::writer::{self, WriteJob};

/// Capacity of the engine command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

/// Target of an outbound rpc call.
#[derive(Debug, Clone)]
pub(crate) enum CallTarget {
    Name(String),
    Uid(String),
}

/// Everything the engine reacts to: facade requests, timer firings, and
/// transport events.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        endpoint: Option<Endpoint>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
    Write {
        route: Route,
        body: Value,
        opts: Options,
        done: Option<oneshot::Sender<Result<()>>>,
    },
    Call {
        target: CallTarget,
        action: String,
        args: Value,
        opts: Options,
        reply: CallReply,
    },
    SendTimeout {
        message_id: u64,
    },
    RpcTimeout {
        action_id: u64,
    },
    ReconnectTick,
    Transport(TransportEvent),
}

/// Events posted by connection tasks.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Connected {
        generation: u64,
        stream: TcpStream,
    },
    ConnectFailed {
        generation: u64,
        error: std::io::Error,
    },
    Frame {
        generation: u64,
        message: Message,
    },
    Wrote {
        generation: u64,
        message_id: u64,
        result: std::io::Result<()>,
    },
    Closed {
        generation: u64,
        error: Option<std::io::Error>,
    },
}

/// Spawn the engine task, returning the handles the facade keeps. The
/// `Arc<()>` is the facade liveness token: once every clone of it is
/// gone, the engine stops dialing and winds down with the connection.
pub(crate) fn spawn_engine(
    config: ClientConfig,
    identity: Identity,
    workers: Arc<Mutex<RpcWorkerTable>>,
    subscriptions: Arc<Mutex<SubscriptionState>>,
) -> (
    mpsc::Sender<Command>,
    watch::Receiver<ConnState>,
    broadcast::Sender<Arc<HeraldError>>,
    Arc<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);
    let (errors, _) = broadcast::channel(64);
    let alive = Arc::new(());

    let engine = Engine {
        config,
        identity,
        workers,
        subscriptions,
        cmd_tx: cmd_tx.downgrade(),
        cmd_rx,
        state_tx,
        errors: errors.clone(),
        facade: Arc::downgrade(&alive),
        state: ConnState::Disconnected,
        should_reconnect: true,
        reconnect_scheduled: false,
        generation: 0,
        writer_tx: None,
        queue: SendQueue::new(),
        calls: RpcTable::new(),
        next_message_id: 1,
        next_action_id: 1,
    };
    tokio::spawn(engine.run());

    (cmd_tx, state_rx, errors, alive)
}

struct Engine {
    config: ClientConfig,
    identity: Identity,
    workers: Arc<Mutex<RpcWorkerTable>>,
    subscriptions: Arc<Mutex<SubscriptionState>>,

    // Weak so the engine's own timer/task handles never keep the command
    // channel alive after every facade clone is gone.
    cmd_tx: mpsc::WeakSender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnState>,
    errors: broadcast::Sender<Arc<HeraldError>>,
    facade: std::sync::Weak<()>,

    state: ConnState,
    should_reconnect: bool,
    reconnect_scheduled: bool,
    generation: u64,
    writer_tx: Option<mpsc::Sender<WriteJob>>,
    queue: SendQueue,
    calls: RpcTable,
    next_message_id: u64,
    next_action_id: u64,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Engine {
    async fn run(mut self) {
        while let Some(command) = self.cmd_rx.recv().await {
            self.handle(command);
        }
        tracing::debug!(identity = %self.identity, "client dropped, engine stopping");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { endpoint } => {
                if let Some(endpoint) = endpoint {
                    self.config.endpoint = endpoint;
                }
                self.should_reconnect = true;
                if self.state == ConnState::Disconnected {
                    self.start_connect();
                }
            }
            Command::Close { done } => {
                self.should_reconnect = false;
                self.drop_connection();
                for on_sent in self.queue.drain_all() {
                    self.fail_on_sent(on_sent, HeraldError::ConnectionClosed);
                }
                for reply in self.calls.drain_all() {
                    self.deliver_reply(reply, Err(HeraldError::ConnectionClosed));
                }
                self.set_state(ConnState::Disconnected);
                let _ = done.send(());
            }
            Command::Write {
                route,
                body,
                opts,
                done,
            } => {
                let on_sent = match done {
                    Some(tx) => OnSent::Complete(tx),
                    None => OnSent::Forget,
                };
                self.enqueue_message(route, body, &opts, on_sent);
            }
            Command::Call {
                target,
                action,
                args,
                opts,
                reply,
            } => {
                let action_id = self.alloc_action_id();
                let route = match target {
                    CallTarget::Name(rpc_target) => Route::Rpc {
                        rpc_target,
                        action,
                        action_id,
                    },
                    CallTarget::Uid(rpc_target_uid) => Route::RpcByUid {
                        rpc_target_uid,
                        action,
                        action_id,
                    },
                };
                let timeout = self.resolve_timeout(&opts);
                self.enqueue_message(
                    route,
                    json!({ "args": args }),
                    &opts,
                    OnSent::Call {
                        action_id,
                        timeout,
                        reply,
                    },
                );
            }
            Command::SendTimeout { message_id } => {
                if let Some(on_sent) = self.queue.expire(message_id) {
                    tracing::debug!(message_id, "send timed out before the frame was written");
                    self.fail_on_sent(on_sent, HeraldError::SendTimeout);
                }
            }
            Command::RpcTimeout { action_id } => {
                if let Some(reply) = self.calls.complete(action_id) {
                    tracing::debug!(action_id, "rpc response timed out");
                    self.deliver_reply(reply, Err(HeraldError::RpcTimeout));
                }
            }
            Command::ReconnectTick => {
                self.reconnect_scheduled = false;
                if self.should_reconnect && self.state == ConnState::Disconnected {
                    self.start_connect();
                }
            }
            Command::Transport(event) => self.handle_transport(event),
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { generation, stream } => {
                if generation != self.generation || self.state != ConnState::Connecting {
                    // Stale dial (e.g. close raced the connect); drop it.
                    return;
                }
                tracing::debug!(endpoint = %self.config.endpoint, "transport connected");
                let (read_half, write_half) = stream.into_split();
                let Some(tx) = self.cmd_tx.upgrade() else { return };
                transport::spawn_reader(
                    generation,
                    read_half,
                    self.config.codec.clone(),
                    tx.clone(),
                );
                self.writer_tx = Some(writer::spawn_writer(
                    generation,
                    write_half,
                    self.config.writer_capacity,
                    tx,
                ));
                self.set_state(ConnState::Authenticating);
                self.send_authorize();
            }
            TransportEvent::ConnectFailed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                tracing::warn!(endpoint = %self.config.endpoint, error = %error, "connect failed");
                self.report_error(HeraldError::Connection(error));
                self.set_state(ConnState::Disconnected);
                self.schedule_reconnect();
            }
            TransportEvent::Frame {
                generation,
                message,
            } => {
                if generation != self.generation {
                    return;
                }
                self.dispatch(message);
            }
            TransportEvent::Wrote {
                generation,
                message_id,
                result,
            } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(()) => {
                        if let Some(on_sent) = self.queue.complete(message_id) {
                            self.on_sent_success(on_sent);
                        }
                        self.flush_queue();
                    }
                    Err(error) => {
                        tracing::warn!(message_id, error = %error, "write failed");
                        if let Some(on_sent) = self.queue.complete(message_id) {
                            self.fail_on_sent(on_sent, HeraldError::Connection(error));
                        }
                        self.connection_lost();
                    }
                }
            }
            TransportEvent::Closed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                match &error {
                    Some(error) => {
                        tracing::warn!(error = %error, "transport closed with error")
                    }
                    None => tracing::debug!("transport closed"),
                }
                if let Some(error) = error {
                    self.report_error(HeraldError::Connection(error));
                }
                self.connection_lost();
            }
        }
    }

    // ---- outbound path ----------------------------------------------------

    fn enqueue_message(&mut self, route: Route, body: Value, opts: &Options, on_sent: OnSent) {
        let message_id = self.alloc_message_id();
        let header = self.assemble_header(message_id, route, opts);
        let timeout = Duration::from_millis(header.timeout);

        let message = Message::new(header, body);
        let Some(frame) = self.config.codec.make_message(&message) else {
            self.fail_on_sent(on_sent, HeraldError::EncodeFailure);
            return;
        };

        self.queue.push(message_id, frame, on_sent);
        self.post_after(timeout, Command::SendTimeout { message_id });
        self.flush_queue();
    }

    /// Assign sender identity, message id and per-message defaults.
    fn assemble_header(&self, message_id: u64, route: Route, opts: &Options) -> Header {
        Header {
            name: self.identity.name.clone(),
            uid: self.identity.uid.clone(),
            message_id,
            ack: opts.ack.then_some(true),
            retry: opts.retry.unwrap_or(self.config.default_retry),
            timeout: self.resolve_timeout(opts).as_millis() as u64,
            route,
        }
    }

    /// Move queued frames to the writer until it reports backpressure.
    /// Only runs once authorized; frames queued earlier flush here.
    fn flush_queue(&mut self) {
        if self.state != ConnState::Connected {
            return;
        }
        let Some(writer) = self.writer_tx.clone() else {
            return;
        };
        while let Some((message_id, frame)) = self.queue.pop_front() {
            match writer.try_send(WriteJob { message_id, frame }) {
                Ok(()) => {}
                Err(err) => {
                    let job = match err {
                        mpsc::error::TrySendError::Full(job)
                        | mpsc::error::TrySendError::Closed(job) => job,
                    };
                    self.queue.push_front(job.message_id, job.frame);
                    break;
                }
            }
        }
    }

    fn on_sent_success(&mut self, on_sent: OnSent) {
        match on_sent {
            OnSent::Forget => {}
            OnSent::Complete(tx) => {
                let _ = tx.send(Ok(()));
            }
            OnSent::Call {
                action_id,
                timeout,
                reply,
            } => {
                self.calls.register(action_id, reply);
                self.post_after(timeout, Command::RpcTimeout { action_id });
            }
        }
    }

    fn fail_on_sent(&mut self, on_sent: OnSent, error: HeraldError) {
        match on_sent {
            OnSent::Forget => self.report_error(error),
            OnSent::Complete(tx) => {
                let _ = tx.send(Err(error));
            }
            OnSent::Call { reply, .. } => self.deliver_reply(reply, Err(error)),
        }
    }

    fn deliver_reply(&mut self, reply: CallReply, result: Result<Value>) {
        match reply {
            CallReply::Caller(tx) => {
                let _ = tx.send(result);
            }
            CallReply::Authorize { generation } => {
                self.handle_authorize_result(generation, result)
            }
            CallReply::Resubscribe { event } => {
                if let Err(error) = result {
                    tracing::error!(event, error = %error, "resubscribe after reconnect failed");
                    self.report_error(error);
                }
            }
        }
    }

    // ---- inbound dispatch -------------------------------------------------

    fn dispatch(&mut self, message: Message) {
        let Message { header, body } = message;
        match header.route.clone() {
            Route::Rpc {
                action, action_id, ..
            }
            | Route::RpcByUid {
                action, action_id, ..
            } => self.handle_inbound_call(header, body, action, action_id),
            Route::Event { event } | Route::Whisper { event, .. } => {
                self.dispatch_event(&event, header.sender(), body);
            }
            Route::RpcResult { action_id, .. } => {
                let Ok(result_body) = serde_json::from_value::<ResultBody>(body) else {
                    tracing::trace!(action_id, "rpc response with undecodable body dropped");
                    return;
                };
                if let Some(reply) = self.calls.complete(action_id) {
                    self.deliver_reply(reply, result_body.into_result());
                }
            }
        }
    }

    fn handle_inbound_call(&mut self, header: Header, body: Value, action: String, action_id: u64) {
        if action == ACTION_PING {
            self.send_pong(header);
            return;
        }

        let Some(tx) = self.cmd_tx.upgrade() else { return };
        let responder = Responder::new(tx, header.uid.clone(), action_id);

        let args = match serde_json::from_value::<CallBody>(body) {
            Ok(call) => call.args,
            Err(_) => {
                let error = HeraldError::InvalidArguments("inbound call without args");
                tokio::spawn(responder.err(error.wire_code()));
                return;
            }
        };

        let worker = lock(&self.workers).get(&action);
        match worker {
            Some(worker) => {
                let caller = header.sender();
                tokio::spawn(async move {
                    worker(caller, args, responder).await;
                });
            }
            None => {
                tracing::debug!(action, "inbound call for unregistered action");
                let error = HeraldError::ActionNotFound(action);
                tokio::spawn(responder.err(error.wire_code()));
            }
        }
    }

    /// Keepalive probe: answer straight away, bypassing the worker table.
    fn send_pong(&mut self, header: Header) {
        let route = Route::Whisper {
            whisper_to: header.uid,
            event: EVENT_PONG.to_string(),
        };
        let opts = Options {
            retry: Some(0),
            timeout: Some(Duration::from_secs(10)),
            ack: false,
        };
        self.enqueue_message(route, Value::Null, &opts, OnSent::Forget);
    }

    fn dispatch_event(&mut self, event: &str, sender: Identity, body: Value) {
        let handlers = lock(&self.subscriptions).handlers_for(event);
        if handlers.is_empty() {
            tracing::trace!(event, "event without local subscribers dropped");
            return;
        }
        for handler in handlers {
            handler(sender.clone(), body.clone());
        }
    }

    // ---- connection lifecycle ---------------------------------------------

    fn start_connect(&mut self) {
        if self.facade.upgrade().is_none() {
            // Every facade clone is gone; an orphaned engine must not
            // keep redialing.
            self.should_reconnect = false;
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        self.set_state(ConnState::Connecting);
        tracing::debug!(endpoint = %self.config.endpoint, generation, "connecting");

        let endpoint = self.config.endpoint.clone();
        let Some(tx) = self.cmd_tx.upgrade() else { return };
        tokio::spawn(async move {
            let event = match transport::connect(&endpoint).await {
                Ok(stream) => TransportEvent::Connected { generation, stream },
                Err(error) => TransportEvent::ConnectFailed { generation, error },
            };
            let _ = tx.send(Command::Transport(event)).await;
        });
    }

    /// Send the authorize call straight to the writer: during
    /// `Authenticating` the regular queue stays gated, exactly so that
    /// nothing precedes the handshake on a fresh connection.
    fn send_authorize(&mut self) {
        let generation = self.generation;
        let action_id = self.alloc_action_id();
        let route = Route::Rpc {
            rpc_target: BROKER_NAME.to_string(),
            action: ACTION_AUTHORIZE.to_string(),
            action_id,
        };
        let body = json!({
            "args": {
                "wellKnownPhrase": self.config.well_known_phrase,
                "name": self.identity.name,
                "uid": self.identity.uid,
            }
        });

        let message_id = self.alloc_message_id();
        let opts = Options::default();
        let header = self.assemble_header(message_id, route, &opts);
        let timeout = Duration::from_millis(header.timeout);
        let message = Message::new(header, body);

        let Some(frame) = self.config.codec.make_message(&message) else {
            self.report_error(HeraldError::EncodeFailure);
            self.connection_lost();
            return;
        };

        self.queue.push_inflight(
            message_id,
            OnSent::Call {
                action_id,
                timeout,
                reply: CallReply::Authorize { generation },
            },
        );
        self.post_after(timeout, Command::SendTimeout { message_id });

        let handed_off = self
            .writer_tx
            .as_ref()
            .is_some_and(|writer| writer.try_send(WriteJob { message_id, frame }).is_ok());
        if !handed_off {
            if let Some(on_sent) = self.queue.complete(message_id) {
                self.fail_on_sent(on_sent, HeraldError::ConnectionClosed);
            }
            self.connection_lost();
        }
    }

    fn handle_authorize_result(&mut self, generation: u64, result: Result<Value>) {
        if generation != self.generation {
            return;
        }
        match result {
            Ok(_) if self.state == ConnState::Authenticating => self.on_authenticated(),
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(error = %error, "authorization failed");
                self.report_error(error);
                self.connection_lost();
            }
        }
    }

    fn on_authenticated(&mut self) {
        tracing::info!(endpoint = %self.config.endpoint, identity = %self.identity, "authorized");
        self.set_state(ConnState::Connected);

        // Frames queued while disconnected go out first, then the broker
        // relearns our subscriptions.
        if !self.queue.is_empty() {
            tracing::debug!("flushing frames queued while disconnected");
        }
        self.flush_queue();
        let replay = lock(&self.subscriptions).replay_set();
        for event in replay {
            let action_id = self.alloc_action_id();
            let route = Route::Rpc {
                rpc_target: BROKER_NAME.to_string(),
                action: ACTION_SUBSCRIBE.to_string(),
                action_id,
            };
            let body = json!({ "args": { "event": event } });
            let timeout = self.config.default_timeout;
            self.enqueue_message(
                route,
                body,
                &Options::default(),
                OnSent::Call {
                    action_id,
                    timeout,
                    reply: CallReply::Resubscribe { event },
                },
            );
        }
    }

    /// Tear down the live connection and, unless closed, schedule a retry.
    fn connection_lost(&mut self) {
        self.drop_connection();
        if self.calls.len() > 0 {
            // Outstanding calls stay registered; their response timers
            // resolve them if the reconnected broker never answers.
            tracing::debug!(pending_calls = self.calls.len(), "connection lost with calls in flight");
        }
        self.set_state(ConnState::Disconnected);
        self.schedule_reconnect();
    }

    /// Drop the writer handle and invalidate the generation; in-flight
    /// frames that never get a write confirmation fall to their send
    /// timers. Pending calls keep running until response timers fire.
    fn drop_connection(&mut self) {
        self.writer_tx = None;
        self.generation += 1;
    }

    fn schedule_reconnect(&mut self) {
        if !self.should_reconnect || self.reconnect_scheduled {
            return;
        }
        self.reconnect_scheduled = true;
        tracing::debug!(delay = ?self.config.reconnect_delay, "reconnect scheduled");
        self.post_after(self.config.reconnect_delay, Command::ReconnectTick);
    }

    // ---- helpers ----------------------------------------------------------

    fn set_state(&mut self, state: ConnState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    fn resolve_timeout(&self, opts: &Options) -> Duration {
        opts.timeout.unwrap_or(self.config.default_timeout)
    }

    fn alloc_message_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    fn alloc_action_id(&mut self) -> u64 {
        let id = self.next_action_id;
        self.next_action_id += 1;
        id
    }

    fn post_after(&self, delay: Duration, command: Command) {
        let Some(tx) = self.cmd_tx.upgrade() else { return };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(command).await;
        });
    }

    fn report_error(&self, error: HeraldError) {
        let error = Arc::new(error);
        tracing::warn!(error = %error, "engine error");
        // Nobody listening is fine; the log line above is the fallback.
        let _ = self.errors.send(error);
    }
}
