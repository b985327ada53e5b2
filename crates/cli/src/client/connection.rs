// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection manager for one backend endpoint.
//!
//! A single task owns the socket, the outbound queue and the liveness
//! state. Callers talk to it through a command channel and wait on oneshot
//! replies, so no caller ever holds a lock on the transport.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!       ^             |             |
//!       +-------------+-------------+  (failure or close; reconnect scheduled)
//!       |
//!    Errored  (reconnect attempts exhausted; left only by an explicit connect)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tether_core::{ClientMessage, ServerMessage, SessionCommand};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{ClientError, ClientResult};
use super::liveness::Liveness;
use super::queue::{OutboundQueue, QueuedRequest};
use super::registry::{Registry, ReplySender};
use super::session::{CloseReason, SessionMultiplexer};
use super::transport::{Transport, TransportError, TransportFactory, TransportResult};
use super::EndpointKind;
use crate::config::EndpointConfig;

/// Connection state values for the atomic state field.
const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;
const STATE_ERRORED: u8 = 3;

/// Connection state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts exhausted; a restart (explicit connect) is required.
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Connection state visible to both the manager task and callers.
///
/// Uses atomic fields for lock-free reads.
pub struct SharedConnectionState {
    state: AtomicU8,
    /// Current reconnect attempt (0 while connected or on the first attempt).
    attempt: AtomicU32,
}

impl SharedConnectionState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_DISCONNECTED),
            attempt: AtomicU32::new(0),
        }
    }

    pub fn get(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            STATE_CONNECTING => ConnectionState::Connecting,
            STATE_CONNECTED => ConnectionState::Connected,
            STATE_ERRORED => ConnectionState::Errored,
            _ => ConnectionState::Disconnected,
        }
    }

    fn set(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Disconnected => STATE_DISCONNECTED,
            ConnectionState::Connecting => STATE_CONNECTING,
            ConnectionState::Connected => STATE_CONNECTED,
            ConnectionState::Errored => STATE_ERRORED,
        };
        self.state.store(raw, Ordering::Release);
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    fn set_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Human-readable status for reporting.
    pub fn status_string(&self) -> String {
        match self.get() {
            ConnectionState::Connecting => {
                let attempt = self.attempt();
                if attempt > 0 {
                    format!("connecting (attempt {})", attempt)
                } else {
                    "connecting".to_string()
                }
            }
            state => state.to_string(),
        }
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events broadcast to subscribers of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt started. Attempt 0 is the initial connect.
    Connecting { attempt: u32 },
    Connected,
    Disconnected { reason: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Reconnect attempts ran out; the endpoint needs a restart.
    Exhausted { attempts: u32 },
}

/// Requests from the client façade to the manager task.
pub(crate) enum Command {
    /// Open the connection if idle, or restart it after exhaustion.
    Connect,
    /// Generic one-shot call; queued while disconnected.
    Call {
        id: String,
        method: String,
        params: Option<Value>,
        reply: ReplySender,
    },
    /// createSession / resumeSession; requires a live connection.
    OpenSession {
        id: String,
        label: &'static str,
        command: SessionCommand,
        reply: ReplySender,
    },
    /// Fire-and-forget session command (send, interrupt, close).
    SessionWrite {
        command: SessionCommand,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Shutdown,
}

/// Result of a spawned connection attempt.
struct ConnectOutcome<T> {
    generation: u64,
    result: TransportResult<T>,
}

/// Owns the socket of one endpoint.
pub(crate) struct ConnectionManager<T: Transport> {
    config: EndpointConfig,
    kind: EndpointKind,
    factory: TransportFactory<T>,
    shared: Arc<SharedConnectionState>,
    registry: Arc<Registry>,
    sessions: Arc<SessionMultiplexer>,
    queue: OutboundQueue,
    liveness: Liveness,
    transport: Option<T>,
    /// Reconnect attempts since the last successful connect.
    attempts: u32,
    reconnect_at: Option<Instant>,
    /// Identifies the current connection attempt.
    generation: u64,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome<T>>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome<T>>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    cancel: CancellationToken,
}

/// Shared handles the façade keeps alongside the manager.
pub(crate) struct ManagerHandles {
    pub shared: Arc<SharedConnectionState>,
    pub registry: Arc<Registry>,
    pub sessions: Arc<SessionMultiplexer>,
    pub events: broadcast::Sender<ConnectionEvent>,
    pub cancel: CancellationToken,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(
        config: EndpointConfig,
        kind: EndpointKind,
        factory: TransportFactory<T>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> (Self, ManagerHandles) {
        let shared = Arc::new(SharedConnectionState::new());
        let registry = Registry::new(config.request_timeout());
        let sessions = SessionMultiplexer::new();
        let (events, _) = broadcast::channel(64);
        let cancel = CancellationToken::new();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let liveness = Liveness::new(kind, config.heartbeat_interval(), config.heartbeat_timeout());

        let handles = ManagerHandles {
            shared: Arc::clone(&shared),
            registry: Arc::clone(&registry),
            sessions: Arc::clone(&sessions),
            events: events.clone(),
            cancel: cancel.clone(),
        };
        let manager = Self {
            config,
            kind,
            factory,
            shared,
            registry,
            sessions,
            queue: OutboundQueue::new(),
            liveness,
            transport: None,
            attempts: 0,
            reconnect_at: None,
            generation: 0,
            connect_tx,
            connect_rx,
            commands,
            events,
            cancel,
        };
        (manager, handles)
    }

    fn state(&self) -> ConnectionState {
        self.shared.get()
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Runs until shutdown.
    pub async fn run(mut self) {
        tracing::debug!(kind = ?self.kind, url = %self.config.url, "connection manager started");
        loop {
            let heartbeat_at = self.liveness.next_heartbeat_at();
            let deadline = self.liveness.deadline();
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                Some(outcome) = self.connect_rx.recv() => self.on_connect_outcome(outcome).await,

                frame = recv_frame(&mut self.transport) => self.on_frame(frame).await,

                _ = sleep_until_opt(deadline) => {
                    tracing::warn!(url = %self.config.url, "heartbeat timed out");
                    self.connection_lost("heartbeat timeout".to_string());
                }

                _ = sleep_until_opt(heartbeat_at) => self.send_heartbeat().await,

                _ = sleep_until_opt(reconnect_at) => {
                    self.reconnect_at = None;
                    self.start_connect();
                }
            }
        }
        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Call {
                id,
                method,
                params,
                reply,
            } => self.call(id, method, params, reply).await,
            Command::OpenSession {
                id,
                label,
                command,
                reply,
            } => {
                if self.state() != ConnectionState::Connected {
                    // The caller may have given up on the reply
                    let _ = reply.send(Err(ClientError::NotConnected));
                    return;
                }
                self.registry.register(&id, label, reply);
                self.write_or_drop(command.into()).await;
            }
            Command::SessionWrite { command, reply } => {
                if self.state() != ConnectionState::Connected {
                    let result = match command {
                        SessionCommand::CloseSession { .. } => Ok(()),
                        _ => Err(ClientError::NotConnected),
                    };
                    // The caller may have given up on the reply
                    let _ = reply.send(result);
                    return;
                }
                let started = match &command {
                    SessionCommand::Send { session_id, .. } => Some(session_id.clone()),
                    _ => None,
                };
                let result = match self.write(command.into()).await {
                    Ok(()) => {
                        // Marked here so a fast result cannot be routed first
                        if let Some(session_id) = started {
                            self.sessions.mark_busy(&session_id);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.connection_lost(reason);
                        Err(ClientError::Transport(e))
                    }
                };
                // The caller may have given up on the reply
                let _ = reply.send(result);
            }
            // Handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self) {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => {}
            ConnectionState::Errored => {
                tracing::info!(url = %self.config.url, "restarting exhausted connection");
                self.attempts = 0;
                self.start_connect();
            }
            ConnectionState::Disconnected => {
                self.reconnect_at = None;
                self.start_connect();
            }
        }
    }

    async fn call(&mut self, id: String, method: String, params: Option<Value>, reply: ReplySender) {
        match self.state() {
            ConnectionState::Errored => {
                // The caller may have given up on the reply
                let _ = reply.send(Err(ClientError::NotConnected));
            }
            ConnectionState::Connected => {
                let request = QueuedRequest {
                    id,
                    method,
                    params,
                    reply,
                };
                if let Err((request, e)) = self.send_call(request).await {
                    self.queue.enqueue(request);
                    self.connection_lost(e.to_string());
                }
            }
            state => {
                self.queue.enqueue(QueuedRequest {
                    id,
                    method,
                    params,
                    reply,
                });
                if state == ConnectionState::Disconnected && self.reconnect_at.is_none() {
                    self.start_connect();
                }
            }
        }
    }

    fn start_connect(&mut self) {
        self.generation += 1;
        self.shared.set(ConnectionState::Connecting);
        self.shared.set_attempt(self.attempts);
        self.emit(ConnectionEvent::Connecting {
            attempt: self.attempts,
        });
        tracing::debug!(url = %self.config.url, attempt = self.attempts, "connecting");

        let mut transport = (self.factory)();
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout();
        let generation = self.generation;
        let tx = self.connect_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = connect_with_timeout(&mut transport, &url, timeout) => result,
            };
            let outcome = ConnectOutcome {
                generation,
                result: result.map(|()| transport),
            };
            // The manager may already be gone
            let _ = tx.send(outcome);
        });
    }

    async fn on_connect_outcome(&mut self, outcome: ConnectOutcome<T>) {
        if outcome.generation != self.generation || self.state() != ConnectionState::Connecting {
            tracing::debug!(generation = outcome.generation, "ignoring stale connect result");
            return;
        }
        match outcome.result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.shared.set(ConnectionState::Connected);
                self.attempts = 0;
                self.shared.set_attempt(0);
                self.liveness.start(Instant::now());
                tracing::info!(url = %self.config.url, "connected");
                self.emit(ConnectionEvent::Connected);
                self.flush().await;
            }
            Err(e) => {
                tracing::warn!(url = %self.config.url, error = %e, "connection attempt failed");
                self.connection_lost(e.to_string());
            }
        }
    }

    /// Writes queued calls in submission order.
    ///
    /// A request whose write fails goes back to the head of the queue and
    /// flushing stops.
    async fn flush(&mut self) {
        if !self.queue.is_empty() {
            tracing::debug!(count = self.queue.len(), "flushing queued requests");
        }
        while self.state() == ConnectionState::Connected {
            let Some(request) = self.queue.pop_front() else {
                break;
            };
            if let Err((request, e)) = self.send_call(request).await {
                self.queue.push_front(request);
                self.connection_lost(e.to_string());
            }
        }
    }

    /// Writes a call, then registers it to await its reply.
    ///
    /// An unwritten request is handed back untouched.
    async fn send_call(
        &mut self,
        request: QueuedRequest,
    ) -> Result<(), (QueuedRequest, TransportError)> {
        match self.write(request.message()).await {
            Ok(()) => {
                let QueuedRequest {
                    id, method, reply, ..
                } = request;
                self.registry.register(&id, &method, reply);
                Ok(())
            }
            Err(e) => Err((request, e)),
        }
    }

    async fn on_frame(&mut self, frame: TransportResult<Option<ServerMessage>>) {
        match frame {
            Ok(Some(msg)) => {
                self.liveness.on_frame(Instant::now());
                if self.liveness.is_heartbeat_reply(&msg) {
                    return;
                }
                if let Some(follow_up) = self.dispatch(msg) {
                    self.write_or_drop(follow_up).await;
                }
            }
            Ok(None) => self.connection_lost("closed by backend".to_string()),
            Err(e) => self.connection_lost(e.to_string()),
        }
    }

    /// Routes an inbound message to the registry or the session table.
    ///
    /// Returns a message to write back, if the backend must be told something.
    fn dispatch(&self, msg: ServerMessage) -> Option<ClientMessage> {
        match msg {
            ServerMessage::Response { request_id, result } => {
                if !self.registry.resolve(&request_id, result) {
                    tracing::debug!(%request_id, "dropping reply for unknown request");
                }
            }
            ServerMessage::SessionCreated {
                request_id,
                session_id,
            } => {
                // Bind before resolving so the caller never sees a pending session
                let local = self.sessions.bind(&request_id, &session_id);
                let resolved = self
                    .registry
                    .resolve(&request_id, Value::String(session_id.clone()));
                if resolved && local.is_some() {
                    return None;
                }
                if let (Some(local), false) = (local, resolved) {
                    self.sessions.discard(local);
                }
                if self.sessions.lookup(&session_id).is_some() {
                    tracing::debug!(%request_id, %session_id, "duplicate session_created");
                    return None;
                }
                // Nobody owns the session the backend just opened
                tracing::debug!(%request_id, %session_id, "closing unclaimed session");
                return Some(SessionCommand::close(session_id).into());
            }
            ServerMessage::Error {
                request_id: Some(request_id),
                code,
                message,
                ..
            } => {
                if !self
                    .registry
                    .reject(&request_id, ClientError::Server { code, message })
                {
                    tracing::debug!(%request_id, "dropping error for unknown request");
                }
            }
            ServerMessage::Error {
                request_id: None,
                session_id: Some(session_id),
                code,
                message,
            } => self.sessions.error(&session_id, code, message),
            ServerMessage::Error {
                request_id: None,
                session_id: None,
                code,
                message,
            } => {
                tracing::warn!(code = ?code, %message, "backend error");
            }
            ServerMessage::SdkMessage {
                session_id,
                message,
            } => self.sessions.route(&session_id, message),
            ServerMessage::Pong => tracing::debug!("unsolicited pong"),
            ServerMessage::SessionClosed { session_id } => self.sessions.close_remote(&session_id),
            ServerMessage::SessionInterrupted { session_id } => {
                self.sessions.interrupted(&session_id)
            }
        }
        None
    }

    async fn send_heartbeat(&mut self) {
        let beat = self.liveness.heartbeat(Instant::now());
        tracing::debug!(url = %self.config.url, "sending heartbeat");
        self.write_or_drop(beat).await;
    }

    async fn write(&mut self, msg: ClientMessage) -> TransportResult<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.send(msg).await,
            None => Err(TransportError::ConnectionClosed),
        }
    }

    /// Writes a message; a failed write drops the connection.
    async fn write_or_drop(&mut self, msg: ClientMessage) {
        if let Err(e) = self.write(msg).await {
            self.connection_lost(e.to_string());
        }
    }

    /// Handles an unexpected close or failed attempt.
    ///
    /// Pending requests fail with `connection closed`; queued ones stay for
    /// the next connection.
    fn connection_lost(&mut self, reason: String) {
        match self.state() {
            ConnectionState::Connected => {
                tracing::info!(url = %self.config.url, %reason, "disconnected");
            }
            ConnectionState::Connecting => {}
            ConnectionState::Disconnected | ConnectionState::Errored => return,
        }
        self.transport = None;
        self.liveness.reset();
        self.shared.set(ConnectionState::Disconnected);
        self.registry.fail_all(|| ClientError::ConnectionClosed);
        self.sessions.close_all(CloseReason::ConnectionLost);
        self.emit(ConnectionEvent::Disconnected { reason });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.attempts < self.config.max_reconnect_attempts {
            self.attempts += 1;
            let delay = self.config.reconnect_delay();
            self.reconnect_at = Some(Instant::now() + delay);
            self.shared.set_attempt(self.attempts);
            tracing::info!(attempt = self.attempts, ?delay, "reconnect scheduled");
            self.emit(ConnectionEvent::ReconnectScheduled {
                attempt: self.attempts,
                delay,
            });
        } else {
            self.reconnect_at = None;
            self.shared.set(ConnectionState::Errored);
            tracing::error!(
                url = %self.config.url,
                attempts = self.attempts,
                "connection lost, restart required"
            );
            self.emit(ConnectionEvent::Exhausted {
                attempts: self.attempts,
            });
            self.queue.fail_all(|| ClientError::ConnectionLost);
        }
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.reconnect_at = None;
        self.liveness.reset();
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.disconnect().await {
                tracing::debug!("error closing connection: {}", e);
            }
        }
        self.shared.set(ConnectionState::Disconnected);
        self.registry.fail_all(|| ClientError::ConnectionClosed);
        self.queue.fail_all(|| ClientError::Shutdown);
        self.sessions.close_all(CloseReason::Local);
        tracing::debug!(url = %self.config.url, "connection manager stopped");
    }
}

async fn connect_with_timeout<T: Transport>(
    transport: &mut T,
    url: &str,
    timeout: Duration,
) -> TransportResult<()> {
    if timeout.is_zero() {
        return transport.connect(url).await;
    }
    match tokio::time::timeout(timeout, transport.connect(url)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::ConnectionFailed(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Receives from the transport, or waits forever while disconnected.
async fn recv_frame<T: Transport>(
    transport: &mut Option<T>,
) -> TransportResult<Option<ServerMessage>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
