// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting, multiplexed client for local backend endpoints.
//!
//! Each [`Client`] drives one endpoint through its own connection manager
//! task. Generic calls issued while disconnected are queued and flushed on
//! the next connect; sessions require a live connection and stream events
//! to their [`Session`] handle until closed.

mod connection;
mod error;
mod liveness;
mod queue;
mod registry;
mod session;
mod transport;

#[cfg(test)]
mod test_helpers;

pub use connection::{ConnectionEvent, ConnectionState, SharedConnectionState};
pub use error::{ClientError, ClientResult};
pub use session::{CloseReason, LocalSessionId, SessionEvent, SessionStatus};
pub use transport::{
    Transport, TransportError, TransportFactory, TransportFuture, TransportResult,
    WebSocketTransport,
};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::{IdGenerator, SessionCommand, SessionOptions};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, EndpointConfig};
use connection::{Command, ConnectionManager};
use registry::Registry;
use session::SessionMultiplexer;

/// Which protocol flavour an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Generic one-shot calls.
    Command,
    /// Long-lived agent sessions.
    Session,
}

impl EndpointKind {
    fn id_prefix(self) -> &'static str {
        match self {
            EndpointKind::Command => "cmd",
            EndpointKind::Session => "req",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Command => f.write_str("command"),
            EndpointKind::Session => f.write_str("session"),
        }
    }
}

struct ClientInner {
    kind: EndpointKind,
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<Registry>,
    sessions: Arc<SessionMultiplexer>,
    state: Arc<SharedConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    ids: IdGenerator,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to one backend endpoint. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a WebSocket client for `config`.
    ///
    /// Must be called within a tokio runtime. The client does not connect
    /// until [`Client::connect`] or the first call.
    pub fn new(config: EndpointConfig, kind: EndpointKind) -> Self {
        Self::with_transport(config, kind, WebSocketTransport::factory())
    }

    /// Creates a client over a custom transport.
    pub fn with_transport<T: Transport>(
        config: EndpointConfig,
        kind: EndpointKind,
        factory: TransportFactory<T>,
    ) -> Self {
        let url = config.url.clone();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (manager, handles) = ConnectionManager::new(config, kind, factory, commands_rx);
        let task = tokio::spawn(manager.run());

        Client {
            inner: Arc::new(ClientInner {
                kind,
                url,
                commands,
                registry: handles.registry,
                sessions: handles.sessions,
                state: handles.shared,
                events: handles.events,
                ids: IdGenerator::new(kind.id_prefix()),
                cancel: handles.cancel,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.inner.kind
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    fn submit(&self, command: Command) -> ClientResult<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| ClientError::Shutdown)
    }

    async fn request(
        &self,
        command: Command,
        rx: oneshot::Receiver<ClientResult<Value>>,
    ) -> ClientResult<Value> {
        self.submit(command)?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    async fn write(&self, command: SessionCommand) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SessionWrite { command, reply })?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    /// Starts connecting if idle. After reconnect attempts ran out this is
    /// the restart: the attempt counter is reset and a fresh attempt begins.
    pub fn connect(&self) {
        if self.submit(Command::Connect).is_err() {
            tracing::debug!(url = %self.inner.url, "connect on a shut down client");
        }
    }

    /// Connects and waits until the endpoint is connected.
    ///
    /// Fails with `connection lost` if reconnect attempts run out first.
    pub async fn connect_and_wait(&self, timeout: Duration) -> ClientResult<()> {
        let mut events = self.subscribe();
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.connect();

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Connected) => return Ok(()),
                    Ok(ConnectionEvent::Exhausted { .. }) => return Err(ClientError::ConnectionLost),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.state() == ConnectionState::Connected {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Shutdown),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout("connect".to_string()))?
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// State with the reconnect attempt, e.g. `connecting (attempt 2)`.
    pub fn status(&self) -> String {
        self.inner.state.status_string()
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Issues a generic one-shot call and waits for its reply.
    ///
    /// While disconnected the call is queued and written on the next connect;
    /// its timeout starts once it is written.
    pub async fn call(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        let id = self.inner.ids.next_id();
        tracing::debug!(%id, method, "call");
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Call {
                id,
                method: method.to_string(),
                params,
                reply,
            },
            rx,
        )
        .await
    }

    /// Like [`Client::call`], decoding the result into `R`.
    pub async fn call_as<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<R> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Starts a new session.
    pub async fn create_session(&self, options: SessionOptions) -> ClientResult<Session> {
        self.open_session("create session", |id| SessionCommand::create(id, options))
            .await
    }

    /// Reattaches to an existing backend session.
    pub async fn resume_session(
        &self,
        session_id: &str,
        model: Option<String>,
    ) -> ClientResult<Session> {
        self.open_session("resume session", |id| {
            SessionCommand::resume(id, session_id, model)
        })
        .await
    }

    async fn open_session(
        &self,
        label: &'static str,
        build: impl FnOnce(String) -> SessionCommand,
    ) -> ClientResult<Session> {
        let request_id = self.inner.ids.next_id();
        let command = build(request_id.clone());
        // Registered before the command is written so no early event is lost
        let (local, events) = self.inner.sessions.open_pending(&request_id);
        let guard = OpenGuard {
            client: self,
            local,
            armed: true,
        };
        let (reply, rx) = oneshot::channel();

        let result = self
            .request(
                Command::OpenSession {
                    id: request_id.clone(),
                    label,
                    command,
                    reply,
                },
                rx,
            )
            .await;

        match result? {
            Value::String(remote_id) => {
                if self.inner.sessions.remote_id(local).is_none() {
                    // Answered with a plain response rather than session_created
                    self.inner.sessions.bind(&request_id, &remote_id);
                }
                guard.disarm();
                tracing::debug!(%local, %remote_id, "{} succeeded", label);
                Ok(Session {
                    client: self.clone(),
                    local,
                    id: remote_id,
                    events,
                })
            }
            other => Err(ClientError::UnexpectedReply(other.to_string())),
        }
    }

    fn known_session(&self, session_id: &str) -> ClientResult<LocalSessionId> {
        self.inner
            .sessions
            .lookup(session_id)
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_string()))
    }

    /// Sends input to a session. The turn ends with a `TurnCompleted` event.
    pub async fn send(&self, session_id: &str, message: impl Into<Value>) -> ClientResult<()> {
        self.known_session(session_id)?;
        self.write(SessionCommand::send(session_id, message)).await
    }

    /// Asks the backend to stop the current turn. Advisory.
    pub async fn interrupt(&self, session_id: &str) -> ClientResult<()> {
        self.known_session(session_id)?;
        self.write(SessionCommand::interrupt(session_id)).await
    }

    /// Closes a session. Local state is torn down before the backend is told.
    pub async fn close_session(&self, session_id: &str) -> ClientResult<()> {
        let local = self.known_session(session_id)?;
        self.close_local(local).await
    }

    async fn close_local(&self, local: LocalSessionId) -> ClientResult<()> {
        match self.inner.sessions.close_local(local) {
            Some(remote_id) => self.write(SessionCommand::close(remote_id)).await,
            None => Ok(()),
        }
    }

    /// Number of requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of open sessions, pending ones included.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Stops the connection manager and waits for it to finish.
    ///
    /// Pending requests fail with `connection closed`, queued ones with
    /// `client shut down`, and every session is closed.
    pub async fn shutdown(&self) {
        // The task may already have stopped
        let _ = self.submit(Command::Shutdown);
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("connection manager task failed: {}", e);
            }
        }
    }
}

/// Removes a session whose create/resume did not hand out a [`Session`],
/// whether it failed or the caller stopped waiting.
///
/// A session the backend already bound is closed there too.
struct OpenGuard<'a> {
    client: &'a Client,
    local: LocalSessionId,
    armed: bool,
}

impl OpenGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(remote_id) = self.client.inner.sessions.close_local(self.local) else {
            return;
        };
        tracing::debug!(local = %self.local, %remote_id, "closing abandoned session");
        let (reply, _) = oneshot::channel();
        let command = Command::SessionWrite {
            command: SessionCommand::close(remote_id),
            reply,
        };
        if self.client.submit(command).is_err() {
            tracing::debug!("client shut down before abandoned session was closed");
        }
    }
}

/// A live session on a session endpoint.
pub struct Session {
    client: Client,
    local: LocalSessionId,
    id: String,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// Backend-assigned session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn local_id(&self) -> LocalSessionId {
        self.local
    }

    pub fn status(&self) -> SessionStatus {
        self.client.inner.sessions.status(self.local)
    }

    /// True between `send` and the end of the turn.
    pub fn is_busy(&self) -> bool {
        self.client.inner.sessions.is_busy(self.local)
    }

    pub async fn send(&self, message: impl Into<Value>) -> ClientResult<()> {
        self.ensure_open()?;
        self.client
            .write(SessionCommand::send(self.id.as_str(), message))
            .await
    }

    pub async fn interrupt(&self) -> ClientResult<()> {
        self.ensure_open()?;
        self.client
            .write(SessionCommand::interrupt(self.id.as_str()))
            .await
    }

    /// Closes the session. Closing twice is a no-op.
    pub async fn close(&self) -> ClientResult<()> {
        self.client.close_local(self.local).await
    }

    /// Waits for the next event. Returns `None` after `Closed` was delivered.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.status() == SessionStatus::Closed {
            return Err(ClientError::UnknownSession(self.id.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("status", &self.status())
            .finish()
    }
}

/// The two independent endpoints of a backend.
#[derive(Clone)]
pub struct Endpoints {
    pub command: Client,
    pub session: Client,
}

impl Endpoints {
    /// Builds both clients from configuration. Must be called within a tokio runtime.
    pub fn from_config(config: &Config) -> Self {
        Endpoints {
            command: Client::new(config.command.clone(), EndpointKind::Command),
            session: Client::new(config.session.clone(), EndpointKind::Session),
        }
    }

    /// Starts connecting both endpoints.
    pub fn connect(&self) {
        self.command.connect();
        self.session.connect();
    }

    pub async fn shutdown(&self) {
        self.command.shutdown().await;
        self.session.shutdown().await;
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
