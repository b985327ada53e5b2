// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory transport for exercising the client without sockets.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tether_core::{
    CallRequest, ClientMessage, SdkMessage, SdkPayload, SdkResult, ServerMessage, SessionCommand,
};
use tokio::sync::{broadcast, mpsc};

use super::connection::ConnectionEvent;
use super::transport::{Transport, TransportError, TransportFactory, TransportFuture};
use crate::config::EndpointConfig;

/// Computes the backend's replies to a client message.
pub type Responder = Arc<dyn Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync>;

#[derive(Default)]
struct NetState {
    refuse: bool,
    hang: bool,
    fail_sends: bool,
    attempts: u32,
    connects: u32,
    sent: Vec<ClientMessage>,
    server_tx: Option<mpsc::UnboundedSender<ServerMessage>>,
    responder: Option<Responder>,
}

/// The fake backend shared by every transport a factory produces.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetState>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetState> {
        self.state.lock().unwrap()
    }

    pub fn factory(&self) -> TransportFactory<MockTransport> {
        let net = self.clone();
        Arc::new(move || MockTransport {
            net: net.clone(),
            incoming: None,
        })
    }

    /// Makes connection attempts fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Makes connection attempts never complete.
    pub fn set_hang(&self, hang: bool) {
        self.lock().hang = hang;
    }

    /// Makes writes on a live connection fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn respond_with(
        &self,
        responder: impl Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync + 'static,
    ) {
        self.lock().responder = Some(Arc::new(responder));
    }

    /// Connection attempts so far, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Successful connections so far.
    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.lock().sent.clone()
    }

    /// Method names of generic calls written so far.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|msg| match msg {
                ClientMessage::Call(call) => Some(call.method),
                ClientMessage::Session(_) => None,
            })
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().server_tx.is_some()
    }

    /// Delivers a message on the live connection. Returns false if there is none.
    pub fn push(&self, msg: ServerMessage) -> bool {
        match &self.lock().server_tx {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Closes the live connection from the backend side.
    pub fn drop_connection(&self) {
        self.lock().server_tx = None;
    }
}

/// Transport half of [`MockNetwork`].
pub struct MockTransport {
    net: MockNetwork,
    incoming: Option<mpsc::UnboundedReceiver<ServerMessage>>,
}

impl Transport for MockTransport {
    fn connect(&mut self, _url: &str) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let hang = {
                let mut state = self.net.lock();
                state.attempts += 1;
                if state.refuse {
                    return Err(TransportError::ConnectionFailed("refused".into()));
                }
                state.hang
            };
            if hang {
                std::future::pending::<()>().await;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let mut state = self.net.lock();
            state.connects += 1;
            state.server_tx = Some(tx);
            self.incoming = Some(rx);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.incoming = None;
            self.net.lock().server_tx = None;
            Ok(())
        })
    }

    fn send(&mut self, msg: ClientMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.incoming.is_none() {
                return Err(TransportError::ConnectionClosed);
            }
            let mut state = self.net.lock();
            let Some(tx) = state.server_tx.clone() else {
                return Err(TransportError::SendFailed("connection reset".into()));
            };
            if state.fail_sends {
                return Err(TransportError::SendFailed("broken pipe".into()));
            }
            state.sent.push(msg.clone());
            let replies = state
                .responder
                .clone()
                .map(|respond| respond(&msg))
                .unwrap_or_default();
            drop(state);
            for reply in replies {
                let _ = tx.send(reply);
            }
            Ok(())
        })
    }

    fn recv(&mut self) -> TransportFuture<'_, Option<ServerMessage>> {
        Box::pin(async move {
            let Some(incoming) = self.incoming.as_mut() else {
                return Err(TransportError::ConnectionClosed);
            };
            match incoming.recv().await {
                Some(msg) => Ok(Some(msg)),
                None => {
                    self.incoming = None;
                    Ok(None)
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.incoming.is_some()
    }
}

/// Endpoint settings for tests: 10s request timeout, 5 reconnects 1s apart,
/// heartbeat off.
pub fn test_config() -> EndpointConfig {
    EndpointConfig {
        url: "ws://mock".to_string(),
        request_timeout_ms: 10_000,
        max_reconnect_attempts: 5,
        reconnect_delay_ms: 1_000,
        heartbeat_interval_ms: 0,
        heartbeat_timeout_ms: 0,
        connect_timeout_ms: 2_000,
    }
}

pub fn assistant(text: &str) -> SdkMessage {
    SdkMessage::Assistant(SdkPayload::from_value(json!({ "text": text })))
}

pub fn result(text: &str) -> SdkMessage {
    SdkMessage::Result(SdkResult {
        subtype: Some("success".into()),
        result: Some(text.into()),
        num_turns: Some(1),
        ..SdkResult::default()
    })
}

/// A well-behaved backend.
///
/// Calls: `echo` returns its params, `ping` answers `pong`, `fail` errors,
/// `never` gets no reply. Sessions are numbered `sess-N`; `send` streams an
/// assistant message and a result.
pub fn backend() -> impl Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync + 'static {
    let next_session = AtomicU64::new(0);
    move |msg| match msg {
        ClientMessage::Call(CallRequest { id, method, params }) => match method.as_str() {
            "echo" => vec![ServerMessage::response(
                id.clone(),
                params.clone().unwrap_or(Value::Null),
            )],
            "ping" => vec![ServerMessage::response(id.clone(), json!("pong"))],
            "fail" => vec![ServerMessage::request_error(
                id.clone(),
                Some("E_FAIL".into()),
                "failed on purpose",
            )],
            "never" => vec![],
            other => vec![ServerMessage::request_error(
                id.clone(),
                Some("E_METHOD".into()),
                format!("unknown method {}", other),
            )],
        },
        ClientMessage::Session(command) => match command {
            SessionCommand::CreateSession { id, .. } => {
                let n = next_session.fetch_add(1, Ordering::SeqCst) + 1;
                vec![ServerMessage::session_created(id.clone(), format!("sess-{}", n))]
            }
            SessionCommand::ResumeSession { id, session_id, .. } => {
                vec![ServerMessage::session_created(id.clone(), session_id.clone())]
            }
            SessionCommand::Send {
                session_id,
                message,
            } => {
                let text = message.as_str().unwrap_or_default();
                vec![
                    ServerMessage::sdk(session_id.clone(), assistant(&format!("re: {}", text))),
                    ServerMessage::sdk(session_id.clone(), result("ok")),
                ]
            }
            SessionCommand::Interrupt { session_id } => vec![ServerMessage::SessionInterrupted {
                session_id: session_id.clone(),
            }],
            SessionCommand::CloseSession { session_id } => vec![ServerMessage::SessionClosed {
                session_id: session_id.clone(),
            }],
            SessionCommand::Ping => vec![ServerMessage::Pong],
        },
    }
}

/// Waits for the first event matching `pred`.
pub async fn wait_for(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    loop {
        match events.recv().await {
            Ok(event) if pred(&event) => return event,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
        }
    }
}
