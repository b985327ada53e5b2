// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-process fake backend for integration testing.
//!
//! Runs a tokio-tungstenite server on a random port that speaks both the
//! generic call protocol and the session protocol, and can be stopped and
//! restarted on the same address to exercise reconnection.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tether::config::EndpointConfig;
use tether_core::{
    CallRequest, ClientMessage, SdkMessage, SdkPayload, SdkResult, ServerMessage, SessionCommand,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Frames the backend writes back for one client message.
enum Reply {
    Message(ServerMessage),
    Raw(String),
}

#[derive(Default)]
struct BackendState {
    received: Vec<ClientMessage>,
    connections: u32,
    next_session: u64,
}

/// A fake backend on a random local port.
pub struct TestBackend {
    addr: SocketAddr,
    cancel: CancellationToken,
    state: Arc<Mutex<BackendState>>,
}

impl TestBackend {
    /// Start a backend on a random available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(BackendState::default()));
        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(listener, Arc::clone(&state), cancel.clone()));
        TestBackend {
            addr,
            cancel,
            state,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Endpoint settings pointing at this backend, tuned for fast tests.
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            url: self.ws_url(),
            request_timeout_ms: 2_000,
            max_reconnect_attempts: 20,
            reconnect_delay_ms: 100,
            heartbeat_interval_ms: 0,
            heartbeat_timeout_ms: 0,
            connect_timeout_ms: 1_000,
        }
    }

    /// Stops listening and drops every open connection.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    /// Starts listening again on the same address.
    pub async fn restart(&mut self) {
        let listener = loop {
            match TcpListener::bind(self.addr).await {
                Ok(listener) => break listener,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        };
        self.cancel = CancellationToken::new();
        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.state),
            self.cancel.clone(),
        ));
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> u32 {
        self.state.lock().unwrap().connections
    }

    pub fn received(&self) -> Vec<ClientMessage> {
        self.state.lock().unwrap().received.clone()
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<Mutex<BackendState>>,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    eprintln!("test backend accept error: {}", e);
                    return;
                }
            },
        };
        state.lock().unwrap().connections += 1;
        tokio::spawn(handle_connection(
            stream,
            Arc::clone(&state),
            cancel.clone(),
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<BackendState>>,
    cancel: CancellationToken,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        };
        let Ok(msg) = ClientMessage::from_json(text.as_str()) else {
            continue;
        };
        let replies = respond(&msg, &state);
        state.lock().unwrap().received.push(msg);
        for reply in replies {
            let text = match reply {
                Reply::Message(msg) => msg.to_json().unwrap(),
                Reply::Raw(text) => text,
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
    }
}

fn respond(msg: &ClientMessage, state: &Mutex<BackendState>) -> Vec<Reply> {
    match msg {
        ClientMessage::Call(CallRequest { id, method, params }) => match method.as_str() {
            "echo" => vec![Reply::Message(ServerMessage::response(
                id.clone(),
                params.clone().unwrap_or(Value::Null),
            ))],
            "ping" => vec![Reply::Message(ServerMessage::response(
                id.clone(),
                json!("pong"),
            ))],
            "fail" => vec![Reply::Message(ServerMessage::request_error(
                id.clone(),
                Some("E_FAIL".into()),
                "failed on purpose",
            ))],
            "garbage" => vec![
                Reply::Raw("this is not json".to_string()),
                Reply::Raw(r#"{"type":"mystery"}"#.to_string()),
                Reply::Message(ServerMessage::response(id.clone(), json!("ok"))),
            ],
            "never" => vec![],
            other => vec![Reply::Message(ServerMessage::request_error(
                id.clone(),
                Some("E_METHOD".into()),
                format!("unknown method {}", other),
            ))],
        },
        ClientMessage::Session(command) => match command {
            SessionCommand::CreateSession { id, .. } => {
                let n = {
                    let mut state = state.lock().unwrap();
                    state.next_session += 1;
                    state.next_session
                };
                vec![Reply::Message(ServerMessage::session_created(
                    id.clone(),
                    format!("sess-{}", n),
                ))]
            }
            SessionCommand::ResumeSession { id, session_id, .. } => vec![Reply::Message(
                ServerMessage::session_created(id.clone(), session_id.clone()),
            )],
            SessionCommand::Send {
                session_id,
                message,
            } => {
                let text = message.as_str().unwrap_or_default();
                vec![
                    Reply::Message(ServerMessage::sdk(
                        session_id.clone(),
                        SdkMessage::Assistant(SdkPayload::from_value(
                            json!({ "text": format!("re: {}", text) }),
                        )),
                    )),
                    Reply::Message(ServerMessage::sdk(
                        session_id.clone(),
                        SdkMessage::Result(SdkResult {
                            subtype: Some("success".into()),
                            result: Some(format!("re: {}", text).into()),
                            num_turns: Some(1),
                            ..SdkResult::default()
                        }),
                    )),
                ]
            }
            SessionCommand::Interrupt { session_id } => {
                vec![Reply::Message(ServerMessage::SessionInterrupted {
                    session_id: session_id.clone(),
                })]
            }
            SessionCommand::CloseSession { session_id } => {
                vec![Reply::Message(ServerMessage::SessionClosed {
                    session_id: session_id.clone(),
                })]
            }
            SessionCommand::Ping => vec![Reply::Message(ServerMessage::Pong)],
        },
    }
}
