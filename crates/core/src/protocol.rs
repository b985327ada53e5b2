// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket protocol messages for client-backend communication.
//!
//! Two flavours of request share one connection model:
//! - Generic one-shot calls: `{ id, method, params? }`
//! - Session commands, discriminated by an `action` field
//!
//! Everything the backend sends is discriminated by a `type` field and carries
//! either a `requestId` (routed to the pending-request registry) or a
//! `sessionId` (routed to the session multiplexer).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A generic one-shot call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRequest {
    /// Correlation id echoed back as `requestId`.
    pub id: String,
    /// Method name understood by the backend.
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Options accepted when starting a new session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Map<String, Value>>,
}

/// Commands of the session protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionCommand {
    /// Start a new session. The reply carries the new session id.
    CreateSession {
        id: String,
        #[serde(flatten)]
        options: SessionOptions,
    },

    /// Reattach to a previously known session id.
    ResumeSession {
        id: String,
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },

    /// Inject input into an active session.
    Send { session_id: String, message: Value },

    /// Request mid-stream cancellation.
    Interrupt { session_id: String },

    /// Terminate a session.
    CloseSession { session_id: String },

    /// Liveness check.
    Ping,
}

/// Messages sent from client to backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ClientMessage {
    /// A session protocol command (tried first when decoding).
    Session(SessionCommand),
    /// A generic one-shot call.
    Call(CallRequest),
}

/// Messages sent from backend to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Successful reply to a generic call.
    Response {
        request_id: String,
        #[serde(default)]
        result: Value,
    },

    /// Reply to `createSession` / `resumeSession`.
    SessionCreated {
        request_id: String,
        session_id: String,
    },

    /// A streamed payload belonging to a session.
    SdkMessage {
        session_id: String,
        message: SdkMessage,
    },

    /// Error tied to a request, a session, or neither.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },

    /// Reply to a session-protocol ping.
    Pong,

    /// The backend closed a session.
    SessionClosed { session_id: String },

    /// The backend stopped a turn after an interrupt.
    SessionInterrupted { session_id: String },
}

/// Payloads streamed inside `sdk_message`.
///
/// A `result` ends one turn of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SdkMessage {
    Assistant(SdkPayload),
    User(SdkPayload),
    System(SdkPayload),
    Result(SdkResult),
    #[serde(alias = "stream_event")]
    Partial(SdkPayload),
}

/// Opaque body of a non-terminal streamed payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SdkPayload {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Terminal payload of a turn.
///
/// Fields of an unexpected type are treated as absent so the end of a turn
/// is never lost to a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SdkResult {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_error: bool,
    /// Final output of the turn; usually a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_bool().unwrap_or(false))
}

/// Where an inbound message must be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Settles the pending request with this id.
    Request(&'a str),
    /// Belongs to the session with this id.
    Session(&'a str),
    /// Liveness reply.
    Heartbeat,
    /// Carries neither id.
    Unaddressed,
}

impl CallRequest {
    /// Creates a call request.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        CallRequest {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl SessionCommand {
    /// Creates a `createSession` command.
    pub fn create(id: impl Into<String>, options: SessionOptions) -> Self {
        SessionCommand::CreateSession {
            id: id.into(),
            options,
        }
    }

    /// Creates a `resumeSession` command.
    pub fn resume(
        id: impl Into<String>,
        session_id: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        SessionCommand::ResumeSession {
            id: id.into(),
            session_id: session_id.into(),
            model,
        }
    }

    /// Creates a `send` command.
    pub fn send(session_id: impl Into<String>, message: impl Into<Value>) -> Self {
        SessionCommand::Send {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Creates an `interrupt` command.
    pub fn interrupt(session_id: impl Into<String>) -> Self {
        SessionCommand::Interrupt {
            session_id: session_id.into(),
        }
    }

    /// Creates a `closeSession` command.
    pub fn close(session_id: impl Into<String>) -> Self {
        SessionCommand::CloseSession {
            session_id: session_id.into(),
        }
    }
}

impl ClientMessage {
    /// Creates a generic call message.
    pub fn call(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        ClientMessage::Call(CallRequest::new(id, method, params))
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl From<SessionCommand> for ClientMessage {
    fn from(command: SessionCommand) -> Self {
        ClientMessage::Session(command)
    }
}

impl From<CallRequest> for ClientMessage {
    fn from(request: CallRequest) -> Self {
        ClientMessage::Call(request)
    }
}

impl ServerMessage {
    /// Creates a Response message.
    pub fn response(request_id: impl Into<String>, result: Value) -> Self {
        ServerMessage::Response {
            request_id: request_id.into(),
            result,
        }
    }

    /// Creates a SessionCreated message.
    pub fn session_created(request_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        ServerMessage::SessionCreated {
            request_id: request_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Creates an SdkMessage message.
    pub fn sdk(session_id: impl Into<String>, message: SdkMessage) -> Self {
        ServerMessage::SdkMessage {
            session_id: session_id.into(),
            message,
        }
    }

    /// Creates an Error message answering a request.
    pub fn request_error(
        request_id: impl Into<String>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        ServerMessage::Error {
            request_id: Some(request_id.into()),
            session_id: None,
            code,
            message: message.into(),
        }
    }

    /// Creates an Error message scoped to a session.
    pub fn session_error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            request_id: None,
            session_id: Some(session_id.into()),
            code: None,
            message: message.into(),
        }
    }

    /// Returns the destination of this message.
    ///
    /// An error carrying both ids is routed by its request id.
    pub fn route(&self) -> Route<'_> {
        match self {
            ServerMessage::Response { request_id, .. }
            | ServerMessage::SessionCreated { request_id, .. } => Route::Request(request_id),
            ServerMessage::Error {
                request_id: Some(id),
                ..
            } => Route::Request(id),
            ServerMessage::Error {
                session_id: Some(id),
                ..
            } => Route::Session(id),
            ServerMessage::Error { .. } => Route::Unaddressed,
            ServerMessage::SdkMessage { session_id, .. }
            | ServerMessage::SessionClosed { session_id }
            | ServerMessage::SessionInterrupted { session_id } => Route::Session(session_id),
            ServerMessage::Pong => Route::Heartbeat,
        }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl SdkMessage {
    /// Returns the wire name of the payload type.
    pub fn kind(&self) -> &'static str {
        match self {
            SdkMessage::Assistant(_) => "assistant",
            SdkMessage::User(_) => "user",
            SdkMessage::System(_) => "system",
            SdkMessage::Result(_) => "result",
            SdkMessage::Partial(_) => "partial",
        }
    }
}

impl SdkResult {
    /// The final output as text; non-string values are rendered as JSON.
    pub fn result_text(&self) -> Option<String> {
        match self.result.as_ref()? {
            Value::String(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl SdkPayload {
    /// Creates a payload from a JSON object; other values yield an empty payload.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => SdkPayload { fields },
            _ => SdkPayload::default(),
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
