// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use super::transport::TransportError;

/// Errors surfaced to callers of the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    /// Carries the request label: a method name, `create session` or `resume session`.
    #[error("{0} timeout")]
    Timeout(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection lost, restart required")]
    ConnectionLost,

    #[error("{}", format_server_error(.code.as_deref(), .message))]
    Server {
        code: Option<String>,
        message: String,
    },

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("json error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("client shut down")]
    Shutdown,
}

fn format_server_error(code: Option<&str>, message: &str) -> String {
    match code {
        Some(code) => format!("server error [{}]: {}", code, message),
        None => format!("server error: {}", message),
    }
}

impl ClientError {
    /// Returns true if retrying later on the same client may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected | ClientError::ConnectionClosed | ClientError::Timeout(_)
        )
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
