// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tether-core operations.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// A specialized Result type for tether-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Decodes a backend frame, rejecting empty input with a readable error.
pub fn decode_server_frame(text: &str) -> Result<crate::protocol::ServerMessage> {
    if text.trim().is_empty() {
        return Err(Error::InvalidMessage("empty frame".to_string()));
    }
    Ok(crate::protocol::ServerMessage::from_json(text)?)
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
