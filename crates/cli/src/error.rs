// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use crate::client::ClientError;

/// Errors reported by the `tether` binary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid params: {0}\n  hint: params must be a JSON value, e.g. '{{\"v\": 1}}'")]
    InvalidParams(String),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("session ended before the turn completed")]
    SessionEnded,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for tether operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
