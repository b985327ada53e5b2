// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

pub mod call;
pub mod config;
pub mod session;
pub mod status;

use std::time::Duration;

use serde_json::Value;

use crate::config::EndpointConfig;
use crate::error::{Error, Result};

/// How long a command waits for an endpoint to come up.
///
/// Covers every connection attempt the endpoint may make before giving up,
/// including the delays between them.
pub fn connect_budget(endpoint: &EndpointConfig) -> Duration {
    let per_attempt = endpoint.connect_timeout() + endpoint.reconnect_delay();
    per_attempt * (endpoint.max_reconnect_attempts.saturating_add(1))
}

/// Parses command-line params as a JSON value.
pub fn parse_params(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| Error::InvalidParams(e.to_string()))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
