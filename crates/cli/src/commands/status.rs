// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Endpoint reachability report.

use super::connect_budget;
use crate::client::{Client, ConnectionState, Endpoints};
use crate::config::Config;
use crate::error::Result;

/// Tries both endpoints and prints one line per endpoint.
pub async fn run(config: &Config) -> Result<()> {
    let endpoints = Endpoints::from_config(config);

    let (command, session) = tokio::join!(
        check(&endpoints.command, connect_budget(&config.command)),
        check(&endpoints.session, connect_budget(&config.session)),
    );
    println!("{}", command);
    println!("{}", session);

    endpoints.shutdown().await;
    Ok(())
}

async fn check(client: &Client, budget: std::time::Duration) -> String {
    let detail = match client.connect_and_wait(budget).await {
        Ok(()) => ConnectionState::Connected.to_string(),
        Err(e) => format!("{} ({})", client.status(), e),
    };
    format_line(&client.kind().to_string(), client.url(), &detail)
}

pub(crate) fn format_line(kind: &str, url: &str, detail: &str) -> String {
    format!("{:<8} {}  {}", format!("{}:", kind), url, detail)
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
