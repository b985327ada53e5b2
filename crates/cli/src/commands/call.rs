// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot calls on the command endpoint.

use serde_json::Value;

use super::{connect_budget, parse_params};
use crate::client::{Client, EndpointKind};
use crate::config::Config;
use crate::error::Result;

/// Connects, issues `method`, and prints the result as pretty JSON.
pub async fn run(config: &Config, method: &str, params: Option<&str>) -> Result<()> {
    let params = params.map(parse_params).transpose()?;
    let client = Client::new(config.command.clone(), EndpointKind::Command);

    let outcome = call(&client, config, method, params).await;
    client.shutdown().await;

    let value = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn call(
    client: &Client,
    config: &Config,
    method: &str,
    params: Option<Value>,
) -> Result<Value> {
    client
        .connect_and_wait(connect_budget(&config.command))
        .await?;
    Ok(client.call(method, params).await?)
}
