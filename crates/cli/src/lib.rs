// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether - client library for local command and agent-session backends.
//!
//! A backend exposes two WebSocket endpoints: a command endpoint for generic
//! request/response calls and a session endpoint for long-running agent
//! sessions that stream messages. Each endpoint is driven by one [`Client`],
//! which owns the connection, queues requests while disconnected, correlates
//! replies, and reconnects after unexpected closes.
//!
//! # Main Components
//!
//! - [`Client`] - one endpoint connection with request correlation
//! - [`Session`] - handle to one agent session on the session endpoint
//! - [`Config`] - endpoint URLs, timeouts, and reconnect policy
//! - [`Error`] - errors reported by the binary
//!
//! ```rust,ignore
//! use tether::{Client, Config, EndpointKind};
//!
//! let config = Config::load_or_default(None)?;
//! let client = Client::new(config.command.clone(), EndpointKind::Command);
//! client.connect();
//! let value = client.call("echo", Some(serde_json::json!({"v": 1}))).await?;
//! ```

mod cli;
mod commands;

pub mod client;
pub mod config;
pub mod error;

pub use cli::{Cli, Command};
pub use client::{Client, EndpointKind, Endpoints, Session};
pub use config::Config;
pub use error::{Error, Result};

use tether_core::SessionOptions;

use commands::session::TurnArgs;

/// Runs one CLI invocation to completion.
pub fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.verbose);

    let config = Config::load_or_default(cli.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(dispatch(cli, config))
}

async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Command::Call { method, params } => {
            commands::call::run(&config, &method, params.as_deref()).await
        }
        Command::Session {
            prompt,
            model,
            cwd,
            system_prompt,
            resume,
        } => {
            let args = TurnArgs {
                prompt,
                options: SessionOptions {
                    model,
                    cwd,
                    system_prompt,
                    mcp_servers: None,
                },
                resume,
            };
            commands::session::run(&config, args).await
        }
        Command::Status => commands::status::run(&config).await,
        Command::Config => commands::config::run(&config, cli.config.as_deref()),
    }
}

/// Logs to stderr. `TETHER_LOG` takes an `EnvFilter` directive; without it
/// only warnings are shown, or debug output with `-v`.
fn setup_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("TETHER_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    // A second init in the same process is a no-op.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
