// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One turn of an agent session.
//!
//! Streams assistant text to stdout as it arrives and prints the final result
//! when the turn completes. Ctrl-C interrupts the turn.

use serde_json::Value;
use tether_core::{SdkMessage, SdkResult, SessionOptions};

use super::connect_budget;
use crate::client::{Client, ClientError, EndpointKind, Session, SessionEvent};
use crate::config::Config;
use crate::error::{Error, Result};

/// Arguments of `tether session`.
#[derive(Debug, Default)]
pub struct TurnArgs {
    pub prompt: String,
    pub options: SessionOptions,
    pub resume: Option<String>,
}

pub async fn run(config: &Config, args: TurnArgs) -> Result<()> {
    let client = Client::new(config.session.clone(), EndpointKind::Session);
    let outcome = turn(&client, config, args).await;
    client.shutdown().await;
    outcome
}

async fn turn(client: &Client, config: &Config, args: TurnArgs) -> Result<()> {
    client
        .connect_and_wait(connect_budget(&config.session))
        .await?;

    let mut session = match args.resume {
        Some(id) => client.resume_session(&id, args.options.model).await?,
        None => client.create_session(args.options).await?,
    };
    eprintln!("session: {}", session.id());

    session.send(args.prompt).await?;
    let outcome = stream_turn(&mut session).await;
    if let Err(e) = session.close().await {
        tracing::debug!(error = %e, "close after turn failed");
    }
    outcome
}

async fn stream_turn(session: &mut Session) -> Result<()> {
    let mut interrupted = false;
    loop {
        let event = tokio::select! {
            event = session.next_event() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("interrupting...");
                session.interrupt().await?;
                continue;
            }
        };

        match event {
            Some(SessionEvent::Message(message)) => {
                if let Some(text) = render(&message) {
                    println!("{}", text);
                }
            }
            Some(SessionEvent::TurnCompleted(result)) => {
                return finish(&result);
            }
            Some(SessionEvent::Interrupted) => {
                eprintln!("turn interrupted");
                return Ok(());
            }
            Some(SessionEvent::Error { code, message }) => {
                return Err(ClientError::Server { code, message }.into());
            }
            Some(SessionEvent::Closed(reason)) => {
                tracing::debug!(?reason, "session closed mid-turn");
                return Err(Error::SessionEnded);
            }
            None => return Err(Error::SessionEnded),
        }
    }
}

fn finish(result: &SdkResult) -> Result<()> {
    if let Some(text) = result.result_text() {
        println!("{}", text);
    }
    if result.is_error {
        let message = result
            .subtype
            .clone()
            .unwrap_or_else(|| "turn failed".to_string());
        return Err(ClientError::Server {
            code: None,
            message,
        }
        .into());
    }
    Ok(())
}

/// Extracts printable text from a streamed payload.
///
/// Looks at a top-level `text` field, then at `message.content[].text`.
/// Partial payloads are never printed.
pub(crate) fn render(message: &SdkMessage) -> Option<String> {
    let payload = match message {
        SdkMessage::Assistant(payload) => payload,
        SdkMessage::User(_) | SdkMessage::System(_) | SdkMessage::Partial(_) => return None,
        SdkMessage::Result(result) => return result.result_text(),
    };

    if let Some(text) = payload.fields.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let blocks = payload
        .fields
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)?;
    let text: Vec<&str> = blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
