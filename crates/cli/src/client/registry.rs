// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-request registry.
//!
//! Every request that expects a reply is registered here under its id before
//! it is written to the socket. An entry is settled exactly once: by the
//! matching reply, by its timeout, or by a connection failure. Whichever
//! path removes the entry from the map wins; the others find nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::error::{ClientError, ClientResult};

/// Reply channel of a pending request.
pub type ReplySender = oneshot::Sender<ClientResult<Value>>;

struct PendingRequest {
    label: String,
    reply: ReplySender,
    timer: AbortHandle,
}

/// Map of in-flight requests keyed by correlation id.
pub struct Registry {
    pending: Mutex<HashMap<String, PendingRequest>>,
    timeout: Duration,
}

impl Registry {
    /// Creates a registry whose entries expire after `timeout`.
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a request and arms its timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(self: &Arc<Self>, id: &str, label: &str, reply: ReplySender) {
        let registry = Arc::clone(self);
        let timer_id = id.to_string();
        let timeout = self.timeout;

        // Held across the spawn so the timer cannot fire before the entry exists
        let mut pending = self.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            registry.expire(&timer_id);
        })
        .abort_handle();

        let entry = PendingRequest {
            label: label.to_string(),
            reply,
            timer,
        };
        if let Some(previous) = pending.insert(id.to_string(), entry) {
            previous.timer.abort();
            tracing::warn!(id, "replaced pending request with duplicate id");
        }
    }

    fn take(&self, id: &str) -> Option<PendingRequest> {
        let entry = self.lock().remove(id)?;
        entry.timer.abort();
        Some(entry)
    }

    /// Settles a request successfully. Returns false if the id was not pending.
    pub fn resolve(&self, id: &str, value: Value) -> bool {
        match self.take(id) {
            Some(entry) => {
                // The caller may have given up on the reply
                let _ = entry.reply.send(Ok(value));
                true
            }
            None => false,
        }
    }

    /// Settles a request with an error. Returns false if the id was not pending.
    pub fn reject(&self, id: &str, error: ClientError) -> bool {
        match self.take(id) {
            Some(entry) => {
                // The caller may have given up on the reply
                let _ = entry.reply.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Times out a request if it is still pending.
    pub fn expire(&self, id: &str) {
        if let Some(entry) = self.lock().remove(id) {
            tracing::debug!(id, label = %entry.label, "request timed out");
            // Ignored if the caller is gone
            let _ = entry.reply.send(Err(ClientError::Timeout(entry.label)));
        }
    }

    /// Fails every pending request.
    pub fn fail_all(&self, error: impl Fn() -> ClientError) {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, entry)| entry).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing pending requests");
        }
        for entry in drained {
            entry.timer.abort();
            // Ignored if the caller is gone
            let _ = entry.reply.send(Err(error()));
        }
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
