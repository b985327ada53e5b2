// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound queue for generic calls made while disconnected.
//!
//! Entries are kept in submission order and flushed on the next successful
//! connect. The queue lives only in memory and is owned by the connection
//! task, so no locking is needed.

use std::collections::VecDeque;

use serde_json::Value;
use tether_core::ClientMessage;

use super::error::ClientError;
use super::registry::ReplySender;

/// A call waiting for a connection.
pub struct QueuedRequest {
    pub id: String,
    pub method: String,
    pub params: Option<Value>,
    pub reply: ReplySender,
}

impl QueuedRequest {
    /// Builds the wire message for this request.
    pub fn message(&self) -> ClientMessage {
        ClientMessage::call(self.id.clone(), self.method.clone(), self.params.clone())
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// FIFO of calls awaiting a connection.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedRequest>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request at the back.
    pub fn enqueue(&mut self, request: QueuedRequest) {
        tracing::debug!(id = %request.id, method = %request.method, "queued request");
        self.entries.push_back(request);
    }

    /// Removes the oldest request.
    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    /// Puts a request back at the front, preserving order after a failed write.
    pub fn push_front(&mut self, request: QueuedRequest) {
        self.entries.push_front(request);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails and removes every queued request.
    pub fn fail_all(&mut self, error: impl Fn() -> ClientError) {
        for request in self.entries.drain(..) {
            // Ignored if the caller is gone
            let _ = request.reply.send(Err(error()));
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
