// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Session multiplexer.
//!
//! Tracks every open session on one connection and fans streamed payloads
//! out to per-session event channels. A session is created locally in the
//! pending state before its create/resume command is written, then bound to
//! the backend-assigned id when the reply arrives.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_core::{SdkMessage, SdkResult};
use tokio::sync::mpsc;

/// Client-side handle id of a session. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalSessionId(u64);

impl fmt::Display for LocalSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Lifecycle of a session as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Create/resume sent, no id assigned yet.
    Pending,
    /// Bound and idle between turns.
    Active,
    /// A turn is in progress.
    Streaming,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed through this client.
    Local,
    /// The backend reported `session_closed`.
    Server,
    /// The connection dropped.
    ConnectionLost,
}

/// Events delivered to a session's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A non-terminal streamed payload.
    Message(SdkMessage),
    /// The turn finished with this result.
    TurnCompleted(SdkResult),
    /// The backend acknowledged an interrupt.
    Interrupted,
    /// The backend reported an error scoped to this session.
    Error {
        code: Option<String>,
        message: String,
    },
    /// The session ended. Always the last event.
    Closed(CloseReason),
}

struct SessionEntry {
    remote_id: Option<String>,
    status: SessionStatus,
    busy: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEntry {
    fn emit(&self, local: LocalSessionId, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(%local, "session receiver dropped");
        }
    }
}

#[derive(Default)]
struct SessionTable {
    next: u64,
    entries: HashMap<LocalSessionId, SessionEntry>,
    by_remote: HashMap<String, LocalSessionId>,
    by_request: HashMap<String, LocalSessionId>,
}

impl SessionTable {
    fn remove(&mut self, local: LocalSessionId) -> Option<SessionEntry> {
        let entry = self.entries.remove(&local)?;
        if let Some(remote) = &entry.remote_id {
            self.by_remote.remove(remote);
        }
        self.by_request.retain(|_, l| *l != local);
        Some(entry)
    }

    fn entry_for_remote(&mut self, remote: &str) -> Option<(LocalSessionId, &mut SessionEntry)> {
        let local = *self.by_remote.get(remote)?;
        self.entries.get_mut(&local).map(|entry| (local, entry))
    }
}

/// Registry of sessions on one connection.
#[derive(Default)]
pub struct SessionMultiplexer {
    table: Mutex<SessionTable>,
}

impl SessionMultiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, SessionTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a pending session awaiting the reply to `request_id`.
    pub fn open_pending(
        &self,
        request_id: &str,
    ) -> (LocalSessionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let mut table = self.lock();
        table.next += 1;
        let local = LocalSessionId(table.next);
        table.entries.insert(
            local,
            SessionEntry {
                remote_id: None,
                status: SessionStatus::Pending,
                busy: false,
                events,
            },
        );
        table.by_request.insert(request_id.to_string(), local);
        (local, rx)
    }

    /// Binds the pending session for `request_id` to its backend id.
    ///
    /// Returns the local id, or `None` if no pending session was waiting.
    pub fn bind(&self, request_id: &str, remote_id: &str) -> Option<LocalSessionId> {
        let mut table = self.lock();
        let local = table.by_request.remove(request_id)?;
        let entry = table.entries.get_mut(&local)?;
        entry.remote_id = Some(remote_id.to_string());
        entry.status = SessionStatus::Active;
        if let Some(previous) = table.by_remote.insert(remote_id.to_string(), local) {
            if previous != local {
                tracing::warn!(remote_id, "session id rebound to a new handle");
            }
        }
        tracing::debug!(%local, remote_id, "session bound");
        Some(local)
    }

    /// Forgets a session whose create/resume failed. No event is emitted.
    pub fn discard(&self, local: LocalSessionId) {
        self.lock().remove(local);
    }

    /// Finds the local handle of a bound session.
    pub fn lookup(&self, remote_id: &str) -> Option<LocalSessionId> {
        self.lock().by_remote.get(remote_id).copied()
    }

    /// Marks a turn as started after input was sent.
    pub fn mark_busy(&self, remote_id: &str) -> bool {
        let mut table = self.lock();
        match table.entry_for_remote(remote_id) {
            Some((_, entry)) => {
                entry.busy = true;
                entry.status = SessionStatus::Streaming;
                true
            }
            None => false,
        }
    }

    /// Delivers a streamed payload.
    ///
    /// A `result` ends the turn exactly once: the session returns to
    /// `Active`, stops being busy, and its owner sees `TurnCompleted`.
    pub fn route(&self, remote_id: &str, message: SdkMessage) {
        let mut table = self.lock();
        let Some((local, entry)) = table.entry_for_remote(remote_id) else {
            tracing::debug!(remote_id, kind = message.kind(), "message for unknown session");
            return;
        };
        match message {
            SdkMessage::Result(_) if !entry.busy && entry.status != SessionStatus::Streaming => {
                tracing::debug!(%local, "dropping result outside a turn");
            }
            SdkMessage::Result(result) => {
                entry.busy = false;
                entry.status = SessionStatus::Active;
                entry.emit(local, SessionEvent::TurnCompleted(result));
            }
            other => {
                entry.status = SessionStatus::Streaming;
                entry.emit(local, SessionEvent::Message(other));
            }
        }
    }

    /// Handles `session_interrupted`.
    pub fn interrupted(&self, remote_id: &str) {
        let mut table = self.lock();
        let Some((local, entry)) = table.entry_for_remote(remote_id) else {
            tracing::debug!(remote_id, "interrupt for unknown session");
            return;
        };
        entry.busy = false;
        entry.status = SessionStatus::Active;
        entry.emit(local, SessionEvent::Interrupted);
    }

    /// Handles an error scoped to a session. The turn, if any, is over.
    pub fn error(&self, remote_id: &str, code: Option<String>, message: String) {
        let mut table = self.lock();
        let Some((local, entry)) = table.entry_for_remote(remote_id) else {
            tracing::debug!(remote_id, %message, "error for unknown session");
            return;
        };
        entry.busy = false;
        entry.status = SessionStatus::Active;
        entry.emit(local, SessionEvent::Error { code, message });
    }

    /// Handles `session_closed` from the backend.
    pub fn close_remote(&self, remote_id: &str) {
        let mut table = self.lock();
        let Some(local) = table.by_remote.get(remote_id).copied() else {
            tracing::debug!(remote_id, "close for unknown session");
            return;
        };
        if let Some(entry) = table.remove(local) {
            entry.emit(local, SessionEvent::Closed(CloseReason::Server));
        }
    }

    /// Tears a session down locally. Events arriving later are dropped.
    ///
    /// Returns the backend id if the session was bound.
    pub fn close_local(&self, local: LocalSessionId) -> Option<String> {
        let entry = self.lock().remove(local)?;
        entry.emit(local, SessionEvent::Closed(CloseReason::Local));
        entry.remote_id
    }

    /// Closes every session, e.g. when the connection drops.
    pub fn close_all(&self, reason: CloseReason) {
        let mut table = self.lock();
        let entries: Vec<(LocalSessionId, SessionEntry)> = table.entries.drain().collect();
        table.by_remote.clear();
        table.by_request.clear();
        drop(table);
        for (local, entry) in entries {
            entry.emit(local, SessionEvent::Closed(reason));
        }
    }

    /// Current status; sessions no longer tracked are `Closed`.
    pub fn status(&self, local: LocalSessionId) -> SessionStatus {
        self.lock()
            .entries
            .get(&local)
            .map_or(SessionStatus::Closed, |e| e.status)
    }

    pub fn is_busy(&self, local: LocalSessionId) -> bool {
        self.lock().entries.get(&local).is_some_and(|e| e.busy)
    }

    /// Backend id of a bound session.
    pub fn remote_id(&self, local: LocalSessionId) -> Option<String> {
        self.lock()
            .entries
            .get(&local)
            .and_then(|e| e.remote_id.clone())
    }

    /// Number of tracked sessions, pending ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
