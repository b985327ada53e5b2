// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat bookkeeping for a connected endpoint.
//!
//! While connected, a heartbeat is sent once the connection has been quiet for
//! `interval`. Any inbound frame proves the peer alive and clears the
//! outstanding heartbeat. If nothing arrives within `timeout` of a heartbeat, the
//! connection is treated as dead. Either duration set to zero disables the
//! corresponding check.

use std::time::Duration;

use tether_core::{ClientMessage, Route, ServerMessage, SessionCommand};
use tokio::time::Instant;

use super::EndpointKind;

const HEARTBEAT_PREFIX: &str = "hb-";

/// Liveness state of one connection.
#[derive(Debug)]
pub struct Liveness {
    kind: EndpointKind,
    interval: Duration,
    timeout: Duration,
    /// When the unanswered heartbeat was sent.
    outstanding: Option<Instant>,
    next_heartbeat: Option<Instant>,
    /// Number of `hb-N` heartbeats issued on this endpoint.
    seq: u64,
}

impl Liveness {
    pub fn new(kind: EndpointKind, interval: Duration, timeout: Duration) -> Self {
        Self {
            kind,
            interval,
            timeout,
            outstanding: None,
            next_heartbeat: None,
            seq: 0,
        }
    }

    fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Starts the heartbeat schedule for a fresh connection.
    pub fn start(&mut self, now: Instant) {
        self.outstanding = None;
        self.next_heartbeat = self.enabled().then(|| now + self.interval);
    }

    /// Stops the heartbeat schedule; called when the connection goes away.
    pub fn reset(&mut self) {
        self.outstanding = None;
        self.next_heartbeat = None;
    }

    /// When the next heartbeat is due, if one is scheduled and none is in flight.
    pub fn next_heartbeat_at(&self) -> Option<Instant> {
        if self.outstanding.is_some() {
            None
        } else {
            self.next_heartbeat
        }
    }

    /// When the outstanding heartbeat expires, if expiry is enabled.
    pub fn deadline(&self) -> Option<Instant> {
        if self.timeout.is_zero() {
            return None;
        }
        self.outstanding.map(|sent| sent + self.timeout)
    }

    /// Builds the next heartbeat and marks it outstanding.
    pub fn heartbeat(&mut self, now: Instant) -> ClientMessage {
        self.next_heartbeat = None;
        self.outstanding = Some(now);
        match self.kind {
            EndpointKind::Session => ClientMessage::from(SessionCommand::Ping),
            EndpointKind::Command => {
                self.seq += 1;
                ClientMessage::call(format!("{}{}", HEARTBEAT_PREFIX, self.seq), "ping", None)
            }
        }
    }

    /// Records an inbound frame of any kind as proof of life.
    pub fn on_frame(&mut self, now: Instant) {
        self.outstanding = None;
        if self.enabled() {
            self.next_heartbeat = Some(now + self.interval);
        }
    }

    /// Returns true if `msg` answers one of our heartbeats and must not be
    /// dispatched further.
    ///
    /// Late answers to earlier heartbeats are consumed too.
    pub fn is_heartbeat_reply(&self, msg: &ServerMessage) -> bool {
        match msg.route() {
            Route::Heartbeat => true,
            Route::Request(id) => self.is_heartbeat_id(id),
            Route::Session(_) | Route::Unaddressed => false,
        }
    }

    fn is_heartbeat_id(&self, id: &str) -> bool {
        id.strip_prefix(HEARTBEAT_PREFIX)
            .and_then(|n| n.parse::<u64>().ok())
            .is_some_and(|n| (1..=self.seq).contains(&n))
    }
}

#[cfg(test)]
#[path = "liveness_tests.rs"]
mod tests;
