// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Correlation id generation.
//!
//! Ids are `"{prefix}-{n}"` with `n` strictly increasing per generator, so an
//! id is never handed out twice by the same client.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe generator of correlation ids.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl IdGenerator {
    /// Creates a generator whose ids start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        IdGenerator {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }

    /// Returns the next unused id.
    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
