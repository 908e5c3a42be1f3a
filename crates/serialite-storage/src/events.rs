// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pass-through notification feeds from the engine.
//!
//! None of these are ordered with respect to the operation queue; they
//! report what the engine did as it does it.

use std::time::Duration;

use rusqlite::trace::TraceEvent;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Kind of row change reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateAction {
    Insert,
    Update,
    Delete,
}

/// One row inserted, updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateEvent {
    pub action: UpdateAction,
    pub database: String,
    pub table: String,
    pub row_id: i64,
}

/// Broadcast channel of [`UpdateEvent`]s. Clones publish to the same feed.
///
/// Slow subscribers lose the oldest events rather than holding up the
/// connection.
#[derive(Debug, Clone)]
pub struct UpdateFeed {
    sender: broadcast::Sender<UpdateEvent>,
}

impl UpdateFeed {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; returns how many subscribers received it.
    pub fn publish(&self, event: UpdateEvent) -> usize {
        // No subscribers is the common case.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for UpdateFeed {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Engine trace callback, registered for statement and profile events.
pub(crate) fn log_trace_event(event: TraceEvent<'_>) {
    match event {
        TraceEvent::Stmt(_, sql) => log_statement(sql),
        TraceEvent::Profile(stmt, elapsed) => log_profile(&stmt.sql(), elapsed),
        _ => {}
    }
}

/// Every statement as it starts running.
pub(crate) fn log_statement(sql: &str) {
    trace!(target: "serialite::sql", sql = %sql, "statement");
}

/// Every statement once it finished.
pub(crate) fn log_profile(sql: &str, elapsed: Duration) {
    debug!(
        target: "serialite::profile",
        sql = %sql,
        elapsed_us = elapsed.as_micros() as u64,
        "statement finished"
    );
}
