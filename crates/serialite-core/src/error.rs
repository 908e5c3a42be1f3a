// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for Serialite.

use thiserror::Error;

/// The error type returned by every Serialite operation.
#[derive(Debug, Error)]
pub enum SerialiteError {
    /// Errors raised by the database engine (prepare, step, constraint, I/O).
    ///
    /// The engine's own error is kept as the source, unmodified.
    #[error("engine error: {source}")]
    Engine {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The operation queue is draining or disposed and accepts no new work.
    #[error("operation queue is closed")]
    QueueClosed,

    /// The operation's cancellation token fired before the queue reached it.
    #[error("operation cancelled before it started")]
    Cancelled,

    /// The unit of work panicked or dropped its result before reporting one.
    #[error("operation aborted before reporting a result")]
    OperationAborted,

    /// Configuration errors (invalid values, unusable paths).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SerialiteError {
    /// Wrap an engine error.
    pub fn engine<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Engine {
            source: source.into(),
        }
    }

    /// True when the operation was skipped because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True when the submission was rejected because the queue is shutting down.
    pub fn is_queue_closed(&self) -> bool {
        matches!(self, Self::QueueClosed)
    }

    /// True for errors that originate in the engine.
    pub fn is_engine(&self) -> bool {
        matches!(self, Self::Engine { .. })
    }
}
