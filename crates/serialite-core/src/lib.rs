// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for Serialite.
//!
//! This crate provides the error type, the shared value types, and the
//! [`Connection`] capability trait that the transaction manager and the
//! operation queue in `serialite-storage` are written against. Engine
//! bindings implement [`Connection`]; nothing here depends on a specific
//! engine.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::SerialiteError;
pub use traits::Connection;
pub use types::{QueueState, Row, StatementInfo, TransactionMode, Value};
