// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Serialite integration tests.
//!
//! Provides a scripted engine connection for fast, deterministic tests of
//! the transaction manager and the operation queue without a real database.
//!
//! # Components
//!
//! - [`RecordingConnection`] - Connection that records every SQL text it receives
//! - [`SqlLog`] - Shared view of the recorded statements, usable after the
//!   connection moved into a queue
//! - [`TempDatabase`] - Database file in a temp directory removed on drop

pub mod harness;
pub mod recording;

pub use harness::TempDatabase;
pub use recording::{RecordingConnection, SqlLog};
