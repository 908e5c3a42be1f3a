// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialized, transaction-aware access to a single SQLite connection.
//!
//! A [`Database`] owns one connection on a dedicated executor thread and
//! runs every operation through a strict FIFO [`OperationQueue`].
//! Transactions nest: the outermost call issues `BEGIN`, inner calls on
//! the scoped [`Handle`] issue `SAVEPOINT`s that can be rolled back on
//! their own.

pub mod database;
pub mod events;
pub mod queue;
pub mod sqlite;
pub mod statement;
pub mod transaction;

pub use database::{Database, RowStream};
pub use events::{UpdateAction, UpdateEvent, UpdateFeed};
pub use queue::{ItemStream, OperationContext, OperationQueue, PendingResult, QueueOptions, StreamSink};
pub use sqlite::{SqliteConnection, map_sqlite_err};
pub use statement::{split_first_statement, split_statements};
pub use transaction::{Handle, Savepoint, TransactionScope, run_in_transaction, try_run_in_transaction};
