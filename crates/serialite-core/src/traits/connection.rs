// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capability surface required from the underlying engine.

use std::ops::ControlFlow;

use crate::error::SerialiteError;
use crate::types::{Row, StatementInfo, Value};

/// Minimal synchronous operations the coordination layer needs from an
/// engine connection.
///
/// Implementations are not expected to be safe for concurrent use. The
/// operation queue guarantees that exactly one thread calls into a given
/// connection, one unit of work at a time.
pub trait Connection {
    /// A prepared statement borrowing this connection.
    type Statement<'c>
    where
        Self: 'c;

    /// Execute one statement with bound parameters, returning the number of changed rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, SerialiteError>;

    /// Execute every statement in `sql`, discarding any rows.
    fn execute_all(&self, sql: &str) -> Result<(), SerialiteError>;

    /// Prepare the first statement in `sql`.
    ///
    /// Returns the prepared statement and the text after it.
    fn prepare_statement<'c, 's>(
        &'c self,
        sql: &'s str,
    ) -> Result<(Self::Statement<'c>, &'s str), SerialiteError>;

    /// Describe the first statement in `sql` without running it.
    fn describe(&self, sql: &str) -> Result<StatementInfo, SerialiteError>;

    /// Run a query and hand each row to `visit` as it is produced.
    ///
    /// Rows are stepped lazily. Returning [`ControlFlow::Break`] from
    /// `visit` stops the enumeration without an error.
    fn query_each(
        &self,
        sql: &str,
        params: &[Value],
        visit: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> Result<(), SerialiteError>;

    /// Run a query and collect all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SerialiteError> {
        let mut rows = Vec::new();
        self.query_each(sql, params, &mut |row| {
            rows.push(row);
            ControlFlow::Continue(())
        })?;
        Ok(rows)
    }

    /// True when no transaction is open on this connection.
    fn is_autocommit(&self) -> bool;

    /// Close the connection, reporting any error the engine raises while closing.
    fn close(self) -> Result<(), SerialiteError>
    where
        Self: Sized;
}
