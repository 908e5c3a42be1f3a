// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted engine connection for deterministic testing.
//!
//! `RecordingConnection` implements [`Connection`] by appending every SQL
//! text it receives to a shared [`SqlLog`]. Statements registered with
//! [`SqlLog::fail_on`] return an engine error instead of succeeding, and
//! queries produce a configurable number of synthetic rows.

use std::cell::Cell;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialite_core::{Connection, Row, SerialiteError, StatementInfo, Value};
use tracing::trace;

#[derive(Debug, Default)]
struct Script {
    statements: Vec<String>,
    failures: Vec<String>,
    closes: usize,
}

/// Shared handle to what a [`RecordingConnection`] has seen.
///
/// Clones observe the same log, so a test can keep one after the
/// connection itself moved onto a queue executor thread.
#[derive(Debug, Clone, Default)]
pub struct SqlLog {
    inner: Arc<Mutex<Script>>,
}

impl SqlLog {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All statements received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Statements received so far that are not transaction control.
    pub fn data_statements(&self) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .filter(|s| !is_transaction_control(s))
            .cloned()
            .collect()
    }

    /// Number of times `sql` was received verbatim.
    pub fn count(&self, sql: &str) -> usize {
        self.lock().statements.iter().filter(|s| *s == sql).count()
    }

    /// True if any received statement starts with `prefix`.
    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.lock().statements.iter().any(|s| s.starts_with(prefix))
    }

    /// Forget all recorded statements.
    pub fn clear(&self) {
        self.lock().statements.clear();
    }

    /// Make every statement equal to, or starting with, `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.lock().failures.push(pattern.into());
    }

    /// Remove all failure patterns.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// How many times the connection was closed.
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    fn record(&self, sql: &str) -> Result<(), SerialiteError> {
        let mut script = self.lock();
        script.statements.push(sql.to_string());
        if script.failures.iter().any(|p| sql.starts_with(p.as_str())) {
            return Err(SerialiteError::engine(format!("scripted failure: {sql}")));
        }
        Ok(())
    }
}

fn is_transaction_control(sql: &str) -> bool {
    ["BEGIN ", "COMMIT", "ROLLBACK", "SAVEPOINT ", "RELEASE "]
        .iter()
        .any(|p| sql.starts_with(p))
}

/// A statement "prepared" by a [`RecordingConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub sql: String,
}

/// A fake engine connection that records the SQL it is asked to run.
///
/// Tracks whether a transaction is open the way an engine would: `BEGIN`
/// leaves autocommit, `COMMIT TRANSACTION` and `ROLLBACK TRANSACTION`
/// restore it, savepoint statements leave it unchanged.
#[derive(Debug)]
pub struct RecordingConnection {
    log: SqlLog,
    autocommit: Cell<bool>,
    rows_per_query: usize,
    latency: Option<Duration>,
}

impl RecordingConnection {
    /// Create a connection with an empty log.
    pub fn new() -> Self {
        Self::with_log(SqlLog::default())
    }

    /// Create a connection that records into an existing log.
    pub fn with_log(log: SqlLog) -> Self {
        Self {
            log,
            autocommit: Cell::new(true),
            rows_per_query: 0,
            latency: None,
        }
    }

    /// Make every query yield `n` rows with a single integer column `n`.
    pub fn with_rows(mut self, n: usize) -> Self {
        self.rows_per_query = n;
        self
    }

    /// Sleep for `latency` inside every execute call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The shared log this connection writes to.
    pub fn log(&self) -> SqlLog {
        self.log.clone()
    }

    fn run(&self, sql: &str) -> Result<(), SerialiteError> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        trace!(sql, "recording statement");
        self.log.record(sql)?;
        if sql.starts_with("BEGIN ") {
            self.autocommit.set(false);
        } else if sql == "COMMIT TRANSACTION" || sql == "ROLLBACK TRANSACTION" {
            self.autocommit.set(true);
        }
        Ok(())
    }
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for RecordingConnection {
    type Statement<'c>
        = RecordedStatement
    where
        Self: 'c;

    fn execute(&self, sql: &str, _params: &[Value]) -> Result<usize, SerialiteError> {
        self.run(sql)?;
        Ok(1)
    }

    fn execute_all(&self, sql: &str) -> Result<(), SerialiteError> {
        self.run(sql)
    }

    fn prepare_statement<'c, 's>(
        &'c self,
        sql: &'s str,
    ) -> Result<(Self::Statement<'c>, &'s str), SerialiteError> {
        let (first, rest) = match sql.find(';') {
            Some(i) => (&sql[..=i], &sql[i + 1..]),
            None => (sql, ""),
        };
        self.log.record(first.trim())?;
        Ok((
            RecordedStatement {
                sql: first.trim().to_string(),
            },
            rest,
        ))
    }

    fn describe(&self, sql: &str) -> Result<StatementInfo, SerialiteError> {
        let (statement, rest) = self.prepare_statement(sql)?;
        Ok(StatementInfo {
            readonly: statement.sql.to_ascii_uppercase().starts_with("SELECT"),
            sql: statement.sql,
            remaining: rest.to_string(),
            column_names: Vec::new(),
            parameter_count: 0,
        })
    }

    fn query_each(
        &self,
        sql: &str,
        _params: &[Value],
        visit: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> Result<(), SerialiteError> {
        self.run(sql)?;
        let columns: Arc<[String]> = vec!["n".to_string()].into();
        for n in 0..self.rows_per_query {
            let row = Row::new(Arc::clone(&columns), vec![Value::Integer(n as i64)]);
            if visit(row).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        self.autocommit.get()
    }

    fn close(self) -> Result<(), SerialiteError> {
        self.log.lock().closes += 1;
        Ok(())
    }
}
