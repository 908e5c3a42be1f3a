// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`Connection`] capability surface.
//!
//! Opening applies the PRAGMAs from `[storage]`. Closing checkpoints and
//! truncates the WAL first when WAL mode is on.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::hooks::Action;
use rusqlite::trace::TraceEventCodes;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ToSql, params_from_iter};
use serialite_config::StorageConfig;
use serialite_core::{Connection, Row, SerialiteError, StatementInfo, Value};
use tracing::{debug, warn};

use crate::events::{self, UpdateAction, UpdateEvent, UpdateFeed};
use crate::statement::split_first_statement;

/// Convert a rusqlite error into the crate error type.
pub fn map_sqlite_err(e: rusqlite::Error) -> SerialiteError {
    SerialiteError::engine(e)
}

/// A single SQLite connection.
///
/// Not safe for concurrent use; wrap it in a [`crate::Database`] to share it.
pub struct SqliteConnection {
    inner: rusqlite::Connection,
    wal_mode: bool,
}

impl SqliteConnection {
    /// Open the database named by `config.database_path` and apply its PRAGMAs.
    pub fn open(config: &StorageConfig) -> Result<Self, SerialiteError> {
        let inner = if config.is_in_memory() {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&config.database_path)
        }
        .map_err(map_sqlite_err)?;
        Self::from_rusqlite(inner, config)
    }

    /// Open a private in-memory database with default settings.
    pub fn open_in_memory() -> Result<Self, SerialiteError> {
        Self::open(&StorageConfig::in_memory())
    }

    /// Take over an already opened rusqlite connection.
    pub fn from_rusqlite(
        inner: rusqlite::Connection,
        config: &StorageConfig,
    ) -> Result<Self, SerialiteError> {
        inner
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(map_sqlite_err)?;

        let wal_mode = config.wal_mode && !config.is_in_memory();
        if wal_mode {
            let mode: String = inner
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(map_sqlite_err)?;
            if !mode.eq_ignore_ascii_case("wal") {
                warn!(journal_mode = %mode, "database refused WAL mode");
            }
        }
        inner
            .pragma_update(None, "foreign_keys", config.foreign_keys)
            .map_err(map_sqlite_err)?;

        inner.trace_v2(
            TraceEventCodes::SQLITE_TRACE_STMT | TraceEventCodes::SQLITE_TRACE_PROFILE,
            Some(events::log_trace_event),
        );

        debug!(
            path = %config.database_path,
            wal_mode,
            busy_timeout_ms = config.busy_timeout_ms,
            foreign_keys = config.foreign_keys,
            "sqlite connection opened"
        );
        Ok(Self { inner, wal_mode })
    }

    /// Publish every row change made through this connection on `feed`.
    pub fn with_update_feed(self, feed: UpdateFeed) -> Self {
        self.inner.update_hook(Some(
            move |action: Action, database: &str, table: &str, row_id: i64| {
                let action = match action {
                    Action::SQLITE_INSERT => UpdateAction::Insert,
                    Action::SQLITE_UPDATE => UpdateAction::Update,
                    Action::SQLITE_DELETE => UpdateAction::Delete,
                    _ => return,
                };
                feed.publish(UpdateEvent {
                    action,
                    database: database.to_string(),
                    table: table.to_string(),
                    row_id,
                });
            },
        ));
        self
    }

    /// The wrapped rusqlite connection.
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.inner
    }
}

/// Borrowed parameter binding for a [`Value`].
struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self.0 {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn bind(params: &[Value]) -> impl rusqlite::Params + '_ {
    params_from_iter(params.iter().map(Param))
}

impl Connection for SqliteConnection {
    type Statement<'c> = rusqlite::Statement<'c>;

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, SerialiteError> {
        self.inner.execute(sql, bind(params)).map_err(map_sqlite_err)
    }

    fn execute_all(&self, sql: &str) -> Result<(), SerialiteError> {
        self.inner.execute_batch(sql).map_err(map_sqlite_err)
    }

    fn prepare_statement<'c, 's>(
        &'c self,
        sql: &'s str,
    ) -> Result<(Self::Statement<'c>, &'s str), SerialiteError> {
        let (first, rest) = split_first_statement(sql);
        let statement = self.inner.prepare(first).map_err(map_sqlite_err)?;
        Ok((statement, rest))
    }

    fn describe(&self, sql: &str) -> Result<StatementInfo, SerialiteError> {
        let (statement, rest) = self.prepare_statement(sql)?;
        Ok(StatementInfo {
            sql: split_first_statement(sql).0.to_string(),
            remaining: rest.to_string(),
            column_names: statement
                .column_names()
                .into_iter()
                .map(String::from)
                .collect(),
            parameter_count: statement.parameter_count(),
            readonly: statement.readonly(),
        })
    }

    fn query_each(
        &self,
        sql: &str,
        params: &[Value],
        visit: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> Result<(), SerialiteError> {
        let mut statement = self.inner.prepare(sql).map_err(map_sqlite_err)?;
        let columns: Arc<[String]> = statement
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = statement.query(bind(params)).map_err(map_sqlite_err)?;
        while let Some(row) = rows.next().map_err(map_sqlite_err)? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(value_from_ref))
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_err)?;
            if visit(Row::new(Arc::clone(&columns), values)).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        self.inner.is_autocommit()
    }

    fn close(self) -> Result<(), SerialiteError> {
        if self.wal_mode {
            match self.inner.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                Ok(()) => debug!("WAL checkpoint complete"),
                Err(e) => warn!(error = %e, "WAL checkpoint before close failed"),
            }
        }
        self.inner.close().map_err(|(_, e)| map_sqlite_err(e))
    }
}
