// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous facade over one connection.
//!
//! Every operation, disposal included, is built as a unit of work and put
//! on the connection's [`OperationQueue`]. Nothing reaches the connection
//! any other way.

use serialite_config::{QueueConfig, SerialiteConfig, StorageConfig};
use serialite_core::{Connection, QueueState, Row, SerialiteError, StatementInfo, TransactionMode, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{UpdateEvent, UpdateFeed};
use crate::queue::{ItemStream, OperationContext, OperationQueue, QueueOptions};
use crate::sqlite::SqliteConnection;
use crate::transaction::Handle;

/// Rows of a streaming query, produced lazily on the queue.
pub type RowStream = ItemStream<Row>;

/// Shared handle to a queued connection. Clones use the same queue.
///
/// When every clone is dropped without [`Database::shutdown`], the queue
/// still finishes accepted work and closes the connection.
pub struct Database<C = SqliteConnection> {
    queue: OperationQueue<C>,
    updates: Option<UpdateFeed>,
    default_mode: TransactionMode,
    stream_buffer: usize,
}

impl<C> Clone for Database<C> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            updates: self.updates.clone(),
            default_mode: self.default_mode,
            stream_buffer: self.stream_buffer,
        }
    }
}

impl Database<SqliteConnection> {
    /// Open the configured SQLite database and start its queue.
    pub async fn open(config: &SerialiteConfig) -> Result<Self, SerialiteError> {
        let storage = config.storage.clone();
        let feed = UpdateFeed::default();
        let hook_feed = feed.clone();
        let conn = tokio::task::spawn_blocking(move || {
            SqliteConnection::open(&storage).map(|conn| conn.with_update_feed(hook_feed))
        })
        .await
        .map_err(|e| SerialiteError::Internal(format!("database open task failed: {e}")))??;

        let mut db = Self::from_connection(conn, &config.queue)?;
        db.updates = Some(feed);
        info!(path = %config.storage.database_path, "database opened");
        Ok(db)
    }

    /// Open a private in-memory database with default queue settings.
    pub async fn open_in_memory() -> Result<Self, SerialiteError> {
        let config = SerialiteConfig {
            storage: StorageConfig::in_memory(),
            ..SerialiteConfig::default()
        };
        Self::open(&config).await
    }

    /// Row changes made through this connection.
    pub fn subscribe_updates(&self) -> Option<broadcast::Receiver<UpdateEvent>> {
        self.updates.as_ref().map(UpdateFeed::subscribe)
    }
}

impl<C: Connection + Send + 'static> Database<C> {
    /// Put `conn` behind a new queue.
    pub fn from_connection(conn: C, config: &QueueConfig) -> Result<Self, SerialiteError> {
        let queue = OperationQueue::spawn(
            conn,
            QueueOptions {
                thread_name: config.thread_name.clone(),
            },
        )?;
        Ok(Self {
            queue,
            updates: None,
            default_mode: config.default_transaction_mode,
            stream_buffer: config.stream_buffer,
        })
    }

    /// Run `f` on the queue and wait for its result.
    pub async fn call<F, R>(&self, f: F) -> Result<R, SerialiteError>
    where
        F: FnOnce(&mut OperationContext<'_, C>) -> Result<R, SerialiteError> + Send + 'static,
        R: Send + 'static,
    {
        self.queue.enqueue(f)?.await
    }

    /// Like [`Database::call`], skipped if `cancel` fires before it starts.
    pub async fn call_cancellable<F, R>(
        &self,
        cancel: CancellationToken,
        f: F,
    ) -> Result<R, SerialiteError>
    where
        F: FnOnce(&mut OperationContext<'_, C>) -> Result<R, SerialiteError> + Send + 'static,
        R: Send + 'static,
    {
        self.queue.enqueue_cancellable(cancel, f)?.await
    }

    pub async fn execute(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<usize, SerialiteError> {
        let sql = sql.into();
        self.call(move |ctx| ctx.connection().execute(&sql, &params))
            .await
    }

    pub async fn execute_all(&self, sql: impl Into<String>) -> Result<(), SerialiteError> {
        let sql = sql.into();
        self.call(move |ctx| ctx.connection().execute_all(&sql)).await
    }

    pub async fn query(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<Vec<Row>, SerialiteError> {
        let sql = sql.into();
        self.call(move |ctx| ctx.connection().query(&sql, &params))
            .await
    }

    /// Stream the rows of a query as the engine produces them.
    ///
    /// The query occupies the queue until the stream is exhausted or
    /// dropped.
    pub fn query_stream(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<RowStream, SerialiteError> {
        let sql = sql.into();
        self.queue
            .enqueue_stream(CancellationToken::new(), self.stream_buffer, move |ctx, sink| {
                ctx.connection()
                    .query_each(&sql, &params, &mut |row| sink.send(row))
            })
    }

    /// Check the first statement of `sql` and describe it.
    pub async fn prepare(&self, sql: impl Into<String>) -> Result<StatementInfo, SerialiteError> {
        let sql = sql.into();
        self.call(move |ctx| ctx.connection().describe(&sql)).await
    }

    /// Run `body` in a transaction on the queue.
    ///
    /// `body` receives a top-level handle; calling
    /// [`Handle::run_in_transaction`] on it nests a savepoint.
    pub async fn run_in_transaction<T, F>(
        &self,
        mode: TransactionMode,
        body: F,
    ) -> Result<T, SerialiteError>
    where
        F: FnOnce(&Handle<'_, C>) -> Result<T, SerialiteError> + Send + 'static,
        T: Send + 'static,
    {
        self.call(move |ctx| ctx.run_in_transaction(mode, body))
            .await
    }

    /// [`Database::run_in_transaction`] with the configured default mode.
    pub async fn transaction<T, F>(&self, body: F) -> Result<T, SerialiteError>
    where
        F: FnOnce(&Handle<'_, C>) -> Result<T, SerialiteError> + Send + 'static,
        T: Send + 'static,
    {
        self.run_in_transaction(self.default_mode, body).await
    }

    /// Run `body` in a transaction; `None` on any failure.
    ///
    /// Use [`Database::run_in_transaction`] when the error matters.
    pub async fn try_run_in_transaction<T, F>(&self, mode: TransactionMode, body: F) -> Option<T>
    where
        F: FnOnce(&Handle<'_, C>) -> Result<T, SerialiteError> + Send + 'static,
        T: Send + 'static,
    {
        match self.run_in_transaction(mode, body).await {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(error = %err, "transaction did not complete");
                None
            }
        }
    }

    /// Round-trip a trivial statement through the queue.
    pub async fn health_check(&self) -> Result<(), SerialiteError> {
        self.call(|ctx| ctx.connection().execute_all("SELECT 1;"))
            .await
    }

    pub fn default_mode(&self) -> TransactionMode {
        self.default_mode
    }

    pub fn state(&self) -> QueueState {
        self.queue.state()
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Finish accepted work, close the connection and dispose the queue.
    pub async fn shutdown(&self) -> Result<(), SerialiteError> {
        self.queue.shutdown().await
    }
}
