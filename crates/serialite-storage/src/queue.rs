// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FIFO operation queue bound to a single connection.
//!
//! The connection is moved onto one dedicated executor thread when the
//! queue is spawned and never leaves it. Every unit of work is sent over a
//! single channel and run on that thread to completion, in submission
//! order, before the next one starts. Exclusivity comes from there being
//! exactly one consumer, not from locking the connection.
//!
//! Shutdown enqueues a drain marker behind all accepted work. Once the
//! marker is reached the connection is closed and the queue is disposed;
//! submissions made after shutdown began fail with
//! [`SerialiteError::QueueClosed`].

use std::future::Future;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_core::Stream;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serialite_core::{Connection, QueueState, SerialiteError, TransactionMode};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::transaction::{self, Handle};

type Job<C> = Box<dyn FnOnce(Option<&mut OperationContext<'_, C>>) + Send>;

/// A queued unit of work.
struct PendingOperation<C> {
    id: u64,
    cancel: CancellationToken,
    work: Job<C>,
}

enum Message<C> {
    Run(PendingOperation<C>),
    Drain(oneshot::Sender<Result<(), SerialiteError>>),
}

/// Options for the executor thread.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub thread_name: String,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            thread_name: "serialite-queue".to_string(),
        }
    }
}

/// What a unit of work sees while it runs on the executor thread.
pub struct OperationContext<'a, C> {
    conn: &'a mut C,
    cancel: CancellationToken,
    salt: u32,
    id: u64,
}

impl<'a, C: Connection> OperationContext<'a, C> {
    pub fn connection(&self) -> &C {
        self.conn
    }

    pub fn connection_mut(&mut self) -> &mut C {
        self.conn
    }

    /// Sequence number assigned at submission; increases in queue order.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The token the submitter can cancel.
    ///
    /// Cancellation after the operation started is only observed if the
    /// unit of work checks it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A fresh top-level transaction handle for this operation.
    pub fn handle(&self) -> Handle<'_, C> {
        Handle::with_salt(self.conn, self.salt)
    }

    /// Run `body` in a transaction on this operation's connection.
    pub fn run_in_transaction<T, E, F>(&self, mode: TransactionMode, body: F) -> Result<T, E>
    where
        F: FnOnce(&Handle<'_, C>) -> Result<T, E>,
        E: From<SerialiteError>,
    {
        transaction::run_in_transaction(&self.handle(), mode, body)
    }

    /// Run `body` in a transaction, reporting failure as `None`.
    pub fn try_run_in_transaction<T, E, F>(&self, mode: TransactionMode, body: F) -> Option<T>
    where
        F: FnOnce(&Handle<'_, C>) -> Result<T, E>,
        E: From<SerialiteError> + std::fmt::Display,
    {
        transaction::try_run_in_transaction(&self.handle(), mode, body)
    }
}

/// State shared between queue handles and the executor thread.
struct Shared {
    state: watch::Sender<QueueState>,
    pending: AtomicUsize,
}

/// Sender side of the queue. Dropping the last one lets the executor drain.
struct Submitter<C> {
    sender: Mutex<Option<mpsc::UnboundedSender<Message<C>>>>,
    next_id: AtomicU64,
    shared: Arc<Shared>,
}

/// Handle to a FIFO operation queue. Clones share the same queue.
pub struct OperationQueue<C> {
    submitter: Arc<Submitter<C>>,
}

impl<C> Clone for OperationQueue<C> {
    fn clone(&self) -> Self {
        Self {
            submitter: Arc::clone(&self.submitter),
        }
    }
}

impl<C: Connection + Send + 'static> OperationQueue<C> {
    /// Move `conn` onto a new executor thread and start accepting work.
    pub fn spawn(conn: C, options: QueueOptions) -> Result<Self, SerialiteError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(QueueState::Open);
        let shared = Arc::new(Shared {
            state,
            pending: AtomicUsize::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name(options.thread_name.clone())
            .spawn(move || run_executor(conn, receiver, worker_shared))
            .map_err(|e| {
                SerialiteError::Internal(format!("failed to spawn queue executor thread: {e}"))
            })?;

        debug!(thread = %options.thread_name, "operation queue started");
        Ok(Self {
            submitter: Arc::new(Submitter {
                sender: Mutex::new(Some(sender)),
                next_id: AtomicU64::new(1),
                shared,
            }),
        })
    }

    /// Enqueue a unit of work and get a future for its result.
    ///
    /// Fails immediately with [`SerialiteError::QueueClosed`] once shutdown
    /// has begun.
    pub fn enqueue<F, R>(&self, work: F) -> Result<PendingResult<R>, SerialiteError>
    where
        F: FnOnce(&mut OperationContext<'_, C>) -> Result<R, SerialiteError> + Send + 'static,
        R: Send + 'static,
    {
        self.enqueue_cancellable(CancellationToken::new(), work)
    }

    /// Enqueue a unit of work that is skipped if `cancel` fires before the
    /// queue reaches it.
    pub fn enqueue_cancellable<F, R>(
        &self,
        cancel: CancellationToken,
        work: F,
    ) -> Result<PendingResult<R>, SerialiteError>
    where
        F: FnOnce(&mut OperationContext<'_, C>) -> Result<R, SerialiteError> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<C> = Box::new(move |ctx: Option<&mut OperationContext<'_, C>>| {
            let result = match ctx {
                Some(ctx) => work(ctx),
                None => Err(SerialiteError::Cancelled),
            };
            // The submitter may have stopped waiting.
            let _ = tx.send(result);
        });
        let id = self.submit(cancel, job)?;
        Ok(PendingResult { id, rx })
    }

    /// Enqueue a unit of work that produces a lazy sequence of items.
    ///
    /// Items flow through a buffer of `buffer` slots. While the buffer is
    /// full the executor waits, so later operations do not start until the
    /// subscriber has consumed the sequence or dropped the stream. A
    /// subscriber must therefore not wait on work queued behind its own
    /// stream while holding the stream undrained.
    pub fn enqueue_stream<F, T>(
        &self,
        cancel: CancellationToken,
        buffer: usize,
        work: F,
    ) -> Result<ItemStream<T>, SerialiteError>
    where
        F: FnOnce(&mut OperationContext<'_, C>, &StreamSink<T>) -> Result<(), SerialiteError>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let job: Job<C> = Box::new(move |ctx: Option<&mut OperationContext<'_, C>>| {
            let sink = StreamSink { tx };
            let outcome = match ctx {
                Some(ctx) => work(ctx, &sink),
                None => Err(SerialiteError::Cancelled),
            };
            if let Err(err) = outcome {
                let _ = sink.tx.blocking_send(Err(err));
            }
        });
        let id = self.submit(cancel, job)?;
        Ok(ItemStream { id, rx })
    }

    fn submit(&self, cancel: CancellationToken, work: Job<C>) -> Result<u64, SerialiteError> {
        let guard = self
            .submitter
            .sender
            .lock()
            .map_err(|_| SerialiteError::Internal("operation queue lock poisoned".into()))?;
        let sender = guard.as_ref().ok_or(SerialiteError::QueueClosed)?;

        let id = self.submitter.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = &self.submitter.shared;
        shared.pending.fetch_add(1, Ordering::SeqCst);
        if sender
            .send(Message::Run(PendingOperation { id, cancel, work }))
            .is_err()
        {
            shared.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(id, "queue executor is gone, rejecting operation");
            return Err(SerialiteError::QueueClosed);
        }
        trace!(id, "operation enqueued");
        Ok(id)
    }

    /// Stop accepting work, let accepted work finish, then close the connection.
    ///
    /// The first call moves the queue to [`QueueState::Draining`] and
    /// reports the outcome of closing the connection. Later calls wait for
    /// the queue to be disposed and return `Ok`.
    pub async fn shutdown(&self) -> Result<(), SerialiteError> {
        let drained = {
            let mut guard = self
                .submitter
                .sender
                .lock()
                .map_err(|_| SerialiteError::Internal("operation queue lock poisoned".into()))?;
            match guard.take() {
                Some(sender) => {
                    let shared = &self.submitter.shared;
                    shared.state.send_replace(QueueState::Draining);
                    info!(
                        pending = shared.pending.load(Ordering::SeqCst),
                        "operation queue draining"
                    );
                    let (tx, rx) = oneshot::channel();
                    if sender.send(Message::Drain(tx)).is_err() {
                        warn!("queue executor exited before the drain request");
                    }
                    Some(rx)
                }
                None => None,
            }
        };

        match drained {
            Some(rx) => rx.await.map_err(|_| {
                SerialiteError::Internal("queue executor exited without closing the connection".into())
            })?,
            None => {
                self.disposed().await;
                Ok(())
            }
        }
    }

    /// Resolves once the queue is disposed.
    pub async fn disposed(&self) {
        let mut state = self.submitter.shared.state.subscribe();
        // The executor holds the sender until it has published Disposed.
        let _ = state.wait_for(|s| *s == QueueState::Disposed).await;
    }

    pub fn state(&self) -> QueueState {
        *self.submitter.shared.state.borrow()
    }

    /// Accepted operations that have not finished yet.
    pub fn pending(&self) -> usize {
        self.submitter.shared.pending.load(Ordering::SeqCst)
    }
}

/// Executor loop: the only code that ever touches the connection.
fn run_executor<C: Connection>(
    mut conn: C,
    mut receiver: mpsc::UnboundedReceiver<Message<C>>,
    shared: Arc<Shared>,
) {
    let mut rng = StdRng::from_entropy();
    let mut drain_request = None;

    while let Some(message) = receiver.blocking_recv() {
        match message {
            Message::Run(operation) => {
                run_operation(&mut conn, &mut rng, operation);
                shared.pending.fetch_sub(1, Ordering::SeqCst);
            }
            Message::Drain(done) => {
                drain_request = Some(done);
                break;
            }
        }
    }

    if drain_request.is_none() {
        debug!("all queue handles dropped, draining");
        shared.state.send_replace(QueueState::Draining);
    }

    let closed = conn.close();
    match &closed {
        Ok(()) => info!("operation queue drained, connection closed"),
        Err(err) => warn!(error = %err, "closing connection failed"),
    }
    shared.state.send_replace(QueueState::Disposed);

    if let Some(done) = drain_request {
        let _ = done.send(closed);
    }
}

fn run_operation<C: Connection>(conn: &mut C, rng: &mut StdRng, operation: PendingOperation<C>) {
    let PendingOperation { id, cancel, work } = operation;

    if cancel.is_cancelled() {
        debug!(id, "operation cancelled before start, skipping");
        work(None);
        return;
    }

    trace!(id, "operation started");
    let outcome = {
        let mut ctx = OperationContext {
            conn: &mut *conn,
            cancel,
            salt: rng.next_u32(),
            id,
        };
        panic::catch_unwind(AssertUnwindSafe(|| work(Some(&mut ctx))))
    };
    if outcome.is_err() {
        error!(id, "operation panicked, continuing with the next one");
        if !conn.is_autocommit() {
            warn!(id, "panicked operation left a transaction open, rolling back");
            if let Err(err) = conn.execute_all("ROLLBACK TRANSACTION") {
                warn!(id, error = %err, "rollback after panic failed");
            }
        }
    }
    trace!(id, "operation finished");
}

/// Future resolving to the result of an enqueued operation.
#[must_use = "the operation runs regardless, but its result is lost if not awaited"]
pub struct PendingResult<R> {
    id: u64,
    rx: oneshot::Receiver<Result<R, SerialiteError>>,
}

impl<R> PendingResult<R> {
    /// Sequence number assigned at submission.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<R> Future for PendingResult<R> {
    type Output = Result<R, SerialiteError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SerialiteError::OperationAborted)))
    }
}

/// Producer side of an [`ItemStream`], used from inside a unit of work.
pub struct StreamSink<T> {
    tx: mpsc::Sender<Result<T, SerialiteError>>,
}

impl<T> StreamSink<T> {
    /// Hand one item to the subscriber, waiting for buffer space.
    ///
    /// Returns [`ControlFlow::Break`] once the subscriber dropped the stream.
    pub fn send(&self, item: T) -> ControlFlow<()> {
        match self.tx.blocking_send(Ok(item)) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Items produced lazily by one queued operation.
///
/// Ends after the last item, or after an `Err` item if the operation
/// failed or was cancelled before it started.
pub struct ItemStream<T> {
    id: u64,
    rx: mpsc::Receiver<Result<T, SerialiteError>>,
}

impl<T> ItemStream<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Stream for ItemStream<T> {
    type Item = Result<T, SerialiteError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
