// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of the queued database facade on SQLite files.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use futures::StreamExt;
use serialite_config::QueueConfig;
use serialite_core::{Connection, QueueState, SerialiteError, TransactionMode, Value};
use serialite_storage::{Database, SqliteConnection, UpdateAction};
use serialite_test_utils::TempDatabase;
use tokio_util::sync::CancellationToken;

async fn open(temp: &TempDatabase) -> Database {
    let db = Database::open(&temp.config()).await.unwrap();
    db.execute_all(
        "CREATE TABLE items (seq INTEGER PRIMARY KEY AUTOINCREMENT, op INTEGER, label TEXT);",
    )
    .await
    .unwrap();
    db
}

async fn count(db: &Database) -> i64 {
    let rows = db.query("SELECT COUNT(*) FROM items", vec![]).await.unwrap();
    rows[0].get(0).and_then(Value::as_i64).unwrap()
}

fn wal_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push("-wal");
    PathBuf::from(name)
}

/// Keeps the executor busy until the sender is used or dropped.
async fn hold_queue(db: &Database) -> (mpsc::Sender<()>, tokio::task::JoinHandle<()>) {
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let db = db.clone();
    let task = tokio::spawn(async move {
        db.call(move |_| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            Ok(())
        })
        .await
        .unwrap();
    });
    started_rx.await.unwrap();
    (gate_tx, task)
}

#[tokio::test]
async fn execute_query_and_prepare_round_trip_through_queue() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;

    let changed = db
        .execute(
            "INSERT INTO items (op, label) VALUES (?1, ?2)",
            vec![Value::Integer(7), Value::from("seven")],
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let rows = db
        .query("SELECT op, label FROM items WHERE op = ?1", vec![7.into()])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name("label").and_then(Value::as_str), Some("seven"));

    let info = db
        .prepare("SELECT label FROM items WHERE op = ?1; DELETE FROM items")
        .await
        .unwrap();
    assert_eq!(info.column_names, vec!["label"]);
    assert_eq!(info.parameter_count, 1);
    assert!(info.readonly);
    assert_eq!(info.remaining.trim(), "DELETE FROM items");
    assert_eq!(count(&db).await, 1, "prepare must not run the statement");

    db.health_check().await.unwrap();
    db.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_execute_in_submission_order() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..20 {
                db.call(|ctx| {
                    let op = ctx.id() as i64;
                    ctx.connection()
                        .execute("INSERT INTO items (op) VALUES (?1)", &[Value::Integer(op)])
                })
                .await
                .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ops: Vec<i64> = db
        .query("SELECT op FROM items ORDER BY seq", vec![])
        .await
        .unwrap()
        .iter()
        .filter_map(|row| row.get(0).and_then(Value::as_i64))
        .collect();
    assert_eq!(ops.len(), 120);
    assert!(ops.windows(2).all(|w| w[0] < w[1]), "execution order must follow submission ids");
    db.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_runs_queued_work_then_closes_once() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;
    let (gate, holder) = hold_queue(&db).await;

    let mut queued = Vec::new();
    for i in 1..=3 {
        let db = db.clone();
        queued.push(tokio::spawn(async move {
            db.execute(
                "INSERT INTO items (op) VALUES (?1)",
                vec![Value::Integer(i)],
            )
            .await
        }));
    }
    while db.pending() < 4 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let shutdown = {
        let db = db.clone();
        tokio::spawn(async move { db.shutdown().await })
    };
    while db.state() == QueueState::Open {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let rejected = db
        .execute("INSERT INTO items (op) VALUES (4)", vec![])
        .await
        .unwrap_err();
    assert!(rejected.is_queue_closed());

    gate.send(()).unwrap();
    holder.await.unwrap();
    for task in queued {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }
    shutdown.await.unwrap().unwrap();
    assert_eq!(db.state(), QueueState::Disposed);
    assert!(!wal_path(temp.path()).exists(), "close should checkpoint and remove the WAL");

    let reopened = SqliteConnection::open(&temp.storage_config()).unwrap();
    let rows = serialite_core::Connection::query(
        &reopened,
        "SELECT op FROM items ORDER BY seq",
        &[],
    )
    .unwrap();
    let ops: Vec<_> = rows.iter().filter_map(|r| r.get(0).and_then(Value::as_i64)).collect();
    assert_eq!(ops, vec![1, 2, 3]);
}

#[tokio::test]
async fn cancelled_operation_never_runs() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;
    let (gate, holder) = hold_queue(&db).await;

    let token = CancellationToken::new();
    let cancelled = {
        let db = db.clone();
        let token = token.clone();
        tokio::spawn(async move {
            db.call_cancellable(token, |ctx| {
                ctx.connection()
                    .execute("INSERT INTO items (op) VALUES (1)", &[])
            })
            .await
        })
    };
    while db.pending() < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    token.cancel();
    gate.send(()).unwrap();
    holder.await.unwrap();

    let err = cancelled.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(count(&db).await, 0);
    db.shutdown().await.unwrap();
}

#[tokio::test]
async fn transactions_nest_through_the_facade() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;

    db.run_in_transaction(TransactionMode::Immediate, |outer| {
        outer.execute("INSERT INTO items (label) VALUES ('outer')", &[])?;
        let inner = outer.run_in_transaction(TransactionMode::Deferred, |inner| {
            inner.execute("INSERT INTO items (label) VALUES ('inner')", &[])?;
            Err::<(), _>(SerialiteError::Internal("inner failed".into()))
        });
        assert!(inner.is_err());
        Ok(())
    })
    .await
    .unwrap();

    let labels: Vec<String> = db
        .query("SELECT label FROM items", vec![])
        .await
        .unwrap()
        .iter()
        .filter_map(|row| row.get(0).and_then(Value::as_str).map(String::from))
        .collect();
    assert_eq!(labels, vec!["outer"]);

    let absorbed = db
        .try_run_in_transaction(TransactionMode::Deferred, |tx| {
            tx.execute("INSERT INTO items (label) VALUES ('lost')", &[])?;
            tx.execute("INSERT INTO missing VALUES (1)", &[])
        })
        .await;
    assert_eq!(absorbed, None);

    let committed = db
        .transaction(|tx| tx.execute("INSERT INTO items (label) VALUES ('kept')", &[]))
        .await
        .unwrap();
    assert_eq!(committed, 1);
    assert_eq!(count(&db).await, 2);
    db.shutdown().await.unwrap();
}

#[tokio::test]
async fn panic_inside_transaction_is_isolated() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;

    let err = db
        .run_in_transaction(TransactionMode::Deferred, |tx| -> Result<(), SerialiteError> {
            tx.execute("INSERT INTO items (label) VALUES ('doomed')", &[])?;
            panic!("unit of work exploded");
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SerialiteError::OperationAborted));

    assert_eq!(count(&db).await, 0);
    db.execute_all("BEGIN IMMEDIATE TRANSACTION; ROLLBACK TRANSACTION;")
        .await
        .expect("no transaction should be left open");
    db.shutdown().await.unwrap();
}

#[tokio::test]
async fn stream_can_stop_early_and_queue_moves_on() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;
    db.execute_all(
        "INSERT INTO items (op) \
         WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 1000) \
         SELECT x FROM n;",
    )
    .await
    .unwrap();

    let first: Vec<_> = db
        .query_stream("SELECT op FROM items ORDER BY seq", vec![])
        .unwrap()
        .take(10)
        .collect()
        .await;
    assert_eq!(first.len(), 10);
    assert_eq!(first[9].as_ref().unwrap().get(0), Some(&Value::Integer(10)));

    // The abandoned stream must not hold the queue.
    tokio::time::timeout(Duration::from_secs(5), db.health_check())
        .await
        .expect("queue should advance after the stream is dropped")
        .unwrap();

    let all = db
        .query_stream("SELECT op FROM items", vec![])
        .unwrap()
        .fold(0usize, |n, row| async move { n + usize::from(row.is_ok()) })
        .await;
    assert_eq!(all, 1000);

    let failed: Vec<_> = db
        .query_stream("SELECT * FROM missing", vec![])
        .unwrap()
        .collect()
        .await;
    assert_eq!(failed.len(), 1);
    assert!(failed[0].as_ref().unwrap_err().is_engine());
    db.shutdown().await.unwrap();
}

#[tokio::test]
async fn update_feed_reports_row_changes() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;
    let mut updates = db.subscribe_updates().expect("sqlite databases publish updates");

    db.execute("INSERT INTO items (label) VALUES ('a')", vec![])
        .await
        .unwrap();
    db.execute("DELETE FROM items WHERE label = ?1", vec!["a".into()])
        .await
        .unwrap();

    let inserted = updates.recv().await.unwrap();
    assert_eq!(inserted.action, UpdateAction::Insert);
    assert_eq!(inserted.table, "items");
    let deleted = updates.recv().await.unwrap();
    assert_eq!(deleted.action, UpdateAction::Delete);
    assert_eq!(deleted.row_id, inserted.row_id);
    db.shutdown().await.unwrap();
}

#[tokio::test]
async fn dropping_every_handle_drains_and_closes() {
    let temp = TempDatabase::new().unwrap();
    let db = open(&temp).await;
    db.execute("INSERT INTO items (label) VALUES ('last')", vec![])
        .await
        .unwrap();
    assert!(wal_path(temp.path()).exists());
    drop(db);

    let wal = wal_path(temp.path());
    for _ in 0..500 {
        if !wal.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!wal.exists(), "connection should be closed after the last handle is dropped");
}

#[tokio::test]
async fn default_mode_comes_from_queue_config() {
    let conn = SqliteConnection::open_in_memory().unwrap();
    let config = QueueConfig {
        default_transaction_mode: TransactionMode::Exclusive,
        ..QueueConfig::default()
    };
    let db = Database::from_connection(conn, &config).unwrap();
    assert_eq!(db.default_mode(), TransactionMode::Exclusive);
    assert!(db.subscribe_updates().is_none());
    db.transaction(|tx| tx.execute_all("CREATE TABLE t (x);"))
        .await
        .unwrap();
    db.shutdown().await.unwrap();
    assert!(db.shutdown().await.is_ok());
}
