// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Nested transaction manager.
//!
//! Maps arbitrarily nested "run this in a transaction" calls onto the
//! engine's flat `BEGIN`/`COMMIT`/`ROLLBACK` and `SAVEPOINT`/`RELEASE`/
//! `ROLLBACK TO` statements:
//!
//! - A [`Handle`] that is not yet in a transaction opens one with
//!   `BEGIN <mode> TRANSACTION` and finishes it with `COMMIT TRANSACTION` or
//!   `ROLLBACK TRANSACTION`.
//! - A handle that is already inside a transaction opens a savepoint and
//!   finishes it with `RELEASE <name>` or `ROLLBACK TRANSACTION TO <name>`.
//!   The requested mode is ignored.
//!
//! Whether a call is nested is read from the handle the caller passes in,
//! never from global or thread-local state, so unrelated call chains that
//! share one connection cannot see each other's depth.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use rand::RngCore;
use rand::rngs::OsRng;
use serialite_core::{Connection, SerialiteError, TransactionMode};
use tracing::{debug, trace, warn};

/// Fixed prefix of generated savepoint names.
pub const SAVEPOINT_PREFIX: &str = "S";

/// A named checkpoint inside an open transaction.
///
/// Names are `S<n>` where `n` packs a 32-bit per-chain random salt above a
/// 32-bit sequence number issued by that chain. Within one call chain names
/// never repeat. Across chains a collision requires two chains drawing the
/// same salt and is not ruled out, only made unlikely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    fn new(salt: u32, sequence: u32) -> Self {
        let id = (u64::from(salt) << 32) | u64::from(sequence);
        Self {
            name: format!("{SAVEPOINT_PREFIX}{id}"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn begin_sql(&self) -> String {
        format!("SAVEPOINT {}", self.name)
    }

    pub fn release_sql(&self) -> String {
        format!("RELEASE {}", self.name)
    }

    pub fn rollback_sql(&self) -> String {
        format!("ROLLBACK TRANSACTION TO {}", self.name)
    }
}

impl fmt::Display for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// How a handle participates in an open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionScope {
    /// The handle owns the outermost `BEGIN ... COMMIT`.
    TopLevel,
    /// The handle owns a savepoint inside an enclosing transaction.
    Nested(Savepoint),
}

impl TransactionScope {
    pub fn savepoint(&self) -> Option<&Savepoint> {
        match self {
            Self::TopLevel => None,
            Self::Nested(savepoint) => Some(savepoint),
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Self::Nested(_))
    }

    fn commit_sql(&self) -> String {
        match self {
            Self::TopLevel => "COMMIT TRANSACTION".to_string(),
            Self::Nested(savepoint) => savepoint.release_sql(),
        }
    }

    fn rollback_sql(&self) -> String {
        match self {
            Self::TopLevel => "ROLLBACK TRANSACTION".to_string(),
            Self::Nested(savepoint) => savepoint.rollback_sql(),
        }
    }
}

/// Savepoint name source shared by every handle of one call chain.
#[derive(Debug, Clone)]
struct SavepointChain {
    salt: u32,
    issued: Rc<Cell<u32>>,
}

impl SavepointChain {
    fn new(salt: u32) -> Self {
        Self {
            salt,
            issued: Rc::new(Cell::new(0)),
        }
    }

    fn next(&self) -> Savepoint {
        let sequence = self.issued.get().wrapping_add(1);
        self.issued.set(sequence);
        Savepoint::new(self.salt, sequence)
    }
}

/// A connection handle tagged with its transaction scope.
///
/// A fresh handle ([`Handle::new`]) is outside any transaction. Bodies run
/// by [`run_in_transaction`] receive a handle tagged with the scope that
/// call opened; passing that handle back in opens a savepoint.
///
/// Derefs to the underlying connection, so a body can run statements
/// directly on the handle it is given.
pub struct Handle<'c, C> {
    conn: &'c C,
    scope: Option<TransactionScope>,
    chain: SavepointChain,
}

impl<'c, C: Connection> Handle<'c, C> {
    /// A top-level handle with a salt drawn from the operating system.
    pub fn new(conn: &'c C) -> Self {
        Self::with_salt(conn, OsRng.next_u32())
    }

    /// A top-level handle whose savepoint names use the given salt.
    pub fn with_salt(conn: &'c C, salt: u32) -> Self {
        Self {
            conn,
            scope: None,
            chain: SavepointChain::new(salt),
        }
    }

    pub fn connection(&self) -> &'c C {
        self.conn
    }

    /// The scope this handle belongs to, `None` outside a transaction.
    pub fn scope(&self) -> Option<&TransactionScope> {
        self.scope.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.scope.is_some()
    }

    /// The savepoint this handle owns, if it is nested.
    pub fn savepoint(&self) -> Option<&Savepoint> {
        self.scope.as_ref().and_then(TransactionScope::savepoint)
    }

    /// Shorthand for [`run_in_transaction`] on this handle.
    pub fn run_in_transaction<T, E, F>(&self, mode: TransactionMode, body: F) -> Result<T, E>
    where
        F: FnOnce(&Handle<'c, C>) -> Result<T, E>,
        E: From<SerialiteError>,
    {
        run_in_transaction(self, mode, body)
    }

    /// Shorthand for [`try_run_in_transaction`] on this handle.
    pub fn try_run_in_transaction<T, E, F>(&self, mode: TransactionMode, body: F) -> Option<T>
    where
        F: FnOnce(&Handle<'c, C>) -> Result<T, E>,
        E: From<SerialiteError> + fmt::Display,
    {
        try_run_in_transaction(self, mode, body)
    }
}

impl<C> Deref for Handle<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
    }
}

impl<C> fmt::Debug for Handle<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Run `body` with transaction semantics.
///
/// Opens a transaction (or a savepoint, when `handle` is already in one),
/// runs `body` with a handle tagged with the new scope, then commits on
/// `Ok` or rolls back on `Err`. The rollback always happens before the
/// body's error is returned, and the error is returned unchanged.
///
/// If the commit itself fails, the scope is rolled back and the commit
/// error is returned. A panicking body also gets its scope rolled back.
pub fn run_in_transaction<'c, C, T, E, F>(
    handle: &Handle<'c, C>,
    mode: TransactionMode,
    body: F,
) -> Result<T, E>
where
    C: Connection,
    F: FnOnce(&Handle<'c, C>) -> Result<T, E>,
    E: From<SerialiteError>,
{
    let guard = ScopeGuard::open(handle, mode)?;
    let scoped = Handle {
        conn: handle.conn,
        scope: Some(guard.scope.clone()),
        chain: handle.chain.clone(),
    };

    match body(&scoped) {
        Ok(value) => {
            guard.commit()?;
            Ok(value)
        }
        Err(err) => {
            guard.rollback();
            Err(err)
        }
    }
}

/// Like [`run_in_transaction`], but reports failure as `None`.
///
/// The error is logged at debug level and discarded. Callers that need the
/// error must use [`run_in_transaction`].
pub fn try_run_in_transaction<'c, C, T, E, F>(
    handle: &Handle<'c, C>,
    mode: TransactionMode,
    body: F,
) -> Option<T>
where
    C: Connection,
    F: FnOnce(&Handle<'c, C>) -> Result<T, E>,
    E: From<SerialiteError> + fmt::Display,
{
    match run_in_transaction(handle, mode, body) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "transaction failed and was rolled back");
            None
        }
    }
}

/// An open scope that rolls itself back unless explicitly finished.
struct ScopeGuard<'c, C: Connection> {
    conn: &'c C,
    scope: TransactionScope,
    finished: bool,
}

impl<'c, C: Connection> ScopeGuard<'c, C> {
    fn open(handle: &Handle<'c, C>, mode: TransactionMode) -> Result<Self, SerialiteError> {
        let scope = if handle.in_transaction() {
            TransactionScope::Nested(handle.chain.next())
        } else {
            TransactionScope::TopLevel
        };
        let sql = match &scope {
            TransactionScope::TopLevel => mode.begin_sql().to_string(),
            TransactionScope::Nested(savepoint) => savepoint.begin_sql(),
        };
        trace!(sql = %sql, "opening transaction scope");
        handle.conn.execute_all(&sql)?;
        Ok(Self {
            conn: handle.conn,
            scope,
            finished: false,
        })
    }

    fn commit(mut self) -> Result<(), SerialiteError> {
        self.finished = true;
        let sql = self.scope.commit_sql();
        trace!(sql = %sql, "committing transaction scope");
        if let Err(err) = self.conn.execute_all(&sql) {
            debug!(error = %err, sql = %sql, "commit failed, rolling back");
            self.undo();
            return Err(err);
        }
        Ok(())
    }

    fn rollback(mut self) {
        self.finished = true;
        debug!(scope = ?self.scope, "body failed, rolling back");
        self.undo();
    }

    fn undo(&self) {
        // Some engine errors abort the whole transaction on their own.
        if self.conn.is_autocommit() {
            debug!(scope = ?self.scope, "transaction already ended by the engine");
            return;
        }
        let sql = self.scope.rollback_sql();
        trace!(sql = %sql, "rolling back transaction scope");
        if let Err(err) = self.conn.execute_all(&sql) {
            warn!(error = %err, sql = %sql, "rollback failed");
        }
    }
}

impl<C: Connection> Drop for ScopeGuard<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(scope = ?self.scope, "transaction scope abandoned, rolling back");
            self.undo();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::panic::{self, AssertUnwindSafe};

    use serialite_test_utils::RecordingConnection;
    use tracing_test::traced_test;

    use super::*;

    fn insert(handle: &Handle<'_, RecordingConnection>, sql: &str) -> Result<(), SerialiteError> {
        handle.execute(sql, &[]).map(|_| ())
    }

    #[test]
    fn top_level_commit_per_mode() {
        for (mode, begin) in [
            (TransactionMode::Deferred, "BEGIN DEFERRED TRANSACTION"),
            (TransactionMode::Immediate, "BEGIN IMMEDIATE TRANSACTION"),
            (TransactionMode::Exclusive, "BEGIN EXCLUSIVE TRANSACTION"),
        ] {
            let conn = RecordingConnection::new();
            let log = conn.log();
            let value = run_in_transaction(&Handle::new(&conn), mode, |tx| {
                insert(tx, "INSERT 1")?;
                Ok::<_, SerialiteError>(42)
            })
            .unwrap();
            assert_eq!(value, 42);
            assert_eq!(
                log.statements(),
                vec![begin, "INSERT 1", "COMMIT TRANSACTION"]
            );
        }
    }

    #[test]
    fn top_level_failure_rolls_back_and_returns_original_error() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        let err = run_in_transaction(&Handle::new(&conn), TransactionMode::Deferred, |tx| {
            insert(tx, "INSERT 1")?;
            Err::<(), _>(SerialiteError::Internal("body failed".into()))
        })
        .unwrap_err();

        assert!(matches!(err, SerialiteError::Internal(ref m) if m == "body failed"));
        assert_eq!(
            log.statements(),
            vec![
                "BEGIN DEFERRED TRANSACTION",
                "INSERT 1",
                "ROLLBACK TRANSACTION"
            ]
        );
        assert!(conn.is_autocommit());
    }

    #[test]
    fn engine_error_in_body_rolls_back() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        log.fail_on("INSERT bad");
        let err = run_in_transaction(&Handle::new(&conn), TransactionMode::Deferred, |tx| {
            insert(tx, "INSERT good")?;
            insert(tx, "INSERT bad")
        })
        .unwrap_err();
        assert!(err.is_engine());
        assert_eq!(log.count("ROLLBACK TRANSACTION"), 1);
        assert_eq!(log.count("COMMIT TRANSACTION"), 0);
    }

    #[test]
    fn nested_success_releases_savepoint_then_commits() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        let mut inner_savepoint = None;

        run_in_transaction(&Handle::new(&conn), TransactionMode::Deferred, |outer| {
            assert_eq!(outer.scope(), Some(&TransactionScope::TopLevel));
            insert(outer, "INSERT outer")?;
            outer.run_in_transaction(TransactionMode::Deferred, |inner| {
                inner_savepoint = inner.savepoint().cloned();
                insert(inner, "INSERT inner")
            })
        })
        .unwrap();

        let savepoint = inner_savepoint.expect("inner handle should be nested");
        assert_eq!(
            log.statements(),
            vec![
                "BEGIN DEFERRED TRANSACTION".to_string(),
                "INSERT outer".to_string(),
                savepoint.begin_sql(),
                "INSERT inner".to_string(),
                savepoint.release_sql(),
                "COMMIT TRANSACTION".to_string(),
            ]
        );
    }

    #[test]
    fn inner_failure_rolls_back_to_savepoint_and_outer_still_commits() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        let mut inner_savepoint = None;

        let outcome = run_in_transaction(&Handle::new(&conn), TransactionMode::Immediate, |outer| {
            insert(outer, "INSERT outer")?;
            let inner = outer.run_in_transaction(TransactionMode::Deferred, |inner| {
                inner_savepoint = inner.savepoint().cloned();
                insert(inner, "INSERT inner")?;
                Err::<(), _>(SerialiteError::Internal("inner failed".into()))
            });
            assert!(inner.is_err());
            Ok::<_, SerialiteError>("outer done")
        });

        assert_eq!(outcome.unwrap(), "outer done");
        let savepoint = inner_savepoint.unwrap();
        assert_eq!(
            log.statements(),
            vec![
                "BEGIN IMMEDIATE TRANSACTION".to_string(),
                "INSERT outer".to_string(),
                savepoint.begin_sql(),
                "INSERT inner".to_string(),
                format!("ROLLBACK TRANSACTION TO {savepoint}"),
                "COMMIT TRANSACTION".to_string(),
            ]
        );
        assert_eq!(log.count(&savepoint.release_sql()), 0);
    }

    #[test]
    fn mode_is_ignored_when_nested() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        run_in_transaction(&Handle::new(&conn), TransactionMode::Deferred, |outer| {
            outer.run_in_transaction(TransactionMode::Exclusive, |_| Ok::<_, SerialiteError>(()))
        })
        .unwrap();

        assert!(!log.contains_prefix("BEGIN EXCLUSIVE"));
        assert_eq!(log.statements().iter().filter(|s| s.starts_with("BEGIN")).count(), 1);
    }

    #[test]
    fn begin_failure_skips_body_and_rollback() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        log.fail_on("BEGIN");
        let mut ran = false;
        let err = run_in_transaction(&Handle::new(&conn), TransactionMode::Immediate, |_| {
            ran = true;
            Ok::<_, SerialiteError>(())
        })
        .unwrap_err();

        assert!(err.is_engine());
        assert!(!ran);
        assert_eq!(log.statements(), vec!["BEGIN IMMEDIATE TRANSACTION"]);
    }

    #[test]
    fn commit_failure_rolls_back_and_reports_commit_error() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        log.fail_on("COMMIT");
        let err = run_in_transaction(&Handle::new(&conn), TransactionMode::Deferred, |tx| {
            insert(tx, "INSERT 1")
        })
        .unwrap_err();

        assert!(err.is_engine());
        assert_eq!(
            log.statements(),
            vec![
                "BEGIN DEFERRED TRANSACTION",
                "INSERT 1",
                "COMMIT TRANSACTION",
                "ROLLBACK TRANSACTION"
            ]
        );
    }

    #[test]
    fn rollback_is_skipped_when_engine_already_ended_transaction() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        let result = run_in_transaction(&Handle::new(&conn), TransactionMode::Deferred, |tx| {
            // Simulates an engine-level abort that restores autocommit.
            tx.execute_all("ROLLBACK TRANSACTION")?;
            Err::<(), _>(SerialiteError::engine("disk full"))
        });

        assert!(result.is_err());
        assert_eq!(log.count("ROLLBACK TRANSACTION"), 1);
    }

    #[test]
    fn panicking_body_rolls_back() {
        let conn = RecordingConnection::new();
        let log = conn.log();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = run_in_transaction(&Handle::new(&conn), TransactionMode::Deferred, |tx| {
                insert(tx, "INSERT 1")?;
                if tx.in_transaction() {
                    panic!("body panicked");
                }
                Ok::<_, SerialiteError>(())
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(
            log.statements().last().map(String::as_str),
            Some("ROLLBACK TRANSACTION")
        );
    }

    #[test]
    fn try_run_reports_success_and_failure() {
        let conn = RecordingConnection::new();
        let handle = Handle::new(&conn);

        let ok = try_run_in_transaction(&handle, TransactionMode::Deferred, |_| {
            Ok::<_, SerialiteError>(7)
        });
        assert_eq!(ok, Some(7));

        let failed = try_run_in_transaction(&handle, TransactionMode::Deferred, |_| {
            Err::<i32, _>(SerialiteError::engine("constraint failed"))
        });
        assert_eq!(failed, None);
        assert_eq!(conn.log().count("ROLLBACK TRANSACTION"), 1);
    }

    #[test]
    fn savepoint_names_are_unique_within_a_chain() {
        let conn = RecordingConnection::new();
        let mut names = Vec::new();

        run_in_transaction(&Handle::with_salt(&conn, 0xdead_beef), TransactionMode::Deferred, |top| {
            for _ in 0..3 {
                top.run_in_transaction(TransactionMode::Deferred, |a| {
                    names.push(a.savepoint().unwrap().clone());
                    a.run_in_transaction(TransactionMode::Deferred, |b| {
                        names.push(b.savepoint().unwrap().clone());
                        Ok::<_, SerialiteError>(())
                    })
                })?;
            }
            Ok::<_, SerialiteError>(())
        })
        .unwrap();

        let unique: HashSet<_> = names.iter().map(Savepoint::name).collect();
        assert_eq!(unique.len(), names.len());
        for savepoint in &names {
            let digits = savepoint.name().strip_prefix(SAVEPOINT_PREFIX).unwrap();
            let id: u64 = digits.parse().expect("savepoint suffix is an integer");
            assert_eq!(id >> 32, 0xdead_beef);
        }
    }

    #[test]
    fn fresh_handle_is_not_in_a_transaction() {
        let conn = RecordingConnection::new();
        let handle = Handle::new(&conn);
        assert!(!handle.in_transaction());
        assert!(handle.scope().is_none());
        assert!(handle.savepoint().is_none());
        assert!(conn.log().statements().is_empty());
    }

    #[test]
    #[traced_test]
    fn failed_rollback_is_logged_and_original_error_kept() {
        let conn = RecordingConnection::new();
        conn.log().fail_on("ROLLBACK");
        let err = run_in_transaction(&Handle::new(&conn), TransactionMode::Deferred, |_| {
            Err::<(), _>(SerialiteError::Internal("body failed".into()))
        })
        .unwrap_err();

        assert!(matches!(err, SerialiteError::Internal(ref m) if m == "body failed"));
        assert!(logs_contain("rollback failed"));
    }
}
