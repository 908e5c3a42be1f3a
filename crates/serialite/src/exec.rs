// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `serialite exec` and `serialite script`.

use std::io::Write;

use serialite_core::{Connection, SerialiteError, TransactionMode};
use serialite_storage::{Database, split_statements};
use tracing::{info, warn};

use crate::output_err;

/// Run `sql` as one batch inside a single transaction.
pub async fn run_exec(
    db: &Database,
    sql: String,
    mode: Option<TransactionMode>,
    out: &mut impl Write,
) -> Result<(), SerialiteError> {
    let statements = split_statements(&sql).len();
    let mode = mode.unwrap_or(db.default_mode());
    db.run_in_transaction(mode, move |tx| tx.execute_all(&sql))
        .await?;
    writeln!(out, "ok: {statements} statement(s) committed").map_err(output_err)
}

/// Outcome of a script run.
#[derive(Debug, Default, PartialEq)]
pub struct ScriptReport {
    pub executed: usize,
    /// 1-based statement number and error text of each rolled back statement.
    pub failed: Vec<(usize, String)>,
}

/// Run every statement of `sql` in one transaction, each in its own savepoint.
///
/// Without `keep_going` the first failing statement aborts the whole
/// transaction. With it, only the failing statement is rolled back.
pub async fn run_script(
    db: &Database,
    sql: &str,
    mode: Option<TransactionMode>,
    keep_going: bool,
    out: &mut impl Write,
) -> Result<(), SerialiteError> {
    let report = execute_script(db, sql, mode, keep_going).await?;
    for (number, error) in &report.failed {
        writeln!(out, "statement {number} rolled back: {error}").map_err(output_err)?;
    }
    writeln!(
        out,
        "ok: {} statement(s) committed, {} rolled back",
        report.executed,
        report.failed.len()
    )
    .map_err(output_err)
}

pub async fn execute_script(
    db: &Database,
    sql: &str,
    mode: Option<TransactionMode>,
    keep_going: bool,
) -> Result<ScriptReport, SerialiteError> {
    let statements: Vec<String> = split_statements(sql).into_iter().map(String::from).collect();
    let mode = mode.unwrap_or(db.default_mode());
    info!(statements = statements.len(), keep_going, "running script");

    db.run_in_transaction(mode, move |tx| {
        let mut report = ScriptReport::default();
        for (index, statement) in statements.iter().enumerate() {
            let number = index + 1;
            match tx.run_in_transaction(TransactionMode::Deferred, |sp| sp.execute_all(statement)) {
                Ok(()) => report.executed += 1,
                Err(err) if keep_going => {
                    warn!(statement = number, error = %err, "statement rolled back");
                    report.failed.push((number, err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    })
    .await
}
