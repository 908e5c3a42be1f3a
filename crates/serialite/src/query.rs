// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `serialite query`: stream rows to stdout.

use std::io::Write;

use futures::StreamExt;
use serialite_core::{Row, SerialiteError, Value};
use serialite_storage::Database;

use crate::output_err;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Header line, then tab-separated values.
    Tsv,
    /// One JSON object per row.
    Json,
}

/// Interpret a command-line parameter: `NULL`, an integer, a real, or text.
pub fn parse_param(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Real(f)
    } else {
        Value::Text(raw.to_string())
    }
}

/// Stream the rows of `sql` into `out`; returns the number of rows written.
pub async fn run_query(
    db: &Database,
    sql: String,
    params: Vec<Value>,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<usize, SerialiteError> {
    let mut rows = db.query_stream(sql, params)?;
    let mut written = 0;
    while let Some(row) = rows.next().await {
        let row = row?;
        if written == 0 && format == OutputFormat::Tsv {
            writeln!(out, "{}", row.columns().join("\t")).map_err(output_err)?;
        }
        write_row(&row, format, out)?;
        written += 1;
    }
    Ok(written)
}

fn write_row(row: &Row, format: OutputFormat, out: &mut impl Write) -> Result<(), SerialiteError> {
    match format {
        OutputFormat::Tsv => {
            let line = row
                .values()
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join("\t");
            writeln!(out, "{line}").map_err(output_err)
        }
        OutputFormat::Json => {
            let json = serde_json::to_string(row)
                .map_err(|e| SerialiteError::Internal(format!("failed to encode row: {e}")))?;
            writeln!(out, "{json}").map_err(output_err)
        }
    }
}
