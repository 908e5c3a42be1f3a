// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `serialite check`: report the effective configuration and probe the database.

use std::io::Write;

use serialite_config::SerialiteConfig;
use serialite_core::SerialiteError;
use serialite_storage::Database;

use crate::output_err;

pub async fn run_check(
    db: &Database,
    config: &SerialiteConfig,
    show_config: bool,
    out: &mut impl Write,
) -> Result<(), SerialiteError> {
    if show_config {
        let rendered = config
            .to_toml_string()
            .map_err(|e| SerialiteError::Config(format!("cannot render configuration: {e}")))?;
        writeln!(out, "{rendered}").map_err(output_err)?;
    }
    let storage = &config.storage;
    let queue = &config.queue;
    writeln!(out, "config: ok").map_err(output_err)?;
    writeln!(
        out,
        "storage: path={} wal_mode={} busy_timeout_ms={} foreign_keys={}",
        storage.database_path, storage.wal_mode, storage.busy_timeout_ms, storage.foreign_keys
    )
    .map_err(output_err)?;
    writeln!(
        out,
        "queue: thread={} stream_buffer={} default_mode={} state={}",
        queue.thread_name,
        queue.stream_buffer,
        queue.default_transaction_mode,
        db.state()
    )
    .map_err(output_err)?;

    db.health_check().await?;
    writeln!(out, "database: ok").map_err(output_err)
}
