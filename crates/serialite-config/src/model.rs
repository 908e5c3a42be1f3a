// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup.

use serde::{Deserialize, Serialize};
use serialite_core::TransactionMode;

/// Top-level Serialite configuration.
///
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SerialiteConfig {
    /// Database file and connection settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Operation queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SerialiteConfig {
    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Database file and connection configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file. `:memory:` opens a private in-memory database.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// How long the engine retries a locked database before failing, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enforce foreign key constraints.
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
            foreign_keys: default_foreign_keys(),
        }
    }
}

fn default_database_path() -> String {
    "serialite.db".to_string()
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_foreign_keys() -> bool {
    true
}

/// Operation queue configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Name of the executor thread that owns the connection.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Rows buffered between the executor and a streaming query subscriber.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Mode used by transactions that do not ask for one explicitly.
    #[serde(default)]
    pub default_transaction_mode: TransactionMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            stream_buffer: default_stream_buffer(),
            default_transaction_mode: TransactionMode::default(),
        }
    }
}

fn default_thread_name() -> String {
    "serialite-queue".to_string()
}

fn default_stream_buffer() -> usize {
    64
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl StorageConfig {
    /// Configuration for a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            wal_mode: false,
            ..Self::default()
        }
    }

    /// True when `database_path` names an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path == ":memory:"
    }
}
