// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Temp-directory database harness.
//!
//! `TempDatabase` owns a fresh temporary directory and hands out a
//! configuration pointing at a database file inside it. The directory and
//! every file in it are removed when the harness is dropped.

use std::path::{Path, PathBuf};

use serialite_config::{SerialiteConfig, StorageConfig};
use serialite_core::SerialiteError;

/// A database path inside a temporary directory.
pub struct TempDatabase {
    dir: tempfile::TempDir,
    path: PathBuf,
}

impl TempDatabase {
    /// Create a temp directory holding `test.db` (not yet created on disk).
    pub fn new() -> Result<Self, SerialiteError> {
        Self::named("test.db")
    }

    /// Like [`TempDatabase::new`] with a custom file name.
    pub fn named(file_name: &str) -> Result<Self, SerialiteError> {
        let dir = tempfile::TempDir::new()
            .map_err(|e| SerialiteError::Internal(format!("failed to create temp dir: {e}")))?;
        let path = dir.path().join(file_name);
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Storage settings for this database with the compiled defaults otherwise.
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            database_path: self.path.to_string_lossy().into_owned(),
            ..StorageConfig::default()
        }
    }

    /// Full configuration for this database.
    pub fn config(&self) -> SerialiteConfig {
        SerialiteConfig {
            storage: self.storage_config(),
            ..SerialiteConfig::default()
        }
    }
}
