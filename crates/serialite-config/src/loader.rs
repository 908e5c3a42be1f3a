// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./serialite.toml` > `~/.config/serialite/serialite.toml` >
//! `/etc/serialite/serialite.toml` with environment variable overrides via the
//! `SERIALITE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use tracing::debug;

use crate::model::SerialiteConfig;

const SYSTEM_CONFIG: &str = "/etc/serialite/serialite.toml";
const LOCAL_CONFIG: &str = "serialite.toml";

/// Config files consulted by [`load_config`], lowest precedence first.
pub fn config_file_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("serialite").join(LOCAL_CONFIG));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG));
    paths
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/serialite/serialite.toml`
/// 3. `~/.config/serialite/serialite.toml`
/// 4. `./serialite.toml`
/// 5. `SERIALITE_*` environment variables
pub fn load_config() -> Result<SerialiteConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no files, no environment).
pub fn load_config_from_str(toml_content: &str) -> Result<SerialiteConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SerialiteConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<SerialiteConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SerialiteConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used by [`load_config`] before extraction.
pub fn build_figment() -> Figment {
    config_file_paths()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(SerialiteConfig::default())),
            |figment, path| {
                if path.exists() {
                    debug!(path = %path.display(), "merging config file");
                }
                figment.merge(Toml::file(path))
            },
        )
        .merge(env_provider())
}

/// Environment provider mapping `SERIALITE_<SECTION>_<KEY>` to `section.key`.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `SERIALITE_STORAGE_BUSY_TIMEOUT_MS` must become
/// `storage.busy_timeout_ms`.
fn env_provider() -> Env {
    Env::prefixed("SERIALITE_").map(|key| {
        let key_str = key.as_str().to_ascii_lowercase();
        let mapped = ["storage", "queue", "logging"]
            .iter()
            .find_map(|section| {
                key_str
                    .strip_prefix(section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or(key_str);
        mapped.into()
    })
}
