// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialite - queued, transaction-aware SQLite from the command line.
//!
//! This is the binary entry point. Every command opens the configured
//! database behind its operation queue, runs through the queue, and shuts
//! the queue down before exiting.

mod check;
mod exec;
mod query;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serialite_config::SerialiteConfig;
use serialite_core::{SerialiteError, TransactionMode};
use serialite_storage::Database;

/// Serialite - queued, transaction-aware SQLite.
#[derive(Parser, Debug)]
#[command(name = "serialite", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding `storage.database_path`.
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run SQL statements in one transaction.
    Exec {
        sql: String,
        /// Transaction mode (deferred, immediate, exclusive).
        #[arg(long)]
        mode: Option<TransactionMode>,
    },
    /// Run a query and print its rows as they arrive.
    Query {
        sql: String,
        /// Positional parameter values, bound in order.
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Print one JSON object per row.
        #[arg(long)]
        json: bool,
    },
    /// Run a SQL file, each statement in its own savepoint.
    Script {
        file: PathBuf,
        /// Transaction mode for the enclosing transaction.
        #[arg(long)]
        mode: Option<TransactionMode>,
        /// Roll back failing statements only and continue.
        #[arg(long)]
        keep_going: bool,
    },
    /// Validate configuration and check the database responds.
    Check {
        /// Also print the effective configuration as TOML.
        #[arg(long)]
        show_config: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => serialite_config::load_and_validate_path(path),
        None => serialite_config::load_and_validate(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            serialite_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    if let Some(database) = cli.database {
        config.storage.database_path = database;
    }

    init_tracing(&config.logging.level);

    if let Err(err) = run(cli.command, &config).await {
        eprintln!("serialite: {err}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &SerialiteConfig) -> Result<(), SerialiteError> {
    let db = Database::open(config).await?;
    let mut stdout = std::io::stdout().lock();

    let outcome = match command {
        Commands::Exec { sql, mode } => exec::run_exec(&db, sql, mode, &mut stdout).await,
        Commands::Query { sql, params, json } => {
            let params = params.iter().map(|p| query::parse_param(p)).collect();
            let format = if json {
                query::OutputFormat::Json
            } else {
                query::OutputFormat::Tsv
            };
            query::run_query(&db, sql, params, format, &mut stdout)
                .await
                .map(|_| ())
        }
        Commands::Script {
            file,
            mode,
            keep_going,
        } => {
            match tokio::fs::read_to_string(&file).await {
                Ok(sql) => exec::run_script(&db, &sql, mode, keep_going, &mut stdout).await,
                Err(e) => Err(SerialiteError::Config(format!(
                    "cannot read {}: {e}",
                    file.display()
                ))),
            }
        }
        Commands::Check { show_config } => {
            check::run_check(&db, config, show_config, &mut stdout).await
        }
    };

    let closed = db.shutdown().await;
    outcome?;
    closed
}

/// Initialize the tracing subscriber with an env filter.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("serialite={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Map an output error into the crate error type.
pub(crate) fn output_err(e: std::io::Error) -> SerialiteError {
    SerialiteError::Internal(format!("failed to write output: {e}"))
}
