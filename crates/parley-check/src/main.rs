//! # parley-check
//!
//! Operator tool for a Parley message store.  It opens the configured
//! database (running any pending migrations), scans it for broken
//! invariants and prints the report as JSON on stdout.
//!
//! Exit status is `0` for a clean store and `1` when violations were found.
//! Configuration comes from the same `PARLEY_*` environment variables the
//! store itself reads; `RUST_LOG` controls log verbosity.

use std::process::ExitCode;

use parley_store::{Database, StoreConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_store=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting parley-check v{}", env!("CARGO_PKG_VERSION"));

    let config = StoreConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = Database::open(&config)?;
    let report = db.check_integrity()?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.is_clean() {
        info!(
            users = report.users,
            messages = report.messages,
            history_rows = report.history_rows,
            notifications = report.notifications,
            "store is consistent"
        );
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(violations = report.violations.len(), "store has violations");
        Ok(ExitCode::FAILURE)
    }
}
