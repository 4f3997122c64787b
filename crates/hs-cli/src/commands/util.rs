//! Shared utilities for CLI commands.

use anyhow::{Context, Result};
use hs_core::round_to;
use hs_db::Database;

use crate::Config;

/// Decimal places for allocated totals, costs and effort.
pub const AMOUNT_PLACES: i32 = 3;

/// Decimal places for last-round diagnostics.
pub const DIAGNOSTIC_PLACES: i32 = 6;

/// Opens the configured database, creating its directory if needed.
pub fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

/// Rounds an allocated total, cost or effort for display.
pub fn amount(value: f64) -> f64 {
    round_to(value, AMOUNT_PLACES)
}

/// Rounds a diagnostic value for display.
pub fn diagnostic(value: f64) -> f64 {
    round_to(value, DIAGNOSTIC_PLACES)
}
