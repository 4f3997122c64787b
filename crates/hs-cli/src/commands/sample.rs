//! One-shot sampling round.

use std::io::Write;

use anyhow::Result;
use chrono::SecondsFormat;
use hs_core::{MeterDelta, TickReport};

use crate::Config;
use crate::commands::util::open_database;
use crate::site::{Site, SiteLock};

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let _lock = SiteLock::acquire(&config.database_path)?;
    let db = open_database(config)?;
    let mut site = Site::open(config, db)?;
    let report = site.tick()?;
    write_report(writer, &report)
}

/// Writes a human-readable summary of one tick.
pub fn write_report<W: Write>(writer: &mut W, report: &TickReport) -> Result<()> {
    writeln!(
        writer,
        "Sampled at {}",
        report.sampled_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )?;

    match report.meter {
        MeterDelta::FirstReading { reading } => {
            writeln!(writer, "Meter: baseline seeded at {reading:.3}")?;
        }
        MeterDelta::Unreadable => writeln!(writer, "Meter: unavailable")?,
        MeterDelta::Increase { delta, reading } => {
            writeln!(writer, "Meter: +{delta:.3} (now {reading:.3})")?;
        }
        MeterDelta::Decrease { previous, reading } => writeln!(
            writer,
            "Meter: went back from {previous:.3} to {reading:.3}, baseline resynced"
        )?,
        MeterDelta::NoChange => writeln!(writer, "Meter: unchanged")?,
    }

    let Some(distribution) = &report.distribution else {
        return Ok(());
    };
    writeln!(
        writer,
        "Distributed {:.3} of {:.3} ({}), shared load {:.3}",
        distribution.distributable,
        distribution.delta,
        distribution.split.as_str(),
        distribution.shared_load_deducted
    )?;
    for allocation in &distribution.allocations {
        let total = report
            .totals
            .iter()
            .find(|t| t.consumer == allocation.consumer)
            .map_or(0.0, |t| t.total_allocated);
        writeln!(
            writer,
            "  {}: +{:.3} (total {total:.3})",
            allocation.consumer.display_name(),
            allocation.amount
        )?;
    }
    Ok(())
}
