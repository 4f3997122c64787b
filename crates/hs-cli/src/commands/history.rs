//! History command listing recorded distribution rounds.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use hs_core::ConsumerId;
use hs_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, limit: usize) -> Result<()> {
    let summary = db.ledger_summary().context("failed to summarize ledger")?;
    if summary.rounds == 0 {
        writeln!(writer, "No distribution rounds recorded yet.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{} rounds: {:.3} metered, {:.3} allocated, {:.3} shared load",
        summary.rounds,
        summary.total_delta,
        summary.total_allocated,
        summary.total_shared_load_deducted
    )?;

    let rounds = db
        .recent_distributions(limit)
        .context("failed to load distribution rounds")?;
    for round in &rounds {
        writeln!(writer)?;
        writeln!(
            writer,
            "{}  {:.3} of {:.3} ({})",
            round.distributed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            round.distributable,
            round.delta,
            round.split
        )?;
        for (consumer, amount) in &round.allocations {
            let name = ConsumerId::new(consumer.as_str())
                .map_or_else(|_| consumer.clone(), |id| id.display_name());
            writeln!(writer, "  {name}: {amount:.3}")?;
        }
    }
    Ok(())
}
