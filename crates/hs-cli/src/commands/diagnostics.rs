//! Diagnostics command dumping configuration and last-round state as JSON.

use std::io::Write;

use anyhow::Result;
use hs_core::{
    AllocationEngine, ConsumerInspection, ConsumerTotals, Diagnostics, EngineConfig,
    InstrumentReader,
};
use hs_db::Database;
use serde::Serialize;

use crate::Config;
use crate::commands::util::{amount, diagnostic};
use crate::site::Site;

#[derive(Debug, Serialize)]
struct DiagnosticsReport<'a> {
    configuration: &'a EngineConfig,
    runtime: Diagnostics,
    consumers: Vec<ConsumerInspection>,
    totals: Vec<ConsumerTotals>,
}

pub fn run<W: Write>(writer: &mut W, config: &Config, db: Database) -> Result<()> {
    let site = Site::open(config, db)?;
    let states = site.read_states();
    let report = build_report(site.engine(), &states);
    serde_json::to_writer_pretty(&mut *writer, &report)?;
    writeln!(writer)?;
    Ok(())
}

fn build_report<'a, R: InstrumentReader + ?Sized>(
    engine: &'a AllocationEngine,
    reader: &R,
) -> DiagnosticsReport<'a> {
    let mut runtime = engine.diagnostics();
    runtime.last_delta = diagnostic(runtime.last_delta);
    runtime.last_distributable = diagnostic(runtime.last_distributable);
    runtime.last_shared_load_deducted = diagnostic(runtime.last_shared_load_deducted);

    let totals = engine
        .current_totals()
        .into_iter()
        .map(|mut totals| {
            totals.total_allocated = amount(totals.total_allocated);
            totals.effort_window = amount(totals.effort_window);
            totals
        })
        .collect();

    DiagnosticsReport {
        configuration: engine.config(),
        runtime,
        consumers: engine.inspect(reader),
        totals,
    }
}
