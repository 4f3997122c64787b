//! Status command showing per-consumer totals and cost.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use hs_core::{AllocationEngine, ConsumerId};
use hs_db::Database;
use serde::Serialize;

use crate::Config;
use crate::commands::util::amount;
use crate::site::Site;

#[derive(Debug, Serialize)]
struct StatusReport {
    meter: String,
    calculation_method: String,
    include_shared_load: bool,
    shared_load_percent: f64,
    unit_price: f64,
    currency: String,
    consumers: Vec<ConsumerStatus>,
    total_allocated: f64,
    total_cost: f64,
    last_distribution_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ConsumerStatus {
    consumer: ConsumerId,
    name: String,
    total_allocated: f64,
    effort: f64,
    cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    heated_area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rated_output: Option<f64>,
}

pub fn run<W: Write>(writer: &mut W, config: &Config, db: Database, json: bool) -> Result<()> {
    let site = Site::open(config, db)?;
    let report = build_report(site.engine(), &config.currency);

    if json {
        serde_json::to_writer_pretty(&mut *writer, &report)?;
        writeln!(writer)?;
    } else {
        write_text(writer, &report)?;
    }
    Ok(())
}

fn build_report(engine: &AllocationEngine, currency: &str) -> StatusReport {
    let config = engine.config();
    let consumers: Vec<ConsumerStatus> = engine
        .consumers()
        .iter()
        .map(|consumer| ConsumerStatus {
            consumer: consumer.id().clone(),
            name: consumer.id().display_name(),
            total_allocated: amount(consumer.total_allocated()),
            effort: amount(consumer.effort_window()),
            cost: amount(engine.cost_of(consumer.id()).unwrap_or(0.0)),
            heated_area: config.heated_area(consumer.id()),
            rated_output: config.rated_output(consumer.id()),
        })
        .collect();
    let total_allocated = engine.consumers().total_allocated();

    StatusReport {
        meter: config.meter().to_string(),
        calculation_method: config.calculation_method().to_string(),
        include_shared_load: config.include_shared_load(),
        shared_load_percent: config.shared_load_percent(),
        unit_price: config.unit_price(),
        currency: currency.to_string(),
        consumers,
        total_allocated: amount(total_allocated),
        total_cost: amount(total_allocated * config.unit_price()),
        last_distribution_time: engine.sample_state().last_distribution_time,
    }
}

fn write_text<W: Write>(writer: &mut W, report: &StatusReport) -> Result<()> {
    writeln!(writer, "Meter: {}", report.meter)?;
    writeln!(writer, "Method: {}", report.calculation_method)?;
    if report.include_shared_load {
        writeln!(
            writer,
            "Shared load: {:.2}% reserved",
            report.shared_load_percent
        )?;
    } else {
        writeln!(writer, "Shared load: off")?;
    }
    writeln!(
        writer,
        "Unit price: {:.4} {}",
        report.unit_price, report.currency
    )?;
    writeln!(writer)?;

    for consumer in &report.consumers {
        writeln!(
            writer,
            "{:<16} {:>10.3} {:>10.3} {}  effort {:.3}",
            consumer.name,
            consumer.total_allocated,
            consumer.cost,
            report.currency,
            consumer.effort
        )?;
    }
    writeln!(
        writer,
        "{:<16} {:>10.3} {:>10.3} {}",
        "Total", report.total_allocated, report.total_cost, report.currency
    )?;

    match report.last_distribution_time {
        Some(at) => writeln!(
            writer,
            "Last distribution: {}",
            at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?,
        None => writeln!(writer, "Last distribution: never")?,
    }
    Ok(())
}
