//! Set command writing one setting to the stored overlay.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use hs_core::{ConfigUpdate, ConsumerId, EngineConfig};
use hs_db::Database;

use crate::Config;
use crate::cli::SetCommand;

/// Validates the change against the current settings and stores it.
///
/// A running sampler picks the change up on its next options poll.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    db: &mut Database,
    setting: &SetCommand,
) -> Result<()> {
    let overlay = db.load_options().context("failed to load stored settings")?;
    let current = config.site.merged(&overlay);
    let before = EngineConfig::from_update(&current).context("invalid site configuration")?;

    let update = build_update(&current, &before, setting)?;
    let after = EngineConfig::from_update(&current.merged(&update)).context("invalid setting")?;

    let revision = db
        .set_options(&update, Utc::now())
        .context("failed to store setting")?;
    tracing::info!(revision, "stored setting");
    writeln!(writer, "{}", describe(setting, &after))?;

    if after.meter() != before.meter() {
        db.clear_meter_baseline()?;
        writeln!(writer, "Saved meter baseline cleared")?;
    }

    let removed: Vec<ConsumerId> = before
        .consumers()
        .iter()
        .filter(|id| !after.consumers().contains(id))
        .cloned()
        .collect();
    let forgotten = db
        .forget_consumers(&removed)
        .context("failed to drop values of removed consumers")?;
    if forgotten > 0 {
        tracing::info!(forgotten, removed = removed.len(), "dropped values of removed consumers");
    }
    Ok(())
}

fn build_update(
    current: &ConfigUpdate,
    before: &EngineConfig,
    setting: &SetCommand,
) -> Result<ConfigUpdate> {
    let mut update = ConfigUpdate::default();
    match setting {
        SetCommand::Price { value } => update.unit_price = Some(*value),
        SetCommand::SharedLoadPercent { value } => update.shared_load_percent = Some(*value),
        SetCommand::IncludeSharedLoad { value } => {
            update.include_shared_load = Some(value.is_on());
        }
        SetCommand::Method { value } => update.calculation_method = Some(*value),
        SetCommand::Area { consumer, value } => {
            ensure_configured(before, consumer)?;
            let mut areas = current.heated_areas.clone().unwrap_or_default();
            areas.insert(consumer.clone(), *value);
            update.heated_areas = Some(areas);
        }
        SetCommand::Output { consumer, value } => {
            ensure_configured(before, consumer)?;
            let mut outputs = current.rated_outputs.clone().unwrap_or_default();
            outputs.insert(consumer.clone(), *value);
            update.rated_outputs = Some(outputs);
        }
        SetCommand::Consumers { consumers } => update.consumers = Some(consumers.clone()),
        SetCommand::Meter { meter } => update.meter = Some(meter.clone()),
    }
    Ok(update)
}

fn ensure_configured(config: &EngineConfig, consumer: &ConsumerId) -> Result<()> {
    if !config.consumers().contains(consumer) {
        bail!("{consumer} is not a configured consumer");
    }
    Ok(())
}

fn describe(setting: &SetCommand, config: &EngineConfig) -> String {
    match setting {
        SetCommand::Price { .. } => format!("Unit price set to {:.4}", config.unit_price()),
        SetCommand::SharedLoadPercent { .. } => format!(
            "Shared load percent set to {:.2}",
            config.shared_load_percent()
        ),
        SetCommand::IncludeSharedLoad { value } => {
            if value.is_on() {
                "Shared load reservation enabled".to_string()
            } else {
                "Shared load reservation disabled".to_string()
            }
        }
        SetCommand::Method { value } => format!("Calculation method set to {}", value.label()),
        SetCommand::Area { consumer, .. } => match config.heated_area(consumer) {
            Some(area) => format!("Heated area of {} set to {area:.2}", consumer.display_name()),
            None => format!("Heated area of {} cleared", consumer.display_name()),
        },
        SetCommand::Output { consumer, .. } => match config.rated_output(consumer) {
            Some(output) => format!(
                "Rated output of {} set to {output:.1}",
                consumer.display_name()
            ),
            None => format!("Rated output of {} cleared", consumer.display_name()),
        },
        SetCommand::Consumers { .. } => {
            format!("Tracking {} consumers", config.consumers().len())
        }
        SetCommand::Meter { meter } => format!("Meter set to {meter}"),
    }
}
