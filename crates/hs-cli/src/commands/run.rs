//! Long-running sampler.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::Config;
use crate::commands::util::open_database;
use crate::scheduler::{RefreshHandle, Scheduler, Wakeup};
use crate::site::{Site, SiteLock};

pub fn run(config: &Config) -> Result<()> {
    let _lock = SiteLock::acquire(&config.database_path)?;
    let db = open_database(config)?;
    let mut site = Site::open(config, db)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async {
        let mut scheduler = Scheduler::new(
            Duration::from_secs(config.update_interval_secs.max(1)),
            Duration::from_secs(config.options_poll_secs.max(1)),
        );
        let refresh = scheduler.refresh_handle();
        tracing::info!(
            interval_secs = config.update_interval_secs,
            consumers = site.engine().consumers().len(),
            "sampler started"
        );
        scheduler
            .run(shutdown_signal(), |wakeup| {
                handle_wakeup(&mut site, &refresh, wakeup)
            })
            .await;
    });
    Ok(())
}

/// Ticks on scheduled and refresh wakeups; reloads settings on polls and
/// requests an immediate tick when they changed.
pub fn handle_wakeup(site: &mut Site, refresh: &RefreshHandle, wakeup: Wakeup) -> Result<()> {
    match wakeup {
        Wakeup::PollOptions => {
            if site.reload_if_changed()? {
                refresh.request();
            }
        }
        Wakeup::Scheduled | Wakeup::Refresh => {
            let report = site.tick()?;
            tracing::debug!(
                ?wakeup,
                meter = ?report.meter,
                distributed = report.distribution.is_some(),
                "tick complete"
            );
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
