//! A configured site: one engine wired to its database and state file.

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use hs_core::{AllocationEngine, ConfigUpdate, EngineConfig, TickReport};
use hs_db::{Database, TickRecord};

use crate::Config;
use crate::states::StateFile;

/// Holds the single-writer lock for a database.
///
/// Released when dropped.
#[derive(Debug)]
pub struct SiteLock {
    _file: File,
    path: PathBuf,
}

impl SiteLock {
    /// Takes the exclusive lock next to `database_path`, failing immediately
    /// if another process holds it.
    pub fn acquire(database_path: &Path) -> Result<Self> {
        let path = lock_path(database_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create database directory")?;
        }
        let file = File::create(&path)
            .with_context(|| format!("failed to create lock file {}", path.display()))?;
        file.try_lock_exclusive().with_context(|| {
            format!(
                "another hs process is sampling (lock held on {})",
                path.display()
            )
        })?;
        tracing::debug!(path = ?path, "acquired site lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Path of the lock file guarding a database.
pub fn lock_path(database_path: &Path) -> PathBuf {
    let mut name = OsString::from(database_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// An allocation engine restored from, and persisting to, a database.
pub struct Site {
    engine: AllocationEngine,
    db: Database,
    base: ConfigUpdate,
    states_path: PathBuf,
    options_revision: i64,
}

impl Site {
    /// Builds the engine from the base settings plus the stored overlay, then
    /// resumes the saved sample state and restores persisted totals.
    pub fn open(config: &Config, db: Database) -> Result<Self> {
        let options_revision = db.options_revision()?;
        let overlay = db.load_options().context("failed to load stored settings")?;
        let settings = config.site.merged(&overlay);
        let engine_config =
            EngineConfig::from_update(&settings).context("invalid site configuration")?;
        let mut engine = AllocationEngine::new(engine_config);

        if let Some(state) = db.load_sample_state()? {
            let efforts = db.load_effort_windows()?;
            engine.resume(state, &efforts);
        }
        let report = engine.restore(&db, &settings);
        tracing::debug!(
            totals = report.totals.len(),
            settings = report.settings.len(),
            ignored = report.ignored.len(),
            "opened site"
        );

        Ok(Self {
            engine,
            db,
            base: config.site.clone(),
            states_path: config.states_path.clone(),
            options_revision,
        })
    }

    pub const fn engine(&self) -> &AllocationEngine {
        &self.engine
    }

    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Reads the current instrument states.
    pub fn read_states(&self) -> StateFile {
        StateFile::load(&self.states_path)
    }

    /// Runs one tick now and persists the result.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.tick_at(Utc::now())
    }

    /// Runs one tick at `now` and persists the result.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        let states = self.read_states();
        let report = self.engine.sample_at(now, &states);
        self.persist(&report)?;
        Ok(report)
    }

    fn persist(&mut self, report: &TickReport) -> Result<()> {
        let efforts = self.engine.consumers().efforts();
        let last_values = self.engine.persistable_values();
        let distribution_id = self
            .db
            .save_tick(&TickRecord {
                recorded_at: report.sampled_at,
                state: self.engine.sample_state(),
                efforts: &efforts,
                last_values: &last_values,
                distribution: report.distribution.as_ref(),
            })
            .context("failed to save tick")?;
        if let Some(id) = distribution_id {
            tracing::debug!(distribution_id = id, "recorded distribution");
        }
        Ok(())
    }

    /// Applies settings changed with `hs set` since the last check.
    ///
    /// Returns true when the configuration changed. A stored overlay that no
    /// longer forms a valid configuration is logged and skipped until the
    /// next change.
    pub fn reload_if_changed(&mut self) -> Result<bool> {
        let revision = self.db.options_revision()?;
        if revision == self.options_revision {
            return Ok(false);
        }
        self.options_revision = revision;

        let overlay = self.db.load_options().context("failed to load stored settings")?;
        match self.engine.update_config(&self.base.merged(&overlay)) {
            Ok(change) => {
                tracing::info!(
                    revision,
                    added = change.added.len(),
                    removed = change.removed.len(),
                    meter_changed = change.meter_changed,
                    "reloaded settings"
                );
                self.db
                    .forget_consumers(&change.removed)
                    .context("failed to drop values of removed consumers")?;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(revision, error = %err, "ignoring invalid stored settings");
                Ok(false)
            }
        }
    }
}
