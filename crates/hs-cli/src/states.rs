//! Instrument states read from a JSON file.
//!
//! The file maps references to `{"state": ..., "attributes": {...}}` and is
//! written by whatever bridges the site's sensors (a cron job, a webhook
//! receiver, a home automation export).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use hs_core::{ActivitySnapshot, ConsumerId, InstrumentReader, InstrumentSnapshot, MeterId};

/// A snapshot of the state file taken at the start of a tick.
#[derive(Debug, Clone, Default)]
pub struct StateFile {
    snapshot: InstrumentSnapshot,
}

impl StateFile {
    /// Reads and parses the state file.
    pub fn try_load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Self { snapshot })
    }

    /// Reads the state file, treating every instrument as unavailable if it
    /// cannot be read.
    pub fn load(path: &Path) -> Self {
        Self::try_load(path).unwrap_or_else(|err| {
            tracing::warn!(path = ?path, error = %format!("{err:#}"), "state file unavailable");
            Self::default()
        })
    }

    pub const fn snapshot(&self) -> &InstrumentSnapshot {
        &self.snapshot
    }
}

impl InstrumentReader for StateFile {
    fn read_numeric(&self, meter: &MeterId) -> Option<f64> {
        self.snapshot.read_numeric(meter)
    }

    fn read_activity(&self, consumer: &ConsumerId) -> Option<ActivitySnapshot> {
        self.snapshot.read_activity(consumer)
    }
}
