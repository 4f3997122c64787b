//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use hs_core::{ConfigUpdate, DEFAULT_SAMPLE_INTERVAL_SECS};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// JSON file holding the current instrument states.
    pub states_path: PathBuf,

    /// Seconds between scheduled sampling rounds.
    pub update_interval_secs: u64,

    /// Seconds between checks for settings changed with `hs set`.
    pub options_poll_secs: u64,

    /// Currency label for costs.
    pub currency: String,

    /// Base engine settings; runtime edits stored in the database win.
    #[serde(default)]
    pub site: ConfigUpdate,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("states_path", &self.states_path)
            .field("update_interval_secs", &self.update_interval_secs)
            .field("options_poll_secs", &self.options_poll_secs)
            .field("currency", &self.currency)
            .field("meter", &self.site.meter)
            .field(
                "consumers",
                &self.site.consumers.as_ref().map_or(0, Vec::len),
            )
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("hs.db"),
            states_path: data_dir.join("states.json"),
            update_interval_secs: DEFAULT_SAMPLE_INTERVAL_SECS,
            options_poll_secs: 5,
            currency: "EUR".to_string(),
            site: ConfigUpdate::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // HS_SITE__UNIT_PRICE=1.2 sets site.unit_price
        figment = figment.merge(Env::prefixed("HS_").split("__"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for hs.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("heatshare"))
}

/// Returns the platform-specific data directory for hs.
///
/// On Linux: `~/.local/share/heatshare`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("heatshare"))
}
