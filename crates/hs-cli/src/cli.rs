//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use hs_core::{CalculationMethod, ConsumerId, MeterId};

/// Shared gas meter allocation.
///
/// Splits a gas meter's consumption across heating units in proportion to how
/// long, and how hard, each unit was heating.
#[derive(Debug, Parser)]
#[command(name = "hs", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one sampling round against the state file.
    Sample,

    /// Sample on a fixed interval until interrupted.
    Run,

    /// Show per-consumer totals and cost.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show configuration, last-round diagnostics and live consumer state as JSON.
    Diagnostics,

    /// Change a setting; a running sampler picks it up on its next poll.
    Set {
        #[command(subcommand)]
        setting: SetCommand,
    },

    /// Show recent distribution rounds.
    History {
        /// Number of rounds to show.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Settings that can be changed at runtime.
#[derive(Debug, Clone, Subcommand)]
pub enum SetCommand {
    /// Price per unit of gas.
    Price {
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Percentage of each delta reserved for the shared load (0-100).
    SharedLoadPercent {
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Whether to reserve the shared-load percentage.
    IncludeSharedLoad {
        #[arg(value_enum)]
        value: Toggle,
    },

    /// Effort weighting method (`runtime_only` or `runtime_temp_weighted`).
    Method { value: CalculationMethod },

    /// Heated area of a consumer in square meters; 0 or less clears it.
    Area {
        consumer: ConsumerId,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Rated output of a consumer in watts; 0 or less clears it.
    Output {
        consumer: ConsumerId,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Replace the list of heating units.
    Consumers {
        #[arg(required = true)]
        consumers: Vec<ConsumerId>,
    },

    /// Replace the gas meter reference.
    Meter { meter: MeterId },
}

/// An on/off switch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}
