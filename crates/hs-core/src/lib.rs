//! Core allocation logic for shared-meter heating.
//!
//! This crate contains the fundamental types and logic for:
//! - Activity: classifying heating units and weighting their effort
//! - Metering: turning absolute meter readings into deltas
//! - Distribution: splitting a delta across consumers by effort
//! - Engine: the per-tick sampling loop, reconfiguration and restore

pub mod activity;
pub mod config;
pub mod consumer;
pub mod distribution;
mod effort;
pub mod engine;
pub mod instrument;
pub mod meter;
pub mod restore;
pub mod types;

pub use activity::ActivitySnapshot;
pub use config::{ConfigError, ConfigUpdate, DEFAULT_SAMPLE_INTERVAL_SECS, EngineConfig};
pub use consumer::{ConsumerTable, ConsumerTotals};
pub use distribution::{Allocation, Distribution, SharedLoad, SplitKind, distribute};
pub use effort::{EffortSummary, accrue_effort};
pub use engine::{
    AllocationEngine, ConfigChange, ConsumerInspection, Diagnostics, SampleState, TickReport,
};
pub use instrument::{InstrumentReader, InstrumentSnapshot, InstrumentState};
pub use meter::MeterDelta;
pub use restore::{LastValueSource, RestoreError, RestoreKey, RestoreReport, round_to};
pub use types::{CalculationMethod, ConsumerId, MeterId, ValidationError};
