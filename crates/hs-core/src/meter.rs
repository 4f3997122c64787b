//! Meter delta detection.
//!
//! Turns successive absolute meter readings into consumption deltas.

use serde::Serialize;

/// Classification of a new meter reading against the current baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeterDelta {
    /// No baseline existed; this reading becomes the baseline.
    FirstReading { reading: f64 },
    /// The meter could not be read. The baseline is untouched.
    Unreadable,
    /// The meter advanced by `delta` to `reading`.
    Increase { delta: f64, reading: f64 },
    /// The meter went backwards (replacement or rollover). The baseline is
    /// resynced to the new reading and nothing is distributed.
    Decrease { previous: f64, reading: f64 },
    /// Same reading as the baseline.
    NoChange,
}

impl MeterDelta {
    /// Compares a new reading with the previous baseline.
    pub fn classify(previous: Option<f64>, current: Option<f64>) -> Self {
        let Some(reading) = current else {
            return Self::Unreadable;
        };
        let Some(previous) = previous else {
            return Self::FirstReading { reading };
        };
        let delta = reading - previous;
        if delta > 0.0 {
            Self::Increase { delta, reading }
        } else if delta < 0.0 {
            Self::Decrease { previous, reading }
        } else {
            Self::NoChange
        }
    }

    /// The baseline after this reading, given the previous one.
    ///
    /// Only a successful read moves the baseline.
    pub fn next_baseline(&self, previous: Option<f64>) -> Option<f64> {
        match *self {
            Self::FirstReading { reading }
            | Self::Increase { reading, .. }
            | Self::Decrease { reading, .. } => Some(reading),
            Self::Unreadable | Self::NoChange => previous,
        }
    }

    /// The positive delta to distribute, if any.
    pub const fn distributable_delta(&self) -> Option<f64> {
        match *self {
            Self::Increase { delta, .. } => Some(delta),
            _ => None,
        }
    }
}
