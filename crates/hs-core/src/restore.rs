//! Cold-start restore of persisted values.
//!
//! A restarted engine starts every accumulator at zero. Values captured by the
//! presentation layer on the previous run are looked up through
//! [`LastValueSource`] and seeded at most once per key per process.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::types::ConsumerId;

/// A persisted value that cannot be used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RestoreError {
    /// The value is present but not a finite number.
    #[error("persisted value for {key} is not a finite number: {value:?}")]
    Malformed { key: RestoreKey, value: String },

    /// The key does not name a restorable value.
    #[error("unknown restore key: {key}")]
    UnknownKey { key: String },
}

/// Read access to the last persisted presentation values.
pub trait LastValueSource {
    /// Returns the raw persisted value for `key`, if any.
    ///
    /// Values are returned unparsed so malformed entries can be reported and
    /// skipped by the caller.
    fn load_last_value(&self, key: &str) -> Option<String>;
}

impl<S: LastValueSource + ?Sized> LastValueSource for &S {
    fn load_last_value(&self, key: &str) -> Option<String> {
        (**self).load_last_value(key)
    }
}

/// A persisted value the engine knows how to restore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RestoreKey {
    /// A consumer's allocated total.
    Allocated(ConsumerId),
    /// A consumer's running cost.
    Cost(ConsumerId),
    SharedLoadPercent,
    UnitPrice,
    HeatedArea(ConsumerId),
    RatedOutput(ConsumerId),
}

impl RestoreKey {
    /// Decimal places the presentation layer keeps for this value.
    pub const fn precision(&self) -> i32 {
        match self {
            Self::Allocated(_) | Self::Cost(_) => 3,
            Self::SharedLoadPercent | Self::HeatedArea(_) => 2,
            Self::UnitPrice => 4,
            Self::RatedOutput(_) => 1,
        }
    }

    /// The consumer this value belongs to, if it is per-consumer.
    pub const fn consumer(&self) -> Option<&ConsumerId> {
        match self {
            Self::Allocated(id) | Self::Cost(id) | Self::HeatedArea(id) | Self::RatedOutput(id) => {
                Some(id)
            }
            Self::SharedLoadPercent | Self::UnitPrice => None,
        }
    }
}

impl FromStr for RestoreKey {
    type Err = RestoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || RestoreError::UnknownKey { key: s.to_string() };
        match s {
            "shared_load_percent" => return Ok(Self::SharedLoadPercent),
            "unit_price" => return Ok(Self::UnitPrice),
            _ => {}
        }
        let (kind, consumer) = s.split_once(':').ok_or_else(unknown)?;
        let id = ConsumerId::new(consumer).map_err(|_| unknown())?;
        match kind {
            "allocated" => Ok(Self::Allocated(id)),
            "cost" => Ok(Self::Cost(id)),
            "heated_area" => Ok(Self::HeatedArea(id)),
            "rated_output" => Ok(Self::RatedOutput(id)),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for RestoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocated(id) => write!(f, "allocated:{id}"),
            Self::Cost(id) => write!(f, "cost:{id}"),
            Self::SharedLoadPercent => f.write_str("shared_load_percent"),
            Self::UnitPrice => f.write_str("unit_price"),
            Self::HeatedArea(id) => write!(f, "heated_area:{id}"),
            Self::RatedOutput(id) => write!(f, "rated_output:{id}"),
        }
    }
}

/// What a restore pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    /// Consumers whose total was seeded, with the seeded value.
    pub totals: Vec<(ConsumerId, f64)>,
    /// Settings applied from persisted values.
    pub settings: Vec<(RestoreKey, f64)>,
    /// Keys whose persisted value was present but unusable.
    pub ignored: Vec<RestoreKey>,
}

impl RestoreReport {
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty() && self.settings.is_empty() && self.ignored.is_empty()
    }
}

/// Rounds `value` to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Loads and parses one persisted value.
///
/// Returns `Ok(None)` when nothing was persisted under `key`.
pub(crate) fn load_number<S: LastValueSource + ?Sized>(
    source: &S,
    key: &RestoreKey,
) -> Result<Option<f64>, RestoreError> {
    let Some(raw) = source.load_last_value(&key.to_string()) else {
        return Ok(None);
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(RestoreError::Malformed {
            key: key.clone(),
            value: raw,
        }),
    }
}
