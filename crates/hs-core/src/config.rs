//! Engine configuration snapshots and partial updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distribution::SharedLoad;
use crate::types::{CalculationMethod, ConsumerId, MeterId, ValidationError, non_negative};

/// Default for whether a shared-load fraction is reserved.
pub const DEFAULT_INCLUDE_SHARED_LOAD: bool = false;
/// Default reserved shared-load percentage.
pub const DEFAULT_SHARED_LOAD_PERCENT: f64 = 20.0;
/// Default sampling period in seconds.
pub const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 300;

/// Rejected configurations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The consumer list was empty.
    #[error("at least one consumer is required")]
    NoConsumers,
    /// No meter reference was given.
    #[error("a meter reference is required")]
    MissingMeter,
    /// A field failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// A partial set of settings.
///
/// Used both for the base settings a site starts from and for later edits;
/// `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter: Option<MeterId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumers: Option<Vec<ConsumerId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_shared_load: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_load_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation_method: Option<CalculationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heated_areas: Option<BTreeMap<ConsumerId, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rated_outputs: Option<BTreeMap<ConsumerId, f64>>,
}

impl ConfigUpdate {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlays `other` onto `self`; fields set in `other` win.
    pub fn merge(&mut self, other: &Self) {
        fn overlay<T: Clone>(target: &mut Option<T>, source: Option<&T>) {
            if let Some(value) = source {
                *target = Some(value.clone());
            }
        }
        overlay(&mut self.meter, other.meter.as_ref());
        overlay(&mut self.consumers, other.consumers.as_ref());
        overlay(&mut self.include_shared_load, other.include_shared_load.as_ref());
        overlay(&mut self.shared_load_percent, other.shared_load_percent.as_ref());
        overlay(&mut self.calculation_method, other.calculation_method.as_ref());
        overlay(&mut self.unit_price, other.unit_price.as_ref());
        overlay(&mut self.heated_areas, other.heated_areas.as_ref());
        overlay(&mut self.rated_outputs, other.rated_outputs.as_ref());
    }

    /// Returns `self` with `other` overlaid.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }
}

/// An immutable snapshot of engine settings.
///
/// Replaced wholesale on reload; see [`EngineConfig::merged`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    meter: MeterId,
    consumers: Vec<ConsumerId>,
    include_shared_load: bool,
    shared_load_percent: f64,
    calculation_method: CalculationMethod,
    unit_price: f64,
    heated_areas: BTreeMap<ConsumerId, f64>,
    rated_outputs: BTreeMap<ConsumerId, f64>,
}

impl EngineConfig {
    /// Builds a configuration from complete-enough settings.
    ///
    /// A meter and at least one consumer are required; everything else has a
    /// default. Duplicate consumers collapse to their first occurrence, the
    /// shared-load percentage is clamped to `[0, 100]`, and capacity metadata
    /// is kept only for configured consumers with a positive value.
    pub fn from_update(settings: &ConfigUpdate) -> Result<Self, ConfigError> {
        let meter = settings.meter.clone().ok_or(ConfigError::MissingMeter)?;

        let mut consumers: Vec<ConsumerId> = Vec::new();
        for consumer in settings.consumers.iter().flatten() {
            if !consumers.contains(consumer) {
                consumers.push(consumer.clone());
            }
        }
        if consumers.is_empty() {
            return Err(ConfigError::NoConsumers);
        }

        let shared_load_percent = settings
            .shared_load_percent
            .unwrap_or(DEFAULT_SHARED_LOAD_PERCENT);
        if !shared_load_percent.is_finite() {
            return Err(ValidationError::InvalidNumber {
                field: "shared load percent",
                value: shared_load_percent,
            }
            .into());
        }

        let unit_price = non_negative("unit price", settings.unit_price.unwrap_or(0.0))?;

        let heated_areas = capacity_for(&consumers, settings.heated_areas.as_ref());
        let rated_outputs = capacity_for(&consumers, settings.rated_outputs.as_ref());

        Ok(Self {
            meter,
            consumers,
            include_shared_load: settings
                .include_shared_load
                .unwrap_or(DEFAULT_INCLUDE_SHARED_LOAD),
            shared_load_percent: shared_load_percent.clamp(0.0, 100.0),
            calculation_method: settings.calculation_method.unwrap_or_default(),
            unit_price,
            heated_areas,
            rated_outputs,
        })
    }

    /// Returns a new snapshot with `update` applied.
    ///
    /// `self` is untouched if the result is invalid.
    pub fn merged(&self, update: &ConfigUpdate) -> Result<Self, ConfigError> {
        Self::from_update(&self.to_update().merged(update))
    }

    /// Every setting of this snapshot as an update.
    pub fn to_update(&self) -> ConfigUpdate {
        ConfigUpdate {
            meter: Some(self.meter.clone()),
            consumers: Some(self.consumers.clone()),
            include_shared_load: Some(self.include_shared_load),
            shared_load_percent: Some(self.shared_load_percent),
            calculation_method: Some(self.calculation_method),
            unit_price: Some(self.unit_price),
            heated_areas: Some(self.heated_areas.clone()),
            rated_outputs: Some(self.rated_outputs.clone()),
        }
    }

    pub const fn meter(&self) -> &MeterId {
        &self.meter
    }

    pub fn consumers(&self) -> &[ConsumerId] {
        &self.consumers
    }

    pub const fn include_shared_load(&self) -> bool {
        self.include_shared_load
    }

    pub const fn shared_load_percent(&self) -> f64 {
        self.shared_load_percent
    }

    pub const fn calculation_method(&self) -> CalculationMethod {
        self.calculation_method
    }

    pub const fn unit_price(&self) -> f64 {
        self.unit_price
    }

    pub const fn heated_areas(&self) -> &BTreeMap<ConsumerId, f64> {
        &self.heated_areas
    }

    pub const fn rated_outputs(&self) -> &BTreeMap<ConsumerId, f64> {
        &self.rated_outputs
    }

    /// Heated area of a consumer in square meters, if known.
    pub fn heated_area(&self, consumer: &ConsumerId) -> Option<f64> {
        self.heated_areas.get(consumer).copied()
    }

    /// Rated output of a consumer in watts, if known.
    pub fn rated_output(&self, consumer: &ConsumerId) -> Option<f64> {
        self.rated_outputs.get(consumer).copied()
    }

    /// Shared-load reservation derived from this snapshot.
    pub const fn shared_load(&self) -> SharedLoad {
        SharedLoad {
            enabled: self.include_shared_load,
            percent: self.shared_load_percent,
        }
    }
}

fn capacity_for(
    consumers: &[ConsumerId],
    values: Option<&BTreeMap<ConsumerId, f64>>,
) -> BTreeMap<ConsumerId, f64> {
    values
        .into_iter()
        .flatten()
        .filter(|(consumer, value)| {
            consumers.contains(consumer) && value.is_finite() && **value > 0.0
        })
        .map(|(consumer, value)| (consumer.clone(), *value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ConsumerId {
        ConsumerId::new(name).unwrap()
    }

    fn base() -> ConfigUpdate {
        ConfigUpdate {
            meter: Some(MeterId::new("sensor.gas").unwrap()),
            consumers: Some(vec![id("climate.a"), id("climate.b")]),
            ..ConfigUpdate::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = EngineConfig::from_update(&base()).unwrap();
        assert!(!config.include_shared_load());
        assert!((config.shared_load_percent() - 20.0).abs() < f64::EPSILON);
        assert_eq!(
            config.calculation_method(),
            CalculationMethod::RuntimeTempWeighted
        );
        assert!(config.unit_price().abs() < f64::EPSILON);
    }

    #[test]
    fn test_requires_consumers() {
        let settings = ConfigUpdate {
            consumers: Some(Vec::new()),
            ..base()
        };
        assert_eq!(
            EngineConfig::from_update(&settings),
            Err(ConfigError::NoConsumers)
        );
    }

    #[test]
    fn test_requires_meter() {
        let settings = ConfigUpdate {
            meter: None,
            ..base()
        };
        assert_eq!(
            EngineConfig::from_update(&settings),
            Err(ConfigError::MissingMeter)
        );
    }

    #[test]
    fn test_duplicate_consumers_collapse() {
        let settings = ConfigUpdate {
            consumers: Some(vec![id("climate.a"), id("climate.b"), id("climate.a")]),
            ..base()
        };
        let config = EngineConfig::from_update(&settings).unwrap();
        assert_eq!(config.consumers(), &[id("climate.a"), id("climate.b")]);
    }

    #[test]
    fn test_shared_load_percent_clamped() {
        let high = ConfigUpdate {
            shared_load_percent: Some(140.0),
            ..base()
        };
        let low = ConfigUpdate {
            shared_load_percent: Some(-3.0),
            ..base()
        };
        let high = EngineConfig::from_update(&high).unwrap();
        let low = EngineConfig::from_update(&low).unwrap();
        assert!((high.shared_load_percent() - 100.0).abs() < f64::EPSILON);
        assert!(low.shared_load_percent().abs() < f64::EPSILON);
    }

    #[test]
    fn test_negative_price_rejected() {
        let settings = ConfigUpdate {
            unit_price: Some(-1.0),
            ..base()
        };
        assert!(matches!(
            EngineConfig::from_update(&settings),
            Err(ConfigError::Invalid(ValidationError::InvalidNumber { .. }))
        ));
    }

    #[test]
    fn test_capacity_metadata_filtered() {
        let settings = ConfigUpdate {
            heated_areas: Some(BTreeMap::from([
                (id("climate.a"), 18.5),
                (id("climate.b"), 0.0),
                (id("climate.unknown"), 12.0),
            ])),
            ..base()
        };
        let config = EngineConfig::from_update(&settings).unwrap();
        assert_eq!(config.heated_area(&id("climate.a")), Some(18.5));
        assert_eq!(config.heated_area(&id("climate.b")), None);
        assert_eq!(config.heated_areas().len(), 1);
    }

    #[test]
    fn test_merged_only_changes_given_fields() {
        let config = EngineConfig::from_update(&ConfigUpdate {
            include_shared_load: Some(true),
            ..base()
        })
        .unwrap();
        let updated = config
            .merged(&ConfigUpdate {
                unit_price: Some(1.15),
                ..ConfigUpdate::default()
            })
            .unwrap();

        assert!(updated.include_shared_load());
        assert!((updated.unit_price() - 1.15).abs() < f64::EPSILON);
        assert_eq!(updated.consumers(), config.consumers());
    }

    #[test]
    fn test_update_deserializes_partial_document() {
        let update: ConfigUpdate =
            serde_json::from_str(r#"{"unit_price": 0.12, "calculation_method": "runtime_only"}"#)
                .unwrap();
        assert_eq!(update.unit_price, Some(0.12));
        assert_eq!(
            update.calculation_method,
            Some(CalculationMethod::RuntimeOnly)
        );
        assert!(update.meter.is_none());
    }

    #[test]
    fn test_update_rejects_unknown_method() {
        let result: Result<ConfigUpdate, _> =
            serde_json::from_str(r#"{"calculation_method": "by_area"}"#);
        assert!(result.is_err());
    }
}
