//! Activity classification for heating units.
//!
//! A heating unit is observed through its state label (e.g., `heat`, `off`)
//! and an attribute map. Two questions are answered from that snapshot:
//! is the unit heating right now, and how much should its runtime count.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::CalculationMethod;

/// Attribute carrying the thermostat's reported action.
pub const ACTION_ATTRIBUTE: &str = "hvac_action";
/// Value of [`ACTION_ATTRIBUTE`] that means the unit is actively heating.
pub const ACTION_HEATING: &str = "heating";
/// State label of a unit set to heating mode.
pub const MODE_HEAT: &str = "heat";
/// Attribute carrying the measured room temperature.
pub const CURRENT_TEMPERATURE_ATTRIBUTE: &str = "current_temperature";
/// Attribute carrying the target temperature.
pub const TARGET_TEMPERATURE_ATTRIBUTE: &str = "temperature";

const WEIGHT_PER_DEGREE: f64 = 0.25;
const MIN_WEIGHT: f64 = 0.5;
const MAX_WEIGHT: f64 = 3.0;

/// A point-in-time observation of one heating unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    /// Raw state label (e.g., `heat`, `off`, `unavailable`).
    pub state: String,

    /// Attribute map as reported by the instrument.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ActivitySnapshot {
    /// Creates a snapshot with no attributes.
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: Map::new(),
        }
    }

    /// Adds an attribute, returning the updated snapshot.
    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// The reported action, if it is a string.
    pub fn hvac_action(&self) -> Option<&str> {
        self.attributes.get(ACTION_ATTRIBUTE).and_then(Value::as_str)
    }

    /// Measured room temperature, if present and numeric.
    pub fn current_temperature(&self) -> Option<f64> {
        self.attributes
            .get(CURRENT_TEMPERATURE_ATTRIBUTE)
            .and_then(numeric)
    }

    /// Target temperature, if present and numeric.
    pub fn target_temperature(&self) -> Option<f64> {
        self.attributes
            .get(TARGET_TEMPERATURE_ATTRIBUTE)
            .and_then(numeric)
    }

    /// Whether the unit is heating right now.
    ///
    /// An explicit `hvac_action` of `heating` wins. Otherwise the unit must be
    /// in `heat` mode with both temperatures numeric and the room below target.
    /// Anything else fails closed.
    pub fn is_heating(&self) -> bool {
        if self.hvac_action() == Some(ACTION_HEATING) {
            return true;
        }
        if self.state != MODE_HEAT {
            return false;
        }
        match (self.current_temperature(), self.target_temperature()) {
            (Some(current), Some(target)) => current < target,
            _ => false,
        }
    }

    /// Weighting factor derived from the gap between target and current temperature.
    ///
    /// `clamp(1 + max(target - current, 0) * 0.25, 0.5, 3.0)`; falls back to 1.0
    /// when either temperature is missing or non-numeric.
    pub fn temperature_weight(&self) -> f64 {
        let (Some(current), Some(target)) = (self.current_temperature(), self.target_temperature())
        else {
            return 1.0;
        };
        let gap = (target - current).max(0.0);
        (1.0 + gap * WEIGHT_PER_DEGREE).clamp(MIN_WEIGHT, MAX_WEIGHT)
    }

    /// Effort weight for this snapshot under the given method.
    ///
    /// Returns `None` when the unit is not heating.
    pub fn effort_weight(&self, method: CalculationMethod) -> Option<f64> {
        if !self.is_heating() {
            return None;
        }
        Some(match method {
            CalculationMethod::RuntimeOnly => 1.0,
            CalculationMethod::RuntimeTempWeighted => self.temperature_weight(),
        })
    }
}

/// Interprets an attribute as a finite number.
///
/// Numeric strings (e.g., `"21.5"`) are accepted since many integrations
/// report temperatures as text.
pub fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}
