//! Instrument reads consumed by the engine.
//!
//! The engine never talks to devices directly. It asks an [`InstrumentReader`]
//! for the meter value and each consumer's activity; `None` means the
//! instrument is unavailable for this tick.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::activity::{ActivitySnapshot, numeric};
use crate::types::{ConsumerId, MeterId};

/// Source of instrument values.
///
/// Implementations must not block indefinitely and must not retry; a failed
/// read is reported as `None`.
pub trait InstrumentReader {
    /// Reads the absolute value of a numeric instrument (the gas meter).
    fn read_numeric(&self, meter: &MeterId) -> Option<f64>;

    /// Reads the activity state of a heating unit.
    fn read_activity(&self, consumer: &ConsumerId) -> Option<ActivitySnapshot>;
}

/// Raw state of one instrument: a state value plus attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentState {
    /// State value; numbers and strings are both accepted.
    #[serde(default)]
    pub state: Value,

    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// An in-memory set of instrument states keyed by reference.
///
/// Deserializes from a JSON object such as
/// `{"sensor.gas": {"state": "1234.5"}, "climate.office": {"state": "heat", "attributes": {...}}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentSnapshot {
    states: HashMap<String, InstrumentState>,
}

impl InstrumentSnapshot {
    /// Creates an empty snapshot where every instrument is unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an instrument's state, returning the updated snapshot.
    #[must_use]
    pub fn with_state(mut self, reference: &str, state: impl Into<Value>) -> Self {
        self.set_state(reference, state);
        self
    }

    /// Sets a heating unit's state and attributes, returning the updated snapshot.
    #[must_use]
    pub fn with_activity(mut self, reference: &str, activity: ActivitySnapshot) -> Self {
        self.states.insert(
            reference.to_string(),
            InstrumentState {
                state: Value::String(activity.state),
                attributes: activity.attributes,
            },
        );
        self
    }

    /// Replaces an instrument's state value, keeping its attributes.
    pub fn set_state(&mut self, reference: &str, state: impl Into<Value>) {
        self.states.entry(reference.to_string()).or_default().state = state.into();
    }

    /// Removes an instrument, making it unavailable.
    pub fn remove(&mut self, reference: &str) {
        self.states.remove(reference);
    }

    /// Number of instruments in the snapshot.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns true if no instruments are present.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The attributes of an instrument, if present.
    pub fn attributes(&self, reference: &str) -> Option<&Map<String, Value>> {
        self.states.get(reference).map(|s| &s.attributes)
    }
}

impl InstrumentReader for InstrumentSnapshot {
    fn read_numeric(&self, meter: &MeterId) -> Option<f64> {
        self.states
            .get(meter.as_str())
            .and_then(|s| numeric(&s.state))
    }

    fn read_activity(&self, consumer: &ConsumerId) -> Option<ActivitySnapshot> {
        let state = self.states.get(consumer.as_str())?;
        let label = match &state.state {
            Value::String(s) => s.clone(),
            Value::Null => return None,
            other => other.to_string(),
        };
        Some(ActivitySnapshot {
            state: label,
            attributes: state.attributes.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter() -> MeterId {
        MeterId::new("sensor.gas").unwrap()
    }

    #[test]
    fn test_read_numeric_accepts_strings_and_numbers() {
        let snapshot = InstrumentSnapshot::new().with_state("sensor.gas", "1234.5");
        assert_eq!(snapshot.read_numeric(&meter()), Some(1234.5));

        let snapshot = InstrumentSnapshot::new().with_state("sensor.gas", 99);
        assert_eq!(snapshot.read_numeric(&meter()), Some(99.0));
    }

    #[test]
    fn test_read_numeric_unavailable() {
        let snapshot = InstrumentSnapshot::new().with_state("sensor.gas", "unavailable");
        assert_eq!(snapshot.read_numeric(&meter()), None);
        assert_eq!(InstrumentSnapshot::new().read_numeric(&meter()), None);
    }

    #[test]
    fn test_read_activity_missing_consumer() {
        let consumer = ConsumerId::new("climate.office").unwrap();
        assert!(InstrumentSnapshot::new().read_activity(&consumer).is_none());
    }

    #[test]
    fn test_deserialize_from_state_document() {
        let json = r#"{
            "sensor.gas": {"state": "100.25", "attributes": {"unit_of_measurement": "m3"}},
            "climate.office": {"state": "heat", "attributes": {"current_temperature": 19, "temperature": 21}}
        }"#;
        let snapshot: InstrumentSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.read_numeric(&meter()), Some(100.25));

        let consumer = ConsumerId::new("climate.office").unwrap();
        let activity = snapshot.read_activity(&consumer).unwrap();
        assert_eq!(activity.state, "heat");
        assert!(activity.is_heating());
    }
}
