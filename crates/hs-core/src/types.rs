//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Invalid calculation method value.
    #[error("invalid calculation method: {value}")]
    InvalidCalculationMethod { value: String },

    /// A numeric setting was negative, NaN or infinite.
    #[error("{field} must be a finite, non-negative number, got {value}")]
    InvalidNumber { field: &'static str, value: f64 },
}

/// How heating effort is weighted while a consumer is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    /// Every active second counts the same.
    RuntimeOnly,
    /// Active seconds are scaled by how far the room is below its target.
    #[default]
    RuntimeTempWeighted,
}

impl CalculationMethod {
    /// All known methods, in display order.
    pub const ALL: [Self; 2] = [Self::RuntimeOnly, Self::RuntimeTempWeighted];

    /// String representation for storage and configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RuntimeOnly => "runtime_only",
            Self::RuntimeTempWeighted => "runtime_temp_weighted",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RuntimeOnly => "Runtime only",
            Self::RuntimeTempWeighted => "Runtime with temperature delta weighting",
        }
    }
}

impl fmt::Display for CalculationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CalculationMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "runtime_only" => Ok(Self::RuntimeOnly),
            "runtime_temp_weighted" => Ok(Self::RuntimeTempWeighted),
            _ => Err(ValidationError::InvalidCalculationMethod {
                value: s.to_string(),
            }),
        }
    }
}

/// Generates a validated string reference newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new reference after validation.
            ///
            /// Surrounding whitespace is trimmed.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                let trimmed = id.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                if trimmed.len() == id.len() {
                    Ok(Self(id))
                } else {
                    Ok(Self(trimmed.to_string()))
                }
            }

            /// Returns the reference as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// Reference to a heating unit (e.g., `climate.living_room`).
    ConsumerId,
    "consumer reference"
);

define_string_id!(
    /// Reference to the shared gas meter (e.g., `sensor.gas_meter`).
    MeterId,
    "meter reference"
);

impl ConsumerId {
    /// Human-friendly name derived from the reference.
    ///
    /// `climate.living_room` becomes `Living Room`.
    pub fn display_name(&self) -> String {
        let object_id = self
            .0
            .split_once('.')
            .map_or(self.0.as_str(), |(_, rest)| rest);
        object_id
            .split('_')
            .filter(|word| !word.is_empty())
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect()
    })
}

/// Checks that a numeric setting is finite and non-negative.
pub(crate) fn non_negative(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ValidationError::InvalidNumber { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculation_method_roundtrip() {
        for method in CalculationMethod::ALL {
            let parsed: CalculationMethod = method.as_str().parse().unwrap();
            assert_eq!(parsed, method);
        }
    }

    #[test]
    fn test_calculation_method_rejects_unknown() {
        let err = "by_area".parse::<CalculationMethod>().unwrap_err();
        assert_eq!(err.to_string(), "invalid calculation method: by_area");
    }

    #[test]
    fn test_calculation_method_serde_uses_snake_case() {
        let json = serde_json::to_string(&CalculationMethod::RuntimeOnly).unwrap();
        assert_eq!(json, r#""runtime_only""#);
        let parsed: CalculationMethod = serde_json::from_str(r#""runtime_temp_weighted""#).unwrap();
        assert_eq!(parsed, CalculationMethod::RuntimeTempWeighted);
    }

    #[test]
    fn test_consumer_id_rejects_empty() {
        let err = ConsumerId::new("   ").unwrap_err();
        assert_eq!(
            err,
            ValidationError::Empty {
                field: "consumer reference"
            }
        );
    }

    #[test]
    fn test_consumer_id_trims_whitespace() {
        let id = ConsumerId::new(" climate.office ").unwrap();
        assert_eq!(id.as_str(), "climate.office");
    }

    #[test]
    fn test_consumer_id_deserialize_validates() {
        let result: Result<ConsumerId, _> = serde_json::from_str(r#""""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_display_name_from_reference() {
        let id = ConsumerId::new("climate.living_room").unwrap();
        assert_eq!(id.display_name(), "Living Room");

        let bare = ConsumerId::new("BATHROOM").unwrap();
        assert_eq!(bare.display_name(), "Bathroom");
    }

    #[test]
    fn test_non_negative_rejects_nan_and_negative() {
        assert!(non_negative("price", f64::NAN).is_err());
        assert!(non_negative("price", -0.5).is_err());
        assert_eq!(non_negative("price", 1.25), Ok(1.25));
    }
}
