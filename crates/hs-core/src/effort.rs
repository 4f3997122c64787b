//! Effort accrual for the elapsed interval between ticks.

use crate::consumer::ConsumerTable;
use crate::instrument::InstrumentReader;
use crate::types::CalculationMethod;

/// Counts from one accrual pass, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffortSummary {
    /// Consumers observed heating.
    pub active: usize,
    /// Consumers whose reference could not be resolved.
    pub unavailable: usize,
}

/// Adds `elapsed_secs × weight` to every heating consumer's effort window.
///
/// Consumers that cannot be read are skipped for this tick. Nothing happens
/// when `elapsed_secs` is not positive.
pub fn accrue_effort<R: InstrumentReader + ?Sized>(
    consumers: &mut ConsumerTable,
    elapsed_secs: f64,
    method: CalculationMethod,
    reader: &R,
) -> EffortSummary {
    let mut summary = EffortSummary::default();
    if !(elapsed_secs.is_finite() && elapsed_secs > 0.0) {
        return summary;
    }

    for consumer in consumers.iter_mut() {
        let Some(activity) = reader.read_activity(consumer.id()) else {
            summary.unavailable += 1;
            continue;
        };
        if let Some(weight) = activity.effort_weight(method) {
            consumer.add_effort(elapsed_secs * weight);
            summary.active += 1;
        }
    }

    summary
}
