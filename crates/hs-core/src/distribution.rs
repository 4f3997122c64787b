//! Distribution of a meter delta across consumers.
//!
//! # Algorithm Summary
//!
//! 1. Reserve the shared-load fraction (if enabled); the rest is distributable
//! 2. Nothing distributable, or no consumers: allocate nothing
//! 3. Nobody accrued effort: split equally across all consumers
//! 4. Otherwise: split proportionally to each consumer's effort window
//!
//! The caller zeroes every effort window after any round, whichever branch ran.

use serde::Serialize;

use crate::types::ConsumerId;

/// Shared-load reservation settings (e.g., domestic hot water).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedLoad {
    /// Whether a fraction of each delta is reserved.
    pub enabled: bool,
    /// Reserved percentage, expected in `[0, 100]`.
    pub percent: f64,
}

impl SharedLoad {
    /// Splits a delta into `(distributable, reserved)`.
    pub fn split(&self, delta: f64) -> (f64, f64) {
        let distributable = if self.enabled {
            delta * (1.0 - self.percent / 100.0)
        } else {
            delta
        };
        (distributable, delta - distributable)
    }
}

/// Which branch of the distribution ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    /// Shares proportional to effort.
    Proportional,
    /// No effort observed; equal shares.
    EqualSplit,
    /// Distributable amount was zero or negative.
    NothingDistributable,
    /// No consumers configured.
    NoConsumers,
}

impl SplitKind {
    /// String representation for storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proportional => "proportional",
            Self::EqualSplit => "equal_split",
            Self::NothingDistributable => "nothing_distributable",
            Self::NoConsumers => "no_consumers",
        }
    }
}

/// One consumer's share of a distribution round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub consumer: ConsumerId,
    pub amount: f64,
}

/// Result of distributing one meter delta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    /// The full meter delta.
    pub delta: f64,
    /// Portion eligible for per-consumer allocation.
    pub distributable: f64,
    /// Portion reserved for the shared load; never attributed to a consumer.
    pub shared_load_deducted: f64,
    pub split: SplitKind,
    /// Per-consumer increments, in the order the efforts were given.
    pub allocations: Vec<Allocation>,
}

impl Distribution {
    /// Sum of all per-consumer increments.
    pub fn allocated(&self) -> f64 {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

/// Distributes a positive meter delta across consumers.
///
/// `efforts` holds each configured consumer with its effort window. The
/// returned allocations sum to the distributable amount (within floating-point
/// rounding) whenever anything was allocated.
pub fn distribute(
    delta: f64,
    shared_load: SharedLoad,
    efforts: &[(ConsumerId, f64)],
) -> Distribution {
    let (distributable, shared_load_deducted) = shared_load.split(delta);

    let (split, allocations) = if efforts.is_empty() {
        (SplitKind::NoConsumers, Vec::new())
    } else if distributable <= 0.0 {
        (SplitKind::NothingDistributable, Vec::new())
    } else {
        let total_effort: f64 = efforts.iter().map(|(_, effort)| effort).sum();
        if total_effort <= 0.0 {
            #[expect(
                clippy::cast_precision_loss,
                reason = "consumer counts are far below 2^52"
            )]
            let share = distributable / efforts.len() as f64;
            let allocations = efforts
                .iter()
                .map(|(consumer, _)| Allocation {
                    consumer: consumer.clone(),
                    amount: share,
                })
                .collect();
            (SplitKind::EqualSplit, allocations)
        } else {
            let allocations = efforts
                .iter()
                .map(|(consumer, effort)| Allocation {
                    consumer: consumer.clone(),
                    amount: distributable * (effort / total_effort),
                })
                .collect();
            (SplitKind::Proportional, allocations)
        }
    };

    Distribution {
        delta,
        distributable,
        shared_load_deducted,
        split,
        allocations,
    }
}
