//! The allocation engine.
//!
//! One [`AllocationEngine`] owns the configuration snapshot, the consumer
//! table and the sample state for a single shared meter. It is driven by an
//! external scheduler that calls [`AllocationEngine::sample`] on a fixed
//! period and never concurrently with itself or with a reconfiguration.
//!
//! # Tick Summary
//!
//! 1. Clamp the tick time so `last_sample_time` never moves backwards
//! 2. Accrue effort for the time elapsed since the previous tick
//! 3. Read the meter and classify the reading against the baseline
//! 4. On an increase, distribute the delta and zero every effort window

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigUpdate, EngineConfig};
use crate::consumer::{ConsumerTable, ConsumerTotals};
use crate::distribution::{Distribution, distribute};
use crate::effort::accrue_effort;
use crate::instrument::InstrumentReader;
use crate::meter::MeterDelta;
use crate::restore::{LastValueSource, RestoreKey, RestoreReport, load_number, round_to};
use crate::types::{CalculationMethod, ConsumerId};

/// Mutable per-process sampling state.
///
/// Serializable so a one-shot sampler can resume between invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleState {
    pub last_sample_time: Option<DateTime<Utc>>,
    /// Meter baseline; only a successful read moves it.
    pub last_meter_reading: Option<f64>,
    pub last_delta: f64,
    pub last_distributable: f64,
    pub last_shared_load_deducted: f64,
    pub last_distribution_time: Option<DateTime<Utc>>,
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub sampled_at: DateTime<Utc>,
    /// Seconds of effort accrued this tick.
    pub elapsed_secs: f64,
    pub meter: MeterDelta,
    pub distribution: Option<Distribution>,
    pub totals: Vec<ConsumerTotals>,
}

/// Last-round diagnostics and the active settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub last_delta: f64,
    pub last_distributable: f64,
    pub last_shared_load_deducted: f64,
    pub last_distribution_time: Option<DateTime<Utc>>,
    pub last_meter_reading: Option<f64>,
    pub last_sample_time: Option<DateTime<Utc>>,
    pub calculation_method: CalculationMethod,
    pub include_shared_load: bool,
    pub shared_load_percent: f64,
    pub unit_price: f64,
}

/// Consumers added or removed and whether the meter changed on reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChange {
    pub added: Vec<ConsumerId>,
    pub removed: Vec<ConsumerId>,
    pub meter_changed: bool,
}

/// Current activity of one configured consumer.
///
/// Every observed field is `None` when the consumer could not be read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumerInspection {
    pub consumer: ConsumerId,
    pub state: Option<String>,
    pub is_heating: Option<bool>,
    pub hvac_action: Option<String>,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
}

/// Allocates a shared meter's consumption across heating units.
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    config: EngineConfig,
    consumers: ConsumerTable,
    state: SampleState,
    /// Restore keys already attempted in this process.
    restored: HashSet<RestoreKey>,
}

impl AllocationEngine {
    /// Creates an engine with zeroed accumulators and no baseline.
    pub fn new(config: EngineConfig) -> Self {
        let consumers = ConsumerTable::new(config.consumers());
        Self {
            config,
            consumers,
            state: SampleState::default(),
            restored: HashSet::new(),
        }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn consumers(&self) -> &ConsumerTable {
        &self.consumers
    }

    pub const fn sample_state(&self) -> &SampleState {
        &self.state
    }

    /// Runs one tick at the current wall-clock time.
    pub fn sample<R: InstrumentReader + ?Sized>(&mut self, reader: &R) -> TickReport {
        self.sample_at(Utc::now(), reader)
    }

    /// Runs one tick at `now`.
    ///
    /// Never fails: unreadable instruments and meter resets are reported in
    /// the returned [`TickReport`].
    pub fn sample_at<R: InstrumentReader + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        reader: &R,
    ) -> TickReport {
        let previous = self.state.last_sample_time;
        let now = previous.map_or(now, |last| last.max(now));
        let elapsed_secs = previous.map_or(0.0, |last| elapsed_seconds(last, now));
        self.state.last_sample_time = Some(now);

        let summary = accrue_effort(
            &mut self.consumers,
            elapsed_secs,
            self.config.calculation_method(),
            reader,
        );
        tracing::debug!(
            elapsed_secs,
            active = summary.active,
            unavailable = summary.unavailable,
            "accrued effort"
        );

        let reading = reader.read_numeric(self.config.meter());
        let meter = MeterDelta::classify(self.state.last_meter_reading, reading);
        self.state.last_meter_reading = meter.next_baseline(self.state.last_meter_reading);

        match meter {
            MeterDelta::FirstReading { reading } => {
                tracing::info!(meter = %self.config.meter(), reading, "seeded meter baseline");
            }
            MeterDelta::Unreadable => {
                tracing::debug!(meter = %self.config.meter(), "meter unavailable, skipping");
            }
            MeterDelta::Decrease { previous, reading } => {
                tracing::info!(
                    meter = %self.config.meter(),
                    previous,
                    reading,
                    "meter went backwards, resynced baseline"
                );
            }
            MeterDelta::Increase { .. } | MeterDelta::NoChange => {}
        }

        let distribution = meter
            .distributable_delta()
            .map(|delta| self.distribute_delta(delta, now));

        TickReport {
            sampled_at: now,
            elapsed_secs,
            meter,
            distribution,
            totals: self.current_totals(),
        }
    }

    fn distribute_delta(&mut self, delta: f64, now: DateTime<Utc>) -> Distribution {
        let distribution = distribute(delta, self.config.shared_load(), &self.consumers.efforts());

        for allocation in &distribution.allocations {
            if let Some(consumer) = self.consumers.get_mut(&allocation.consumer) {
                consumer.allocate(allocation.amount);
            }
        }
        self.consumers.reset_effort();

        self.state.last_delta = distribution.delta;
        self.state.last_distributable = distribution.distributable;
        self.state.last_shared_load_deducted = distribution.shared_load_deducted;
        self.state.last_distribution_time = Some(now);

        tracing::info!(
            delta = distribution.delta,
            distributable = distribution.distributable,
            shared_load_deducted = distribution.shared_load_deducted,
            split = distribution.split.as_str(),
            "distributed meter delta"
        );
        distribution
    }

    /// Totals and effort windows for every configured consumer, in order.
    pub fn current_totals(&self) -> Vec<ConsumerTotals> {
        self.consumers.iter().map(|c| c.totals()).collect()
    }

    pub fn totals_for(&self, consumer: &ConsumerId) -> Option<ConsumerTotals> {
        self.consumers.get(consumer).map(|c| c.totals())
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            last_delta: self.state.last_delta,
            last_distributable: self.state.last_distributable,
            last_shared_load_deducted: self.state.last_shared_load_deducted,
            last_distribution_time: self.state.last_distribution_time,
            last_meter_reading: self.state.last_meter_reading,
            last_sample_time: self.state.last_sample_time,
            calculation_method: self.config.calculation_method(),
            include_shared_load: self.config.include_shared_load(),
            shared_load_percent: self.config.shared_load_percent(),
            unit_price: self.config.unit_price(),
        }
    }

    /// Running cost of a consumer at the current unit price.
    pub fn cost_of(&self, consumer: &ConsumerId) -> Option<f64> {
        self.consumers
            .get(consumer)
            .map(|c| c.total_allocated() * self.config.unit_price())
    }

    /// Merges a partial update into the configuration.
    ///
    /// The consumer table is re-derived by identity. The meter baseline is
    /// kept across reloads rather than re-seeded, and is dropped only when the
    /// meter reference changes. On error the engine is left untouched.
    /// Callers should request an immediate tick afterwards.
    pub fn update_config(&mut self, update: &ConfigUpdate) -> Result<ConfigChange, ConfigError> {
        let config = self.config.merged(update)?;
        let reconciled = self.consumers.reconcile(config.consumers());
        let meter_changed = config.meter() != self.config.meter();
        if meter_changed {
            self.state.last_meter_reading = None;
        }
        self.config = config;

        tracing::info!(
            added = reconciled.added.len(),
            removed = reconciled.removed.len(),
            meter_changed,
            "applied configuration update"
        );
        Ok(ConfigChange {
            added: reconciled.added,
            removed: reconciled.removed,
            meter_changed,
        })
    }

    /// Resumes from a saved sample state and effort windows.
    ///
    /// Efforts for consumers that are not configured are ignored.
    pub fn resume(&mut self, state: SampleState, efforts: &[(ConsumerId, f64)]) {
        self.state = state;
        for (id, effort) in efforts {
            if let Some(consumer) = self.consumers.get_mut(id) {
                consumer.set_effort(*effort);
            }
        }
    }

    /// Seeds settings and totals from persisted values.
    ///
    /// Each key is attempted at most once per engine. Settings are restored
    /// only when `explicit` carries no value for them; totals only while the
    /// consumer's total has not been written. Malformed values are skipped.
    pub fn restore<S: LastValueSource + ?Sized>(
        &mut self,
        source: &S,
        explicit: &ConfigUpdate,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        self.restore_settings(source, explicit, &mut report);
        self.restore_totals(source, &mut report);
        if !report.is_empty() {
            tracing::info!(
                totals = report.totals.len(),
                settings = report.settings.len(),
                ignored = report.ignored.len(),
                "restored persisted values"
            );
        }
        report
    }

    fn restore_settings<S: LastValueSource + ?Sized>(
        &mut self,
        source: &S,
        explicit: &ConfigUpdate,
        report: &mut RestoreReport,
    ) {
        let mut update = ConfigUpdate::default();
        let mut applied = Vec::new();

        if explicit.shared_load_percent.is_none() {
            let key = RestoreKey::SharedLoadPercent;
            if let Some(value) = self.load_once(source, &key, report) {
                let value = round_to(value, key.precision());
                update.shared_load_percent = Some(value);
                applied.push((key, value));
            }
        }

        if explicit.unit_price.is_none() {
            let key = RestoreKey::UnitPrice;
            if let Some(value) = self.load_once(source, &key, report) {
                if value >= 0.0 {
                    let value = round_to(value, key.precision());
                    update.unit_price = Some(value);
                    applied.push((key, value));
                } else {
                    report.ignored.push(key);
                }
            }
        }

        let consumers = self.config.consumers().to_vec();
        let mut areas = self.config.heated_areas().clone();
        let mut outputs = self.config.rated_outputs().clone();
        for consumer in consumers {
            let explicit_area = explicit
                .heated_areas
                .as_ref()
                .is_some_and(|m| m.contains_key(&consumer));
            if !explicit_area {
                let key = RestoreKey::HeatedArea(consumer.clone());
                if let Some(value) = self.load_once(source, &key, report).filter(|v| *v > 0.0) {
                    let value = round_to(value, key.precision());
                    areas.insert(consumer.clone(), value);
                    update.heated_areas = Some(areas.clone());
                    applied.push((key, value));
                }
            }

            let explicit_output = explicit
                .rated_outputs
                .as_ref()
                .is_some_and(|m| m.contains_key(&consumer));
            if !explicit_output {
                let key = RestoreKey::RatedOutput(consumer.clone());
                if let Some(value) = self.load_once(source, &key, report).filter(|v| *v > 0.0) {
                    let value = round_to(value, key.precision());
                    outputs.insert(consumer, value);
                    update.rated_outputs = Some(outputs.clone());
                    applied.push((key, value));
                }
            }
        }

        if update.is_empty() {
            return;
        }
        match self.update_config(&update) {
            Ok(_) => report.settings.extend(applied),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring persisted settings");
                report.ignored.extend(applied.into_iter().map(|(key, _)| key));
            }
        }
    }

    fn restore_totals<S: LastValueSource + ?Sized>(
        &mut self,
        source: &S,
        report: &mut RestoreReport,
    ) {
        let price = self.config.unit_price();
        let consumers = self.config.consumers().to_vec();

        for id in consumers {
            let allocated_key = RestoreKey::Allocated(id.clone());
            let cost_key = RestoreKey::Cost(id.clone());
            let written = self
                .consumers
                .get(&id)
                .is_some_and(|c| c.total_written());
            if written {
                self.restored.insert(allocated_key);
                self.restored.insert(cost_key);
                continue;
            }

            let mut seeded = self
                .load_once(source, &allocated_key, report)
                .map(|total| total.max(0.0));

            let total_is_zero = self
                .consumers
                .get(&id)
                .is_some_and(|c| c.total_allocated() <= 0.0);
            if seeded.is_none() && total_is_zero && price > 0.0 {
                seeded = self
                    .load_once(source, &cost_key, report)
                    .map(|cost| (cost / price).max(0.0));
            } else {
                self.restored.insert(cost_key);
            }

            let Some(total) = seeded else {
                continue;
            };
            if let Some(consumer) = self.consumers.get_mut(&id) {
                consumer.seed_total(total);
                tracing::info!(consumer = %id, total, "restored allocated total");
                report.totals.push((id, total));
            }
        }
    }

    fn load_once<S: LastValueSource + ?Sized>(
        &mut self,
        source: &S,
        key: &RestoreKey,
        report: &mut RestoreReport,
    ) -> Option<f64> {
        if !self.restored.insert(key.clone()) {
            return None;
        }
        load_number(source, key).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring malformed persisted value");
            report.ignored.push(key.clone());
            None
        })
    }

    /// Values the presentation layer should persist after each tick.
    ///
    /// Keys match the ones [`AllocationEngine::restore`] looks up.
    pub fn persistable_values(&self) -> Vec<(RestoreKey, f64)> {
        let mut values = Vec::new();
        for consumer in self.consumers.iter() {
            let id = consumer.id().clone();
            values.push((RestoreKey::Allocated(id.clone()), consumer.total_allocated()));
            values.push((
                RestoreKey::Cost(id),
                consumer.total_allocated() * self.config.unit_price(),
            ));
        }
        values.push((
            RestoreKey::SharedLoadPercent,
            self.config.shared_load_percent(),
        ));
        values.push((RestoreKey::UnitPrice, self.config.unit_price()));
        for (id, area) in self.config.heated_areas() {
            values.push((RestoreKey::HeatedArea(id.clone()), *area));
        }
        for (id, output) in self.config.rated_outputs() {
            values.push((RestoreKey::RatedOutput(id.clone()), *output));
        }
        values
    }

    /// Reads every configured consumer's current activity.
    pub fn inspect<R: InstrumentReader + ?Sized>(&self, reader: &R) -> Vec<ConsumerInspection> {
        self.consumers
            .iter()
            .map(|consumer| {
                let activity = reader.read_activity(consumer.id());
                ConsumerInspection {
                    consumer: consumer.id().clone(),
                    is_heating: activity.as_ref().map(|a| a.is_heating()),
                    hvac_action: activity
                        .as_ref()
                        .and_then(|a| a.hvac_action().map(str::to_string)),
                    current_temperature: activity.as_ref().and_then(|a| a.current_temperature()),
                    target_temperature: activity.as_ref().and_then(|a| a.target_temperature()),
                    state: activity.map(|a| a.state),
                }
            })
            .collect()
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "tick intervals are far below 2^52 milliseconds"
)]
fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::activity::ActivitySnapshot;
    use crate::distribution::SplitKind;
    use crate::instrument::InstrumentSnapshot;
    use crate::types::MeterId;

    const EPSILON: f64 = 1e-9;

    fn id(name: &str) -> ConsumerId {
        ConsumerId::new(name).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 6, 0, 0).unwrap()
    }

    fn settings(consumers: &[&str]) -> ConfigUpdate {
        ConfigUpdate {
            meter: Some(MeterId::new("sensor.gas").unwrap()),
            consumers: Some(consumers.iter().map(|c| id(c)).collect()),
            ..ConfigUpdate::default()
        }
    }

    fn engine(update: &ConfigUpdate) -> AllocationEngine {
        AllocationEngine::new(EngineConfig::from_update(update).unwrap())
    }

    fn heating(current: f64, target: f64) -> ActivitySnapshot {
        ActivitySnapshot::new("heat")
            .with_attribute("current_temperature", current)
            .with_attribute("temperature", target)
    }

    fn total(engine: &AllocationEngine, name: &str) -> f64 {
        engine.totals_for(&id(name)).unwrap().total_allocated
    }

    struct Values(HashMap<String, String>);

    impl Values {
        fn of(pairs: &[(&str, &str)]) -> Self {
            Self(
                pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            )
        }
    }

    impl LastValueSource for Values {
        fn load_last_value(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[test]
    fn test_first_tick_seeds_without_effort() {
        let mut engine = engine(&settings(&["climate.a"]));
        let reader = InstrumentSnapshot::new()
            .with_state("sensor.gas", "100.0")
            .with_activity("climate.a", heating(17.0, 21.0));

        let report = engine.sample_at(t0(), &reader);

        assert_eq!(report.meter, MeterDelta::FirstReading { reading: 100.0 });
        assert!(report.distribution.is_none());
        assert!(engine.totals_for(&id("climate.a")).unwrap().effort_window.abs() < EPSILON);
        assert_eq!(engine.sample_state().last_meter_reading, Some(100.0));
    }

    #[test]
    fn test_weighted_split_twenty_ten() {
        let mut engine = engine(&settings(&["climate.a", "climate.b"]));
        let mut reader = InstrumentSnapshot::new()
            .with_state("sensor.gas", 100.0)
            .with_activity("climate.a", heating(17.0, 21.0))
            .with_activity(
                "climate.b",
                heating(21.0, 21.0).with_attribute("hvac_action", "heating"),
            );

        engine.sample_at(t0(), &reader);
        reader.set_state("sensor.gas", 130.0);
        let report = engine.sample_at(t0() + Duration::seconds(300), &reader);

        let distribution = report.distribution.unwrap();
        assert_eq!(distribution.split, SplitKind::Proportional);
        assert!((total(&engine, "climate.a") - 20.0).abs() < EPSILON);
        assert!((total(&engine, "climate.b") - 10.0).abs() < EPSILON);
        for totals in engine.current_totals() {
            assert!(totals.effort_window.abs() < EPSILON);
        }
    }

    #[test]
    fn test_shared_load_deducted_not_attributed() {
        let mut engine = engine(&ConfigUpdate {
            include_shared_load: Some(true),
            shared_load_percent: Some(20.0),
            ..settings(&["climate.a"])
        });
        let mut reader = InstrumentSnapshot::new()
            .with_state("sensor.gas", 0.0)
            .with_activity("climate.a", heating(18.0, 20.0));

        engine.sample_at(t0(), &reader);
        reader.set_state("sensor.gas", 50.0);
        engine.sample_at(t0() + Duration::seconds(60), &reader);

        let diagnostics = engine.diagnostics();
        assert!((diagnostics.last_delta - 50.0).abs() < EPSILON);
        assert!((diagnostics.last_distributable - 40.0).abs() < EPSILON);
        assert!((diagnostics.last_shared_load_deducted - 10.0).abs() < EPSILON);
        assert!((total(&engine, "climate.a") - 40.0).abs() < EPSILON);
        assert_eq!(
            diagnostics.last_distribution_time,
            Some(t0() + Duration::seconds(60))
        );
    }

    #[test]
    fn test_meter_decrease_resyncs_without_allocating() {
        let mut engine = engine(&settings(&["climate.a", "climate.b"]));
        let mut reader = InstrumentSnapshot::new()
            .with_activity("climate.a", heating(19.0, 20.0))
            .with_activity("climate.b", ActivitySnapshot::new("off"));

        let mut allocated = Vec::new();
        for (step, reading) in [100.0, 130.0, 40.0, 70.0].into_iter().enumerate() {
            reader.set_state("sensor.gas", reading);
            let at = t0() + Duration::seconds(300 * i64::try_from(step).unwrap());
            let report = engine.sample_at(at, &reader);
            allocated.push(report.distribution.map_or(0.0, |d| d.allocated()));
        }

        assert!(allocated[0].abs() < EPSILON);
        assert!((allocated[1] - 30.0).abs() < EPSILON);
        assert!(allocated[2].abs() < EPSILON);
        assert!((allocated[3] - 30.0).abs() < EPSILON);
        assert!((engine.consumers().total_allocated() - 60.0).abs() < EPSILON);
        assert_eq!(engine.sample_state().last_meter_reading, Some(70.0));
    }

    #[test]
    fn test_unchanged_meter_accrues_effort_only() {
        let mut engine = engine(&settings(&["climate.a"]));
        let reader = InstrumentSnapshot::new()
            .with_state("sensor.gas", 42.0)
            .with_activity("climate.a", heating(20.0, 20.5));

        engine.sample_at(t0(), &reader);
        let report = engine.sample_at(t0() + Duration::seconds(120), &reader);

        assert_eq!(report.meter, MeterDelta::NoChange);
        assert!(report.distribution.is_none());
        let totals = engine.totals_for(&id("climate.a")).unwrap();
        assert!(totals.total_allocated.abs() < EPSILON);
        // weight = 1 + 0.5 * 0.25
        assert!((totals.effort_window - 135.0).abs() < EPSILON);
    }

    #[test]
    fn test_unreadable_meter_keeps_baseline() {
        let mut engine = engine(&settings(&["climate.a"]));
        let mut reader = InstrumentSnapshot::new().with_state("sensor.gas", 10.0);

        engine.sample_at(t0(), &reader);
        reader.set_state("sensor.gas", "unavailable");
        let report = engine.sample_at(t0() + Duration::seconds(300), &reader);
        assert_eq!(report.meter, MeterDelta::Unreadable);
        assert_eq!(engine.sample_state().last_meter_reading, Some(10.0));

        reader.set_state("sensor.gas", 12.0);
        engine.sample_at(t0() + Duration::seconds(600), &reader);
        // Nobody was active, so the delta is split equally.
        assert!((total(&engine, "climate.a") - 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_sample_time_never_moves_backwards() {
        let mut engine = engine(&settings(&["climate.a"]));
        let reader = InstrumentSnapshot::new().with_activity("climate.a", heating(18.0, 20.0));

        engine.sample_at(t0(), &reader);
        let report = engine.sample_at(t0() - Duration::seconds(90), &reader);

        assert_eq!(report.sampled_at, t0());
        assert!(report.elapsed_secs.abs() < EPSILON);
        assert_eq!(engine.sample_state().last_sample_time, Some(t0()));
    }

    #[test]
    fn test_global_invariant_over_many_ticks() {
        let mut engine = engine(&ConfigUpdate {
            include_shared_load: Some(true),
            shared_load_percent: Some(15.0),
            ..settings(&["climate.a", "climate.b", "climate.c"])
        });
        let mut reader = InstrumentSnapshot::new();
        let readings = [5.0, 5.4, 7.9, 7.9, 2.0, 3.3, 9.75, 9.8, 15.125];
        let mut positive_deltas = 0.0;
        let mut deducted = 0.0;

        for (step, reading) in readings.into_iter().enumerate() {
            let gap = f64::from(u8::try_from(step % 4).unwrap());
            reader = reader
                .with_state("sensor.gas", reading)
                .with_activity("climate.a", heating(20.0 - gap, 20.0))
                .with_activity(
                    "climate.b",
                    if step % 3 == 0 {
                        ActivitySnapshot::new("off")
                    } else {
                        heating(18.0, 21.0)
                    },
                );
            let at = t0() + Duration::seconds(300 * i64::try_from(step).unwrap());
            let report = engine.sample_at(at, &reader);
            if let Some(distribution) = report.distribution {
                positive_deltas += distribution.delta;
                deducted += distribution.shared_load_deducted;
            }
        }

        let allocated = engine.consumers().total_allocated();
        assert!((allocated + deducted - positive_deltas).abs() < EPSILON);
    }

    #[test]
    fn test_reload_preserves_totals() {
        let mut engine = engine(&settings(&["climate.x", "climate.y"]));
        let restored = engine.restore(
            &Values::of(&[("allocated:climate.x", "7.3")]),
            &ConfigUpdate::default(),
        );
        assert_eq!(restored.totals.len(), 1);

        let change = engine
            .update_config(&ConfigUpdate {
                unit_price: Some(1.2),
                ..ConfigUpdate::default()
            })
            .unwrap();

        assert_eq!(change, ConfigChange::default());
        assert!((total(&engine, "climate.x") - 7.3).abs() < EPSILON);
        assert!((engine.cost_of(&id("climate.x")).unwrap() - 8.76).abs() < EPSILON);
    }

    #[test]
    fn test_reload_keeps_meter_baseline() {
        let mut engine = engine(&settings(&["climate.x"]));
        let reader = InstrumentSnapshot::new().with_state("sensor.gas", 3.0);
        engine.sample_at(t0(), &reader);

        engine
            .update_config(&ConfigUpdate {
                consumers: Some(vec![id("climate.x"), id("climate.y")]),
                unit_price: Some(0.9),
                ..ConfigUpdate::default()
            })
            .unwrap();

        assert_eq!(engine.sample_state().last_meter_reading, Some(3.0));
    }

    #[test]
    fn test_reload_reconciles_consumers_and_meter() {
        let mut engine = engine(&settings(&["climate.x", "climate.y"]));
        let reader = InstrumentSnapshot::new().with_state("sensor.gas", 3.0);
        engine.sample_at(t0(), &reader);

        let change = engine
            .update_config(&ConfigUpdate {
                meter: Some(MeterId::new("sensor.gas_new").unwrap()),
                consumers: Some(vec![id("climate.y"), id("climate.z")]),
                ..ConfigUpdate::default()
            })
            .unwrap();

        assert_eq!(change.added, vec![id("climate.z")]);
        assert_eq!(change.removed, vec![id("climate.x")]);
        assert!(change.meter_changed);
        assert_eq!(engine.sample_state().last_meter_reading, None);
        assert_eq!(engine.sample_state().last_sample_time, Some(t0()));
        assert!(engine.totals_for(&id("climate.x")).is_none());
    }

    #[test]
    fn test_rejected_update_leaves_engine_untouched() {
        let mut engine = engine(&settings(&["climate.x"]));
        let before = engine.config().clone();

        let result = engine.update_config(&ConfigUpdate {
            consumers: Some(Vec::new()),
            ..ConfigUpdate::default()
        });

        assert_eq!(result, Err(ConfigError::NoConsumers));
        assert_eq!(engine.config(), &before);
        assert_eq!(engine.consumers().len(), 1);
    }

    #[test]
    fn test_restore_once() {
        let mut engine = engine(&settings(&["climate.a"]));
        let source = Values::of(&[("allocated:climate.a", "12.5")]);

        let first = engine.restore(&source, &ConfigUpdate::default());
        assert_eq!(first.totals, vec![(id("climate.a"), 12.5)]);
        assert!((total(&engine, "climate.a") - 12.5).abs() < EPSILON);

        let second = engine.restore(
            &Values::of(&[("allocated:climate.a", "99.0")]),
            &ConfigUpdate::default(),
        );
        assert!(second.totals.is_empty());
        assert!((total(&engine, "climate.a") - 12.5).abs() < EPSILON);
    }

    #[test]
    fn test_restore_skips_written_total() {
        let mut engine = engine(&settings(&["climate.a"]));
        let mut reader = InstrumentSnapshot::new().with_state("sensor.gas", 1.0);
        engine.sample_at(t0(), &reader);
        reader.set_state("sensor.gas", 2.0);
        engine.sample_at(t0() + Duration::seconds(300), &reader);

        let report = engine.restore(
            &Values::of(&[("allocated:climate.a", "12.5")]),
            &ConfigUpdate::default(),
        );

        assert!(report.totals.is_empty());
        assert!((total(&engine, "climate.a") - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_restore_ignores_malformed_values() {
        let mut engine = engine(&settings(&["climate.a"]));
        let report = engine.restore(
            &Values::of(&[("allocated:climate.a", "unknown"), ("unit_price", "-2")]),
            &ConfigUpdate::default(),
        );

        assert!(report.totals.is_empty());
        assert_eq!(
            report.ignored,
            vec![
                RestoreKey::UnitPrice,
                RestoreKey::Allocated(id("climate.a"))
            ]
        );
        assert!(total(&engine, "climate.a").abs() < EPSILON);
        assert!(engine.config().unit_price().abs() < EPSILON);
    }

    #[test]
    fn test_restore_total_from_cost() {
        let mut engine = engine(&settings(&["climate.a", "climate.b"]));
        let source = Values::of(&[
            ("unit_price", "0.5"),
            ("cost:climate.a", "3.0"),
            ("allocated:climate.b", "4.0"),
            ("cost:climate.b", "100.0"),
        ]);

        let report = engine.restore(&source, &ConfigUpdate::default());

        assert_eq!(report.settings, vec![(RestoreKey::UnitPrice, 0.5)]);
        assert!((total(&engine, "climate.a") - 6.0).abs() < EPSILON);
        assert!((total(&engine, "climate.b") - 4.0).abs() < EPSILON);
    }

    #[test]
    fn test_restore_settings_respect_explicit_values() {
        let base = ConfigUpdate {
            unit_price: Some(0.9),
            heated_areas: Some(BTreeMap::from([(id("climate.a"), 20.0)])),
            ..settings(&["climate.a", "climate.b"])
        };
        let mut engine = engine(&base);
        let source = Values::of(&[
            ("unit_price", "1.23456"),
            ("shared_load_percent", "12.346"),
            ("heated_area:climate.a", "99"),
            ("heated_area:climate.b", "14.256"),
            ("rated_output:climate.b", "1799.96"),
            ("rated_output:climate.a", "0"),
        ]);

        engine.restore(&source, &base);

        let config = engine.config();
        assert!((config.unit_price() - 0.9).abs() < EPSILON);
        assert!((config.shared_load_percent() - 12.35).abs() < EPSILON);
        assert_eq!(config.heated_area(&id("climate.a")), Some(20.0));
        assert_eq!(config.heated_area(&id("climate.b")), Some(14.26));
        assert_eq!(config.rated_output(&id("climate.b")), Some(1800.0));
        assert_eq!(config.rated_output(&id("climate.a")), None);
    }

    #[test]
    fn test_resume_continues_window() {
        let mut first = engine(&settings(&["climate.a", "climate.b"]));
        let mut reader = InstrumentSnapshot::new()
            .with_state("sensor.gas", 10.0)
            .with_activity(
                "climate.a",
                heating(20.0, 20.0).with_attribute("hvac_action", "heating"),
            );
        first.sample_at(t0(), &reader);
        first.sample_at(t0() + Duration::seconds(60), &reader);

        let state = first.sample_state().clone();
        let efforts = first.consumers().efforts();

        let mut second = engine(&settings(&["climate.a", "climate.b"]));
        second.resume(state, &efforts);
        reader.set_state("sensor.gas", 16.0);
        second.sample_at(t0() + Duration::seconds(120), &reader);

        assert!((total(&second, "climate.a") - 6.0).abs() < EPSILON);
        assert!(total(&second, "climate.b").abs() < EPSILON);
    }

    #[test]
    fn test_inspect_reports_unresolvable_as_none() {
        let engine = engine(&settings(&["climate.a", "climate.b"]));
        let reader = InstrumentSnapshot::new().with_activity(
            "climate.a",
            heating(18.5, 21.0).with_attribute("hvac_action", "idle"),
        );

        let inspections = engine.inspect(&reader);

        assert_eq!(inspections[0].state.as_deref(), Some("heat"));
        assert_eq!(inspections[0].is_heating, Some(true));
        assert_eq!(inspections[0].hvac_action.as_deref(), Some("idle"));
        assert_eq!(inspections[0].current_temperature, Some(18.5));
        assert_eq!(inspections[1].state, None);
        assert_eq!(inspections[1].is_heating, None);
    }

    #[test]
    fn test_persistable_values_round_trip_through_restore() {
        let mut source_engine = engine(&ConfigUpdate {
            unit_price: Some(2.0),
            ..settings(&["climate.a"])
        });
        let mut reader = InstrumentSnapshot::new().with_state("sensor.gas", 0.0);
        source_engine.sample_at(t0(), &reader);
        reader.set_state("sensor.gas", 1.75);
        source_engine.sample_at(t0() + Duration::seconds(300), &reader);

        let stored = Values(
            source_engine
                .persistable_values()
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        );
        let mut restarted = engine(&settings(&["climate.a"]));
        restarted.restore(&stored, &ConfigUpdate::default());

        assert!((total(&restarted, "climate.a") - 1.75).abs() < EPSILON);
        assert!((restarted.config().unit_price() - 2.0).abs() < EPSILON);
    }
}
