//! Per-consumer accumulators.

use serde::Serialize;

use crate::types::ConsumerId;

/// Live accumulator state for one heating unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Consumer {
    id: ConsumerId,
    /// Weighted active seconds since the last distribution round.
    effort_window: f64,
    /// Cumulative gas allocated to this unit.
    total_allocated: f64,
    /// Set once a distribution round or a restore has written the total.
    total_written: bool,
}

impl Consumer {
    /// Creates a consumer with empty accumulators.
    pub const fn new(id: ConsumerId) -> Self {
        Self {
            id,
            effort_window: 0.0,
            total_allocated: 0.0,
            total_written: false,
        }
    }

    pub const fn id(&self) -> &ConsumerId {
        &self.id
    }

    pub const fn effort_window(&self) -> f64 {
        self.effort_window
    }

    pub const fn total_allocated(&self) -> f64 {
        self.total_allocated
    }

    /// Whether the total has been written during this process lifetime.
    pub const fn total_written(&self) -> bool {
        self.total_written
    }

    pub(crate) fn add_effort(&mut self, effort: f64) {
        if effort.is_finite() && effort > 0.0 {
            self.effort_window += effort;
        }
    }

    pub(crate) fn reset_effort(&mut self) {
        self.effort_window = 0.0;
    }

    pub(crate) fn set_effort(&mut self, effort: f64) {
        self.effort_window = if effort.is_finite() { effort.max(0.0) } else { 0.0 };
    }

    pub(crate) fn allocate(&mut self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.total_allocated += amount;
        }
        self.total_written = true;
    }

    pub(crate) fn seed_total(&mut self, total: f64) {
        self.total_allocated = total.max(0.0);
        self.total_written = true;
    }

    /// Public view of the accumulators.
    pub fn totals(&self) -> ConsumerTotals {
        ConsumerTotals {
            consumer: self.id.clone(),
            total_allocated: self.total_allocated,
            effort_window: self.effort_window,
        }
    }
}

/// Snapshot of one consumer's accumulators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumerTotals {
    pub consumer: ConsumerId,
    pub total_allocated: f64,
    pub effort_window: f64,
}

/// Consumers in configuration order, keyed by stable identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerTable {
    consumers: Vec<Consumer>,
}

/// Consumers added and removed by a reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub added: Vec<ConsumerId>,
    pub removed: Vec<ConsumerId>,
}

impl ConsumerTable {
    /// Creates a table with one empty consumer per reference.
    pub fn new(ids: &[ConsumerId]) -> Self {
        Self {
            consumers: ids.iter().cloned().map(Consumer::new).collect(),
        }
    }

    /// Re-derives the table for a new ordered reference list.
    ///
    /// Keeps accumulators for references that remain, starts new references at
    /// zero, and drops references that are gone.
    pub fn reconcile(&mut self, ids: &[ConsumerId]) -> Reconciled {
        let mut previous = std::mem::take(&mut self.consumers);
        let mut added = Vec::new();

        for id in ids {
            if let Some(pos) = previous.iter().position(|c| &c.id == id) {
                self.consumers.push(previous.swap_remove(pos));
            } else {
                added.push(id.clone());
                self.consumers.push(Consumer::new(id.clone()));
            }
        }

        let mut removed: Vec<ConsumerId> = previous.into_iter().map(|c| c.id).collect();
        removed.sort();
        Reconciled { added, removed }
    }

    pub fn get(&self, id: &ConsumerId) -> Option<&Consumer> {
        self.consumers.iter().find(|c| &c.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &ConsumerId) -> Option<&mut Consumer> {
        self.consumers.iter_mut().find(|c| &c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Consumer> {
        self.consumers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Each consumer with its current effort window.
    pub fn efforts(&self) -> Vec<(ConsumerId, f64)> {
        self.consumers
            .iter()
            .map(|c| (c.id.clone(), c.effort_window))
            .collect()
    }

    pub(crate) fn reset_effort(&mut self) {
        for consumer in &mut self.consumers {
            consumer.reset_effort();
        }
    }

    /// Sum of all allocated totals.
    pub fn total_allocated(&self) -> f64 {
        self.consumers.iter().map(|c| c.total_allocated).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ConsumerId> {
        names.iter().map(|n| ConsumerId::new(*n).unwrap()).collect()
    }

    #[test]
    fn test_reconcile_keeps_totals_by_identity() {
        let mut table = ConsumerTable::new(&ids(&["climate.a", "climate.b"]));
        table.get_mut(&ids(&["climate.a"])[0]).unwrap().allocate(7.3);
        table.get_mut(&ids(&["climate.b"])[0]).unwrap().add_effort(120.0);

        let reconciled = table.reconcile(&ids(&["climate.b", "climate.a", "climate.c"]));

        assert_eq!(reconciled.added, ids(&["climate.c"]));
        assert!(reconciled.removed.is_empty());
        let order: Vec<_> = table.iter().map(|c| c.id().as_str().to_string()).collect();
        assert_eq!(order, vec!["climate.b", "climate.a", "climate.c"]);

        let a = table.get(&ids(&["climate.a"])[0]).unwrap();
        assert!((a.total_allocated() - 7.3).abs() < 1e-12);
        let b = table.get(&ids(&["climate.b"])[0]).unwrap();
        assert!((b.effort_window() - 120.0).abs() < 1e-12);
        let c = table.get(&ids(&["climate.c"])[0]).unwrap();
        assert!(c.total_allocated().abs() < 1e-12);
    }

    #[test]
    fn test_reconcile_drops_removed_consumers() {
        let mut table = ConsumerTable::new(&ids(&["climate.a", "climate.b"]));
        table.get_mut(&ids(&["climate.b"])[0]).unwrap().allocate(3.0);

        let reconciled = table.reconcile(&ids(&["climate.a"]));
        assert_eq!(reconciled.removed, ids(&["climate.b"]));
        assert_eq!(table.len(), 1);

        // Re-adding starts from zero.
        table.reconcile(&ids(&["climate.a", "climate.b"]));
        let b = table.get(&ids(&["climate.b"])[0]).unwrap();
        assert!(b.total_allocated().abs() < 1e-12);
        assert!(!b.total_written());
    }

    #[test]
    fn test_add_effort_ignores_non_positive() {
        let mut consumer = Consumer::new(ids(&["climate.a"]).remove(0));
        consumer.add_effort(-5.0);
        consumer.add_effort(f64::NAN);
        consumer.add_effort(30.0);
        assert!((consumer.effort_window() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_allocate_marks_total_written() {
        let mut consumer = Consumer::new(ids(&["climate.a"]).remove(0));
        assert!(!consumer.total_written());
        consumer.allocate(0.0);
        assert!(consumer.total_written());
        assert!(consumer.total_allocated().abs() < 1e-12);
    }
}
