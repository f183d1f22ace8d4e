//! Between-cycles gap records and offset durations.
//!
//! A gap record ties two consecutive cycles on one machine and carries the
//! percentage deviation of the observed gap from its nominal duration. The
//! nominal is the machine's pallet-changing duration when configured,
//! otherwise the previous operation's unloading duration plus the next
//! operation's loading duration. Operations are re-derived from the slots
//! at each side of the gap on every recomputation, never cached, so
//! operation changes and slot splits are reflected automatically.

use chrono::Duration;

use crate::engine::MachineAnalysis;
use crate::models::{CycleId, Operation};

impl MachineAnalysis<'_> {
    /// Create the gap record between `previous` and `next`, triggered by
    /// the start event that created `next`. Nothing is created when the
    /// previous cycle is not full, when the boundaries are inconsistent, or
    /// when the gap is empty and empty gaps are configured away.
    pub(crate) fn make_between_cycles(&mut self, previous: CycleId, next: CycleId) {
        let Some(prev) = self.store.cycle(previous) else {
            return;
        };
        if !prev.is_full() {
            return;
        }
        let (Some(prev_end), Some(next_begin)) = (
            prev.end,
            self.store.cycle(next).and_then(|c| c.begin),
        ) else {
            return;
        };
        if next_begin < prev_end {
            return;
        }
        if next_begin == prev_end && self.config.skip_empty_between_cycles {
            return;
        }
        if self.store.between_with_previous(previous).is_some() {
            return;
        }
        let offset = self.gap_offset(previous, next);
        self.store.insert_between_cycles(previous, next, offset);
    }

    /// Offset of the gap between two cycles, `None` when the boundaries are
    /// missing or no nominal duration applies.
    pub(crate) fn gap_offset(&self, previous: CycleId, next: CycleId) -> Option<f64> {
        let prev_end = self.store.cycle(previous)?.end?;
        let next_begin = self.store.cycle(next)?.begin?;
        if next_begin < prev_end {
            return None;
        }
        let nominal = self.gap_nominal(previous, next)?;
        Self::offset_percent(next_begin - prev_end, nominal)
    }

    /// Nominal duration of the gap between two cycles.
    fn gap_nominal(&self, previous: CycleId, next: CycleId) -> Option<Duration> {
        if let Some(pallet) = self.store.machine().pallet_changing_duration {
            return Some(pallet);
        }
        let unloading = self
            .operation_before_gap(previous)
            .and_then(|op| op.unloading_duration);
        let loading = self
            .operation_after_gap(next)
            .and_then(|op| op.loading_duration);
        match (unloading, loading) {
            (None, None) => None,
            (u, l) => Some(u.unwrap_or_else(Duration::zero) + l.unwrap_or_else(Duration::zero)),
        }
    }

    /// Operation in force at the end of the previous cycle.
    fn operation_before_gap(&self, previous: CycleId) -> Option<&Operation> {
        let cycle = self.store.cycle(previous)?;
        let slot = cycle
            .end
            .and_then(|e| self.store.slot_at_end_point(e))
            .or(cycle.slot)?;
        self.slot_operation(slot)
    }

    /// Operation in force at the begin of the next cycle.
    fn operation_after_gap(&self, next: CycleId) -> Option<&Operation> {
        let cycle = self.store.cycle(next)?;
        let slot = cycle
            .begin
            .and_then(|b| self.store.slot_at(b))
            .or(cycle.slot)?;
        self.slot_operation(slot)
    }

    /// Recompute every gap record of the machine: drop rows whose cycles
    /// disappeared or whose boundaries became inconsistent, drop empty gaps
    /// when configured, and refresh the remaining offsets. Idempotent.
    pub(crate) fn refresh_between_cycles(&mut self) {
        for id in self.store.between_cycles_ordered() {
            let Some(row) = self.store.between_cycles(id) else {
                continue;
            };
            let (previous, next) = (row.previous, row.next);
            let prev_end = self.store.cycle(previous).and_then(|c| c.end);
            let next_begin = self.store.cycle(next).and_then(|c| c.begin);
            let valid = match (prev_end, next_begin) {
                (Some(e), Some(b)) => {
                    e <= b && !(e == b && self.config.skip_empty_between_cycles)
                }
                _ => false,
            };
            if !valid {
                self.store.remove_between_cycles(id);
                continue;
            }
            let offset = self.gap_offset(previous, next);
            if let Some(row) = self.store.between_cycles_mut(id) {
                row.offset_duration = offset;
            }
        }
    }
}
