//! Incrementally-maintained summary rows.
//!
//! Two statically-known handlers make up the accumulator list: cycle counts
//! per context key, and cycle counts per (key, rounded offset) bucket.
//! Deltas buffer in memory while a transaction runs; `empty_accumulators`
//! flushes them into the visible rows and removes rows that reach zero.
//! Application is purely additive and commutative, so replaying a delta
//! stream in any order converges to the same rows.

use std::collections::{BTreeMap, HashMap};

use crate::models::{CycleCountSummary, CycleDurationSummary, MachineId, SummaryKey};

/// A pending count adjustment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountDelta {
    pub full: i64,
    pub partial: i64,
}

impl CountDelta {
    pub fn is_zero(&self) -> bool {
        self.full == 0 && self.partial == 0
    }
}

/// One accumulator handler: buffers deltas, flushes them into rows.
pub trait SummaryAccumulator {
    /// Whether any delta is waiting to be applied.
    fn has_pending(&self) -> bool;
    /// Apply all pending deltas to the visible rows.
    fn flush(&mut self);
    /// Apply the pending deltas of one machine only, leaving other
    /// machines' buffered deltas untouched (transaction commit).
    fn flush_machine(&mut self, machine: MachineId);
    /// Drop pending deltas without applying them (transaction rollback).
    fn purge(&mut self);
    /// Drop the pending deltas of one machine only.
    fn purge_machine(&mut self, machine: MachineId);
}

/// Cycle counts keyed by context. Driven by slot counter deltas emitted by
/// consolidation.
#[derive(Debug, Clone, Default)]
pub struct CycleCountAccumulator {
    pending: HashMap<SummaryKey, CountDelta>,
    rows: BTreeMap<SummaryKey, CountDelta>,
}

impl CycleCountAccumulator {
    pub fn apply(&mut self, key: SummaryKey, d_full: i64, d_partial: i64) {
        if d_full == 0 && d_partial == 0 {
            return;
        }
        let delta = self.pending.entry(key).or_default();
        delta.full += d_full;
        delta.partial += d_partial;
    }

    /// Visible rows, sorted by key. Pending deltas are not reflected until
    /// the next flush.
    pub fn rows(&self) -> Vec<CycleCountSummary> {
        self.rows
            .iter()
            .map(|(key, counts)| CycleCountSummary {
                key: *key,
                full: counts.full,
                partial: counts.partial,
            })
            .collect()
    }
}

impl SummaryAccumulator for CycleCountAccumulator {
    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn flush(&mut self) {
        for (key, delta) in self.pending.drain() {
            let row = self.rows.entry(key).or_default();
            row.full += delta.full;
            row.partial += delta.partial;
        }
        self.rows.retain(|_, counts| !counts.is_zero());
    }

    fn flush_machine(&mut self, machine: MachineId) {
        let keys: Vec<SummaryKey> = self
            .pending
            .keys()
            .filter(|key| key.machine == machine)
            .copied()
            .collect();
        for key in keys {
            if let Some(delta) = self.pending.remove(&key) {
                let row = self.rows.entry(key).or_default();
                row.full += delta.full;
                row.partial += delta.partial;
            }
        }
        self.rows.retain(|_, counts| !counts.is_zero());
    }

    fn purge(&mut self) {
        self.pending.clear();
    }

    fn purge_machine(&mut self, machine: MachineId) {
        self.pending.retain(|key, _| key.machine != machine);
    }
}

/// How one cycle contributes to the duration summary: its context key, its
/// offset bucket and whether it is full. Cycles lacking a boundary, a slot
/// operation or a computable offset contribute nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationView {
    pub key: SummaryKey,
    pub offset: i64,
    pub full: bool,
}

/// Cycle counts bucketed by rounded offset duration. Driven by per-cycle
/// before/after updates.
#[derive(Debug, Clone, Default)]
pub struct CycleDurationAccumulator {
    pending: HashMap<(SummaryKey, i64), CountDelta>,
    rows: BTreeMap<(SummaryKey, i64), CountDelta>,
}

impl CycleDurationAccumulator {
    /// Record a cycle transition: `before` is subtracted, `after` added.
    pub fn cycle_updated(&mut self, before: Option<DurationView>, after: Option<DurationView>) {
        if before == after {
            return;
        }
        if let Some(view) = before {
            self.apply(view, -1);
        }
        if let Some(view) = after {
            self.apply(view, 1);
        }
    }

    fn apply(&mut self, view: DurationView, sign: i64) {
        let delta = self.pending.entry((view.key, view.offset)).or_default();
        if view.full {
            delta.full += sign;
        } else {
            delta.partial += sign;
        }
    }

    pub fn rows(&self) -> Vec<CycleDurationSummary> {
        self.rows
            .iter()
            .map(|((key, offset), counts)| CycleDurationSummary {
                key: *key,
                offset: *offset,
                full: counts.full,
                partial: counts.partial,
            })
            .collect()
    }
}

impl SummaryAccumulator for CycleDurationAccumulator {
    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn flush(&mut self) {
        for (key, delta) in self.pending.drain() {
            let row = self.rows.entry(key).or_default();
            row.full += delta.full;
            row.partial += delta.partial;
        }
        self.rows.retain(|_, counts| !counts.is_zero());
    }

    fn flush_machine(&mut self, machine: MachineId) {
        let keys: Vec<(SummaryKey, i64)> = self
            .pending
            .keys()
            .filter(|(key, _)| key.machine == machine)
            .copied()
            .collect();
        for key in keys {
            if let Some(delta) = self.pending.remove(&key) {
                let row = self.rows.entry(key).or_default();
                row.full += delta.full;
                row.partial += delta.partial;
            }
        }
        self.rows.retain(|_, counts| !counts.is_zero());
    }

    fn purge(&mut self) {
        self.pending.clear();
    }

    fn purge_machine(&mut self, machine: MachineId) {
        self.pending.retain(|(key, _), _| key.machine != machine);
    }
}

/// The statically-known accumulator list injected into the engine.
#[derive(Debug, Clone, Default)]
pub struct AccumulatorSet {
    pub count: CycleCountAccumulator,
    pub duration: CycleDurationAccumulator,
}

impl AccumulatorSet {
    fn handlers_mut(&mut self) -> [&mut dyn SummaryAccumulator; 2] {
        [&mut self.count, &mut self.duration]
    }

    /// Flush every handler. Must run before any reader looks at summaries.
    pub fn empty_accumulators(&mut self) {
        for handler in self.handlers_mut() {
            handler.flush();
        }
    }

    /// Flush one machine's pending deltas at a transaction commit.
    pub fn flush_machine(&mut self, machine: MachineId) {
        for handler in self.handlers_mut() {
            handler.flush_machine(machine);
        }
    }

    /// Discard pending deltas of every handler.
    pub fn purge(&mut self) {
        for handler in self.handlers_mut() {
            handler.purge();
        }
    }

    /// Discard pending deltas of one machine only, leaving other machines'
    /// buffered deltas intact. Used on transaction rollback.
    pub fn purge_machine(&mut self, machine: MachineId) {
        for handler in self.handlers_mut() {
            handler.purge_machine(machine);
        }
    }

    pub fn has_pending(&self) -> bool {
        self.count.has_pending() || self.duration.has_pending()
    }
}
