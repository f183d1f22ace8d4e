//! Per-machine arena of slots, cycles and gap records.
//!
//! One `MachineStore` holds every timeline entity of one machine, addressed
//! by stable identifiers. Cross-references (cycle → slot, gap → cycles) are
//! index lookups into these tables. The store is `Clone`, which is what the
//! pipeline uses to snapshot a machine before a modification and to roll it
//! back on failure.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::error::{DetectionLogEntry, Severity};
use crate::models::{
    BetweenCycles, BetweenCyclesId, CycleId, Machine, MachineId, OperationCycle, OperationSlot,
    SlotContext, SlotId, TimeRange,
};

#[derive(Debug, Clone)]
pub struct MachineStore {
    machine: Machine,
    slots: BTreeMap<SlotId, OperationSlot>,
    cycles: BTreeMap<CycleId, OperationCycle>,
    between_cycles: BTreeMap<BetweenCyclesId, BetweenCycles>,
    detection_log: Vec<DetectionLogEntry>,
    next_slot_id: i64,
    next_cycle_id: i64,
    next_between_id: i64,
}

impl MachineStore {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            slots: BTreeMap::new(),
            cycles: BTreeMap::new(),
            between_cycles: BTreeMap::new(),
            detection_log: Vec::new(),
            next_slot_id: 1,
            next_cycle_id: 1,
            next_between_id: 1,
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_id(&self) -> MachineId {
        self.machine.id
    }

    // ------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------

    pub fn insert_slot(&mut self, range: TimeRange, context: SlotContext) -> SlotId {
        let id = SlotId(self.next_slot_id);
        self.next_slot_id += 1;
        self.slots
            .insert(id, OperationSlot::new(id, self.machine.id, range, context));
        id
    }

    pub fn slot(&self, id: SlotId) -> Option<&OperationSlot> {
        self.slots.get(&id)
    }

    pub fn slot_mut(&mut self, id: SlotId) -> Option<&mut OperationSlot> {
        self.slots.get_mut(&id)
    }

    pub fn remove_slot(&mut self, id: SlotId) -> Option<OperationSlot> {
        self.slots.remove(&id)
    }

    /// Slot ids ordered by range begin.
    pub fn slots_ordered(&self) -> Vec<SlotId> {
        let mut ids: Vec<SlotId> = self.slots.keys().copied().collect();
        ids.sort_by_key(|id| self.slots[id].range.begin);
        ids
    }

    /// Slot covering `t` (begin inclusive, end exclusive). Used for cycle
    /// *begin* boundaries.
    pub fn slot_at(&self, t: DateTime<Utc>) -> Option<SlotId> {
        self.slots
            .values()
            .find(|s| s.range.contains(t))
            .map(|s| s.id)
    }

    /// Slot whose range contains `t` treating the end as inclusive. Used for
    /// cycle *end* boundaries: a cycle ending exactly on a slot boundary
    /// belongs to the earlier slot.
    pub fn slot_at_end_point(&self, t: DateTime<Utc>) -> Option<SlotId> {
        self.slots
            .values()
            .find(|s| s.range.contains_end_point(t))
            .map(|s| s.id)
    }

    /// Like [`slot_at_end_point`](Self::slot_at_end_point), but when `t`
    /// falls in a gap between slots, the slot whose boundary lies within
    /// `margin` of `t` is preferred over no attachment. The nearer boundary
    /// wins when both sides qualify.
    pub fn slot_near_end_point(&self, t: DateTime<Utc>, margin: Duration) -> Option<SlotId> {
        if let Some(id) = self.slot_at_end_point(t) {
            return Some(id);
        }
        let mut best: Option<(Duration, SlotId)> = None;
        for slot in self.slots.values() {
            let distance = if slot.range.begin >= t {
                slot.range.begin - t
            } else if let Some(end) = slot.range.end {
                if end <= t {
                    t - end
                } else {
                    continue;
                }
            } else {
                continue;
            };
            if distance <= margin && best.is_none_or(|(d, _)| distance < d) {
                best = Some((distance, slot.id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Whether any slot overlaps `range`.
    pub fn has_slot_overlapping(&self, range: &TimeRange) -> bool {
        self.slots.values().any(|s| s.range.overlaps(range))
    }

    /// The slot immediately before `t` (largest end not after `t`).
    pub fn slot_ending_before(&self, t: DateTime<Utc>) -> Option<SlotId> {
        self.slots
            .values()
            .filter(|s| s.range.end.is_some_and(|e| e <= t))
            .max_by_key(|s| s.range.end)
            .map(|s| s.id)
    }

    /// Whether a single operation context holds over `[from, to)`: every
    /// slot overlapping the range refers to `operation`, with no
    /// unclassified gap.
    pub fn is_continuous_operation(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operation: Option<crate::models::OperationId>,
    ) -> bool {
        if to <= from {
            return true;
        }
        let mut covered_until = from;
        for id in self.slots_ordered() {
            let slot = &self.slots[&id];
            if !slot.range.overlaps(&TimeRange::new(from, Some(to))) {
                continue;
            }
            if slot.context.operation != operation {
                return false;
            }
            if slot.range.begin > covered_until {
                return false;
            }
            match slot.range.end {
                Some(end) => covered_until = covered_until.max(end),
                None => covered_until = to,
            }
            if covered_until >= to {
                return true;
            }
        }
        covered_until >= to
    }

    // ------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------

    pub fn insert_cycle(&mut self, cycle: OperationCycle) -> CycleId {
        let id = cycle.id;
        self.cycles.insert(id, cycle);
        id
    }

    pub fn new_cycle(&mut self) -> OperationCycle {
        let id = CycleId(self.next_cycle_id);
        self.next_cycle_id += 1;
        OperationCycle::new(id, self.machine.id)
    }

    pub fn cycle(&self, id: CycleId) -> Option<&OperationCycle> {
        self.cycles.get(&id)
    }

    pub fn cycle_mut(&mut self, id: CycleId) -> Option<&mut OperationCycle> {
        self.cycles.get_mut(&id)
    }

    pub fn remove_cycle(&mut self, id: CycleId) -> Option<OperationCycle> {
        let removed = self.cycles.remove(&id);
        if removed.is_some() {
            let dangling: Vec<BetweenCyclesId> = self
                .between_cycles
                .values()
                .filter(|b| b.previous == id || b.next == id)
                .map(|b| b.id)
                .collect();
            for between in dangling {
                self.between_cycles.remove(&between);
            }
        }
        removed
    }

    /// Cycle ids in timeline order (by representative instant, then id).
    pub fn cycles_ordered(&self) -> Vec<CycleId> {
        let mut ids: Vec<CycleId> = self.cycles.keys().copied().collect();
        ids.sort_by_key(|id| (self.cycles[id].sort_time(), id.0));
        ids
    }

    /// The most recent cycle on the machine.
    pub fn last_cycle(&self) -> Option<CycleId> {
        self.cycles_ordered().pop()
    }

    /// Cycles attached to `slot`, in timeline order.
    pub fn cycles_in_slot(&self, slot: SlotId) -> Vec<CycleId> {
        self.cycles_ordered()
            .into_iter()
            .filter(|id| self.cycles[id].slot == Some(slot))
            .collect()
    }

    // ------------------------------------------------------------------
    // Between-cycles rows
    // ------------------------------------------------------------------

    pub fn insert_between_cycles(
        &mut self,
        previous: CycleId,
        next: CycleId,
        offset_duration: Option<f64>,
    ) -> BetweenCyclesId {
        let id = BetweenCyclesId(self.next_between_id);
        self.next_between_id += 1;
        self.between_cycles.insert(
            id,
            BetweenCycles {
                id,
                machine: self.machine.id,
                previous,
                next,
                offset_duration,
            },
        );
        id
    }

    pub fn between_cycles(&self, id: BetweenCyclesId) -> Option<&BetweenCycles> {
        self.between_cycles.get(&id)
    }

    pub fn between_cycles_mut(&mut self, id: BetweenCyclesId) -> Option<&mut BetweenCycles> {
        self.between_cycles.get_mut(&id)
    }

    pub fn remove_between_cycles(&mut self, id: BetweenCyclesId) -> Option<BetweenCycles> {
        self.between_cycles.remove(&id)
    }

    pub fn between_cycles_ordered(&self) -> Vec<BetweenCyclesId> {
        self.between_cycles.keys().copied().collect()
    }

    /// The gap record whose next cycle is `cycle`, if any.
    pub fn between_with_next(&self, cycle: CycleId) -> Option<BetweenCyclesId> {
        self.between_cycles
            .values()
            .find(|b| b.next == cycle)
            .map(|b| b.id)
    }

    /// The gap record whose previous cycle is `cycle`, if any.
    pub fn between_with_previous(&self, cycle: CycleId) -> Option<BetweenCyclesId> {
        self.between_cycles
            .values()
            .find(|b| b.previous == cycle)
            .map(|b| b.id)
    }

    // ------------------------------------------------------------------
    // Detection log
    // ------------------------------------------------------------------

    pub fn log_warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("machine {}: {}", self.machine.id, message);
        self.detection_log.push(DetectionLogEntry {
            machine: self.machine.id,
            severity: Severity::Warn,
            message,
        });
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("machine {}: {}", self.machine.id, message);
        self.detection_log.push(DetectionLogEntry {
            machine: self.machine.id,
            severity: Severity::Error,
            message,
        });
    }

    pub fn detection_log(&self) -> &[DetectionLogEntry] {
        &self.detection_log
    }
}
