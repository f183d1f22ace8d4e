//! Slot timeline maintenance.
//!
//! Slots form a non-overlapping sequence per machine. Every operation here
//! validates the geometry first, applies the change, then consolidates the
//! touched slots so attachments, counters and gap records catch up with the
//! new boundaries.

use chrono::{DateTime, Utc};

use crate::engine::MachineAnalysis;
use crate::error::{DetectionError, DetectionResult};
use crate::models::{SlotContext, SlotId, TimeRange};

impl MachineAnalysis<'_> {
    fn overlaps_other_slot(&self, slot: Option<SlotId>, range: &TimeRange) -> bool {
        self.store
            .slots_ordered()
            .into_iter()
            .filter(|id| Some(*id) != slot)
            .filter_map(|id| self.store.slot(id))
            .any(|s| s.range.overlaps(range))
    }

    pub(crate) fn create_slot(
        &mut self,
        range: TimeRange,
        context: SlotContext,
    ) -> DetectionResult<SlotId> {
        if self.overlaps_other_slot(None, &range) {
            return Err(DetectionError::invalid_timeline(format!(
                "new slot {} overlaps an existing slot",
                range
            )));
        }
        let id = self.store.insert_slot(range, context);
        self.consolidate(id)?;
        Ok(id)
    }

    /// Split a slot at `at`, which must lie strictly inside it. The left
    /// part keeps the slot id and the measured run time, the right part is
    /// a new slot with the same classification.
    pub(crate) fn split_slot(
        &mut self,
        slot: SlotId,
        at: DateTime<Utc>,
    ) -> DetectionResult<(SlotId, SlotId)> {
        let existing = self.store.slot(slot).cloned().ok_or(DetectionError::UnknownSlot {
            machine: self.store.machine_id(),
            slot,
        })?;
        let interior =
            existing.range.begin < at && existing.range.end.is_none_or(|e| at < e);
        if !interior {
            return Err(DetectionError::invalid_timeline(format!(
                "split point {} is not strictly inside slot {}",
                at, existing.range
            )));
        }
        let right_range = TimeRange {
            begin: at,
            end: existing.range.end,
        };
        if let Some(left) = self.store.slot_mut(slot) {
            left.range.end = Some(at);
        }
        let right = self.store.insert_slot(right_range, existing.context);
        self.consolidate(slot)?;
        self.consolidate(right)?;
        Ok((slot, right))
    }

    /// Move a slot's end boundary, `None` meaning open-ended.
    pub(crate) fn extend_slot(
        &mut self,
        slot: SlotId,
        new_end: Option<DateTime<Utc>>,
    ) -> DetectionResult<()> {
        let existing = self.store.slot(slot).cloned().ok_or(DetectionError::UnknownSlot {
            machine: self.store.machine_id(),
            slot,
        })?;
        if new_end.is_some_and(|e| e <= existing.range.begin) {
            return Err(DetectionError::invalid_timeline(format!(
                "slot end {} would not follow the slot begin {}",
                new_end.map(|e| e.to_string()).unwrap_or_default(),
                existing.range.begin
            )));
        }
        let new_range = TimeRange {
            begin: existing.range.begin,
            end: new_end,
        };
        if self.overlaps_other_slot(Some(slot), &new_range) {
            return Err(DetectionError::invalid_timeline(format!(
                "extending slot {} to {} overlaps a neighbouring slot",
                slot, new_range
            )));
        }
        if let Some(s) = self.store.slot_mut(slot) {
            s.range = new_range;
        }
        self.consolidate(slot)?;
        if self.config.every_slot_consolidation {
            self.consolidate_following(slot, new_end)?;
        }
        Ok(())
    }

    /// Move a slot's begin boundary.
    pub(crate) fn move_slot_begin(
        &mut self,
        slot: SlotId,
        new_begin: DateTime<Utc>,
    ) -> DetectionResult<()> {
        let existing = self.store.slot(slot).cloned().ok_or(DetectionError::UnknownSlot {
            machine: self.store.machine_id(),
            slot,
        })?;
        if existing.range.end.is_some_and(|e| e <= new_begin) {
            return Err(DetectionError::invalid_timeline(format!(
                "slot begin {} would not precede the slot end",
                new_begin
            )));
        }
        let new_range = TimeRange {
            begin: new_begin,
            end: existing.range.end,
        };
        if self.overlaps_other_slot(Some(slot), &new_range) {
            return Err(DetectionError::invalid_timeline(format!(
                "moving slot {} begin to {} overlaps a neighbouring slot",
                slot, new_begin
            )));
        }
        if let Some(s) = self.store.slot_mut(slot) {
            s.range = new_range;
        }
        self.consolidate(slot)?;
        if self.config.every_slot_consolidation {
            self.consolidate_preceding(slot, new_begin)?;
        }
        Ok(())
    }

    /// Merge two adjacent slots carrying the same classification into the
    /// left one.
    pub(crate) fn merge_slots(&mut self, left: SlotId, right: SlotId) -> DetectionResult<SlotId> {
        let machine = self.store.machine_id();
        let left_data = self
            .store
            .slot(left)
            .cloned()
            .ok_or(DetectionError::UnknownSlot { machine, slot: left })?;
        let right_data = self
            .store
            .slot(right)
            .cloned()
            .ok_or(DetectionError::UnknownSlot { machine, slot: right })?;
        if left_data.range.end != Some(right_data.range.begin) {
            return Err(DetectionError::invalid_timeline(format!(
                "slots {} and {} are not adjacent",
                left, right
            )));
        }
        if left_data.context != right_data.context {
            return Err(DetectionError::invalid_timeline(format!(
                "slots {} and {} carry different classifications",
                left, right
            )));
        }

        // Retract the right slot's counter contribution; the merged slot is
        // re-counted by the consolidation below.
        let key = right_data.context.summary_key(machine);
        self.accumulators.count.apply(
            key,
            -i64::from(right_data.total_cycles),
            -i64::from(right_data.partial_cycles),
        );

        for cycle in self.store.cycles_in_slot(right) {
            self.update_cycle(cycle, |c| {
                c.slot = Some(left);
            });
        }
        self.store.remove_slot(right);

        let run_time = match (left_data.run_time, right_data.run_time) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        if let Some(s) = self.store.slot_mut(left) {
            s.range.end = right_data.range.end;
            s.run_time = run_time;
        }
        self.consolidate(left)?;
        Ok(left)
    }

    /// Change a slot's classification, rekeying its aggregate contributions
    /// and refreshing every attached cycle's offset.
    pub(crate) fn set_slot_context(
        &mut self,
        slot: SlotId,
        context: SlotContext,
    ) -> DetectionResult<()> {
        let machine = self.store.machine_id();
        let existing = self
            .store
            .slot(slot)
            .cloned()
            .ok_or(DetectionError::UnknownSlot { machine, slot })?;

        let attached = self.store.cycles_in_slot(slot);
        let before: Vec<_> = attached
            .iter()
            .map(|id| (*id, self.duration_view(*id)))
            .collect();

        let old_key = existing.context.summary_key(machine);
        let new_key = context.summary_key(machine);
        if old_key != new_key {
            self.accumulators.count.apply(
                old_key,
                -i64::from(existing.total_cycles),
                -i64::from(existing.partial_cycles),
            );
            self.accumulators.count.apply(
                new_key,
                i64::from(existing.total_cycles),
                i64::from(existing.partial_cycles),
            );
        }

        if let Some(s) = self.store.slot_mut(slot) {
            s.context = context;
        }

        for (id, before_view) in before {
            self.refresh_cycle_offset(id);
            let after_view = self.duration_view(id);
            self.accumulators.duration.cycle_updated(before_view, after_view);
        }
        self.consolidate(slot)
    }

    /// Consolidate the slot that starts where `slot` now ends.
    fn consolidate_following(
        &mut self,
        slot: SlotId,
        boundary: Option<DateTime<Utc>>,
    ) -> DetectionResult<()> {
        let Some(boundary) = boundary else {
            return Ok(());
        };
        let next = self
            .store
            .slots_ordered()
            .into_iter()
            .filter(|id| *id != slot)
            .find(|id| {
                self.store
                    .slot(*id)
                    .is_some_and(|s| s.range.begin >= boundary)
            });
        match next {
            Some(next) => self.consolidate(next),
            None => Ok(()),
        }
    }

    /// Consolidate the slot that ends where `slot` now begins.
    fn consolidate_preceding(
        &mut self,
        slot: SlotId,
        boundary: DateTime<Utc>,
    ) -> DetectionResult<()> {
        let previous = self
            .store
            .slots_ordered()
            .into_iter()
            .filter(|id| *id != slot)
            .filter(|id| {
                self.store
                    .slot(*id)
                    .is_some_and(|s| s.range.end.is_some_and(|e| e <= boundary))
            })
            .last();
        match previous {
            Some(previous) => self.consolidate(previous),
            None => Ok(()),
        }
    }
}
