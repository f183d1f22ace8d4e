//! Cycle association: turning start/stop events into operation cycles.
//!
//! Every entry point is best-effort: ordering violations are logged on the
//! detection log and answered with a standalone record (or no record at
//! all), never with an `Err`. Attachment decisions use exact containment
//! for cycle begins, end-inclusive containment for cycle ends, and the
//! association margin when an event falls in a gap between slots.

use chrono::{DateTime, Utc};

use crate::engine::MachineAnalysis;
use crate::error::{DetectionError, DetectionResult};
use crate::models::{CycleId, SlotId, TimeRange};

/// How a combined start/stop event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartStopOutcome {
    /// One full cycle was created.
    Single(CycleId),
    /// The event spans an operation boundary and must be replayed as two
    /// independent start and stop events.
    SplitIntoEvents,
}

impl MachineAnalysis<'_> {
    /// Process a cycle-start event at `at`.
    ///
    /// Returns `None` when the event is rejected because a later cycle
    /// already exists.
    pub(crate) fn start_cycle(&mut self, at: DateTime<Utc>) -> DetectionResult<Option<CycleId>> {
        let prev = self.store.last_cycle();
        if let Some(p) = prev {
            let last_time = self.store.cycle(p).and_then(|c| c.sort_time());
            if last_time.is_some_and(|t| t > at) {
                self.store.log_error(format!(
                    "invalid date/time: cycle start at {} precedes the latest cycle at {}",
                    at,
                    last_time.map(|t| t.to_string()).unwrap_or_default()
                ));
                return Ok(None);
            }
        }

        let slot = self.store.slot_at(at);
        let mut cycle = self.store.new_cycle();
        cycle.set_real_begin(at);
        cycle.slot = slot;
        let id = self.store.insert_cycle(cycle);

        if let Some(p) = prev {
            self.settle_previous_on_start(p, id, at, slot);
        }

        // A slot with a known end bounds the new cycle immediately.
        if let Some(s) = slot {
            if let Some(end) = self.store.slot(s).and_then(|sl| sl.range.end) {
                self.update_cycle(id, |c| {
                    c.set_estimated_end(end);
                });
            }
            self.consolidate(s)?;
        } else {
            self.update_cycle(id, |_| {});
        }
        Ok(Some(id))
    }

    /// Close or adjust the previous cycle when a new start arrives, and
    /// create the gap record when the previous cycle is full.
    fn settle_previous_on_start(
        &mut self,
        previous: CycleId,
        new_cycle: CycleId,
        at: DateTime<Utc>,
        slot: Option<SlotId>,
    ) {
        let Some(prev) = self.store.cycle(previous).cloned() else {
            return;
        };
        if prev.is_full() {
            self.make_between_cycles(previous, new_cycle);
            return;
        }
        if prev.end.is_none() {
            self.store.log_error(format!(
                "cycle start at {} while the previous cycle is still open",
                at
            ));
        }
        let same_context = match (prev.slot, slot) {
            (a, b) if a != b => false,
            (Some(_), Some(_)) => true,
            // Both unattached: only adjacent when no slot separates them.
            (None, None) => match prev.sort_time() {
                Some(t) if t < at => !self.store.has_slot_overlapping(&TimeRange::new(t, Some(at))),
                _ => true,
            },
            _ => false,
        };
        if !same_context {
            return;
        }
        if prev.end.is_some_and(|e| e > at) {
            self.store.log_warn(format!(
                "estimated end of the previous cycle shortened to the new cycle start at {}",
                at
            ));
        }
        if prev.begin.is_none_or(|b| b <= at) {
            self.update_cycle(previous, |c| {
                c.set_estimated_end(at);
            });
        }
    }

    /// Process a cycle-stop event at `at`. Returns the cycle that received
    /// the end.
    pub(crate) fn stop_cycle(&mut self, at: DateTime<Utc>) -> DetectionResult<CycleId> {
        let Some(last_id) = self.store.last_cycle() else {
            return self.stop_without_previous(at);
        };
        let last = self
            .store
            .cycle(last_id)
            .cloned()
            .ok_or_else(|| DetectionError::internal("latest cycle disappeared"))?;

        if !last.is_full() {
            return self.stop_closing_partial(last_id, at);
        }

        // The latest cycle is already full.
        if last.end.is_some_and(|e| at < e) {
            self.store.log_error(format!(
                "invalid date/time: cycle stop at {} precedes the end of the last full cycle",
                at
            ));
            return self.create_standalone_stop(at);
        }

        if self.config.extend_full_cycle_on_new_cycle_end {
            if let (Some(_), Some(end)) = (last.slot, last.end) {
                let operation = last
                    .slot
                    .and_then(|s| self.store.slot(s))
                    .and_then(|s| s.context.operation);
                if self.store.is_continuous_operation(end, at, operation) {
                    self.update_cycle(last_id, |c| {
                        c.set_real_end(at);
                    });
                    if let Some(s) = self.store.cycle(last_id).and_then(|c| c.slot) {
                        self.consolidate(s)?;
                    }
                    return Ok(last_id);
                }
            }
        }

        // Open a new cycle closed at `at`, with an estimated begin.
        match self.locate_stop_slot(at) {
            Some(s) => {
                let slot_range = self
                    .store
                    .slot(s)
                    .map(|x| x.range)
                    .ok_or_else(|| DetectionError::internal("slot disappeared"))?;
                let estimated_begin = if last.slot == Some(s) {
                    match last.end {
                        Some(e) if slot_range.contains_end_point(e) || slot_range.begin == e => {
                            Some(e)
                        }
                        _ => {
                            self.store.log_error(
                                "previous cycle not matching slot: its end lies outside the slot it claims",
                            );
                            None
                        }
                    }
                } else {
                    None
                };
                let id = match estimated_begin {
                    Some(b) => {
                        let mut cycle = self.store.new_cycle();
                        cycle.set_estimated_begin(b);
                        cycle.slot = Some(s);
                        cycle.set_real_end(at);
                        let id = self.store.insert_cycle(cycle);
                        self.update_cycle(id, |_| {});
                        id
                    }
                    None => self.create_stop_cycle_in_slot(s, at)?,
                };
                self.consolidate(s)?;
                Ok(id)
            }
            None => {
                // No covering slot: base the estimated begin on the previous
                // cycle end, or on the end of the slot preceding the event.
                let basis = last.end.filter(|e| *e <= at).or_else(|| {
                    self.store
                        .slot_ending_before(at)
                        .and_then(|ps| self.store.slot(ps))
                        .and_then(|x| x.range.end)
                });
                let mut cycle = self.store.new_cycle();
                if let Some(b) = basis {
                    cycle.set_estimated_begin(b);
                }
                cycle.set_real_end(at);
                let id = self.store.insert_cycle(cycle);
                self.update_cycle(id, |_| {});
                Ok(id)
            }
        }
    }

    /// Stop event closing a cycle that is not yet full.
    fn stop_closing_partial(&mut self, last_id: CycleId, at: DateTime<Utc>) -> DetectionResult<CycleId> {
        let margin = self.config.association_margin();
        let last = self
            .store
            .cycle(last_id)
            .cloned()
            .ok_or_else(|| DetectionError::internal("latest cycle disappeared"))?;

        if last.begin.is_some_and(|b| b > at) {
            self.store.log_error(format!(
                "invalid date/time: cycle stop at {} precedes the begin of the open cycle",
                at
            ));
            return self.create_standalone_stop(at);
        }

        let slot = self.locate_stop_slot(at);
        if last.slot == slot {
            self.update_cycle(last_id, |c| {
                c.set_real_end(at);
            });
            if let Some(s) = slot {
                self.consolidate(s)?;
            }
            return Ok(last_id);
        }

        let Some(s) = slot else {
            // The stop falls outside any slot: close the cycle in place.
            self.update_cycle(last_id, |c| {
                c.set_real_end(at);
            });
            if let Some(os) = last.slot {
                self.consolidate(os)?;
            }
            return Ok(last_id);
        };

        let slot_begin = self
            .store
            .slot(s)
            .map(|x| x.range.begin)
            .ok_or_else(|| DetectionError::internal("slot disappeared"))?;
        let close_to_begin = last
            .begin
            .is_some_and(|b| b < slot_begin && slot_begin - b <= margin);
        let continuous = match last.slot {
            Some(os) => {
                let old_operation = self.store.slot(os).and_then(|x| x.context.operation);
                let new_operation = self.store.slot(s).and_then(|x| x.context.operation);
                let old_end = self.store.slot(os).and_then(|x| x.range.end);
                old_operation == new_operation
                    && old_end.is_some_and(|e| {
                        self.store.is_continuous_operation(e, slot_begin, new_operation)
                    })
            }
            None => false,
        };

        if close_to_begin || continuous {
            // Reattach the whole cycle to the new slot and close it there.
            self.update_cycle(last_id, |c| {
                c.slot = Some(s);
                c.set_real_end(at);
            });
            if let Some(os) = last.slot {
                self.consolidate(os)?;
            }
            self.consolidate(s)?;
            return Ok(last_id);
        }

        // The partial cycle stays behind; the stop opens a new cycle with
        // an estimated begin in the covering slot.
        let id = self.create_stop_cycle_in_slot(s, at)?;
        self.consolidate(s)?;
        Ok(id)
    }

    /// Stop event with no cycle on record yet.
    fn stop_without_previous(&mut self, at: DateTime<Utc>) -> DetectionResult<CycleId> {
        match self.locate_stop_slot(at) {
            Some(s) => {
                let id = self.create_stop_cycle_in_slot(s, at)?;
                self.consolidate(s)?;
                Ok(id)
            }
            None => self.create_standalone_stop(at),
        }
    }

    /// New cycle closed at `at` inside `slot`, with an estimated begin
    /// taken from the last full cycle of the slot or from the slot begin,
    /// when either precedes the stop.
    fn create_stop_cycle_in_slot(&mut self, slot: SlotId, at: DateTime<Utc>) -> DetectionResult<CycleId> {
        let slot_data = self
            .store
            .slot(slot)
            .cloned()
            .ok_or_else(|| DetectionError::internal("slot disappeared"))?;
        let in_slot = self.store.cycles_in_slot(slot);
        let estimated_begin = in_slot
            .iter()
            .rev()
            .filter_map(|id| self.store.cycle(*id))
            .find(|c| c.is_full() && c.end.is_some_and(|e| e <= at))
            .and_then(|c| c.end)
            .unwrap_or(slot_data.range.begin);
        if in_slot.is_empty() && slot_data.total_cycles != 0 {
            self.store.log_error(format!(
                "incoherent total cycles: slot {} claims {} full cycles but has none attached",
                slot, slot_data.total_cycles
            ));
        }
        let mut cycle = self.store.new_cycle();
        cycle.set_real_end(at);
        // A slot starting after the stop (margin attachment) yields no
        // usable estimate: the begin stays unset.
        if estimated_begin <= at {
            cycle.set_estimated_begin(estimated_begin);
        }
        cycle.slot = Some(slot);
        let id = self.store.insert_cycle(cycle);
        self.update_cycle(id, |_| {});
        Ok(id)
    }

    /// Unattached cycle holding only the stop boundary.
    fn create_standalone_stop(&mut self, at: DateTime<Utc>) -> DetectionResult<CycleId> {
        let mut cycle = self.store.new_cycle();
        cycle.set_real_end(at);
        let id = self.store.insert_cycle(cycle);
        self.update_cycle(id, |_| {});
        Ok(id)
    }

    /// Slot a stop event belongs to. Exact end-inclusive containment wins;
    /// otherwise the nearest slot boundary within the association margin is
    /// used, extending the slot forward (with a warning) when the stop
    /// falls shortly after its end.
    fn locate_stop_slot(&mut self, at: DateTime<Utc>) -> Option<SlotId> {
        if let Some(s) = self.store.slot_at_end_point(at) {
            return Some(s);
        }
        let margin = self.config.association_margin();
        let s = self.store.slot_near_end_point(at, margin)?;
        let needs_extension = self
            .store
            .slot(s)
            .and_then(|x| x.range.end)
            .is_some_and(|e| e < at);
        if needs_extension {
            self.store.log_warn(format!(
                "slot {} extended to {} to accommodate a late cycle end",
                s, at
            ));
            if let Some(slot) = self.store.slot_mut(s) {
                slot.range.end = Some(at);
            }
        }
        Some(s)
    }

    /// Process a combined start/stop event.
    pub(crate) fn start_stop_cycle(
        &mut self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> DetectionResult<StartStopOutcome> {
        if stop < start {
            return Err(DetectionError::invalid_timeline(format!(
                "start/stop cycle with stop {} before start {}",
                stop, start
            )));
        }
        let margin = self.config.association_margin();
        if let Some(s) = self.store.slot_at_end_point(stop) {
            let slot_begin = self.store.slot(s).map(|x| x.range.begin);
            let operation = self.store.slot(s).and_then(|x| x.context.operation);
            if let Some(slot_begin) = slot_begin {
                if start < slot_begin - margin
                    && !self.store.is_continuous_operation(start, slot_begin, operation)
                {
                    return Ok(StartStopOutcome::SplitIntoEvents);
                }
            }
        }

        let prev = self.store.last_cycle();
        if let Some(p) = prev {
            let last_time = self.store.cycle(p).and_then(|c| c.sort_time());
            if last_time.is_some_and(|t| t > start) {
                self.store.log_error(format!(
                    "invalid date/time: cycle start at {} precedes the latest cycle at {}",
                    start,
                    last_time.map(|t| t.to_string()).unwrap_or_default()
                ));
            }
        }

        let slot = self.locate_stop_slot(stop);
        let mut cycle = self.store.new_cycle();
        cycle.set_real_begin(start);
        cycle.slot = slot;
        cycle.set_real_end(stop);
        let id = self.store.insert_cycle(cycle);

        if let Some(p) = prev {
            self.settle_previous_on_start(p, id, start, slot);
        }
        self.update_cycle(id, |_| {});
        if let Some(s) = slot {
            self.consolidate(s)?;
        }
        Ok(StartStopOutcome::Single(id))
    }
}
