//! Slot consolidation: re-deriving cycle attachments and slot counters.
//!
//! `consolidate` is the single repair entry point. It re-associates every
//! cycle whose period pertains to the slot (splitting or merging cycles
//! that straddle its boundaries), re-derives estimated boundaries, then
//! recomputes the slot counters and emits the count deltas to the
//! accumulators. The whole pass is idempotent: consolidating a slot twice
//! in a row leaves the store unchanged.

use chrono::Duration;

use crate::engine::MachineAnalysis;
use crate::error::{DetectionError, DetectionResult};
use crate::models::{CycleId, OperationCycle, OperationId, SlotId, TimeRange};

/// How a cycle relates to a slot period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotFit {
    Incompatible,
    /// The cycle belongs to the slot as a whole.
    Whole,
    /// The real begin lies in the slot, the real end beyond it: keep the
    /// begin part, split the end off.
    KeepBegin,
    /// The real end lies in the slot, the real begin well before it: split
    /// the begin part off, keep the end part.
    KeepEnd,
    /// Real end in the slot, begin estimated or missing: re-derive the
    /// estimated begin.
    EstimateBegin,
    /// Real begin in the slot, end estimated or missing: re-derive the
    /// estimated end.
    EstimateEnd,
}

impl MachineAnalysis<'_> {
    /// Re-derive the slot's cycle attachments, counters and gap records.
    pub(crate) fn consolidate(&mut self, slot: SlotId) -> DetectionResult<()> {
        if self.store.slot(slot).is_none() {
            return Err(DetectionError::UnknownSlot {
                machine: self.store.machine_id(),
                slot,
            });
        }
        self.associate_cycles(slot)?;
        self.recompute_counters(slot)?;
        self.refresh_between_cycles();
        Ok(())
    }

    fn slot_fit(
        &self,
        cycle: &OperationCycle,
        range: &TimeRange,
        operation: Option<OperationId>,
    ) -> SlotFit {
        let margin = self.config.association_margin();
        let real_begin = cycle.begin.filter(|_| !cycle.status.begin_estimated);
        let real_end = cycle.end.filter(|_| !cycle.status.end_estimated);
        match (real_begin, real_end) {
            (Some(b), Some(e)) => {
                let begin_in = range.contains(b);
                let end_in = range.contains_end_point(e);
                if begin_in && end_in {
                    SlotFit::Whole
                } else if end_in && b < range.begin {
                    if range.begin - b <= margin
                        || self.store.is_continuous_operation(b, range.begin, operation)
                    {
                        SlotFit::Whole
                    } else {
                        SlotFit::KeepEnd
                    }
                } else if begin_in {
                    match range.end {
                        Some(end) if e > end => {
                            if end - b >= margin {
                                SlotFit::KeepBegin
                            } else {
                                // The whole cycle moves to the next slot.
                                SlotFit::Incompatible
                            }
                        }
                        _ => SlotFit::Incompatible,
                    }
                } else {
                    SlotFit::Incompatible
                }
            }
            (None, Some(e)) => {
                // The margin also keeps a cycle whose end fell shortly
                // before the slot begin attached to it.
                if range.contains_end_point(e)
                    || (e <= range.begin && range.begin - e <= margin)
                {
                    SlotFit::EstimateBegin
                } else {
                    SlotFit::Incompatible
                }
            }
            (Some(b), None) => {
                if range.contains(b) {
                    SlotFit::EstimateEnd
                } else {
                    SlotFit::Incompatible
                }
            }
            (None, None) => SlotFit::Incompatible,
        }
    }

    /// Sweep the cycles pertaining to the slot period and repair their
    /// attachments and estimated boundaries.
    fn associate_cycles(&mut self, slot: SlotId) -> DetectionResult<()> {
        let slot_data = self
            .store
            .slot(slot)
            .cloned()
            .ok_or_else(|| DetectionError::internal("slot disappeared"))?;
        let range = slot_data.range;
        let operation = slot_data.context.operation;
        let margin = self.config.association_margin();

        // Detach cycles that claim the slot but no longer pertain to it.
        for id in self.store.cycles_in_slot(slot) {
            let Some(cycle) = self.store.cycle(id).cloned() else {
                continue;
            };
            if self.slot_fit(&cycle, &range, operation) == SlotFit::Incompatible {
                let overlaps = match (cycle.begin, cycle.end) {
                    (Some(b), end) => range.overlaps(&TimeRange::new(b, end)),
                    (None, Some(e)) => range.contains_end_point(e),
                    (None, None) => false,
                };
                if !overlaps {
                    self.store.log_error(format!(
                        "cycle {} attached to slot {} but lies outside it",
                        id, slot
                    ));
                }
                self.update_cycle(id, |c| {
                    c.slot = None;
                });
            }
        }

        let mut previous = self.previous_cycle_for_slot(slot, &range, operation);
        for id in self.store.cycles_ordered() {
            let Some(cycle) = self.store.cycle(id).cloned() else {
                continue;
            };
            if previous == Some(id) {
                continue;
            }
            if cycle.end.is_some_and(|e| e <= range.begin) {
                continue;
            }
            let beyond = match range.end {
                Some(end) => {
                    cycle.begin.is_some_and(|b| b >= end)
                        || (cycle.begin.is_none() && cycle.end.is_some_and(|e| e > end))
                }
                None => false,
            };
            if beyond {
                self.try_merge_on_the_right(previous, id, &range, margin);
                break;
            }
            match self.slot_fit(&cycle, &range, operation) {
                SlotFit::Incompatible => continue,
                SlotFit::Whole => {
                    self.close_previous_at(previous, &cycle);
                    self.update_cycle(id, |c| {
                        c.slot = Some(slot);
                    });
                    previous = Some(id);
                }
                SlotFit::KeepBegin => {
                    self.close_previous_at(previous, &cycle);
                    self.split_cycle_keep_begin(id, slot, &range);
                    previous = Some(id);
                }
                SlotFit::KeepEnd => {
                    self.split_cycle_keep_end(id, slot, &range);
                    previous = Some(id);
                }
                SlotFit::EstimateBegin => {
                    if let Some(merged) = self.try_merge_with_previous(previous, id, &range, margin)
                    {
                        self.update_cycle(merged, |c| {
                            c.slot = Some(slot);
                        });
                        previous = Some(merged);
                        continue;
                    }
                    let estimated = match previous.and_then(|p| self.store.cycle(p)) {
                        None => range.begin,
                        Some(prev) if prev.is_full() => prev.end.unwrap_or(range.begin),
                        Some(prev) => prev.begin.map_or(range.begin, |b| b.max(range.begin)),
                    };
                    self.update_cycle(id, |c| {
                        c.set_estimated_begin(estimated);
                        c.slot = Some(slot);
                    });
                    previous = Some(id);
                }
                SlotFit::EstimateEnd => {
                    self.close_previous_at(previous, &cycle);
                    self.update_cycle(id, |c| {
                        c.slot = Some(slot);
                    });
                    previous = Some(id);
                }
            }
        }

        // A trailing partial cycle is bounded by the slot end.
        if let (Some(p), Some(end)) = (previous, range.end) {
            let tail = self.store.cycle(p).cloned();
            if let Some(tail) = tail {
                if tail.slot == Some(slot)
                    && !tail.is_full()
                    && tail.end != Some(end)
                    && tail.begin.is_none_or(|b| b <= end)
                {
                    self.update_cycle(p, |c| {
                        c.set_estimated_end(end);
                    });
                }
            }
        }
        Ok(())
    }

    /// The cycle to consider as preceding the slot's first own cycle: the
    /// latest cycle before the slot begin, when it is attached to this slot,
    /// is a partial cycle close to the slot start, or runs under the same
    /// operation right up to the slot begin.
    fn previous_cycle_for_slot(
        &self,
        slot: SlotId,
        range: &TimeRange,
        operation: Option<OperationId>,
    ) -> Option<CycleId> {
        let margin = self.config.association_margin();
        // The latest cycle lying before the slot: closed at or before the
        // slot begin, or still open and begun before it.
        let id = self
            .store
            .cycles_ordered()
            .into_iter()
            .rev()
            .find(|id| {
                self.store.cycle(*id).is_some_and(|c| match c.end {
                    Some(e) => e <= range.begin,
                    None => c.begin.is_some_and(|b| b < range.begin),
                })
            })?;
        let cycle = self.store.cycle(id)?;
        if cycle.slot == Some(slot) {
            return Some(id);
        }
        let close_partial = !cycle.is_full()
            && cycle
                .begin
                .is_some_and(|b| b < range.begin && range.begin - b < margin);
        if close_partial {
            return Some(id);
        }
        let same_operation = cycle
            .slot
            .and_then(|s| self.store.slot(s))
            .is_some_and(|s| {
                s.context.operation == operation
                    && s.range
                        .end
                        .is_some_and(|e| {
                            e == range.begin
                                || self.store.is_continuous_operation(e, range.begin, operation)
                        })
            });
        if same_operation {
            return Some(id);
        }
        None
    }

    /// Close a still-open or estimated-end previous cycle at the begin of
    /// the cycle that follows it.
    fn close_previous_at(&mut self, previous: Option<CycleId>, current: &OperationCycle) {
        let (Some(p), Some(b)) = (previous, current.begin) else {
            return;
        };
        let Some(prev) = self.store.cycle(p) else {
            return;
        };
        if prev.is_full() || prev.begin.is_some_and(|pb| pb > b) {
            return;
        }
        if prev.end != Some(b) {
            self.update_cycle(p, |c| {
                c.set_estimated_end(b);
            });
        }
    }

    /// A partial previous cycle with a real begin absorbs a following cycle
    /// that only has an estimated (or missing) begin: the follower receives
    /// the real begin and the previous cycle disappears. Only partials
    /// begun inside the slot, or within the margin before it, qualify.
    fn try_merge_with_previous(
        &mut self,
        previous: Option<CycleId>,
        current: CycleId,
        range: &TimeRange,
        margin: Duration,
    ) -> Option<CycleId> {
        let p = previous?;
        let prev = self.store.cycle(p)?;
        if prev.is_full() || prev.status.begin_estimated {
            return None;
        }
        let begin = prev.begin?;
        if begin < range.begin - margin {
            return None;
        }
        if self.store.cycle(current)?.end.is_some_and(|e| e < begin) {
            return None;
        }
        if let Some(row) = self.store.between_with_next(p) {
            if let Some(row) = self.store.between_cycles_mut(row) {
                row.next = current;
            }
        }
        self.remove_cycle(p);
        self.update_cycle(current, |c| {
            c.set_real_begin(begin);
        });
        Some(current)
    }

    /// A partial cycle started within the margin before the slot end merges
    /// with an estimated-begin cycle lying beyond the slot.
    fn try_merge_on_the_right(
        &mut self,
        previous: Option<CycleId>,
        current: CycleId,
        range: &TimeRange,
        margin: Duration,
    ) {
        let Some(end) = range.end else {
            return;
        };
        let Some(p) = previous else {
            return;
        };
        let qualifies = self.store.cycle(p).is_some_and(|prev| {
            !prev.is_full()
                && !prev.status.begin_estimated
                && prev.begin.is_some_and(|b| b < end && end - b <= margin)
        });
        let follower = self.store.cycle(current).is_some_and(|c| {
            (c.begin.is_none() || c.status.begin_estimated)
                && c.end.is_some()
                && !c.status.end_estimated
        });
        if qualifies && follower {
            self.try_merge_with_previous(Some(p), current, range, margin);
        }
    }

    /// Split a cycle whose real begin lies in the slot but whose real end
    /// goes beyond it: the original keeps the begin part, a new cycle takes
    /// the end.
    fn split_cycle_keep_begin(&mut self, id: CycleId, slot: SlotId, range: &TimeRange) {
        let Some(end) = range.end else {
            return;
        };
        let Some(real_end) = self.store.cycle(id).and_then(|c| c.end) else {
            return;
        };
        let mut tail = self.store.new_cycle();
        tail.set_estimated_begin(end);
        tail.set_real_end(real_end);
        tail.slot = self.store.slot_at_end_point(real_end);
        let tail = self.store.insert_cycle(tail);
        self.update_cycle(tail, |_| {});
        if let Some(row) = self.store.between_with_previous(id) {
            if let Some(row) = self.store.between_cycles_mut(row) {
                row.previous = tail;
            }
        }
        self.update_cycle(id, |c| {
            c.set_estimated_end(end);
            c.slot = Some(slot);
        });
    }

    /// Split a cycle whose real end lies in the slot but whose real begin
    /// lies well before it: a new cycle takes the begin part, the original
    /// keeps the end.
    fn split_cycle_keep_end(&mut self, id: CycleId, slot: SlotId, range: &TimeRange) {
        let Some(real_begin) = self.store.cycle(id).and_then(|c| c.begin) else {
            return;
        };
        let mut head = self.store.new_cycle();
        head.set_real_begin(real_begin);
        head.set_estimated_end(range.begin);
        head.slot = self.store.slot_at(real_begin);
        let head = self.store.insert_cycle(head);
        self.update_cycle(head, |_| {});
        if let Some(row) = self.store.between_with_next(id) {
            if let Some(row) = self.store.between_cycles_mut(row) {
                row.next = head;
            }
        }
        let begin = range.begin;
        self.update_cycle(id, |c| {
            c.set_estimated_begin(begin);
            c.slot = Some(slot);
        });
    }

    /// Recompute the slot counters from its attached cycles and emit the
    /// count deltas.
    fn recompute_counters(&mut self, slot: SlotId) -> DetectionResult<()> {
        let slot_data = self
            .store
            .slot(slot)
            .cloned()
            .ok_or_else(|| DetectionError::internal("slot disappeared"))?;

        let mut total: u32 = 0;
        let mut partial: u32 = 0;
        let mut first_full_end = None;
        let mut last_full_end = None;
        for id in self.store.cycles_in_slot(slot) {
            let Some(cycle) = self.store.cycle(id) else {
                continue;
            };
            if cycle.is_full() {
                total += 1;
                let end = cycle.end;
                if first_full_end.is_none() || end < first_full_end {
                    first_full_end = end;
                }
                if end > last_full_end {
                    last_full_end = end;
                }
            } else {
                partial += 1;
            }
        }

        // The average derives from the period spanned by the full cycle
        // ends, which covers total - 1 whole cycles.
        let average = match (total, first_full_end, last_full_end) {
            (n, Some(first), Some(last)) if n > 1 => Some((last - first) / (n as i32 - 1)),
            _ => None,
        };

        let run_time = match slot_data.run_time {
            Some(rt) if rt < Duration::zero() => {
                self.store.log_error(format!(
                    "negative run time on slot {}, clamped to zero",
                    slot
                ));
                Some(Duration::zero())
            }
            other => other,
        };

        let key = slot_data.context.summary_key(self.store.machine_id());
        self.accumulators.count.apply(
            key,
            i64::from(total) - i64::from(slot_data.total_cycles),
            i64::from(partial) - i64::from(slot_data.partial_cycles),
        );

        let updated = self
            .store
            .slot_mut(slot)
            .ok_or_else(|| DetectionError::internal("slot disappeared"))?;
        updated.total_cycles = total;
        updated.partial_cycles = partial;
        updated.average_cycle_time = average;
        updated.run_time = run_time;
        Ok(())
    }
}
