//! Public engine facade.
//!
//! The engine owns one store per registered machine, each behind its own
//! mutex so distinct machines can be processed by independent workers while
//! one machine's events stay strictly ordered. All mutation entry points
//! (`start_cycle`, `stop_cycle`, `start_stop_cycle`, the slot timeline
//! operations) funnel through [`MachineAnalysis`], the working context the
//! detection, timeline, gap and consolidation modules operate on.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::accumulators::{AccumulatorSet, DurationView};
use crate::config::AnalysisConfig;
use crate::detection::StartStopOutcome;
use crate::error::{DetectionError, DetectionLogEntry, DetectionResult};
use crate::models::{
    BetweenCycles, CycleCountSummary, CycleDurationSummary, CycleId, Machine, MachineId, Operation,
    OperationCycle, OperationId, OperationSlot, SlotContext, SlotId, TimeRange,
};
use crate::store::MachineStore;

/// Working context for one machine: configuration, the operation catalog,
/// the machine store and the accumulator set, borrowed for the duration of
/// one engine call.
pub(crate) struct MachineAnalysis<'a> {
    pub config: &'a AnalysisConfig,
    pub operations: &'a HashMap<OperationId, Operation>,
    pub store: &'a mut MachineStore,
    pub accumulators: &'a mut AccumulatorSet,
}

impl MachineAnalysis<'_> {
    /// Operation attached to a slot, resolved through the catalog.
    pub(crate) fn slot_operation(&self, slot: SlotId) -> Option<&Operation> {
        let id = self.store.slot(slot)?.context.operation?;
        self.operations.get(&id)
    }

    /// Percentage deviation of `observed` from `nominal`, `None` for a
    /// non-positive nominal.
    pub(crate) fn offset_percent(observed: Duration, nominal: Duration) -> Option<f64> {
        let nominal_ms = nominal.num_milliseconds() as f64;
        if nominal_ms <= 0.0 {
            return None;
        }
        let observed_ms = observed.num_milliseconds() as f64;
        Some(100.0 * (observed_ms - nominal_ms) / nominal_ms)
    }

    /// A cycle's own offset: its span against the nominal machining
    /// duration of its slot's operation.
    pub(crate) fn cycle_offset(&self, cycle: &OperationCycle) -> Option<f64> {
        let span = cycle.span()?;
        let operation = self.slot_operation(cycle.slot?)?;
        let nominal = operation.machining_duration?;
        Self::offset_percent(span, nominal)
    }

    /// How `cycle` currently contributes to the duration summary.
    pub(crate) fn duration_view(&self, cycle: CycleId) -> Option<DurationView> {
        let c = self.store.cycle(cycle)?;
        let slot = self.store.slot(c.slot?)?;
        slot.context.operation?;
        c.begin?;
        c.end?;
        let offset = c.offset_duration?;
        Some(DurationView {
            key: slot.context.summary_key(c.machine),
            offset: offset.round() as i64,
            full: c.is_full(),
        })
    }

    /// Mutate a cycle, keeping its offset and the duration accumulator in
    /// step with the change.
    pub(crate) fn update_cycle<F: FnOnce(&mut OperationCycle)>(&mut self, id: CycleId, f: F) {
        let before = self.duration_view(id);
        if let Some(cycle) = self.store.cycle_mut(id) {
            f(cycle);
        }
        self.refresh_cycle_offset(id);
        let after = self.duration_view(id);
        self.accumulators.duration.cycle_updated(before, after);
    }

    /// Recompute a cycle's offset from its current span and slot operation.
    pub(crate) fn refresh_cycle_offset(&mut self, id: CycleId) {
        let offset = self
            .store
            .cycle(id)
            .and_then(|c| self.cycle_offset(c));
        if let Some(cycle) = self.store.cycle_mut(id) {
            cycle.offset_duration = offset;
        }
    }

    /// Remove a cycle, retracting its duration summary contribution.
    pub(crate) fn remove_cycle(&mut self, id: CycleId) {
        let before = self.duration_view(id);
        self.store.remove_cycle(id);
        self.accumulators.duration.cycle_updated(before, None);
    }
}

/// The cycle detection, slot consolidation and aggregate maintenance
/// engine.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use cycle_analysis::config::AnalysisConfig;
/// use cycle_analysis::engine::Engine;
/// use cycle_analysis::models::{Machine, MachineId};
///
/// let mut engine = Engine::new(AnalysisConfig::default());
/// engine.register_machine(Machine::new(MachineId(1), "mill-1"));
/// let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
/// let cycle = engine.start_cycle(MachineId(1), at).unwrap();
/// assert!(cycle.is_some());
/// ```
pub struct Engine {
    config: AnalysisConfig,
    operations: HashMap<OperationId, Operation>,
    machines: HashMap<MachineId, Arc<Mutex<MachineStore>>>,
    accumulators: Mutex<AccumulatorSet>,
}

impl Engine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            operations: HashMap::new(),
            machines: HashMap::new(),
            accumulators: Mutex::new(AccumulatorSet::default()),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Register a machine. Its event stream starts empty.
    pub fn register_machine(&mut self, machine: Machine) {
        self.machines.insert(
            machine.id,
            Arc::new(Mutex::new(MachineStore::new(machine))),
        );
    }

    /// Register an operation in the nominal-duration catalog.
    pub fn register_operation(&mut self, operation: Operation) {
        self.operations.insert(operation.id, operation);
    }

    pub fn machine_ids(&self) -> Vec<MachineId> {
        let mut ids: Vec<MachineId> = self.machines.keys().copied().collect();
        ids.sort();
        ids
    }

    fn with_machine<R>(
        &self,
        machine: MachineId,
        f: impl FnOnce(&mut MachineAnalysis<'_>) -> DetectionResult<R>,
    ) -> DetectionResult<R> {
        let store = self
            .machines
            .get(&machine)
            .ok_or(DetectionError::UnknownMachine(machine))?
            .clone();
        let mut store = store.lock();
        let mut accumulators = self.accumulators.lock();
        let mut analysis = MachineAnalysis {
            config: &self.config,
            operations: &self.operations,
            store: &mut store,
            accumulators: &mut accumulators,
        };
        f(&mut analysis)
    }

    // ------------------------------------------------------------------
    // Cycle events
    // ------------------------------------------------------------------

    /// Process a cycle-start event. Returns the created cycle, or `None`
    /// when the event was rejected as an ordering violation.
    pub fn start_cycle(
        &self,
        machine: MachineId,
        at: DateTime<Utc>,
    ) -> DetectionResult<Option<CycleId>> {
        self.with_machine(machine, |analysis| analysis.start_cycle(at))
    }

    /// Process a cycle-stop event. Returns the cycle that received the end.
    pub fn stop_cycle(&self, machine: MachineId, at: DateTime<Utc>) -> DetectionResult<CycleId> {
        self.with_machine(machine, |analysis| analysis.stop_cycle(at))
    }

    /// Process a combined start/stop event.
    pub fn start_stop_cycle(
        &self,
        machine: MachineId,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> DetectionResult<()> {
        match self.start_stop_outcome(machine, start, stop)? {
            StartStopOutcome::Single(_) => Ok(()),
            StartStopOutcome::SplitIntoEvents => {
                self.start_cycle(machine, start)?;
                self.stop_cycle(machine, stop)?;
                Ok(())
            }
        }
    }

    /// Combined start/stop, reporting whether the event collapsed into one
    /// cycle or must be replayed as two independent events.
    pub(crate) fn start_stop_outcome(
        &self,
        machine: MachineId,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> DetectionResult<StartStopOutcome> {
        self.with_machine(machine, |analysis| analysis.start_stop_cycle(start, stop))
    }

    // ------------------------------------------------------------------
    // Slot timeline
    // ------------------------------------------------------------------

    /// Create a slot (collaborator entry point for operation detectors).
    pub fn create_slot(
        &self,
        machine: MachineId,
        range: TimeRange,
        context: SlotContext,
    ) -> DetectionResult<SlotId> {
        self.with_machine(machine, |analysis| analysis.create_slot(range, context))
    }

    /// Split a slot at `at`, returning the (left, right) pair.
    pub fn split_slot(
        &self,
        machine: MachineId,
        slot: SlotId,
        at: DateTime<Utc>,
    ) -> DetectionResult<(SlotId, SlotId)> {
        self.with_machine(machine, |analysis| analysis.split_slot(slot, at))
    }

    /// Move a slot's end boundary.
    pub fn extend_slot(
        &self,
        machine: MachineId,
        slot: SlotId,
        new_end: Option<DateTime<Utc>>,
    ) -> DetectionResult<()> {
        self.with_machine(machine, |analysis| analysis.extend_slot(slot, new_end))
    }

    /// Move a slot's begin boundary.
    pub fn move_slot_begin(
        &self,
        machine: MachineId,
        slot: SlotId,
        new_begin: DateTime<Utc>,
    ) -> DetectionResult<()> {
        self.with_machine(machine, |analysis| analysis.move_slot_begin(slot, new_begin))
    }

    /// Merge two adjacent slots with identical classification.
    pub fn merge_slots(
        &self,
        machine: MachineId,
        left: SlotId,
        right: SlotId,
    ) -> DetectionResult<SlotId> {
        self.with_machine(machine, |analysis| analysis.merge_slots(left, right))
    }

    /// Change a slot's classification, rekeying its aggregate
    /// contributions and recomputing every affected offset.
    pub fn set_slot_context(
        &self,
        machine: MachineId,
        slot: SlotId,
        context: SlotContext,
    ) -> DetectionResult<()> {
        self.with_machine(machine, |analysis| analysis.set_slot_context(slot, context))
    }

    /// Record the measured run time of a slot (activity collaborator input).
    pub fn set_slot_run_time(
        &self,
        machine: MachineId,
        slot: SlotId,
        run_time: Duration,
    ) -> DetectionResult<()> {
        self.with_machine(machine, |analysis| {
            analysis
                .store
                .slot_mut(slot)
                .ok_or(DetectionError::UnknownSlot { machine, slot })?
                .run_time = Some(run_time);
            analysis.consolidate(slot)
        })
    }

    /// Notification hook for external detectors that changed a slot.
    pub fn on_slot_changed(&self, machine: MachineId, slot: SlotId) -> DetectionResult<()> {
        self.consolidate(machine, slot)
    }

    /// Re-derive the slot's counters and attachments.
    pub fn consolidate(&self, machine: MachineId, slot: SlotId) -> DetectionResult<()> {
        self.with_machine(machine, |analysis| analysis.consolidate(slot))
    }

    // ------------------------------------------------------------------
    // Accumulators
    // ------------------------------------------------------------------

    /// Flush all pending aggregate deltas. Must be called before reading
    /// summaries.
    pub fn empty_accumulators(&self) {
        self.accumulators.lock().empty_accumulators();
    }

    pub fn cycle_count_summaries(&self) -> Vec<CycleCountSummary> {
        self.accumulators.lock().count.rows()
    }

    pub fn cycle_duration_summaries(&self) -> Vec<CycleDurationSummary> {
        self.accumulators.lock().duration.rows()
    }

    // ------------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------------

    pub fn slot(&self, machine: MachineId, slot: SlotId) -> DetectionResult<OperationSlot> {
        self.with_machine(machine, |analysis| {
            analysis
                .store
                .slot(slot)
                .cloned()
                .ok_or(DetectionError::UnknownSlot { machine, slot })
        })
    }

    /// Slots of a machine in timeline order.
    pub fn slots(&self, machine: MachineId) -> DetectionResult<Vec<OperationSlot>> {
        self.with_machine(machine, |analysis| {
            Ok(analysis
                .store
                .slots_ordered()
                .into_iter()
                .filter_map(|id| analysis.store.slot(id).cloned())
                .collect())
        })
    }

    /// Cycles of a machine in timeline order.
    pub fn cycles(&self, machine: MachineId) -> DetectionResult<Vec<OperationCycle>> {
        self.with_machine(machine, |analysis| {
            Ok(analysis
                .store
                .cycles_ordered()
                .into_iter()
                .filter_map(|id| analysis.store.cycle(id).cloned())
                .collect())
        })
    }

    pub fn between_cycles(&self, machine: MachineId) -> DetectionResult<Vec<BetweenCycles>> {
        self.with_machine(machine, |analysis| {
            Ok(analysis
                .store
                .between_cycles_ordered()
                .into_iter()
                .filter_map(|id| analysis.store.between_cycles(id).cloned())
                .collect())
        })
    }

    pub fn detection_log(&self, machine: MachineId) -> DetectionResult<Vec<DetectionLogEntry>> {
        self.with_machine(machine, |analysis| {
            Ok(analysis.store.detection_log().to_vec())
        })
    }

    // ------------------------------------------------------------------
    // Pipeline support
    // ------------------------------------------------------------------

    /// Snapshot a machine store for transactional processing.
    pub(crate) fn snapshot_machine(&self, machine: MachineId) -> DetectionResult<MachineStore> {
        self.with_machine(machine, |analysis| Ok(analysis.store.clone()))
    }

    /// Restore a machine store from a snapshot and drop the machine's
    /// pending aggregate deltas (transaction rollback).
    pub(crate) fn restore_machine(
        &self,
        machine: MachineId,
        snapshot: MachineStore,
    ) -> DetectionResult<()> {
        self.with_machine(machine, |analysis| {
            *analysis.store = snapshot;
            Ok(())
        })?;
        self.accumulators.lock().purge_machine(machine);
        Ok(())
    }

    /// Flush one machine's aggregate deltas at a transaction boundary,
    /// leaving other machines' in-flight deltas buffered.
    pub(crate) fn flush_accumulators(&self, machine: MachineId) {
        self.accumulators.lock().flush_machine(machine);
    }
}
