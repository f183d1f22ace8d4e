//! Modification pipeline: ordered, transactional event processing.
//!
//! Events arrive as modifications queued per machine and are applied
//! strictly in submission order for one machine. Each modification runs
//! against a snapshot of the machine store: on success the pending
//! aggregate deltas are flushed, on failure the store is rolled back, the
//! modification is marked in error and processing moves on. A combined
//! start/stop event that cannot collapse into one cycle fans out into two
//! sub-modifications which run before anything queued later.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{DetectionError, DetectionResult};
use crate::models::{MachineId, ModificationId, SlotId};

/// Lifecycle of one modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    /// Created, not queued yet.
    New,
    /// Queued, waiting its turn.
    Pending,
    /// Currently being applied.
    InProgress,
    /// Fanned out into sub-modifications that have not all completed.
    PendingSubModifications,
    /// Applied and flushed.
    Done,
    /// Failed and rolled back.
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Done | AnalysisStatus::Error)
    }
}

/// What a modification asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    StartCycle { at: DateTime<Utc> },
    StopCycle { at: DateTime<Utc> },
    StartStopCycle { start: DateTime<Utc>, stop: DateTime<Utc> },
    SlotChanged { slot: SlotId },
}

#[derive(Debug, Clone)]
pub struct Modification {
    pub id: ModificationId,
    pub machine: MachineId,
    pub kind: ModificationKind,
    pub status: AnalysisStatus,
    pub parent: Option<ModificationId>,
    pub sub_modifications: Vec<ModificationId>,
    pub error: Option<String>,
}

impl Modification {
    fn new(id: ModificationId, machine: MachineId, kind: ModificationKind) -> Self {
        Self {
            id,
            machine,
            kind,
            status: AnalysisStatus::New,
            parent: None,
            sub_modifications: Vec::new(),
            error: None,
        }
    }
}

#[derive(Default)]
struct PipelineState {
    modifications: HashMap<ModificationId, Modification>,
    queues: HashMap<MachineId, VecDeque<ModificationId>>,
    next_id: i64,
}

impl PipelineState {
    fn allocate(&mut self, machine: MachineId, kind: ModificationKind) -> ModificationId {
        self.next_id += 1;
        let id = ModificationId(self.next_id);
        self.modifications
            .insert(id, Modification::new(id, machine, kind));
        id
    }
}

/// The pipeline wraps an engine and serializes modifications per machine.
pub struct Pipeline {
    engine: Engine,
    state: Mutex<PipelineState>,
    /// Per-machine processing guards: one worker at a time runs a
    /// modification for a given machine, from queue pop to commit.
    processing: Mutex<HashMap<MachineId, Arc<Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            state: Mutex::new(PipelineState::default()),
            processing: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Queue a modification for its machine. It runs after everything
    /// already queued for that machine.
    pub fn submit(&self, machine: MachineId, kind: ModificationKind) -> ModificationId {
        let mut state = self.state.lock();
        let id = state.allocate(machine, kind);
        if let Some(m) = state.modifications.get_mut(&id) {
            m.status = AnalysisStatus::Pending;
        }
        state.queues.entry(machine).or_default().push_back(id);
        id
    }

    pub fn modification(&self, id: ModificationId) -> Option<Modification> {
        self.state.lock().modifications.get(&id).cloned()
    }

    /// Whether any modification is still queued for `machine`.
    pub fn has_pending(&self, machine: MachineId) -> bool {
        self.state
            .lock()
            .queues
            .get(&machine)
            .is_some_and(|q| !q.is_empty())
    }

    /// Run the next queued modification of `machine`, if any. Returns the
    /// modification that ran.
    ///
    /// Concurrent callers for the same machine are serialized: the queue
    /// pop, the snapshot, the apply and the commit or rollback happen
    /// under one per-machine guard.
    pub fn run_first(&self, machine: MachineId) -> DetectionResult<Option<ModificationId>> {
        let guard = {
            let mut processing = self.processing.lock();
            processing.entry(machine).or_default().clone()
        };
        let _serialized = guard.lock();

        let next = {
            let mut state = self.state.lock();
            let id = state.queues.get_mut(&machine).and_then(|q| q.pop_front());
            if let Some(id) = id {
                if let Some(m) = state.modifications.get_mut(&id) {
                    m.status = AnalysisStatus::InProgress;
                }
            }
            id
        };
        let Some(id) = next else {
            return Ok(None);
        };

        let kind = self
            .state
            .lock()
            .modifications
            .get(&id)
            .map(|m| m.kind)
            .ok_or_else(|| {
                DetectionError::InvalidModificationState(format!(
                    "modification {} disappeared from the pipeline",
                    id
                ))
            })?;

        let snapshot = self.engine.snapshot_machine(machine)?;
        let result = self.apply(machine, id, kind);
        match result {
            Ok(()) => {
                self.engine.flush_accumulators(machine);
                self.complete(id, AnalysisStatus::Done, None);
            }
            Err(err) => {
                self.engine.restore_machine(machine, snapshot)?;
                self.complete(id, AnalysisStatus::Error, Some(err.to_string()));
            }
        }
        Ok(Some(id))
    }

    fn apply(
        &self,
        machine: MachineId,
        id: ModificationId,
        kind: ModificationKind,
    ) -> DetectionResult<()> {
        match kind {
            ModificationKind::StartCycle { at } => {
                self.engine.start_cycle(machine, at)?;
                Ok(())
            }
            ModificationKind::StopCycle { at } => {
                self.engine.stop_cycle(machine, at)?;
                Ok(())
            }
            ModificationKind::StartStopCycle { start, stop } => {
                match self.engine.start_stop_outcome(machine, start, stop)? {
                    crate::detection::StartStopOutcome::Single(_) => Ok(()),
                    crate::detection::StartStopOutcome::SplitIntoEvents => {
                        self.fan_out(machine, id, start, stop);
                        Ok(())
                    }
                }
            }
            ModificationKind::SlotChanged { slot } => self.engine.on_slot_changed(machine, slot),
        }
    }

    /// Replace a start/stop modification by two sub-modifications that run
    /// before anything queued later for the machine.
    fn fan_out(
        &self,
        machine: MachineId,
        parent: ModificationId,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) {
        let mut state = self.state.lock();
        let start_id = state.allocate(machine, ModificationKind::StartCycle { at: start });
        let stop_id = state.allocate(machine, ModificationKind::StopCycle { at: stop });
        for child in [start_id, stop_id] {
            if let Some(m) = state.modifications.get_mut(&child) {
                m.status = AnalysisStatus::Pending;
                m.parent = Some(parent);
            }
        }
        if let Some(m) = state.modifications.get_mut(&parent) {
            m.status = AnalysisStatus::PendingSubModifications;
            m.sub_modifications = vec![start_id, stop_id];
        }
        let queue = state.queues.entry(machine).or_default();
        queue.push_front(stop_id);
        queue.push_front(start_id);
    }

    /// Record a terminal status, propagating completion to a fanned-out
    /// parent once all its children reached a terminal state.
    fn complete(&self, id: ModificationId, status: AnalysisStatus, error: Option<String>) {
        let mut state = self.state.lock();
        let parent = match state.modifications.get_mut(&id) {
            Some(m) => {
                // A fanned-out parent stays pending on its children.
                if m.status != AnalysisStatus::PendingSubModifications {
                    m.status = status;
                    m.error = error;
                }
                m.parent
            }
            None => None,
        };
        let Some(parent) = parent else {
            return;
        };
        let children = state
            .modifications
            .get(&parent)
            .map(|m| m.sub_modifications.clone())
            .unwrap_or_default();
        let statuses: Vec<AnalysisStatus> = children
            .iter()
            .filter_map(|c| state.modifications.get(c))
            .map(|m| m.status)
            .collect();
        if !statuses.iter().all(|s| s.is_terminal()) {
            return;
        }
        let failed = statuses.iter().any(|s| *s == AnalysisStatus::Error);
        if let Some(m) = state.modifications.get_mut(&parent) {
            if failed {
                m.status = AnalysisStatus::Error;
                m.error = Some("a sub-modification failed".into());
            } else {
                m.status = AnalysisStatus::Done;
            }
        }
    }

    /// Drain every machine queue, checking `cancel` between modifications.
    /// Returns the number of modifications that ran.
    pub fn run_make_analysis(&self, cancel: &AtomicBool) -> DetectionResult<usize> {
        let mut processed = 0;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(processed);
            }
            let mut progressed = false;
            for machine in self.engine.machine_ids() {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(processed);
                }
                if self.run_first(machine)?.is_some() {
                    processed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(processed);
            }
        }
    }
}
