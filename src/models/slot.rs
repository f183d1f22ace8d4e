use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::ids::{ComponentId, LineId, MachineId, OperationId, ShiftId, SlotId, TaskId, WorkOrderId};
use super::machine::opt_duration_secs;
use super::range::TimeRange;
use super::summary::SummaryKey;

/// Classification of an operation slot: what was being produced, where and
/// when. All fields are optional; two adjacent slots with an identical
/// context are merge candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotContext {
    pub operation: Option<OperationId>,
    pub component: Option<ComponentId>,
    pub work_order: Option<WorkOrderId>,
    pub line: Option<LineId>,
    pub task: Option<TaskId>,
    pub day: Option<NaiveDate>,
    pub shift: Option<ShiftId>,
}

impl SlotContext {
    pub fn with_operation(operation: OperationId) -> Self {
        Self {
            operation: Some(operation),
            ..Default::default()
        }
    }

    /// Whether the two contexts refer to the same operation.
    pub fn same_operation(&self, other: &SlotContext) -> bool {
        self.operation == other.operation
    }

    /// Summary key of this context on the given machine.
    pub fn summary_key(&self, machine: MachineId) -> SummaryKey {
        SummaryKey {
            machine,
            day: self.day,
            shift: self.shift,
            work_order: self.work_order,
            line: self.line,
            task: self.task,
            component: self.component,
            operation: self.operation,
        }
    }
}

/// A contiguous time range on one machine attached to one operation context,
/// together with the cycle counters consolidation maintains for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSlot {
    pub id: SlotId,
    pub machine: MachineId,
    pub range: TimeRange,
    pub context: SlotContext,
    /// Count of full cycles whose life lies in this slot.
    pub total_cycles: u32,
    /// Count of cycles that touch this slot but lack a real end.
    pub partial_cycles: u32,
    #[serde(default, with = "opt_duration_secs")]
    pub average_cycle_time: Option<Duration>,
    #[serde(default, with = "opt_duration_secs")]
    pub run_time: Option<Duration>,
}

impl OperationSlot {
    pub fn new(id: SlotId, machine: MachineId, range: TimeRange, context: SlotContext) -> Self {
        Self {
            id,
            machine,
            range,
            context,
            total_cycles: 0,
            partial_cycles: 0,
            average_cycle_time: None,
            run_time: None,
        }
    }
}
