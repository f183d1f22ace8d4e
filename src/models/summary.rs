use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{ComponentId, LineId, MachineId, OperationId, ShiftId, TaskId, WorkOrderId};

/// Grouping key of the incrementally-maintained summary rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SummaryKey {
    pub machine: MachineId,
    pub day: Option<NaiveDate>,
    pub shift: Option<ShiftId>,
    pub work_order: Option<WorkOrderId>,
    pub line: Option<LineId>,
    pub task: Option<TaskId>,
    pub component: Option<ComponentId>,
    pub operation: Option<OperationId>,
}

/// Per-key cycle counts. For any key, `full` equals the sum of
/// `total_cycles` and `partial` the sum of `partial_cycles` over the
/// operation slots sharing that key, once accumulators are flushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCountSummary {
    pub key: SummaryKey,
    pub full: i64,
    pub partial: i64,
}

/// Per-key, per-offset cycle counts. Cycles are bucketed by their offset
/// duration rounded to the nearest integer percentage point; cycles with no
/// computable offset are not represented here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleDurationSummary {
    pub key: SummaryKey,
    pub offset: i64,
    pub full: i64,
    pub partial: i64,
}
