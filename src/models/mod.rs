//! Domain model: machines, operations, slots, cycles, gap records and
//! summary rows. All cross-references between entities are stable
//! identifiers resolved through the per-machine store, never owning
//! pointers.

pub mod between;
pub mod cycle;
pub mod ids;
pub mod machine;
pub mod range;
pub mod slot;
pub mod summary;

pub use between::BetweenCycles;
pub use cycle::{CycleStatus, OperationCycle};
pub use ids::{
    BetweenCyclesId, ComponentId, CycleId, LineId, MachineId, ModificationId, OperationId, ShiftId,
    SlotId, TaskId, WorkOrderId,
};
pub use machine::{Machine, Operation};
pub use range::TimeRange;
pub use slot::{OperationSlot, SlotContext};
pub use summary::{CycleCountSummary, CycleDurationSummary, SummaryKey};
