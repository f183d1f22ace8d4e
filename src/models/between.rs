use serde::{Deserialize, Serialize};

use super::ids::{BetweenCyclesId, CycleId, MachineId};

/// Gap record between two consecutive cycles on the same machine.
///
/// The covered range is derived from the referenced cycles
/// (`[previous.end, next.begin)`), never cached here, so boundary
/// adjustments on either cycle are reflected automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetweenCycles {
    pub id: BetweenCyclesId,
    pub machine: MachineId,
    pub previous: CycleId,
    pub next: CycleId,
    /// Percentage deviation of the observed gap from its nominal duration
    /// (pallet changing, or unloading + loading), when one is configured.
    pub offset_duration: Option<f64>,
}
