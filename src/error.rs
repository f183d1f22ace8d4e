//! Error types and the structured detection log.
//!
//! Locally-recovered conditions (ordering violations, attachment
//! inconsistencies, counter drift) never surface as `Err`: they are
//! recorded as detection log entries on the machine store and emitted
//! through the `log` facade. `DetectionError` is reserved for API misuse
//! and for pipeline rollback.

use serde::{Deserialize, Serialize};

use crate::models::{MachineId, SlotId};

/// Result type for engine operations.
pub type DetectionResult<T> = Result<T, DetectionError>;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// The machine is not registered with the engine.
    #[error("Unknown machine: {0}")]
    UnknownMachine(MachineId),

    /// The slot does not exist on the targeted machine.
    #[error("Unknown slot {slot} on machine {machine}")]
    UnknownSlot { machine: MachineId, slot: SlotId },

    /// A timeline operation received an invalid argument.
    #[error("Invalid timeline operation: {0}")]
    InvalidTimelineOperation(String),

    /// A modification was submitted or transitioned out of order.
    #[error("Invalid modification state: {0}")]
    InvalidModificationState(String),

    /// Unexpected internal failure; triggers a pipeline rollback.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DetectionError {
    pub fn invalid_timeline(message: impl Into<String>) -> Self {
        Self::InvalidTimelineOperation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Severity of a detection log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warn,
    Error,
}

/// One structured record of a recovered anomaly, readable by collaborators
/// and by tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionLogEntry {
    pub machine: MachineId,
    pub severity: Severity,
    pub message: String,
}
