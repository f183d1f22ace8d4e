use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl $name {
            /// Raw identifier value.
            pub fn value(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(
    /// Identifier of a monitored machine.
    MachineId
);
id_newtype!(
    /// Identifier of an operation slot.
    SlotId
);
id_newtype!(
    /// Identifier of an operation cycle.
    CycleId
);
id_newtype!(
    /// Identifier of a between-cycles gap record.
    BetweenCyclesId
);
id_newtype!(
    /// Identifier of a machining operation.
    OperationId
);
id_newtype!(
    /// Identifier of a component.
    ComponentId
);
id_newtype!(
    /// Identifier of a work order.
    WorkOrderId
);
id_newtype!(
    /// Identifier of a production line.
    LineId
);
id_newtype!(
    /// Identifier of a task.
    TaskId
);
id_newtype!(
    /// Identifier of a shift.
    ShiftId
);
id_newtype!(
    /// Identifier of a queued modification.
    ModificationId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_value_roundtrip() {
        let id = MachineId::from(42);
        assert_eq!(id.value(), 42);
        assert_eq!(id, MachineId(42));
    }

    #[test]
    fn test_id_ordering() {
        assert!(CycleId(1) < CycleId(2));
        assert!(SlotId(10) > SlotId(3));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(OperationId(7).to_string(), "7");
    }
}
