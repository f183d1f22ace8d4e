use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::ids::{MachineId, OperationId};

/// Serialize optional durations as whole seconds.
pub(crate) mod opt_duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&d.num_seconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<i64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::seconds))
    }
}

/// A monitored machine.
///
/// The pallet-changing duration, when configured, is the nominal time the
/// machine needs between two cycles and takes precedence over the
/// per-operation loading/unloading durations when gap offsets are computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    #[serde(default)]
    pub name: String,
    #[serde(default, with = "opt_duration_secs")]
    pub pallet_changing_duration: Option<Duration>,
}

impl Machine {
    pub fn new(id: MachineId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            pallet_changing_duration: None,
        }
    }

    pub fn with_pallet_changing_duration(mut self, duration: Duration) -> Self {
        self.pallet_changing_duration = Some(duration);
        self
    }
}

/// A machining operation with its nominal durations.
///
/// `machining_duration` is the nominal span of one cycle; loading and
/// unloading durations bound the nominal gap between two consecutive cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    #[serde(default)]
    pub name: String,
    #[serde(default, with = "opt_duration_secs")]
    pub machining_duration: Option<Duration>,
    #[serde(default, with = "opt_duration_secs")]
    pub loading_duration: Option<Duration>,
    #[serde(default, with = "opt_duration_secs")]
    pub unloading_duration: Option<Duration>,
}

impl Operation {
    pub fn new(id: OperationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            machining_duration: None,
            loading_duration: None,
            unloading_duration: None,
        }
    }

    pub fn with_machining_duration(mut self, duration: Duration) -> Self {
        self.machining_duration = Some(duration);
        self
    }

    pub fn with_loading_duration(mut self, duration: Duration) -> Self {
        self.loading_duration = Some(duration);
        self
    }

    pub fn with_unloading_duration(mut self, duration: Duration) -> Self {
        self.unloading_duration = Some(duration);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_builder() {
        let machine = Machine::new(MachineId(1), "mill-3")
            .with_pallet_changing_duration(Duration::seconds(2));
        assert_eq!(machine.pallet_changing_duration, Some(Duration::seconds(2)));
        assert_eq!(machine.name, "mill-3");
    }

    #[test]
    fn test_operation_durations_serde() {
        let op = Operation::new(OperationId(5), "drill")
            .with_machining_duration(Duration::seconds(30))
            .with_loading_duration(Duration::seconds(7));
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.machining_duration, Some(Duration::seconds(30)));
        assert_eq!(back.loading_duration, Some(Duration::seconds(7)));
        assert_eq!(back.unloading_duration, None);
    }
}
