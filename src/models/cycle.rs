use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CycleId, MachineId, SlotId};

/// Which boundaries of a cycle were inferred rather than observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStatus {
    pub begin_estimated: bool,
    pub end_estimated: bool,
}

impl CycleStatus {
    pub fn is_clear(&self) -> bool {
        !self.begin_estimated && !self.end_estimated
    }
}

/// One production cycle, possibly still open or only partially observed.
///
/// A cycle is *full* once it carries a real (non-estimated) end; an
/// estimated begin does not prevent fullness, an estimated end always does.
/// The slot reference is non-owning: a cycle may belong to no slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationCycle {
    pub id: CycleId,
    pub machine: MachineId,
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    pub slot: Option<SlotId>,
    /// Percentage deviation of the cycle span from the operation's nominal
    /// machining duration, when both are known.
    pub offset_duration: Option<f64>,
}

impl OperationCycle {
    pub fn new(id: CycleId, machine: MachineId) -> Self {
        Self {
            id,
            machine,
            begin: None,
            end: None,
            status: CycleStatus::default(),
            slot: None,
            offset_duration: None,
        }
    }

    /// Whether the cycle is closed by a real end.
    pub fn is_full(&self) -> bool {
        self.end.is_some() && !self.status.end_estimated
    }

    pub fn has_real_begin(&self) -> bool {
        self.begin.is_some() && !self.status.begin_estimated
    }

    pub fn has_real_end(&self) -> bool {
        self.end.is_some() && !self.status.end_estimated
    }

    /// Span between the two boundaries, when both are set.
    pub fn span(&self) -> Option<Duration> {
        match (self.begin, self.end) {
            (Some(b), Some(e)) => Some(e - b),
            _ => None,
        }
    }

    /// Representative instant used to order cycles on a machine.
    ///
    /// A real end wins over everything, then an estimated end, then the
    /// begin. A cycle always has at least one boundary outside of transient
    /// construction, so `None` only occurs for a freshly created record.
    pub fn sort_time(&self) -> Option<DateTime<Utc>> {
        self.end.or(self.begin)
    }

    /// Set an observed begin, clearing any estimate.
    pub fn set_real_begin(&mut self, at: DateTime<Utc>) {
        self.begin = Some(at);
        self.status.begin_estimated = false;
    }

    /// Set an observed end, clearing any estimate. Returns false (and leaves
    /// the cycle unchanged) when `at` precedes the begin.
    pub fn set_real_end(&mut self, at: DateTime<Utc>) -> bool {
        if self.begin.is_some_and(|b| at < b) {
            return false;
        }
        self.end = Some(at);
        self.status.end_estimated = false;
        true
    }

    /// Set an inferred begin.
    pub fn set_estimated_begin(&mut self, at: DateTime<Utc>) -> bool {
        if self.end.is_some_and(|e| e < at) {
            return false;
        }
        self.begin = Some(at);
        self.status.begin_estimated = true;
        true
    }

    /// Set an inferred end. Returns false when `at` precedes the begin.
    pub fn set_estimated_end(&mut self, at: DateTime<Utc>) -> bool {
        if self.begin.is_some_and(|b| at < b) {
            return false;
        }
        self.end = Some(at);
        self.status.end_estimated = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    fn cycle() -> OperationCycle {
        OperationCycle::new(CycleId(1), MachineId(1))
    }

    #[test]
    fn test_full_requires_real_end() {
        let mut c = cycle();
        c.set_real_begin(t(1));
        assert!(!c.is_full());
        assert!(c.set_estimated_end(t(2)));
        assert!(!c.is_full(), "estimated end leaves the cycle partial");
        assert!(c.set_real_end(t(2)));
        assert!(c.is_full());
    }

    #[test]
    fn test_estimated_begin_does_not_block_full() {
        let mut c = cycle();
        assert!(c.set_estimated_begin(t(1)));
        assert!(c.set_real_end(t(3)));
        assert!(c.is_full());
        assert!(!c.has_real_begin());
    }

    #[test]
    fn test_end_before_begin_rejected() {
        let mut c = cycle();
        c.set_real_begin(t(5));
        assert!(!c.set_real_end(t(4)));
        assert!(!c.set_estimated_end(t(4)));
        assert_eq!(c.end, None);
    }

    #[test]
    fn test_real_end_clears_estimate_flag() {
        let mut c = cycle();
        c.set_real_begin(t(1));
        assert!(c.set_estimated_end(t(2)));
        assert!(c.status.end_estimated);
        assert!(c.set_real_end(t(3)));
        assert!(!c.status.end_estimated);
    }

    #[test]
    fn test_sort_time_prefers_end() {
        let mut c = cycle();
        c.set_real_begin(t(1));
        assert_eq!(c.sort_time(), Some(t(1)));
        c.set_real_end(t(2));
        assert_eq!(c.sort_time(), Some(t(2)));
    }

    #[test]
    fn test_span() {
        let mut c = cycle();
        c.set_real_begin(t(1));
        c.set_real_end(t(4));
        assert_eq!(c.span(), Some(Duration::hours(3)));
    }
}
