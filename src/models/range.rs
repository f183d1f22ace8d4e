use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Half-open UTC time range: begin inclusive, end exclusive.
///
/// An absent end means the range is open-ended (extends to the future).
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use cycle_analysis::models::TimeRange;
///
/// let begin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
/// let range = TimeRange::new(begin, Some(end));
/// assert!(range.contains(begin));
/// assert!(!range.contains(end));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Create a new range. An `end` before `begin` is normalized to an empty
    /// range ending at `begin`.
    pub fn new(begin: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        let end = end.map(|e| e.max(begin));
        Self { begin, end }
    }

    /// Open-ended range starting at `begin`.
    pub fn since(begin: DateTime<Utc>) -> Self {
        Self { begin, end: None }
    }

    /// Whether `t` lies inside the range (begin inclusive, end exclusive).
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.begin <= t && self.end.is_none_or(|e| t < e)
    }

    /// Whether `t` lies inside the range treating the end as inclusive and
    /// the begin as exclusive. Used when locating the slot a cycle *end*
    /// belongs to: a cycle ending exactly on a slot boundary belongs to the
    /// earlier slot.
    pub fn contains_end_point(&self, t: DateTime<Utc>) -> bool {
        self.begin < t && self.end.is_none_or(|e| t <= e)
    }

    /// Duration of the range, `None` when open-ended.
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|e| e - self.begin)
    }

    /// Whether the range covers no time at all.
    pub fn is_empty(&self) -> bool {
        self.end == Some(self.begin)
    }

    /// Whether this range and `other` share at least one instant.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        let self_before = self.end.is_some_and(|e| e <= other.begin);
        let other_before = other.end.is_some_and(|e| e <= self.begin);
        !self_before && !other_before
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.begin, end),
            None => write!(f, "[{}, ∞)", self.begin),
        }
    }
}
