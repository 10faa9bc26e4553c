//! Slot model: bookable start times within a business day.
//!
//! Everything here is pure. The same operating hours, granularity and duration
//! always produce the same candidate sequence, so callers may recompute it as
//! often as they like.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minutes in a day. `24:00` is a valid end of day but never a start.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Default slot granularity in minutes.
pub const DEFAULT_GRANULARITY_MINUTES: u16 = 30;

/// Error parsing a `HH:MM` time of day.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid time of day '{input}': expected HH:MM between 00:00 and 24:00")]
pub struct ParseSlotTimeError {
    input: String,
}

/// A business-local time of day with minute precision.
///
/// Stored as minutes since midnight. Displayed, parsed and serialized as
/// `HH:MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime(u16);

impl SlotTime {
    /// Midnight at the start of the day.
    pub const MIDNIGHT: Self = Self(0);

    /// End of the day (`24:00`).
    pub const END_OF_DAY: Self = Self(MINUTES_PER_DAY);

    /// Build from hours and minutes. Returns `None` past `24:00`.
    #[must_use]
    pub const fn from_hm(hours: u16, minutes: u16) -> Option<Self> {
        if minutes >= 60 || hours > 24 {
            return None;
        }
        Self::from_minutes(hours * 60 + minutes)
    }

    /// Build from minutes since midnight. Returns `None` past `24:00`.
    #[must_use]
    pub const fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes > MINUTES_PER_DAY {
            None
        } else {
            Some(Self(minutes))
        }
    }

    /// Minutes since midnight.
    #[must_use]
    pub const fn minutes(self) -> u16 {
        self.0
    }

    /// Hour component.
    #[must_use]
    pub const fn hour(self) -> u16 {
        self.0 / 60
    }

    /// Minute component.
    #[must_use]
    pub const fn minute(self) -> u16 {
        self.0 % 60
    }

    /// Add minutes, returning `None` if the result passes `24:00`.
    #[must_use]
    pub const fn checked_add(self, minutes: u16) -> Option<Self> {
        match self.0.checked_add(minutes) {
            Some(total) => Self::from_minutes(total),
            None => None,
        }
    }

    /// Convert to a `chrono::NaiveTime`. `24:00` has no equivalent.
    #[must_use]
    pub fn to_naive_time(self) -> Option<chrono::NaiveTime> {
        chrono::NaiveTime::from_hms_opt(u32::from(self.hour()), u32::from(self.minute()), 0)
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for SlotTime {
    type Err = ParseSlotTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSlotTimeError {
            input: s.to_string(),
        };
        let (hours, minutes) = s.trim().split_once(':').ok_or_else(err)?;
        if hours.len() != 2 || minutes.len() != 2 {
            return Err(err());
        }
        let hours: u16 = hours.parse().map_err(|_| err())?;
        let minutes: u16 = minutes.parse().map_err(|_| err())?;
        Self::from_hm(hours, minutes).ok_or_else(err)
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A half-open interval `[start, end)` within one day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start
    pub start: SlotTime,
    /// Exclusive end
    pub end: SlotTime,
}

impl TimeRange {
    /// Interval starting at `start` lasting `duration_minutes`.
    ///
    /// Returns `None` for a zero duration or when the interval passes midnight.
    #[must_use]
    pub const fn starting_at(start: SlotTime, duration_minutes: u16) -> Option<Self> {
        if duration_minutes == 0 {
            return None;
        }
        match start.checked_add(duration_minutes) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    /// Length in minutes.
    #[must_use]
    pub const fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    /// Half-open overlap: adjacent intervals do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely inside this interval.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Opening hours of a single day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    /// Opening time
    pub open: SlotTime,
    /// Closing time
    pub close: SlotTime,
}

impl DayHours {
    /// Creates opening hours. Returns `None` unless `open < close`.
    #[must_use]
    pub fn new(open: SlotTime, close: SlotTime) -> Option<Self> {
        (open < close).then_some(Self { open, close })
    }

    /// The open window as a half-open range.
    #[must_use]
    pub const fn window(&self) -> TimeRange {
        TimeRange {
            start: self.open,
            end: self.close,
        }
    }
}

/// Iterator over candidate slot start times.
///
/// Yields `open, open + granularity, ...` while the booked duration still
/// ends at or before closing time.
#[derive(Clone, Debug)]
pub struct Slots {
    next: u16,
    last_start: Option<u16>,
    granularity: u16,
}

impl Slots {
    /// An iterator that yields nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            next: 0,
            last_start: None,
            granularity: 1,
        }
    }
}

impl Iterator for Slots {
    type Item = SlotTime;

    fn next(&mut self) -> Option<Self::Item> {
        let last = self.last_start?;
        if self.next > last {
            return None;
        }
        let current = self.next;
        self.next = self.next.saturating_add(self.granularity);
        SlotTime::from_minutes(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.last_start {
            Some(last) if self.next <= last => {
                let remaining = usize::from((last - self.next) / self.granularity) + 1;
                (remaining, Some(remaining))
            }
            _ => (0, Some(0)),
        }
    }
}

/// Candidate start times for one business day.
///
/// `hours` of `None` means the business is closed that day. A zero
/// granularity or duration, or a duration longer than the open window,
/// yields no slots.
#[must_use]
pub fn candidate_slots(hours: Option<DayHours>, granularity: u16, duration: u16) -> Slots {
    let Some(hours) = hours else {
        return Slots::empty();
    };
    if granularity == 0 || duration == 0 {
        return Slots::empty();
    }
    let open = hours.open.minutes();
    let close = hours.close.minutes();
    match close.checked_sub(duration) {
        Some(last_start) if last_start >= open => Slots {
            next: open,
            last_start: Some(last_start),
            granularity,
        },
        _ => Slots::empty(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(s: &str) -> SlotTime {
        s.parse().unwrap()
    }

    fn nine_to_five() -> DayHours {
        DayHours::new(t("09:00"), t("17:00")).unwrap()
    }

    #[test]
    fn parses_and_displays_hh_mm() {
        assert_eq!(t("09:30").minutes(), 570);
        assert_eq!(t("24:00"), SlotTime::END_OF_DAY);
        assert_eq!(t("07:05").to_string(), "07:05");
        assert!("9:30".parse::<SlotTime>().is_err());
        assert!("24:01".parse::<SlotTime>().is_err());
        assert!("12:60".parse::<SlotTime>().is_err());
        assert!("noon".parse::<SlotTime>().is_err());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&t("16:30")).unwrap();
        assert_eq!(json, "\"16:30\"");
        let back: SlotTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t("16:30"));
    }

    #[test]
    fn full_day_at_thirty_minutes_has_sixteen_slots() {
        let slots: Vec<SlotTime> = candidate_slots(Some(nine_to_five()), 30, 30).collect();
        assert_eq!(slots.len(), 16);
        assert_eq!(slots.first().copied(), Some(t("09:00")));
        assert_eq!(slots.last().copied(), Some(t("16:30")));
    }

    #[test]
    fn longer_service_drops_late_starts() {
        let slots: Vec<SlotTime> = candidate_slots(Some(nine_to_five()), 30, 90).collect();
        assert_eq!(slots.last().copied(), Some(t("15:30")));
        assert_eq!(slots.len(), 14);
    }

    #[test]
    fn closed_day_is_empty() {
        assert_eq!(candidate_slots(None, 30, 30).count(), 0);
    }

    #[test]
    fn duration_longer_than_window_is_empty() {
        assert_eq!(candidate_slots(Some(nine_to_five()), 30, 9 * 60).count(), 0);
    }

    #[test]
    fn degenerate_inputs_are_empty() {
        assert_eq!(candidate_slots(Some(nine_to_five()), 0, 30).count(), 0);
        assert_eq!(candidate_slots(Some(nine_to_five()), 30, 0).count(), 0);
    }

    #[test]
    fn slots_are_restartable() {
        let slots = candidate_slots(Some(nine_to_five()), 15, 45);
        let first: Vec<_> = slots.clone().collect();
        let second: Vec<_> = slots.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let a = TimeRange::starting_at(t("10:00"), 30).unwrap();
        let b = TimeRange::starting_at(t("10:30"), 30).unwrap();
        let c = TimeRange::starting_at(t("09:45"), 30).unwrap();
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));
    }

    #[test]
    fn range_cannot_pass_midnight() {
        assert!(TimeRange::starting_at(t("23:45"), 30).is_none());
        assert!(TimeRange::starting_at(t("23:30"), 30).is_some());
        assert!(TimeRange::starting_at(t("10:00"), 0).is_none());
    }

    proptest! {
        #[test]
        fn every_slot_fits_inside_the_window(
            open in 0u16..1200,
            len in 1u16..240,
            granularity in 1u16..120,
            duration in 1u16..300,
        ) {
            let close = (open + len).min(MINUTES_PER_DAY);
            let hours = DayHours::new(
                SlotTime::from_minutes(open).unwrap(),
                SlotTime::from_minutes(close).unwrap(),
            );
            prop_assume!(hours.is_some());
            let hours = hours.unwrap();
            let slots: Vec<SlotTime> = candidate_slots(Some(hours), granularity, duration).collect();

            for pair in slots.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
            for slot in &slots {
                let range = TimeRange::starting_at(*slot, duration).unwrap();
                prop_assert!(hours.window().contains(&range));
            }
            if duration <= close - open {
                prop_assert!(!slots.is_empty());
            }
        }
    }
}
