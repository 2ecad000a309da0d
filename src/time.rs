//! Weekday + seconds-of-day timestamp used as the simulation's wall-clock.

use std::fmt;

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_WEEK: i64 = SECONDS_PER_DAY * 7;

/// A day of a notional operating week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

const ORDER: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl Weekday {
    fn natural_index(self) -> i64 {
        ORDER.iter().position(|w| *w == self).unwrap() as i64
    }

    fn from_natural_index(idx: i64) -> Self {
        ORDER[idx.rem_euclid(7) as usize]
    }
}

/// Rotates which weekday is treated as day 0 ("base day"). Shifting this
/// mapping changes the simulation clock's origin without touching any
/// already-constructed `TimeInfo` values, since ordinals are recomputed from
/// it on every comparison.
#[derive(Debug, Clone, Copy)]
pub struct WeekOrder {
    base_day: Weekday,
}

impl Default for WeekOrder {
    fn default() -> Self {
        Self { base_day: Weekday::Mon }
    }
}

impl WeekOrder {
    pub fn new(base_day: Weekday) -> Self {
        Self { base_day }
    }

    /// Ordinal of `day` relative to `base_day`, in `[0, 7)`.
    pub fn ordinal(&self, day: Weekday) -> i64 {
        (day.natural_index() - self.base_day.natural_index()).rem_euclid(7)
    }

    pub fn weekday_at_ordinal(&self, ordinal: i64) -> Weekday {
        Weekday::from_natural_index(self.base_day.natural_index() + ordinal)
    }
}

/// A point in the operating week: a weekday plus seconds since its midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInfo {
    pub weekday: Weekday,
    pub seconds: i64,
}

impl TimeInfo {
    pub fn new(weekday: Weekday, seconds: i64) -> Self {
        assert!((0..SECONDS_PER_DAY).contains(&seconds), "seconds out of range");
        Self { weekday, seconds }
    }

    /// Total seconds since the `order`'s day 0, midnight.
    pub fn total_seconds(&self, order: &WeekOrder) -> i64 {
        order.ordinal(self.weekday) * SECONDS_PER_DAY + self.seconds
    }

    pub fn from_total_seconds(total: i64, order: &WeekOrder) -> Self {
        let total = total.rem_euclid(SECONDS_PER_WEEK);
        let (days, secs) = (total.div_euclid(SECONDS_PER_DAY), total.rem_euclid(SECONDS_PER_DAY));
        Self { weekday: order.weekday_at_ordinal(days), seconds: secs }
    }

    /// `self + delta_seconds`, wrapping the weekday as needed. `delta_seconds`
    /// may be negative.
    pub fn add_seconds(&self, delta_seconds: i64, order: &WeekOrder) -> Self {
        Self::from_total_seconds(self.total_seconds(order) + delta_seconds, order)
    }

    /// Seconds from `other` forward to `self`, wrapping over a 7-day week so
    /// the result is always non-negative: if `self` precedes `other` in
    /// weekly order, measures across the week boundary instead of going
    /// negative.
    pub fn delay_since(&self, other: &TimeInfo, order: &WeekOrder) -> i64 {
        let a = self.total_seconds(order);
        let b = other.total_seconds(order);
        if a < b {
            SECONDS_PER_WEEK + a - b
        } else {
            a - b
        }
    }

    pub fn cmp_in(&self, other: &TimeInfo, order: &WeekOrder) -> std::cmp::Ordering {
        self.total_seconds(order).cmp(&other.total_seconds(order))
    }
}

impl fmt::Display for TimeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:02}:{:02}:{:02}", self.weekday, self.seconds / 3600, (self.seconds / 60) % 60, self.seconds % 60)
    }
}
