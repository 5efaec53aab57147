//! Model time stamps on a 365-day (no-leap) calendar.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Calendar date plus seconds into the day.
///
/// Field order matters: the derived `PartialOrd` compares year, then month,
/// then day, then seconds.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeStamp {
    year: i32,
    month: u32,
    day: u32,
    seconds: f64,
}

impl TimeStamp {
    /// `month` and `day` are 1-based. Out-of-range values are normalized.
    pub fn new(year: i32, month: u32, day: u32, seconds: f64) -> Self {
        let mut ts = Self {
            year,
            month: month.clamp(1, 12),
            day: day.max(1),
            seconds: 0.0,
        };
        let max_day = DAYS_PER_MONTH[(ts.month - 1) as usize];
        ts.day = ts.day.min(max_day);
        ts += seconds;
        ts
    }

    pub fn year(&self) -> i32 {
        self.year
    }
    pub fn month(&self) -> u32 {
        self.month
    }
    pub fn day(&self) -> u32 {
        self.day
    }
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    fn advance_days(&mut self, mut days: u64) {
        while days > 0 {
            let month_len = DAYS_PER_MONTH[(self.month - 1) as usize];
            let left_in_month = u64::from(month_len - self.day);
            if days <= left_in_month {
                self.day += days as u32;
                return;
            }
            days -= left_in_month + 1;
            self.day = 1;
            if self.month == 12 {
                self.month = 1;
                self.year += 1;
            } else {
                self.month += 1;
            }
        }
    }
}

impl AddAssign<f64> for TimeStamp {
    /// Advance by `dt` seconds. Negative steps are not supported and are ignored.
    fn add_assign(&mut self, dt: f64) {
        if !(dt > 0.0) {
            return;
        }
        let total = self.seconds + dt;
        let whole_days = (total / SECONDS_PER_DAY).floor();
        self.seconds = total - whole_days * SECONDS_PER_DAY;
        self.advance_days(whole_days as u64);
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new(1, 1, 1, 0.0)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}-{:05}",
            self.year,
            self.month,
            self.day,
            self.seconds.floor() as u64
        )
    }
}
