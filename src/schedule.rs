use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MS_PER_MINUTE: Ms = 60_000;
pub const MS_PER_HOUR: Ms = 3_600_000;
pub const MS_PER_DAY: Ms = 86_400_000;

/// Calendar date of a slot (`YYYY-MM-DD`). Ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotDate {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

/// Start time of a slot within its day (`HH:MM`, 24h). Ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotTime {
    pub hour: u8,
    pub minute: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleParseError(pub String);

impl fmt::Display for ScheduleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid schedule value: {}", self.0)
    }
}

impl std::error::Error for ScheduleParseError {}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

impl SlotDate {
    pub fn new(year: i32, month: u8, day: u8) -> Result<Self, ScheduleParseError> {
        if !(1970..=9999).contains(&year) {
            return Err(ScheduleParseError(format!("year {year} out of range")));
        }
        if month == 0 || month > 12 {
            return Err(ScheduleParseError(format!("month {month} out of range")));
        }
        if day == 0 || day > days_in_month(year, month) {
            return Err(ScheduleParseError(format!(
                "day {day} out of range for {year}-{month:02}"
            )));
        }
        Ok(Self { year, month, day })
    }

    /// Days since the unix epoch (Howard Hinnant's civil-days algorithm).
    pub fn days_from_epoch(&self) -> i64 {
        let y = if self.month <= 2 {
            self.year - 1
        } else {
            self.year
        } as i64;
        let m = self.month as i64;
        let d = self.day as i64;
        let era = if y >= 0 { y } else { y - 399 } / 400;
        let yoe = y - era * 400;
        let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        era * 146_097 + doe - 719_468
    }
}

impl SlotTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ScheduleParseError> {
        if hour > 23 {
            return Err(ScheduleParseError(format!("hour {hour} out of range")));
        }
        if minute > 59 {
            return Err(ScheduleParseError(format!("minute {minute} out of range")));
        }
        Ok(Self { hour, minute })
    }

    pub fn minutes_from_midnight(&self) -> i64 {
        self.hour as i64 * 60 + self.minute as i64
    }
}

impl fmt::Display for SlotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for SlotDate {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let (y, m, d) = match (parts.next(), parts.next(), parts.next()) {
            (Some(y), Some(m), Some(d)) => (y, m, d),
            _ => return Err(ScheduleParseError(format!("expected YYYY-MM-DD, got {s:?}"))),
        };
        let bad = |_| ScheduleParseError(format!("expected YYYY-MM-DD, got {s:?}"));
        Self::new(y.parse().map_err(bad)?, m.parse().map_err(bad)?, d.parse().map_err(bad)?)
    }
}

impl FromStr for SlotTime {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| ScheduleParseError(format!("expected HH:MM, got {s:?}")))?;
        let bad = |_| ScheduleParseError(format!("expected HH:MM, got {s:?}"));
        Self::new(h.parse().map_err(bad)?, m.parse().map_err(bad)?)
    }
}

/// Instant the slot starts, as unix milliseconds (schedule is treated as UTC).
pub fn slot_start_ms(date: SlotDate, time: SlotTime) -> Ms {
    date.days_from_epoch() * MS_PER_DAY + time.minutes_from_midnight() * MS_PER_MINUTE
}

/// True once booking for the slot has closed: `now` is within `cutoff_hours`
/// of the slot's start (or past it).
pub fn within_cutoff(date: SlotDate, time: SlotTime, cutoff_hours: i64, now: Ms) -> bool {
    now >= slot_start_ms(date, time) - cutoff_hours * MS_PER_HOUR
}

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Ms
}
