use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DashError, DashResult};
use crate::models::range::TimeOfDay;

/// A calendar cell the user can click: `month0` is 0-based like the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarDay {
    pub year: i32,
    pub month0: u32,
    pub day: u32,
}

impl CalendarDay {
    pub fn new(year: i32, month0: u32, day: u32) -> DashResult<Self> {
        let day = Self { year, month0, day };
        day.naive()?;
        Ok(day)
    }

    /// The calendar day `timestamp` falls on under `offset`.
    pub fn from_timestamp(timestamp: i64, offset: &FixedOffset) -> Option<Self> {
        let local = local_datetime(timestamp, offset)?;
        Some(Self {
            year: local.year(),
            month0: local.month0(),
            day: local.day(),
        })
    }

    fn naive(&self) -> DashResult<NaiveDate> {
        self.month0
            .checked_add(1)
            .and_then(|month| NaiveDate::from_ymd_opt(self.year, month, self.day))
            .ok_or(DashError::InvalidDate {
                year: self.year,
                month: self.month0.saturating_add(1),
                day: self.day,
            })
    }

    /// Epoch milliseconds of this day at `time` (midnight when absent).
    pub fn to_epoch(&self, time: Option<TimeOfDay>, offset: &FixedOffset) -> DashResult<i64> {
        let time = time.unwrap_or_default();
        let naive = self
            .naive()?
            .and_hms_opt(time.hour(), time.minute(), 0)
            .ok_or_else(|| DashError::InvalidTimeOfDay(time.to_string()))?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp_millis())
            .ok_or_else(|| DashError::Internal(format!("unrepresentable local time {naive}")))
    }
}

pub(crate) fn local_datetime(timestamp: i64, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp_millis(timestamp).map(|utc| utc.with_timezone(offset))
}

/// One month of the date picker grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarMonth {
    pub year: i32,
    /// 0..=11
    pub month: u32,
    pub active_days: BTreeSet<u32>,
    /// Leading zeros are blank cells, then 1..=days_in_month
    pub number_of_days: Vec<u32>,
}

impl CalendarMonth {
    pub fn new(year: i32, month0: u32, active_days: BTreeSet<u32>) -> Option<Self> {
        let first = NaiveDate::from_ymd_opt(year, month0.checked_add(1)?, 1)?;
        let blanks = leading_blanks(first);
        let days = days_in_month(first)?;

        let mut number_of_days = vec![0; blanks as usize];
        number_of_days.extend(1..=days);

        Some(Self {
            year,
            month: month0,
            active_days,
            number_of_days,
        })
    }

    pub fn days_in_month(&self) -> u32 {
        self.number_of_days.iter().filter(|&&d| d != 0).count() as u32
    }

    pub fn blanks(&self) -> usize {
        self.number_of_days.iter().take_while(|&&d| d == 0).count()
    }

    pub fn is_active(&self, day: u32) -> bool {
        self.active_days.contains(&day)
    }
}

/// Blank cells before the 1st under a Monday-first week: 0 for Monday up
/// to 6 for Sunday.
fn leading_blanks(first: NaiveDate) -> u32 {
    first.weekday().num_days_from_monday()
}

/// Day 0 of the next month is the last day of this one.
fn days_in_month(first: NaiveDate) -> Option<u32> {
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)?
    };
    next.pred_opt().map(|last| last.day())
}

/// Groups timestamps by (year, month) and lists the days that have data.
pub fn build_calendar<I>(timestamps: I, offset: &FixedOffset) -> Vec<CalendarMonth>
where
    I: IntoIterator<Item = i64>,
{
    let mut grouped: BTreeMap<(i32, u32), BTreeSet<u32>> = BTreeMap::new();
    for ts in timestamps {
        if let Some(day) = CalendarDay::from_timestamp(ts, offset) {
            grouped
                .entry((day.year, day.month0))
                .or_default()
                .insert(day.day);
        }
    }

    grouped
        .into_iter()
        .filter_map(|((year, month0), days)| CalendarMonth::new(year, month0, days))
        .collect()
}
