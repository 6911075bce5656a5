use chrono::{FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DashError, DashResult};
use crate::models::calendar::{local_datetime, CalendarDay};
use crate::models::sample::SampleHistory;

/// A validated `HH:MM` time of day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> DashResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(DashError::InvalidTimeOfDay(format!("{hour}:{minute}")));
        }
        Ok(Self { hour, minute })
    }

    /// Parses the `HH:MM` a time input produces. One-digit hours are accepted.
    pub fn parse(input: &str) -> DashResult<Self> {
        let invalid = || DashError::InvalidTimeOfDay(input.to_string());

        let (hour, minute) = input.trim().split_once(':').ok_or_else(invalid)?;
        if hour.is_empty()
            || hour.len() > 2
            || minute.len() != 2
            || !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Which boundary of the custom range the calendar is editing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    From,
    To,
}

/// One boundary of a custom range.
///
/// An inactive span never carries a date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Span {
    active: bool,
    date: Option<i64>,
    /// `HH:MM` or empty
    time: String,
}

impl Span {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn at(date: i64, time: Option<TimeOfDay>) -> Self {
        Self {
            active: true,
            date: Some(date),
            time: time.map(|t| t.to_string()).unwrap_or_default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn date(&self) -> Option<i64> {
        self.date
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn time_of_day(&self) -> Option<TimeOfDay> {
        TimeOfDay::parse(&self.time).ok()
    }

    /// The calendar day this span points at, if active.
    pub fn day(&self, offset: &FixedOffset) -> Option<CalendarDay> {
        self.date
            .and_then(|date| CalendarDay::from_timestamp(date, offset))
    }

    /// Clicking `day`: clears the span when it already sits on that day,
    /// otherwise moves it there at `time`.
    pub fn toggle_day(
        &self,
        day: CalendarDay,
        time: Option<TimeOfDay>,
        offset: &FixedOffset,
    ) -> DashResult<Span> {
        if self.active && self.day(offset) == Some(day) {
            return Ok(Span::inactive());
        }
        Ok(Span::at(day.to_epoch(time, offset)?, time))
    }

    /// Overlays hour and minute onto the date, keeping the day. Inactive
    /// spans are returned unchanged.
    pub fn with_time(&self, time: Option<TimeOfDay>, offset: &FixedOffset) -> DashResult<Span> {
        let Some(date) = self.date.filter(|_| self.active) else {
            return Ok(self.clone());
        };
        let local = local_datetime(date, offset)
            .ok_or_else(|| DashError::Internal(format!("timestamp {date} out of range")))?;
        let t = time.unwrap_or_default();
        let moved = local
            .with_hour(t.hour())
            .and_then(|dt| dt.with_minute(t.minute()))
            .ok_or_else(|| DashError::InvalidTimeOfDay(t.to_string()))?;
        Ok(Span::at(moved.timestamp_millis(), time))
    }
}

/// The custom range state. Both sides inactive means the rolling window
/// is in effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpanPair {
    pub from: Span,
    pub to: Span,
}

impl SpanPair {
    pub fn new(from: Span, to: Span) -> Self {
        Self { from, to }
    }

    pub fn any_active(&self) -> bool {
        self.from.is_active() || self.to.is_active()
    }

    pub fn side(&self, side: Side) -> &Span {
        match side {
            Side::From => &self.from,
            Side::To => &self.to,
        }
    }

    pub fn with_side(&self, side: Side, span: Span) -> Self {
        let mut next = self.clone();
        match side {
            Side::From => next.from = span,
            Side::To => next.to = span,
        }
        next
    }
}

/// Rolling lookback presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RollingWindow {
    #[default]
    OneMinute,
    FiveMinutes,
    ThirtyMinutes,
    ThreeHours,
    TwentyFourHours,
}

impl RollingWindow {
    pub const ALL: [RollingWindow; 5] = [
        RollingWindow::OneMinute,
        RollingWindow::FiveMinutes,
        RollingWindow::ThirtyMinutes,
        RollingWindow::ThreeHours,
        RollingWindow::TwentyFourHours,
    ];

    pub fn millis(&self) -> i64 {
        match self {
            RollingWindow::OneMinute => 60_000,
            RollingWindow::FiveMinutes => 300_000,
            RollingWindow::ThirtyMinutes => 1_800_000,
            RollingWindow::ThreeHours => 10_800_000,
            RollingWindow::TwentyFourHours => 86_400_000,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RollingWindow::OneMinute => "1m",
            RollingWindow::FiveMinutes => "5m",
            RollingWindow::ThirtyMinutes => "30m",
            RollingWindow::ThreeHours => "3h",
            RollingWindow::TwentyFourHours => "24h",
        }
    }
}

impl fmt::Display for RollingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RollingWindow {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        RollingWindow::ALL
            .into_iter()
            .find(|w| w.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| DashError::UnknownRollingWindow(s.to_string()))
    }
}

impl Serialize for RollingWindow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Which source currently drives the effective interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "window", rename_all = "lowercase")]
pub enum RangeMode {
    Preset(RollingWindow),
    Custom,
}

impl RangeMode {
    pub fn resolve(spans: &SpanPair, window: RollingWindow) -> Self {
        if spans.any_active() {
            RangeMode::Custom
        } else {
            RangeMode::Preset(window)
        }
    }

    pub fn preset(&self) -> Option<RollingWindow> {
        match self {
            RangeMode::Preset(w) => Some(*w),
            RangeMode::Custom => None,
        }
    }
}

/// The inclusive `[from, to]` range the major window filters by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveInterval {
    pub from: i64,
    pub to: i64,
}

impl EffectiveInterval {
    /// `None` only when the history is empty and the spans do not pin
    /// both ends.
    ///
    /// A reversed custom range is swapped. A `to` span earlier than the
    /// first sample yields the single instant `[to, to]`.
    pub fn resolve(
        history: &SampleHistory,
        spans: &SpanPair,
        window: RollingWindow,
    ) -> Option<Self> {
        let to = match spans.to.date() {
            Some(date) => date,
            None => history.last_timestamp()?,
        };

        match spans.from.date() {
            Some(from) if spans.to.is_active() => Some(Self {
                from: from.min(to),
                to: from.max(to),
            }),
            Some(from) => Some(Self {
                from: from.min(to),
                to,
            }),
            None if spans.to.is_active() => Some(Self {
                from: history.first_timestamp()?.min(to),
                to,
            }),
            None => Some(Self {
                from: to - window.millis(),
                to,
            }),
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.from <= timestamp && timestamp <= self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sample;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn history(timestamps: &[i64]) -> SampleHistory {
        SampleHistory::from_samples(1, timestamps.iter().map(|&t| Sample::new(t, 0.0)).collect())
    }

    #[test]
    fn test_time_of_day_parse() {
        let t = TimeOfDay::parse("09:05").unwrap();
        assert_eq!((t.hour(), t.minute()), (9, 5));
        assert_eq!(t.to_string(), "09:05");
        assert_eq!(TimeOfDay::parse("7:30").unwrap().to_string(), "07:30");
        assert_eq!(TimeOfDay::parse("23:59").unwrap().hour(), 23);
    }

    #[test]
    fn test_time_of_day_rejects_garbage() {
        for bad in ["", "24:00", "12:60", "12", "ab:cd", "12:5", "-1:30", "123:00", "12:00:00"] {
            assert!(
                matches!(TimeOfDay::parse(bad), Err(DashError::InvalidTimeOfDay(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_rolling_window_labels() {
        assert_eq!("3h".parse::<RollingWindow>().unwrap().millis(), 10_800_000);
        assert_eq!("24H".parse::<RollingWindow>().unwrap(), RollingWindow::TwentyFourHours);
        assert!("2m".parse::<RollingWindow>().is_err());
        assert_eq!(RollingWindow::default().millis(), 60_000);
    }

    #[test]
    fn test_span_toggle_law() {
        let day = CalendarDay::new(2024, 2, 10).unwrap();
        let set = Span::inactive().toggle_day(day, None, &utc()).unwrap();
        assert!(set.is_active());
        assert_eq!(set.time(), "");

        let cleared = set.toggle_day(day, None, &utc()).unwrap();
        assert_eq!(cleared, Span::inactive());
        assert_eq!(cleared.date(), None);
    }

    #[test]
    fn test_span_toggle_other_day_moves() {
        let offset = utc();
        let first = CalendarDay::new(2024, 2, 10).unwrap();
        let second = CalendarDay::new(2024, 2, 11).unwrap();
        let time = TimeOfDay::parse("08:15").ok();

        let span = Span::inactive()
            .toggle_day(first, time, &offset)
            .unwrap()
            .toggle_day(second, time, &offset)
            .unwrap();
        assert_eq!(span.day(&offset), Some(second));
        assert_eq!(span.time(), "08:15");
    }

    #[test]
    fn test_with_time_keeps_day() {
        let offset = FixedOffset::east_opt(-5 * 3600).unwrap();
        let day = CalendarDay::new(2024, 0, 15).unwrap();
        let span = Span::inactive().toggle_day(day, None, &offset).unwrap();

        let moved = span
            .with_time(TimeOfDay::parse("22:30").ok(), &offset)
            .unwrap();
        assert_eq!(moved.day(&offset), Some(day));
        assert_eq!(moved.time(), "22:30");
        assert_eq!(
            moved.date().unwrap() - span.date().unwrap(),
            (22 * 60 + 30) * 60_000
        );
    }

    #[test]
    fn test_with_time_on_inactive_span_is_noop() {
        let span = Span::inactive();
        let moved = span.with_time(TimeOfDay::parse("10:00").ok(), &utc()).unwrap();
        assert_eq!(moved, Span::inactive());
    }

    #[test]
    fn test_interval_rolling_window() {
        let h = history(&[0, 60_000, 120_000]);
        let interval =
            EffectiveInterval::resolve(&h, &SpanPair::default(), RollingWindow::OneMinute).unwrap();
        assert_eq!(interval, EffectiveInterval { from: 60_000, to: 120_000 });
    }

    #[test]
    fn test_interval_custom_span() {
        let h = history(&[0, 60_000]);
        let spans = SpanPair::new(Span::at(1_000_000, None), Span::at(2_000_000, None));
        let interval = EffectiveInterval::resolve(&h, &spans, RollingWindow::TwentyFourHours).unwrap();
        assert_eq!(interval, EffectiveInterval { from: 1_000_000, to: 2_000_000 });
    }

    #[test]
    fn test_interval_only_to_uses_first_sample() {
        let h = history(&[500, 60_000]);
        let spans = SpanPair::new(Span::inactive(), Span::at(40_000, None));
        let interval = EffectiveInterval::resolve(&h, &spans, RollingWindow::OneMinute).unwrap();
        assert_eq!(interval, EffectiveInterval { from: 500, to: 40_000 });
    }

    #[test]
    fn test_interval_only_from_ends_at_last_sample() {
        let h = history(&[500, 60_000]);
        let spans = SpanPair::new(Span::at(1_000, None), Span::inactive());
        let interval = EffectiveInterval::resolve(&h, &spans, RollingWindow::OneMinute).unwrap();
        assert_eq!(interval, EffectiveInterval { from: 1_000, to: 60_000 });
    }

    #[test]
    fn test_interval_never_reversed() {
        let h = history(&[500, 60_000]);

        let reversed = SpanPair::new(Span::at(9_000, None), Span::at(1_000, None));
        let interval = EffectiveInterval::resolve(&h, &reversed, RollingWindow::OneMinute).unwrap();
        assert_eq!(interval, EffectiveInterval { from: 1_000, to: 9_000 });

        let from_after_last = SpanPair::new(Span::at(90_000, None), Span::inactive());
        let interval =
            EffectiveInterval::resolve(&h, &from_after_last, RollingWindow::OneMinute).unwrap();
        assert!(interval.to >= interval.from);

        let to_before_first = SpanPair::new(Span::inactive(), Span::at(100, None));
        let interval =
            EffectiveInterval::resolve(&h, &to_before_first, RollingWindow::OneMinute).unwrap();
        assert_eq!(interval, EffectiveInterval { from: 100, to: 100 });
    }

    #[test]
    fn test_interval_empty_history() {
        let h = SampleHistory::new();
        assert!(EffectiveInterval::resolve(&h, &SpanPair::default(), RollingWindow::OneMinute).is_none());

        let pinned = SpanPair::new(Span::at(1, None), Span::at(2, None));
        assert!(EffectiveInterval::resolve(&h, &pinned, RollingWindow::OneMinute).is_some());
    }

    #[test]
    fn test_range_mode() {
        assert_eq!(
            RangeMode::resolve(&SpanPair::default(), RollingWindow::FiveMinutes),
            RangeMode::Preset(RollingWindow::FiveMinutes)
        );
        let spans = SpanPair::new(Span::inactive(), Span::at(1, None));
        assert_eq!(RangeMode::resolve(&spans, RollingWindow::FiveMinutes), RangeMode::Custom);
        assert_eq!(RangeMode::Custom.preset(), None);
    }
}
