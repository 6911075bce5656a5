//! Window selection, aggregate statistics and chart feeds.
//!
//! Everything here is a pure function of a sample slice. Empty input is
//! "no data": aggregates come back as `None` and feeds come back empty.

use serde::Serialize;
use std::ops::Range;

use crate::models::{BarFeed, ChartFeed, EffectiveInterval, Sample, SampleHistory};

/// Default lookback of the minor window.
pub const MINOR_WINDOW_MS: i64 = 60_000;

/// Index bounds of the samples within `minor_ms` of the newest sample,
/// inclusive.
pub fn minor_range(history: &SampleHistory, minor_ms: i64) -> Range<usize> {
    match history.last_timestamp() {
        Some(last) => history.index_range(last - minor_ms, last),
        None => 0..0,
    }
}

/// Index bounds of the samples inside the effective interval, inclusive.
pub fn major_range(history: &SampleHistory, interval: Option<&EffectiveInterval>) -> Range<usize> {
    match interval {
        Some(interval) => history.index_range(interval.from, interval.to),
        None => 0..0,
    }
}

pub fn minor_window(history: &SampleHistory, minor_ms: i64) -> &[Sample] {
    history.slice(&minor_range(history, minor_ms))
}

pub fn major_window<'a>(
    history: &'a SampleHistory,
    interval: Option<&EffectiveInterval>,
) -> &'a [Sample] {
    history.slice(&major_range(history, interval))
}

pub fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Nearest-rank percentile: `round(p / 100 * n) - 1`, clamped into the
/// slice.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).round() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    Some(sorted[idx])
}

/// The numbers shown next to the charts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Aggregates {
    pub average: Option<f64>,
    pub p99: Option<f64>,
    pub p90: Option<f64>,
    pub requests_per_second: Option<f64>,
    pub memory: Option<f64>,
    pub errors: Option<f64>,
}

impl Aggregates {
    /// Computed over the minor window.
    pub fn compute(window: &[Sample]) -> Self {
        let response_times: Vec<f64> = window.iter().map(|s| s.average_response_time).collect();
        let rps: Vec<f64> = window.iter().map(|s| s.requests_per_second).collect();
        let newest = window.last();

        Self {
            average: average(&response_times),
            p99: percentile(&response_times, 99.0),
            p90: percentile(&response_times, 90.0),
            requests_per_second: average(&rps),
            memory: newest.map(|s| s.memory_usage),
            errors: newest.map(|s| s.errors_count),
        }
    }
}

/// Display strings, `"-"` where there is no data. Memory is shown as
/// reported, everything else is rounded to an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateLabels {
    pub average: String,
    pub p99: String,
    pub p90: String,
    pub requests_per_second: String,
    pub memory: String,
    pub errors: String,
}

fn label(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{}", v.round() as i64),
        _ => "-".to_string(),
    }
}

fn exact_label(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v}"),
        _ => "-".to_string(),
    }
}

impl From<&Aggregates> for AggregateLabels {
    fn from(agg: &Aggregates) -> Self {
        Self {
            average: label(agg.average),
            p99: label(agg.p99),
            p90: label(agg.p90),
            requests_per_second: label(agg.requests_per_second),
            memory: exact_label(agg.memory),
            errors: label(agg.errors),
        }
    }
}

/// A line series of one metric over `window`.
pub fn line_feed(window: &[Sample], metric: impl Fn(&Sample) -> f64) -> ChartFeed {
    ChartFeed {
        labels: window.iter().map(|s| s.timestamp).collect(),
        values: window.iter().map(metric).collect(),
    }
}

/// Status codes of the newest sample in `window`, ordered by code.
pub fn status_code_feed(window: &[Sample]) -> BarFeed {
    match window.last() {
        Some(sample) => BarFeed {
            labels: sample.status_codes.keys().cloned().collect(),
            values: sample.status_codes.values().copied().collect(),
        },
        None => BarFeed::default(),
    }
}
