use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable ids of the chart widgets a renderer subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetId {
    ResponseTime,
    RequestsPerSecond,
    Memory,
    StatusCodes,
}

impl WidgetId {
    pub const ALL: [WidgetId; 4] = [
        WidgetId::ResponseTime,
        WidgetId::RequestsPerSecond,
        WidgetId::Memory,
        WidgetId::StatusCodes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetId::ResponseTime => "response_time",
            WidgetId::RequestsPerSecond => "requests_per_second",
            WidgetId::Memory => "memory",
            WidgetId::StatusCodes => "status_codes",
        }
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line chart series; labels are sample timestamps in epoch millis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartFeed {
    pub labels: Vec<i64>,
    pub values: Vec<f64>,
}

impl ChartFeed {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Status code buckets of one sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BarFeed {
    pub labels: Vec<String>,
    pub values: Vec<i64>,
}

/// What a widget receives, tagged by chart kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetFeed {
    Line(ChartFeed),
    Bar(BarFeed),
}
