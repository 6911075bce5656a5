use chrono::DateTime;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::DashError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogTag {
    Info,
    Notice,
    Warning,
    Error,
    Fatal,
}

impl LogTag {
    pub const ALL: [LogTag; 5] = [
        LogTag::Info,
        LogTag::Notice,
        LogTag::Warning,
        LogTag::Error,
        LogTag::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Info => "INFO",
            LogTag::Notice => "NOTICE",
            LogTag::Warning => "WARNING",
            LogTag::Error => "ERROR",
            LogTag::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogTag {
    type Err = DashError;

    /// Case-insensitive; the server's text logger right-pads tags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        LogTag::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| DashError::UnknownLogTag(trimmed.to_string()))
    }
}

impl<'de> Deserialize<'de> for LogTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// One line from `/logs/collected_logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Epoch milliseconds
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
    pub tag: LogTag,
    pub text: String,
}

/// Accepts epoch milliseconds or an RFC 3339 string.
fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    struct TimestampVisitor;

    impl Visitor<'_> for TimestampVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("epoch milliseconds or an RFC 3339 timestamp")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(E::custom)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            Ok(v as i64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.timestamp_millis())
                .map_err(E::custom)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Tags currently enabled in the logs filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSet(BTreeSet<LogTag>);

impl Default for TagSet {
    fn default() -> Self {
        Self(LogTag::ALL.into_iter().collect())
    }
}

impl TagSet {
    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, tag: LogTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn toggled(&self, tag: LogTag) -> Self {
        let mut next = self.0.clone();
        if !next.remove(&tag) {
            next.insert(tag);
        }
        Self(next)
    }

    pub fn iter(&self) -> impl Iterator<Item = LogTag> + '_ {
        self.0.iter().copied()
    }
}

/// What the log list renders: the filtered records plus the filter that
/// produced them, for highlighting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogView {
    pub records: Vec<LogRecord>,
    pub tags: TagSet,
    pub search: String,
}

impl LogView {
    pub fn build(logs: &[LogRecord], tags: &TagSet, search: &str) -> Self {
        let needle = search.trim().to_lowercase();
        let records = logs
            .iter()
            .filter(|record| tags.contains(record.tag))
            .filter(|record| needle.is_empty() || record.text.to_lowercase().contains(&needle))
            .cloned()
            .collect();

        Self {
            records,
            tags: tags.clone(),
            search: search.to_string(),
        }
    }
}
