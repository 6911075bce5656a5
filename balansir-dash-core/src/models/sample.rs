use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// One polled measurement from `/metrics/stats`.
///
/// Extra fields the server sends (ports, endpoints, cache info) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub average_response_time: f64,
    pub requests_per_second: f64,
    pub memory_usage: f64,
    #[serde(default)]
    pub errors_count: f64,
    #[serde(default)]
    pub status_codes: BTreeMap<String, i64>,
}

impl Sample {
    pub fn new(timestamp: i64, average_response_time: f64) -> Self {
        Self {
            timestamp,
            average_response_time,
            requests_per_second: 0.0,
            memory_usage: 0.0,
            errors_count: 0.0,
            status_codes: BTreeMap::new(),
        }
    }

    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_memory_usage(mut self, memory: f64) -> Self {
        self.memory_usage = memory;
        self
    }

    pub fn with_errors_count(mut self, errors: f64) -> Self {
        self.errors_count = errors;
        self
    }

    pub fn with_status_code(mut self, code: impl Into<String>, count: i64) -> Self {
        self.status_codes.insert(code.into(), count);
        self
    }
}

/// Result of one bulk load, tagged with the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkLoad {
    pub attempt: u64,
    pub samples: Vec<Sample>,
}

/// The canonical, timestamp-ordered sample history.
///
/// Timestamps are unique. `generation` is the attempt number of the bulk
/// load the history was last rebuilt from, 0 before any load landed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleHistory {
    samples: Vec<Sample>,
    generation: u64,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a history from unordered samples, keeping the first sample
    /// seen for each timestamp.
    pub fn from_samples(generation: u64, mut samples: Vec<Sample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        samples.dedup_by_key(|s| s.timestamp);
        Self {
            samples,
            generation,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    /// The newest sample. Its timestamp is what the dashboard treats as "now".
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.first().map(|s| s.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last().map(|s| s.timestamp)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.samples.iter().map(|s| s.timestamp)
    }

    /// Inserts a polled sample at its sorted position.
    ///
    /// Returns false when a sample with the same timestamp is already held.
    pub fn insert(&mut self, sample: Sample) -> bool {
        match self
            .samples
            .binary_search_by_key(&sample.timestamp, |s| s.timestamp)
        {
            Ok(_) => false,
            Err(pos) => {
                self.samples.insert(pos, sample);
                true
            }
        }
    }

    /// Replaces the history with a bulk load, unless an equal or newer load
    /// was already applied.
    ///
    /// Polled samples strictly newer than the load's last sample survive,
    /// so a slow bulk load never erases data polled while it was in flight.
    pub fn apply_load(&self, load: &BulkLoad) -> Option<SampleHistory> {
        if load.attempt <= self.generation {
            return None;
        }

        let mut next = SampleHistory::from_samples(load.attempt, load.samples.clone());
        let cutoff = next.last_timestamp().unwrap_or(i64::MIN);
        let tail_start = self.samples.partition_point(|s| s.timestamp <= cutoff);
        next.samples.extend_from_slice(&self.samples[tail_start..]);
        Some(next)
    }

    /// Samples with `from <= timestamp <= to`.
    pub fn range(&self, from: i64, to: i64) -> &[Sample] {
        &self.samples[self.index_range(from, to)]
    }

    /// Index bounds of [`SampleHistory::range`].
    pub fn index_range(&self, from: i64, to: i64) -> Range<usize> {
        if from > to {
            return 0..0;
        }
        let start = self.samples.partition_point(|s| s.timestamp < from);
        let end = self.samples.partition_point(|s| s.timestamp <= to);
        start..end
    }

    /// The samples at `indices`, empty when they fall outside the history.
    pub fn slice(&self, indices: &Range<usize>) -> &[Sample] {
        self.samples.get(indices.clone()).unwrap_or_default()
    }
}
