//! Response body decoding for the collected-stats and collected-logs
//! endpoints.
//!
//! The server appends to its stats file one JSON object at a time and
//! serves the file while writing it, so a body may be a JSON array, one
//! object per line, or objects concatenated across lines, and the last
//! object may be cut short.

use serde::de::DeserializeOwned;
use serde_json::Deserializer;

use crate::error::{DashError, DashResult};

/// Decodes every record in `body`.
///
/// A body that ends mid-record is reported as [`DashError::TornPayload`];
/// anything else that is not JSON of the expected shape is
/// [`DashError::InvalidPayload`]. Whitespace-only bodies are
/// [`DashError::EmptyPayload`]; an empty array is a valid, empty result.
pub fn parse_records<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> DashResult<Vec<T>> {
    let trimmed = body.trim_ascii();
    if trimmed.is_empty() {
        return Err(DashError::EmptyPayload(endpoint.to_string()));
    }

    if trimmed.first() == Some(&b'[') {
        return serde_json::from_slice(trimmed).map_err(|e| classify(endpoint, 0, e));
    }

    let mut records = Vec::new();
    for item in Deserializer::from_slice(trimmed).into_iter::<T>() {
        match item {
            Ok(record) => records.push(record),
            Err(e) => return Err(classify(endpoint, records.len(), e)),
        }
    }
    Ok(records)
}

/// Decodes a body holding exactly one record.
pub fn parse_record<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> DashResult<T> {
    let trimmed = body.trim_ascii();
    if trimmed.is_empty() {
        return Err(DashError::EmptyPayload(endpoint.to_string()));
    }
    serde_json::from_slice(trimmed).map_err(|e| classify(endpoint, 0, e))
}

fn classify(endpoint: &str, parsed: usize, err: serde_json::Error) -> DashError {
    if err.is_eof() {
        DashError::TornPayload {
            endpoint: endpoint.to_string(),
            parsed,
            message: err.to_string(),
        }
    } else {
        DashError::invalid_payload(endpoint, err.to_string())
    }
}
