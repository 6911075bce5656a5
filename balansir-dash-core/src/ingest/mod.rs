//! Getting samples and logs from a Balansir instance into the dashboard.

pub mod client;
pub mod parse;
pub mod pipeline;

pub use client::{BalansirClient, MetricsApi};
pub use parse::{parse_record, parse_records};
pub use pipeline::{IngestSettings, Ingestion};
