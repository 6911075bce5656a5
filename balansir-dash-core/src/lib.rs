#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::manual_range_contains,
    clippy::type_complexity,
    clippy::redundant_closure
)]

//! State layer of the Balansir live operations dashboard.
//!
//! A [`Dashboard`] is a reactive graph of stores and events wired once at
//! startup. [`Ingestion`] feeds it from a Balansir instance; renderers
//! watch its output stores (chart feeds, aggregate labels, the calendar
//! grid, the filtered log list).

pub mod aggregation;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod ingest;
pub mod models;
pub mod reactive;

pub use aggregation::{AggregateLabels, Aggregates, MINOR_WINDOW_MS};
pub use config::{
    get_config_dir, CalendarConfig, ConfigLoadError, DashConfig, LoggingConfig, PollingConfig,
    ServerConfig, WindowsConfig,
};
pub use dashboard::{Dashboard, DashboardSettings, UiIntent};
pub use error::{retry_async_with_config, DashError, DashResult, RetryConfig};
pub use ingest::{BalansirClient, IngestSettings, Ingestion, MetricsApi};
pub use models::{
    build_calendar, BarFeed, BulkLoad, CalendarDay, CalendarMonth, ChartFeed, EffectiveInterval,
    LogRecord, LogTag, LogView, RangeMode, RollingWindow, Sample, SampleHistory, Side, Span,
    SpanPair, TagSet, TimeOfDay, WidgetFeed, WidgetId,
};
pub use reactive::{Clock, Effect, Event, Graph, NodeId, Source, Split, Store};
