pub mod calendar;
pub mod feed;
pub mod log;
pub mod range;
pub mod sample;

pub use calendar::{build_calendar, CalendarDay, CalendarMonth};
pub use feed::{BarFeed, ChartFeed, WidgetFeed, WidgetId};
pub use log::{LogRecord, LogTag, LogView, TagSet};
pub use range::{EffectiveInterval, RangeMode, RollingWindow, Side, Span, SpanPair, TimeOfDay};
pub use sample::{BulkLoad, Sample, SampleHistory};
