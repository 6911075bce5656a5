//! The dashboard's state graph, wired once per page lifetime.
//!
//! Inputs are events (polled samples, bulk loads, calendar clicks, preset
//! buttons, UI intents); outputs are stores a renderer watches: chart
//! feeds, aggregate labels, the calendar grid, the effective interval and
//! the filtered log list.

use chrono::{FixedOffset, Offset, Utc};
use std::ops::Range;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::aggregation::{self, AggregateLabels, Aggregates, MINOR_WINDOW_MS};
use crate::config::DashConfig;
use crate::error::DashResult;
use crate::models::{
    build_calendar, BarFeed, BulkLoad, CalendarDay, CalendarMonth, ChartFeed, EffectiveInterval,
    LogRecord, LogTag, LogView, RangeMode, RollingWindow, Sample, SampleHistory, Side, SpanPair,
    TagSet, TimeOfDay, WidgetFeed, WidgetId,
};
use crate::reactive::{Event, Graph, Split, Store};

/// Tunables the graph is built with.
#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub minor_window_ms: i64,
    pub rolling_window: RollingWindow,
    pub utc_offset: FixedOffset,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            minor_window_ms: MINOR_WINDOW_MS,
            rolling_window: RollingWindow::default(),
            utc_offset: Utc.fix(),
        }
    }
}

impl From<&DashConfig> for DashboardSettings {
    fn from(config: &DashConfig) -> Self {
        Self {
            minor_window_ms: config.windows.minor_window_ms,
            rolling_window: config.rolling_window(),
            utc_offset: config.utc_offset(),
        }
    }
}

/// Typed replacements for click-target sniffing in the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiIntent {
    ToggleCalendar,
    /// A click outside any open panel
    DismissOverlays,
    ToggleTagFilter,
    FocusSearch,
    BlurSearch,
}

impl UiIntent {
    pub const ALL: [UiIntent; 5] = [
        UiIntent::ToggleCalendar,
        UiIntent::DismissOverlays,
        UiIntent::ToggleTagFilter,
        UiIntent::FocusSearch,
        UiIntent::BlurSearch,
    ];
}

pub struct Dashboard {
    graph: Rc<Graph>,
    settings: DashboardSettings,

    // samples
    pub samples: Store<SampleHistory>,
    pub sample_added: Event<Sample>,
    pub samples_loaded: Event<BulkLoad>,

    // time range
    pub rolling_window: Store<RollingWindow>,
    pub preset_selected: Event<RollingWindow>,
    pub spans: Store<SpanPair>,
    pub spans_set: Event<SpanPair>,
    pub spans_reset: Event<()>,
    pub active_side: Store<Side>,
    pub side_selected: Event<Side>,
    /// The time shown in the time field: what was typed for the active
    /// side, else that side's stored time
    pub time_input: Store<Option<TimeOfDay>>,
    pub time_selected: Event<Option<TimeOfDay>>,
    pub day_selected: Event<CalendarDay>,
    pub range_mode: Store<RangeMode>,
    /// The highlighted preset button; `None` while a custom span is active
    pub preset: Store<Option<RollingWindow>>,
    pub interval: Store<Option<EffectiveInterval>>,
    pub calendar: Store<Vec<CalendarMonth>>,

    // aggregation
    pub minor_window: Store<Range<usize>>,
    pub major_window: Store<Range<usize>>,
    pub aggregates: Store<Aggregates>,
    pub labels: Store<AggregateLabels>,
    pub response_time_feed: Store<ChartFeed>,
    pub requests_feed: Store<ChartFeed>,
    pub memory_feed: Store<ChartFeed>,
    pub status_codes_feed: Store<BarFeed>,

    // logs
    pub logs: Store<Vec<LogRecord>>,
    pub logs_loaded: Event<Vec<LogRecord>>,
    pub tags: Store<TagSet>,
    pub tag_toggled: Event<LogTag>,
    pub search: Store<String>,
    pub search_changed: Event<String>,
    pub search_cleared: Event<()>,
    pub visible_logs: Store<LogView>,

    // ui
    pub ui_intent: Event<UiIntent>,
    pub calendar_open: Store<bool>,
    pub tag_filter_open: Store<bool>,
    pub search_focused: Store<bool>,
}

impl Dashboard {
    pub fn new(settings: DashboardSettings) -> Self {
        let graph = Rc::new(Graph::new());
        let g = graph.as_ref();

        // ------------------------------------------------------------------
        // Samples
        // ------------------------------------------------------------------
        let samples = g.store("samples", SampleHistory::new());
        let sample_added = g.event::<Sample>("sample_added");
        let samples_loaded = g.event::<BulkLoad>("samples_loaded");

        g.on(&samples, &sample_added, |history, sample| {
            let mut next = history.clone();
            if next.insert(sample.clone()) {
                Some(next)
            } else {
                debug!(timestamp = sample.timestamp, "duplicate sample ignored");
                None
            }
        });
        g.on(&samples, &samples_loaded, |history, load| {
            let next = history.apply_load(load);
            if next.is_none() {
                debug!(
                    attempt = load.attempt,
                    applied = history.generation(),
                    "stale bulk load ignored"
                );
            }
            next
        });

        // ------------------------------------------------------------------
        // Time range
        // ------------------------------------------------------------------
        let rolling_window = g.store("rolling_window", settings.rolling_window);
        let preset_selected = g.event::<RollingWindow>("preset_selected");
        let spans = g.store("spans", SpanPair::default());
        let spans_set = g.event::<SpanPair>("spans_set");
        let spans_reset = g.event::<()>("spans_reset");
        let active_side = g.store("active_side", Side::default());
        let side_selected = g.event::<Side>("side_selected");
        // What the user typed; cleared whenever the edited side changes.
        let pending_time = g.store("pending_time", None::<TimeOfDay>);
        let time_selected = g.event::<Option<TimeOfDay>>("time_selected");
        let day_selected = g.event::<CalendarDay>("day_selected");

        g.on(&rolling_window, &preset_selected, |_, w| Some(*w));
        g.reset(&spans, &preset_selected);
        g.reset(&pending_time, &preset_selected);
        g.reset(&spans, &spans_reset);
        g.reset(&pending_time, &spans_reset);
        g.on(&spans, &spans_set, |_, pair| Some(pair.clone()));

        g.on(&active_side, &side_selected, |_, side| Some(*side));
        g.reset(&pending_time, &side_selected);

        let time_input = g.combine_distinct(
            (spans.clone(), active_side.clone(), pending_time.clone()),
            "time_input",
            |(spans, side, pending)| pending.or_else(|| spans.side(*side).time_of_day()),
        );

        g.on(&pending_time, &time_selected, |_, time| Some(*time));
        let offset = settings.utc_offset;
        g.sample_into(
            (spans.clone(), active_side.clone()),
            &time_selected,
            &spans,
            move |(spans, side), time| {
                let span = spans.side(*side);
                if !span.is_active() {
                    return None;
                }
                match span.with_time(*time, &offset) {
                    Ok(moved) => Some(spans.with_side(*side, moved)),
                    Err(e) => {
                        e.log();
                        None
                    }
                }
            },
        );

        g.sample_into(
            (spans.clone(), active_side.clone(), pending_time.clone()),
            &day_selected,
            &spans,
            move |(spans, side, pending), day| {
                let span = spans.side(*side);
                let time = pending.or_else(|| span.time_of_day());
                match span.toggle_day(*day, time, &offset) {
                    Ok(span) => Some(spans.with_side(*side, span)),
                    Err(e) => {
                        e.log();
                        None
                    }
                }
            },
        );

        let range_mode = g.combine_distinct(
            (spans.clone(), rolling_window.clone()),
            "range_mode",
            |(spans, window)| RangeMode::resolve(&spans, *window),
        );
        let preset = g.map_distinct(&range_mode, "preset", RangeMode::preset);
        let interval = g.combine(
            (samples.clone(), spans.clone(), rolling_window.clone()),
            "interval",
            |(history, spans, window)| EffectiveInterval::resolve(&history, &spans, *window),
        );
        let calendar = g.map_distinct(&samples, "calendar", move |history| {
            build_calendar(history.timestamps(), &offset)
        });

        // ------------------------------------------------------------------
        // Aggregation and feeds
        // ------------------------------------------------------------------
        let minor_ms = settings.minor_window_ms;
        let minor_window = g.map(&samples, "minor_window", move |history| {
            aggregation::minor_range(history, minor_ms)
        });
        let major_window = g.combine(
            (samples.clone(), interval.clone()),
            "major_window",
            |(history, interval)| aggregation::major_range(&history, (*interval).as_ref()),
        );

        let aggregates = g.combine(
            (samples.clone(), minor_window.clone()),
            "aggregates",
            |(history, range)| Aggregates::compute(history.slice(&range)),
        );
        let labels = g.map(&aggregates, "labels", |agg| AggregateLabels::from(agg));

        let response_time_feed = g.combine(
            (samples.clone(), major_window.clone()),
            "feed.response_time",
            |(history, range)| {
                aggregation::line_feed(history.slice(&range), |s| s.average_response_time)
            },
        );
        let requests_feed = g.combine(
            (samples.clone(), minor_window.clone()),
            "feed.requests_per_second",
            |(history, range)| {
                aggregation::line_feed(history.slice(&range), |s| s.requests_per_second)
            },
        );
        let memory_feed = g.combine(
            (samples.clone(), minor_window.clone()),
            "feed.memory",
            |(history, range)| aggregation::line_feed(history.slice(&range), |s| s.memory_usage),
        );
        let status_codes_feed = g.combine_distinct(
            (samples.clone(), major_window.clone()),
            "feed.status_codes",
            |(history, range)| aggregation::status_code_feed(history.slice(&range)),
        );

        // ------------------------------------------------------------------
        // Logs
        // ------------------------------------------------------------------
        let logs = g.store("logs", Vec::<LogRecord>::new());
        let logs_loaded = g.event::<Vec<LogRecord>>("logs_loaded");
        let tags = g.store("tags", TagSet::default());
        let tag_toggled = g.event::<LogTag>("tag_toggled");
        let search = g.store("search", String::new());
        let search_changed = g.event::<String>("search_changed");
        let search_cleared = g.event::<()>("search_cleared");

        g.on(&logs, &logs_loaded, |_, records| Some(records.clone()));
        g.on(&tags, &tag_toggled, |tags, tag| Some(tags.toggled(*tag)));
        g.on(&search, &search_changed, |_, text| Some(text.clone()));
        g.reset(&search, &search_cleared);

        let visible_logs = g.combine(
            (logs.clone(), tags.clone(), search.clone()),
            "visible_logs",
            |(logs, tags, search)| LogView::build(&logs, &tags, &search),
        );

        // ------------------------------------------------------------------
        // UI intents
        // ------------------------------------------------------------------
        let ui_intent = g.event::<UiIntent>("ui_intent");
        let calendar_open = g.store("calendar_open", false);
        let tag_filter_open = g.store("tag_filter_open", false);
        let search_focused = g.store("search_focused", false);

        let routes: Split<UiIntent, UiIntent> =
            g.split(&ui_intent, "ui_intent", &UiIntent::ALL, |intent| *intent);
        for intent in UiIntent::ALL {
            let Some(route) = routes.case(&intent) else {
                continue;
            };
            match intent {
                UiIntent::ToggleCalendar => g.on(&calendar_open, route, |open, _| Some(!open)),
                UiIntent::ToggleTagFilter => g.on(&tag_filter_open, route, |open, _| Some(!open)),
                UiIntent::FocusSearch => g.on(&search_focused, route, |_, _| Some(true)),
                UiIntent::BlurSearch => g.on(&search_focused, route, |_, _| Some(false)),
                UiIntent::DismissOverlays => {
                    g.on(&calendar_open, route, |_, _| Some(false));
                    g.on(&tag_filter_open, route, |_, _| Some(false));
                    g.on(&search_focused, route, |_, _| Some(false));
                }
            }
        }

        debug!(nodes = g.node_count(), "dashboard graph wired");

        Self {
            graph,
            settings,
            samples,
            sample_added,
            samples_loaded,
            rolling_window,
            preset_selected,
            spans,
            spans_set,
            spans_reset,
            active_side,
            side_selected,
            time_input,
            time_selected,
            day_selected,
            range_mode,
            preset,
            interval,
            calendar,
            minor_window,
            major_window,
            aggregates,
            labels,
            response_time_feed,
            requests_feed,
            memory_feed,
            status_codes_feed,
            logs,
            logs_loaded,
            tags,
            tag_toggled,
            search,
            search_changed,
            search_cleared,
            visible_logs,
            ui_intent,
            calendar_open,
            tag_filter_open,
            search_focused,
        }
    }

    pub fn graph(&self) -> &Rc<Graph> {
        &self.graph
    }

    pub fn settings(&self) -> &DashboardSettings {
        &self.settings
    }

    // ----------------------------------------------------------------------
    // Inputs
    // ----------------------------------------------------------------------

    pub fn add_sample(&self, sample: Sample) {
        self.graph.emit(&self.sample_added, sample);
    }

    pub fn load_samples(&self, load: BulkLoad) {
        self.graph.emit(&self.samples_loaded, load);
    }

    pub fn select_preset(&self, window: RollingWindow) {
        self.graph.emit(&self.preset_selected, window);
    }

    pub fn select_preset_label(&self, label: &str) -> DashResult<()> {
        let window = label.parse()?;
        self.select_preset(window);
        Ok(())
    }

    pub fn select_side(&self, side: Side) {
        self.graph.emit(&self.side_selected, side);
    }

    /// Toggles `day` on the active side; `month0` is 0-based.
    pub fn select_day(&self, year: i32, month0: u32, day: u32) -> DashResult<()> {
        let day = CalendarDay::new(year, month0, day)?;
        self.graph.emit(&self.day_selected, day);
        Ok(())
    }

    /// Applies a `HH:MM` time to the active side. An empty input clears
    /// it; invalid input is rejected and leaves every span unchanged.
    pub fn select_time(&self, input: &str) -> DashResult<()> {
        let time = if input.trim().is_empty() {
            None
        } else {
            Some(TimeOfDay::parse(input).inspect_err(|e| warn!("{}", e))?)
        };
        self.graph.emit(&self.time_selected, time);
        Ok(())
    }

    pub fn set_spans(&self, spans: SpanPair) {
        self.graph.emit(&self.spans_set, spans);
    }

    pub fn reset_spans(&self) {
        self.graph.emit(&self.spans_reset, ());
    }

    pub fn load_logs(&self, records: Vec<LogRecord>) {
        self.graph.emit(&self.logs_loaded, records);
    }

    pub fn toggle_tag(&self, tag: LogTag) {
        self.graph.emit(&self.tag_toggled, tag);
    }

    pub fn search_logs(&self, text: impl Into<String>) {
        self.graph.emit(&self.search_changed, text.into());
    }

    pub fn clear_search(&self) {
        self.graph.emit(&self.search_cleared, ());
    }

    pub fn intent(&self, intent: UiIntent) {
        self.graph.emit(&self.ui_intent, intent);
    }

    // ----------------------------------------------------------------------
    // Outputs
    // ----------------------------------------------------------------------

    pub fn feed(&self, id: WidgetId) -> WidgetFeed {
        match id {
            WidgetId::ResponseTime => WidgetFeed::Line(ChartFeed::clone(&self.response_time_feed.get())),
            WidgetId::RequestsPerSecond => WidgetFeed::Line(ChartFeed::clone(&self.requests_feed.get())),
            WidgetId::Memory => WidgetFeed::Line(ChartFeed::clone(&self.memory_feed.get())),
            WidgetId::StatusCodes => WidgetFeed::Bar(BarFeed::clone(&self.status_codes_feed.get())),
        }
    }

    /// Calls `f` every time a widget's feed is republished.
    pub fn watch_feeds(&self, f: impl Fn(WidgetId, &WidgetFeed) + 'static) {
        let f = Rc::new(f);

        let line_feeds = [
            (WidgetId::ResponseTime, &self.response_time_feed),
            (WidgetId::RequestsPerSecond, &self.requests_feed),
            (WidgetId::Memory, &self.memory_feed),
        ];
        for (id, store) in line_feeds {
            let f = f.clone();
            store.watch(move |feed: &ChartFeed| f(id, &WidgetFeed::Line(feed.clone())));
        }

        self.status_codes_feed
            .watch(move |feed: &BarFeed| f(WidgetId::StatusCodes, &WidgetFeed::Bar(feed.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dashboard() -> Dashboard {
        Dashboard::new(DashboardSettings::default())
    }

    #[test]
    fn test_empty_dashboard_has_no_data() {
        let dash = dashboard();
        assert!(dash.interval.get().is_none());
        assert_eq!(*dash.aggregates.get(), Aggregates::default());
        assert_eq!(dash.labels.get().average, "-");
        assert!(dash.calendar.get().is_empty());
        assert!(dash.response_time_feed.get().is_empty());
        assert_eq!(*dash.preset.get(), Some(RollingWindow::OneMinute));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = DashConfig::default();
        config.windows.default_rolling_window = "5m".to_string();
        config.calendar.utc_offset_minutes = Some(60);

        let dash = Dashboard::new(DashboardSettings::from(&config));
        assert_eq!(*dash.rolling_window.get(), RollingWindow::FiveMinutes);
        assert_eq!(dash.settings().utc_offset.local_minus_utc(), 3600);
    }

    #[test]
    fn test_ui_intents() {
        let dash = dashboard();

        dash.intent(UiIntent::ToggleCalendar);
        assert!(*dash.calendar_open.get());
        dash.intent(UiIntent::ToggleTagFilter);
        dash.intent(UiIntent::FocusSearch);
        assert!(*dash.tag_filter_open.get());
        assert!(*dash.search_focused.get());

        dash.intent(UiIntent::DismissOverlays);
        assert!(!*dash.calendar_open.get());
        assert!(!*dash.tag_filter_open.get());
        assert!(!*dash.search_focused.get());

        dash.intent(UiIntent::ToggleCalendar);
        dash.intent(UiIntent::ToggleCalendar);
        assert!(!*dash.calendar_open.get());

        dash.intent(UiIntent::FocusSearch);
        dash.intent(UiIntent::BlurSearch);
        assert!(!*dash.search_focused.get());
    }

    #[test]
    fn test_select_time_rejects_invalid_input() {
        let dash = dashboard();
        dash.select_day(2024, 0, 15).unwrap();
        let before = dash.spans.get();

        assert!(dash.select_time("25:61").is_err());
        assert_eq!(dash.spans.get(), before);
        assert_eq!(*dash.time_input.get(), None);
    }

    #[test]
    fn test_select_preset_label() {
        let dash = dashboard();
        dash.select_preset_label("3h").unwrap();
        assert_eq!(*dash.rolling_window.get(), RollingWindow::ThreeHours);
        assert!(dash.select_preset_label("2h").is_err());
        assert_eq!(*dash.rolling_window.get(), RollingWindow::ThreeHours);
    }

    #[test]
    fn test_feed_snapshot() {
        let dash = dashboard();
        dash.add_sample(Sample::new(1_000, 5.0).with_status_code("200", 1));
        match dash.feed(WidgetId::StatusCodes) {
            WidgetFeed::Bar(bar) => assert_eq!(bar.labels, vec!["200"]),
            other => panic!("unexpected feed {other:?}"),
        }
        match dash.feed(WidgetId::ResponseTime) {
            WidgetFeed::Line(line) => assert_eq!(line.values, vec![5.0]),
            other => panic!("unexpected feed {other:?}"),
        }
    }
}
