use anyhow::{Context, Result};
use balansir_dash_core::{
    AggregateLabels, BalansirClient, DashConfig, Dashboard, Span, SpanPair, TimeOfDay,
    WidgetFeed, WidgetId,
};
use chrono::{DateTime, FixedOffset, Timelike};
use clap::Args;
use serde::Serialize;
use tracing::warn;

use super::ingestion;

#[derive(Args)]
pub struct WatchArgs {
    #[arg(short, long, help = "Rolling window preset (1m, 5m, 30m, 3h, 24h)")]
    window: Option<String>,

    #[arg(long, help = "Custom range start, RFC 3339")]
    from: Option<String>,

    #[arg(long, help = "Custom range end, RFC 3339")]
    to: Option<String>,

    #[arg(short, long, help = "Stop after this many polls")]
    ticks: Option<u64>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Line<'a> {
    Feed {
        widget: WidgetId,
        feed: &'a WidgetFeed,
    },
    Aggregates {
        aggregates: &'a AggregateLabels,
    },
}

fn print_line(line: &Line<'_>) {
    match serde_json::to_string(line) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("failed to encode output line: {}", e),
    }
}

pub async fn handle_watch_command(
    args: WatchArgs,
    config: &DashConfig,
    client: BalansirClient,
) -> Result<()> {
    let ingestion = ingestion(config, client);
    let dashboard = ingestion.dashboard();

    if let Some(window) = &args.window {
        dashboard.select_preset_label(window)?;
    }
    apply_custom_range(dashboard, args.from.as_deref(), args.to.as_deref())?;

    dashboard.watch_feeds(|widget, feed| print_line(&Line::Feed { widget, feed }));
    dashboard
        .labels
        .watch(|aggregates| print_line(&Line::Aggregates { aggregates }));

    ingestion.run(args.ticks).await;
    Ok(())
}

fn apply_custom_range(dashboard: &Dashboard, from: Option<&str>, to: Option<&str>) -> Result<()> {
    if from.is_none() && to.is_none() {
        return Ok(());
    }

    let offset = dashboard.settings().utc_offset;
    let from = from.map(|s| span_at(s, &offset)).transpose()?.unwrap_or_default();
    let to = to.map(|s| span_at(s, &offset)).transpose()?.unwrap_or_default();
    dashboard.set_spans(SpanPair::new(from, to));
    Ok(())
}

fn span_at(input: &str, offset: &FixedOffset) -> Result<Span> {
    let instant = DateTime::parse_from_rfc3339(input)
        .with_context(|| format!("'{}' is not an RFC 3339 timestamp", input))?;
    let local = instant.with_timezone(offset);
    let time = TimeOfDay::new(local.hour(), local.minute())?;
    Ok(Span::at(instant.timestamp_millis(), Some(time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use balansir_dash_core::DashboardSettings;

    #[test]
    fn test_span_at_uses_dashboard_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let span = span_at("2024-01-15T10:30:00Z", &offset).unwrap();
        assert!(span.is_active());
        assert_eq!(span.time(), "12:30");
        assert_eq!(span.date(), Some(1_705_314_600_000));
    }

    #[test]
    fn test_span_at_rejects_garbage() {
        let offset = FixedOffset::east_opt(0).unwrap();
        assert!(span_at("yesterday", &offset).is_err());
    }

    #[test]
    fn test_custom_range_switches_to_custom_mode() {
        let dashboard = Dashboard::new(DashboardSettings::default());
        apply_custom_range(&dashboard, Some("2024-01-15T10:00:00Z"), None).unwrap();
        assert!(dashboard.spans.get().from.is_active());
        assert!(!dashboard.spans.get().to.is_active());
        assert_eq!(*dashboard.preset.get(), None);
    }
}
