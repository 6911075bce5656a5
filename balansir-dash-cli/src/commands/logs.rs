use anyhow::Result;
use balansir_dash_core::{BalansirClient, DashConfig, LogRecord, LogTag, LogView};
use chrono::{DateTime, FixedOffset};
use clap::Args;
use colored::{ColoredString, Colorize};
use std::cell::Cell;
use std::rc::Rc;

use super::ingestion;

#[derive(Args)]
pub struct LogsArgs {
    #[arg(long = "hide", value_name = "TAG", help = "Hide records with this tag (repeatable)")]
    hide: Vec<String>,

    #[arg(short, long, help = "Only show records containing this text")]
    search: Option<String>,

    #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
    format: String,

    #[arg(short = 'F', long, help = "Keep reloading and print new records as they appear")]
    follow: bool,

    #[arg(short, long, requires = "follow", help = "Stop following after this many reloads")]
    ticks: Option<u64>,
}

pub async fn handle_logs_command(
    args: LogsArgs,
    config: &DashConfig,
    client: BalansirClient,
) -> Result<()> {
    let ingestion = ingestion(config, client);
    let dashboard = ingestion.dashboard();

    for tag in &args.hide {
        let tag: LogTag = tag.parse()?;
        if dashboard.tags.get().contains(tag) {
            dashboard.toggle_tag(tag);
        }
    }
    if let Some(search) = args.search {
        dashboard.search_logs(search);
    }

    if args.follow {
        let offset = dashboard.settings().utc_offset;
        let json = args.format == "json";
        let newest = Rc::new(Cell::new(None));
        print_new(&dashboard.visible_logs.get(), &newest, &offset, json);
        {
            let newest = newest.clone();
            dashboard
                .visible_logs
                .watch(move |view: &LogView| print_new(view, &newest, &offset, json));
        }
        ingestion.follow_logs(args.ticks).await;
        return Ok(());
    }

    ingestion.load_logs().await?;
    let view = dashboard.visible_logs.get();

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&*view)?);
        return Ok(());
    }

    if view.records.is_empty() {
        println!("{}", "No log records match.".yellow());
        return Ok(());
    }

    let offset = dashboard.settings().utc_offset;
    for record in &view.records {
        println!("{}", format_record(record, &offset));
    }
    println!(
        "{}",
        format!("{} of {} records", view.records.len(), dashboard.logs.get().len()).dimmed()
    );
    Ok(())
}

/// Prints the records newer than the last one printed.
fn print_new(view: &LogView, newest: &Cell<Option<i64>>, offset: &FixedOffset, json: bool) {
    let seen = newest.get();
    let fresh = view
        .records
        .iter()
        .filter(|r| seen.is_none_or(|seen| r.timestamp > seen));

    for record in fresh {
        if json {
            match serde_json::to_string(record) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("failed to encode log record: {}", e),
            }
        } else {
            println!("{}", format_record(record, offset));
        }
        newest.set(Some(newest.get().map_or(record.timestamp, |t| t.max(record.timestamp))));
    }
}

fn paint(tag: LogTag) -> ColoredString {
    let label = format!("{:<7}", tag.as_str());
    match tag {
        LogTag::Info => label.green(),
        LogTag::Notice => label.cyan(),
        LogTag::Warning => label.yellow(),
        LogTag::Error => label.red(),
        LogTag::Fatal => label.red().bold(),
    }
}

fn format_record(record: &LogRecord, offset: &FixedOffset) -> String {
    let when = DateTime::from_timestamp_millis(record.timestamp)
        .map(|t| t.with_timezone(offset).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| record.timestamp.to_string());
    format!("{} {} {}", when.dimmed(), paint(record.tag), record.text)
}
