use anyhow::{bail, Result};
use balansir_dash_core::{BalansirClient, CalendarMonth, DashConfig};
use clap::Args;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use super::ingestion;

const WEEKDAYS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Args)]
pub struct CalendarArgs {
    #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
    format: String,
}

pub async fn handle_calendar_command(
    args: CalendarArgs,
    config: &DashConfig,
    client: BalansirClient,
) -> Result<()> {
    let ingestion = ingestion(config, client);
    if let Err(e) = ingestion.bulk_load().await {
        bail!("could not load collected stats: {}", e);
    }

    let months = ingestion.dashboard().calendar.get();

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&*months)?);
        return Ok(());
    }

    if months.is_empty() {
        println!("{}", "No samples collected yet.".yellow());
        return Ok(());
    }

    for month in months.iter() {
        let name = MONTH_NAMES
            .get(month.month as usize)
            .copied()
            .unwrap_or("?");
        println!("{}", format!("{} {}", name, month.year).bold());
        println!("{}", month_table(month));
        println!();
    }
    Ok(())
}

/// Monday-first grid; days with samples are highlighted.
fn month_table(month: &CalendarMonth) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(WEEKDAYS.iter().map(|d| Cell::new(d).fg(Color::White)));

    for week in month.number_of_days.chunks(7) {
        let row = week.iter().map(|&day| match day {
            0 => Cell::new(""),
            d if month.is_active(d) => Cell::new(d).fg(Color::Green),
            d => Cell::new(d).fg(Color::DarkGrey),
        });
        table.add_row(row);
    }
    table
}
