use anyhow::{Context, Result};
use balansir_dash_core::{BalansirClient, DashConfig};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{
    handle_calendar_command, handle_logs_command, handle_watch_command, CalendarArgs, LogsArgs,
    WatchArgs,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "balansir-dash")]
#[command(version = VERSION)]
#[command(about = "Headless Balansir dashboard: live feeds, calendar and logs")]
#[command(long_about = r#"
balansir-dash runs the Balansir dashboard state layer without a browser.
It bulk-loads the collected stats from a Balansir instance, keeps polling
it, and prints every widget feed as one JSON line per change.

Settings come from config/default.toml, balansir-dash.toml, the user config
directory and BALANSIR_DASH_* environment variables.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Read settings from this file only")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Balansir dashboard root, e.g. http://host:8080/balansir")]
    base_url: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Bulk load, then poll and print feed changes as JSON lines")]
    Watch(WatchArgs),

    #[command(about = "Load the collected logs and print the filtered list")]
    Logs(LogsArgs),

    #[command(about = "Print the months and days that have samples")]
    Calendar(CalendarArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config, cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // The dashboard graph is !Send; everything runs on one LocalSet.
    let local = tokio::task::LocalSet::new();
    match local.block_on(&runtime, run(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<DashConfig> {
    let mut config = match &cli.config {
        Some(path) => DashConfig::load_from_paths(vec![path.clone()])
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DashConfig::load().context("failed to load configuration")?,
    };

    if let Some(url) = &cli.base_url {
        config.server.base_url = url.clone();
        config.validate().context("invalid --base-url")?;
    }

    if config.calendar.utc_offset_minutes.is_none() {
        let local_seconds = Local::now().offset().local_minus_utc();
        config.calendar.utc_offset_minutes = Some(local_seconds / 60);
    }

    Ok(config)
}

/// Logs go to stderr; stdout carries only command output.
fn init_logging(config: &DashConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level()))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(command: Commands, config: DashConfig) -> Result<()> {
    let client = BalansirClient::from_config(&config)?;

    match command {
        Commands::Watch(args) => handle_watch_command(args, &config, client).await,
        Commands::Logs(args) => handle_logs_command(args, &config, client).await,
        Commands::Calendar(args) => handle_calendar_command(args, &config, client).await,
    }
}
