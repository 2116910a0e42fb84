//! deploywatch - follow deployment jobs from the terminal
//!
//! Attaches to jobs started elsewhere and prints their log output as it
//! arrives, or lists past jobs newest first.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/deploywatch/deploywatch.YYYY-MM-DD.log (~/.local/state/deploywatch/)
//! - Config: $XDG_CONFIG_HOME/deploywatch/config.toml (~/.config/deploywatch/config.toml)

mod history;
mod watch;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use deploywatch_core::Config;

#[derive(Parser)]
#[command(name = "deploywatch")]
#[command(about = "Follow deployment jobs and browse job history")]
#[command(version)]
struct Args {
    /// Deployment server base URL (overrides server.base_url)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow one job until it finishes
    Watch {
        /// Job identifier
        job_id: String,

        /// Skip the push channel and poll the log endpoint
        #[arg(long)]
        poll_only: bool,
    },
    /// List past jobs, newest first
    History {
        /// Show at most this many jobs
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the resolved configuration and file locations
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(server) = &args.server {
        config.server.base_url = server.clone();
        config
            .server
            .validate()
            .context("invalid --server value")?;
    }
    match args.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }

    let _log_guard =
        deploywatch_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(server = %config.server.base_url, "deploywatch starting");

    match args.command {
        Command::Watch { job_id, poll_only } => watch::run(&config, &job_id, poll_only).await,
        Command::History { limit } => history::run(&config, limit).await,
        Command::Config => {
            print_config(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) -> Result<()> {
    let zone = config.display.zone().context("invalid display.time_zone")?;

    println!("Config file: {}", Config::config_path().display());
    println!("Log file:    {}", Config::log_path().display());
    println!();
    println!("[server]");
    println!("  base_url             = {}", config.server.base_url);
    println!(
        "  api_token            = {}",
        if config.server.api_token.is_some() {
            "(set)"
        } else {
            "(none)"
        }
    );
    println!("  timeout_secs         = {}", config.server.timeout_secs);
    println!(
        "  connect_timeout_secs = {}",
        config.server.connect_timeout_secs
    );
    println!("[observer]");
    println!("  use_stream           = {}", config.observer.use_stream);
    println!(
        "  stream_idle_timeout_secs = {}",
        config.observer.stream_idle_timeout_secs
    );
    println!("  poll_interval_ms     = {}", config.observer.poll_interval_ms);
    println!("  stall_ticks          = {}", config.observer.stall_ticks);
    println!("  max_poll_ticks       = {}", config.observer.max_poll_ticks);
    println!(
        "  fetch_failure_weight = {}",
        config.observer.fetch_failure_weight
    );
    println!(
        "  fetch_failure_limit  = {}",
        config.observer.fetch_failure_limit
    );
    println!("[display]");
    println!("  time_zone            = {zone}");
    println!("[logging]");
    println!("  level                = {}", config.logging.level);
    println!("  max_files            = {}", config.logging.max_files);
    Ok(())
}
