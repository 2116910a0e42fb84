//! `deploywatch history`: list past jobs, newest first.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use deploywatch_core::{Config, HistoryAggregator, HttpJobApi};
use indicatif::{ProgressBar, ProgressStyle};

pub async fn run(config: &Config, limit: Option<usize>) -> Result<ExitCode> {
    let zone = config
        .display
        .zone()
        .context("invalid display.time_zone")?;
    let api = Arc::new(HttpJobApi::new(&config.server).context("failed to create HTTP client")?);
    let aggregator = HistoryAggregator::new(api, zone);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message("Loading job history...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let report = aggregator.fetch_all().await;
    spinner.finish_and_clear();

    // History problems are shown, not fatal.
    if let Some(error) = &report.error {
        eprintln!("{error}");
        return Ok(ExitCode::SUCCESS);
    }

    if report.entries.is_empty() {
        println!("No jobs found.");
        return Ok(ExitCode::SUCCESS);
    }

    let shown = limit.unwrap_or(report.entries.len());
    for entry in report.entries.iter().take(shown) {
        println!("{:<24} {}", entry.job.id, entry.summary);
    }
    if shown < report.entries.len() {
        println!("... {} more", report.entries.len() - shown);
    }

    tracing::info!(
        total = report.entries.len(),
        shown = shown.min(report.entries.len()),
        "Listed job history"
    );
    Ok(ExitCode::SUCCESS)
}
