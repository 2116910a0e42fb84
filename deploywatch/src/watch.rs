//! `deploywatch watch`: follow one job until it finishes.
//!
//! Log lines go to stdout in arrival order; status changes and the final
//! verdict go to stderr so the output can be piped.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use deploywatch_core::{Config, HttpJobApi, JobObserver, JobStatus, LogCache, ObserverSettings};

pub async fn run(config: &Config, job_id: &str, poll_only: bool) -> Result<ExitCode> {
    let api = Arc::new(HttpJobApi::new(&config.server).context("failed to create HTTP client")?);

    let mut settings = ObserverSettings::from(&config.observer);
    if poll_only {
        settings.use_stream = false;
    }
    let observer = JobObserver::new(api, LogCache::new(), settings);

    eprintln!("Watching job {} on {}", job_id, config.server.base_url);
    tracing::info!(job_id = %job_id, poll_only, "Watching job");

    let mut observation = observer.observe(job_id);
    let mut status_rx = observation.status_receiver();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;
    let mut last_reported = JobStatus::Loading;

    loop {
        tokio::select! {
            line = observation.next_line() => match line {
                Some(line) => println!("{line}"),
                None => break,
            },
            Ok(()) = status_rx.changed() => {
                let status = *status_rx.borrow_and_update();
                if status == JobStatus::Running && last_reported != JobStatus::Running {
                    eprintln!("Job {job_id} is running");
                }
                last_reported = status;
            }
            _ = &mut ctrl_c, if !cancelled => {
                cancelled = true;
                observer.cancel(job_id);
                tracing::info!(job_id = %job_id, "Interrupted, observation cancelled");
            }
        }
    }

    let status = observation.status();
    if cancelled {
        eprintln!("Stopped watching job {job_id} (last status: {status})");
        return Ok(ExitCode::SUCCESS);
    }

    if status.is_terminal() {
        eprintln!("Job {job_id} finished: {status}");
    } else {
        eprintln!("Job {job_id} did not report a final status (last status: {status})");
    }

    if status == JobStatus::Failed {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
