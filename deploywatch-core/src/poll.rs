//! Polling fallback
//!
//! Used when the push channel is disabled, cannot be opened, or drops. Each
//! tick fetches the job's full `{logs, status}` and runs the completion
//! heuristics in priority order:
//!
//! 1. An explicit terminal status always wins.
//! 2. Stall: the same line count on `stall_ticks` consecutive ticks means the
//!    job is done (`Success`), even without a status.
//! 3. Hard timeout: after `max_ticks` ticks a job last seen running is forced
//!    to `Completed`; otherwise polling just stops.
//! 4. A failed fetch adds `failure_weight` to a failure score that resets on
//!    the next good fetch; reaching `failure_limit` means `Failed`.
//!
//! The heuristics live in [`PollTracker`], which does no IO, so they can be
//! driven tick by tick in tests. [`PollFallback`] wraps it with the timer and
//! the fetch.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::client::JobApi;
use crate::config::ObserverConfig;
use crate::error::Error;
use crate::types::{normalize_status, JobStatus, LogsResponse};

/// Polling cadence and heuristic thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub stall_ticks: u32,
    pub max_ticks: u32,
    pub failure_weight: u32,
    pub failure_limit: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&ObserverConfig::default())
    }
}

impl From<&ObserverConfig> for PollSettings {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            stall_ticks: config.stall_ticks,
            max_ticks: config.max_poll_ticks,
            failure_weight: config.fetch_failure_weight,
            failure_limit: config.fetch_failure_limit,
        }
    }
}

/// What a tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    /// Keep polling
    Continue,
    /// Job reached a terminal status; stop polling
    Finished(JobStatus),
    /// Hard timeout on a job never seen running; stop without a verdict
    GaveUp,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// Lines not seen before this tick, in server order
    pub new_lines: Vec<String>,
    /// The job has been seen running (lines or an explicit signal)
    pub running: bool,
    pub verdict: PollVerdict,
}

enum PollStatus {
    Terminal(JobStatus),
    Running,
    Unknown,
}

fn poll_status(raw: Option<&str>) -> PollStatus {
    let Some(raw) = raw else {
        return PollStatus::Unknown;
    };
    match normalize_status(raw).as_str() {
        "success" | "completed" => PollStatus::Terminal(JobStatus::Success),
        "failed" | "failure" | "error" => PollStatus::Terminal(JobStatus::Failed),
        "running" => PollStatus::Running,
        _ => PollStatus::Unknown,
    }
}

/// Completion heuristics state for one polled job.
#[derive(Debug, Clone)]
pub struct PollTracker {
    settings: PollSettings,
    known_lines: usize,
    ticks: u32,
    last_count: Option<usize>,
    stall_streak: u32,
    failure_score: u32,
    running: bool,
}

impl PollTracker {
    /// `initial_line_count` lines are already known to the caller and will not
    /// be reported again.
    pub fn new(initial_line_count: usize, running: bool, settings: PollSettings) -> Self {
        Self {
            settings,
            known_lines: initial_line_count,
            ticks: 0,
            last_count: None,
            stall_streak: 0,
            failure_score: 0,
            running,
        }
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn known_lines(&self) -> usize {
        self.known_lines
    }

    /// Apply a successful fetch.
    pub fn on_fetch(&mut self, response: LogsResponse) -> TickOutcome {
        self.ticks += 1;
        self.failure_score = 0;

        let count = response.logs.len();
        let new_lines = if count > self.known_lines {
            let fresh = response.logs[self.known_lines..].to_vec();
            self.known_lines = count;
            fresh
        } else {
            Vec::new()
        };
        if !new_lines.is_empty() {
            self.running = true;
        }

        let verdict = match poll_status(response.status.as_deref()) {
            PollStatus::Terminal(status) => PollVerdict::Finished(status),
            other => {
                if matches!(other, PollStatus::Running) {
                    self.running = true;
                }
                self.track_stall(count)
                    .unwrap_or_else(|| self.check_timeout())
            }
        };

        TickOutcome {
            new_lines,
            running: self.running,
            verdict,
        }
    }

    /// Apply a failed fetch.
    pub fn on_fetch_error(&mut self, error: &Error) -> TickOutcome {
        self.ticks += 1;
        self.failure_score = self.failure_score.saturating_add(self.settings.failure_weight);

        let verdict = if self.failure_score >= self.settings.failure_limit {
            tracing::warn!(
                error = %error,
                failure_score = self.failure_score,
                "Log fetch kept failing, marking job failed"
            );
            PollVerdict::Finished(JobStatus::Failed)
        } else {
            tracing::debug!(
                error = %error,
                failure_score = self.failure_score,
                "Log fetch failed"
            );
            self.check_timeout()
        };

        TickOutcome {
            new_lines: Vec::new(),
            running: self.running,
            verdict,
        }
    }

    fn track_stall(&mut self, count: usize) -> Option<PollVerdict> {
        if self.last_count == Some(count) {
            self.stall_streak += 1;
        } else {
            self.stall_streak = 1;
            self.last_count = Some(count);
        }

        if self.stall_streak >= self.settings.stall_ticks {
            tracing::info!(
                lines = count,
                ticks = self.stall_streak,
                "Log output stalled, treating job as finished"
            );
            Some(PollVerdict::Finished(JobStatus::Success))
        } else {
            None
        }
    }

    fn check_timeout(&self) -> PollVerdict {
        if self.ticks < self.settings.max_ticks {
            PollVerdict::Continue
        } else if self.running {
            tracing::info!(ticks = self.ticks, "Polling timed out, marking job completed");
            PollVerdict::Finished(JobStatus::Completed)
        } else {
            tracing::info!(ticks = self.ticks, "Polling timed out before the job started");
            PollVerdict::GaveUp
        }
    }
}

/// Timer-driven poller for one job.
pub struct PollFallback {
    api: Arc<dyn JobApi>,
    job_id: String,
    tracker: PollTracker,
    interval: Interval,
    done: bool,
}

impl PollFallback {
    /// Start polling. The first fetch happens one interval from now.
    pub fn start(
        api: Arc<dyn JobApi>,
        job_id: &str,
        initial_line_count: usize,
        running: bool,
        settings: PollSettings,
    ) -> Self {
        let period = settings.interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            api,
            job_id: job_id.to_string(),
            tracker: PollTracker::new(initial_line_count, running, settings),
            interval,
            done: false,
        }
    }

    /// Wait for the next tick, fetch, and report. `None` once polling stopped.
    pub async fn next_tick(&mut self) -> Option<TickOutcome> {
        if self.done {
            return None;
        }

        self.interval.tick().await;
        let outcome = match self.api.fetch_logs(&self.job_id).await {
            Ok(response) => self.tracker.on_fetch(response),
            Err(e) => self.tracker.on_fetch_error(&e),
        };

        if outcome.verdict != PollVerdict::Continue {
            self.done = true;
        }
        Some(outcome)
    }

    pub fn ticks(&self) -> u32 {
        self.tracker.ticks()
    }
}
