//! Job observation lifecycle
//!
//! [`JobObserver::observe`] binds a job identifier to a live feed of status
//! changes and log lines:
//!
//! ```text
//!            cache hit (terminal)
//!   Loading ─────────────────────────────────────────────► Success/Failed/Completed
//!      │                                                          ▲
//!      │ open push channel ──► Running ──► terminal status ───────┤
//!      │        │                 │                               │
//!      │        └── handshake ────┴── channel error ──► polling ──┘
//!      └── (stream disabled) ─────────────────────────► polling
//! ```
//!
//! ## Leases and generations
//!
//! At most one observation per job identifier is active. Each one holds a
//! lease stamped with a generation number; the lease owns the feed's senders.
//! Every emission checks the generation under the lease lock, so once
//! [`JobObserver::cancel`] returns, the feed is closed and any late event from
//! the old task is discarded, whether or not the task has been torn down yet.
//!
//! Terminal entry writes the final snapshot to the [`LogCache`], emits the
//! status, and drops the lease in one critical section.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{Instrument, Span};

use crate::cache::LogCache;
use crate::client::JobApi;
use crate::config::ObserverConfig;
use crate::poll::{PollFallback, PollSettings, PollVerdict};
use crate::stream::{ChannelEvent, StreamChannel};
use crate::types::{JobStatus, LogSnapshot};

/// How a job is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverSettings {
    /// Try the push channel before polling
    pub use_stream: bool,
    /// Silence on the push channel after which it counts as dropped
    pub stream_idle_timeout: Duration,
    pub poll: PollSettings,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self::from(&ObserverConfig::default())
    }
}

impl From<&ObserverConfig> for ObserverSettings {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            use_stream: config.use_stream,
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
            poll: PollSettings::from(config),
        }
    }
}

/// Caller's end of one observation.
///
/// Both the status and the log feed close when the observation ends
/// (terminal status, polling gave up, or cancellation).
pub struct Observation {
    job_id: String,
    status: watch::Receiver<JobStatus>,
    logs: mpsc::UnboundedReceiver<String>,
}

impl Observation {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Latest status.
    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// A separate handle on the status feed.
    pub fn status_receiver(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Next log line in arrival order; `None` once the feed is closed and drained.
    pub async fn next_line(&mut self) -> Option<String> {
        self.logs.recv().await
    }

    /// Wait until the job is terminal or the observation ends, returning the
    /// last status seen.
    pub async fn wait_for_terminal(&mut self) -> JobStatus {
        loop {
            let status = *self.status.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.status.changed().await.is_err() {
                return *self.status.borrow();
            }
        }
    }

    /// Drain the whole feed and return what was observed.
    pub async fn collect(mut self) -> LogSnapshot {
        let mut lines = Vec::new();
        while let Some(line) = self.logs.recv().await {
            lines.push(line);
        }
        LogSnapshot {
            lines,
            status: *self.status.borrow(),
        }
    }
}

/// Active observation of one job identifier.
struct Lease {
    generation: u64,
    status_tx: watch::Sender<JobStatus>,
    log_tx: mpsc::UnboundedSender<String>,
    task: AbortHandle,
}

type Leases = Arc<Mutex<HashMap<String, Lease>>>;

fn lock(leases: &Mutex<HashMap<String, Lease>>) -> MutexGuard<'_, HashMap<String, Lease>> {
    leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Observes deployment jobs through the push channel, falling back to polling.
///
/// Cheap to clone; clones share the cache and the active leases. Observation
/// tasks run on the ambient Tokio runtime.
#[derive(Clone)]
pub struct JobObserver {
    api: Arc<dyn JobApi>,
    cache: LogCache,
    settings: ObserverSettings,
    leases: Leases,
    next_generation: Arc<AtomicU64>,
    span: Span,
}

impl JobObserver {
    pub fn new(api: Arc<dyn JobApi>, cache: LogCache, settings: ObserverSettings) -> Self {
        Self {
            api,
            cache,
            settings,
            leases: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            span: crate::logging::component_span("observer"),
        }
    }

    /// Record this observer's events under `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Start observing a job.
    ///
    /// Any active observation of the same identifier is cancelled first. A
    /// cached terminal snapshot is replayed without touching the network.
    /// Must be called from within a Tokio runtime.
    pub fn observe(&self, job_id: &str) -> Observation {
        let _entered = self.span.enter();
        self.cancel(job_id);

        if let Some(snapshot) = self.cache.get(job_id) {
            if snapshot.status.is_terminal() {
                tracing::debug!(
                    job_id = %job_id,
                    status = %snapshot.status,
                    lines = snapshot.lines.len(),
                    "Replaying cached job"
                );
                return replay(job_id, snapshot);
            }
            tracing::debug!(job_id = %job_id, "Ignoring non-terminal cached snapshot");
        }

        let (status_tx, status_rx) = watch::channel(JobStatus::Loading);
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let task = ObservationTask {
            api: Arc::clone(&self.api),
            cache: self.cache.clone(),
            leases: Arc::clone(&self.leases),
            settings: self.settings,
            job_id: job_id.to_string(),
            generation,
            lines: Vec::new(),
            status: JobStatus::Loading,
        };
        let span = tracing::info_span!(parent: &self.span, "observe", job_id = %job_id, generation);

        // Spawn under the lock: the lease always carries its task's abort handle.
        {
            let mut leases = lock(&self.leases);
            let handle = tokio::spawn(task.run().instrument(span));
            leases.insert(
                job_id.to_string(),
                Lease {
                    generation,
                    status_tx,
                    log_tx,
                    task: handle.abort_handle(),
                },
            );
        }

        tracing::debug!(job_id = %job_id, generation, "Observation started");

        Observation {
            job_id: job_id.to_string(),
            status: status_rx,
            logs: log_rx,
        }
    }

    /// Stop observing a job, keeping whatever is cached.
    ///
    /// When this returns the caller's feed is closed and no later event from
    /// the cancelled observation can reach it. Returns whether an observation
    /// was active.
    pub fn cancel(&self, job_id: &str) -> bool {
        let lease = lock(&self.leases).remove(job_id);
        match lease {
            Some(lease) => {
                lease.task.abort();
                tracing::debug!(
                    parent: &self.span,
                    job_id = %job_id,
                    generation = lease.generation,
                    "Observation cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Cancel every active observation.
    pub fn cancel_all(&self) {
        let leases: Vec<(String, Lease)> = lock(&self.leases).drain().collect();
        for (job_id, lease) in leases {
            lease.task.abort();
            tracing::debug!(parent: &self.span, job_id = %job_id, "Observation cancelled");
        }
    }

    pub fn is_observing(&self, job_id: &str) -> bool {
        lock(&self.leases).contains_key(job_id)
    }

    /// Cached snapshot for a job, if it has finished this session.
    pub fn cached(&self, job_id: &str) -> Option<LogSnapshot> {
        self.cache.get(job_id)
    }

    /// Forget every cached job (e.g. after logs were cleared on the server).
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &LogCache {
        &self.cache
    }
}

/// An already-closed observation carrying a cached terminal snapshot.
fn replay(job_id: &str, snapshot: LogSnapshot) -> Observation {
    let (_status_tx, status_rx) = watch::channel(snapshot.status);
    let (log_tx, log_rx) = mpsc::unbounded_channel();
    for line in snapshot.lines {
        let _ = log_tx.send(line);
    }
    Observation {
        job_id: job_id.to_string(),
        status: status_rx,
        logs: log_rx,
    }
}

/// Background half of one observation.
struct ObservationTask {
    api: Arc<dyn JobApi>,
    cache: LogCache,
    leases: Leases,
    settings: ObserverSettings,
    job_id: String,
    generation: u64,
    lines: Vec<String>,
    status: JobStatus,
}

impl ObservationTask {
    async fn run(mut self) {
        if self.settings.use_stream {
            match StreamChannel::open(self.api.as_ref(), &self.job_id).await {
                Ok(channel) => {
                    let mut channel = channel.with_idle_timeout(self.settings.stream_idle_timeout);
                    while let Some(event) = channel.next_event().await {
                        match event {
                            ChannelEvent::Log(line) => {
                                if !self.emit_line(line) {
                                    channel.close();
                                    return;
                                }
                            }
                            ChannelEvent::Running => {
                                if !self.mark_running() {
                                    channel.close();
                                    return;
                                }
                            }
                            ChannelEvent::Terminal(status) => {
                                channel.close();
                                self.finish(status);
                                return;
                            }
                            ChannelEvent::Error(e) => {
                                channel.close();
                                tracing::info!(
                                    error = %e,
                                    lines = self.lines.len(),
                                    "Push channel failed, switching to polling"
                                );
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::info!(error = %e, "Push channel unavailable, polling instead");
                }
            }
        }

        self.poll().await;
    }

    async fn poll(&mut self) {
        let mut poller = PollFallback::start(
            Arc::clone(&self.api),
            &self.job_id,
            self.lines.len(),
            self.status == JobStatus::Running,
            self.settings.poll,
        );

        while let Some(outcome) = poller.next_tick().await {
            for line in outcome.new_lines {
                if !self.emit_line(line) {
                    return;
                }
            }
            if outcome.running && !self.mark_running() {
                return;
            }

            match outcome.verdict {
                PollVerdict::Continue => {}
                PollVerdict::Finished(status) => {
                    self.finish(status);
                    return;
                }
                PollVerdict::GaveUp => {
                    self.release();
                    return;
                }
            }
        }
    }

    /// Run `f` on this task's lease if it is still the current one.
    fn with_lease<R>(&self, f: impl FnOnce(&mut Lease) -> R) -> Option<R> {
        let mut leases = lock(&self.leases);
        match leases.get_mut(&self.job_id) {
            Some(lease) if lease.generation == self.generation => Some(f(lease)),
            _ => None,
        }
    }

    /// Append and forward one line. Returns false if the observation is gone.
    fn emit_line(&mut self, line: String) -> bool {
        let promote = self.status == JobStatus::Loading;
        let sent = self.with_lease(|lease| {
            if promote {
                lease.status_tx.send_replace(JobStatus::Running);
            }
            let _ = lease.log_tx.send(line.clone());
        });

        if sent.is_none() {
            tracing::debug!("Discarding line for a cancelled observation");
            return false;
        }
        if promote {
            self.status = JobStatus::Running;
        }
        self.lines.push(line);
        true
    }

    fn mark_running(&mut self) -> bool {
        if self.status == JobStatus::Running {
            return self.with_lease(|_| ()).is_some();
        }
        let sent = self.with_lease(|lease| {
            lease.status_tx.send_replace(JobStatus::Running);
        });
        if sent.is_some() {
            self.status = JobStatus::Running;
        }
        sent.is_some()
    }

    /// Enter a terminal status: cache, emit, and release in one step.
    fn finish(&mut self, status: JobStatus) {
        let mut leases = lock(&self.leases);
        let current = matches!(
            leases.get(&self.job_id),
            Some(lease) if lease.generation == self.generation
        );
        if !current {
            tracing::debug!(status = %status, "Discarding terminal status for a cancelled observation");
            return;
        }

        self.status = status;
        self.cache.put(
            &self.job_id,
            LogSnapshot {
                lines: self.lines.clone(),
                status,
            },
        );
        if let Some(lease) = leases.remove(&self.job_id) {
            lease.status_tx.send_replace(status);
        }

        match status {
            JobStatus::Failed => {
                tracing::warn!(lines = self.lines.len(), "Job failed");
            }
            _ => {
                tracing::info!(status = %status, lines = self.lines.len(), "Job finished");
            }
        }
    }

    /// Stop without a terminal status; nothing is cached.
    fn release(&mut self) {
        let mut leases = lock(&self.leases);
        if matches!(
            leases.get(&self.job_id),
            Some(lease) if lease.generation == self.generation
        ) {
            leases.remove(&self.job_id);
            tracing::info!(status = %self.status, "Stopped observing unresolved job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_is_closed_feed() {
        let obs = replay(
            "j1",
            LogSnapshot {
                lines: vec!["a".to_string(), "b".to_string()],
                status: JobStatus::Failed,
            },
        );
        assert_eq!(obs.status(), JobStatus::Failed);
        let snapshot = obs.collect().await;
        assert_eq!(snapshot.lines, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(snapshot.status, JobStatus::Failed);
    }

    #[test]
    fn test_settings_from_config() {
        let config = ObserverConfig {
            use_stream: false,
            poll_interval_ms: 250,
            ..Default::default()
        };
        let settings = ObserverSettings::from(&config);
        assert!(!settings.use_stream);
        assert_eq!(settings.poll.interval, std::time::Duration::from_millis(250));
        assert_eq!(settings.poll.stall_ticks, 5);
        assert_eq!(settings.stream_idle_timeout, std::time::Duration::from_secs(30));
    }
}
