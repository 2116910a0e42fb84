//! Session-scoped log cache
//!
//! Maps job identifier to the last known `{lines, status}` so that revisiting
//! a finished job does not hit the network again. There is no eviction beyond
//! [`LogCache::clear`]; job counts are operator-scale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::LogSnapshot;

/// Shared handle to the in-memory cache. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct LogCache {
    inner: Arc<Mutex<HashMap<String, LogSnapshot>>>,
}

impl LogCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known snapshot for a job, if any.
    pub fn get(&self, job_id: &str) -> Option<LogSnapshot> {
        self.lock().get(job_id).cloned()
    }

    /// Store a snapshot, replacing any previous one for the job.
    pub fn put(&self, job_id: &str, snapshot: LogSnapshot) {
        tracing::debug!(
            job_id = %job_id,
            lines = snapshot.lines.len(),
            status = %snapshot.status,
            "Caching job snapshot"
        );
        self.lock().insert(job_id.to_string(), snapshot);
    }

    /// Drop one job's snapshot (mirrors a server-side log clear for that job).
    pub fn remove(&self, job_id: &str) -> Option<LogSnapshot> {
        self.lock().remove(job_id)
    }

    /// Drop every snapshot.
    pub fn clear(&self) {
        let mut map = self.lock();
        tracing::debug!(entries = map.len(), "Clearing log cache");
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock leaves a map that is still structurally
    // valid, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LogSnapshot>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    fn snapshot(lines: &[&str], status: JobStatus) -> LogSnapshot {
        LogSnapshot {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            status,
        }
    }

    #[test]
    fn test_get_missing_is_none() {
        let cache = LogCache::new();
        assert!(cache.get("nope").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_replaces_and_clones_share_storage() {
        let cache = LogCache::new();
        let other = cache.clone();

        cache.put("j1", snapshot(&["a"], JobStatus::Running));
        other.put("j1", snapshot(&["a", "b"], JobStatus::Success));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("j1"),
            Some(snapshot(&["a", "b"], JobStatus::Success))
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = LogCache::new();
        cache.put("j1", snapshot(&["a"], JobStatus::Success));
        cache.put("j2", snapshot(&["b"], JobStatus::Failed));

        assert!(cache.remove("j1").is_some());
        assert!(cache.get("j1").is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
