//! Core domain types for deploywatch
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Job** | One observable unit of remote work, identified by an opaque string |
//! | **Kind** | What the job does (file, sql, systemd, shell, rollback, template) |
//! | **Status** | Where the job is in its lifecycle, as seen by the observer |
//! | **Terminal status** | Success, Failed or Completed; no further transitions |
//! | **Snapshot** | The `{lines, status}` pair kept in the log cache |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Job Kind
// ============================================

/// What a deployment job does.
///
/// The observer never looks at the kind; it only drives the history summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    File,
    Sql,
    Systemd,
    Shell,
    Rollback,
    Template,
    Other,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::File => "file",
            JobKind::Sql => "sql",
            JobKind::Systemd => "systemd",
            JobKind::Shell => "shell",
            JobKind::Rollback => "rollback",
            JobKind::Template => "template",
            JobKind::Other => "other",
        }
    }

    /// Parse a raw `type` field from a history record. Unknown values map to `Other`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" => JobKind::File,
            "sql" => JobKind::Sql,
            "systemd" => JobKind::Systemd,
            "shell" => JobKind::Shell,
            "rollback" => JobKind::Rollback,
            "template" => JobKind::Template,
            _ => JobKind::Other,
        }
    }
}

// ============================================
// Job Status
// ============================================

/// Observed status of a job.
///
/// These six values are the only statuses surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No job bound yet
    Idle,
    /// Observation requested, nothing received yet
    Loading,
    /// At least one log line or an explicit running signal received
    Running,
    /// Job finished successfully (explicitly or by stall detection)
    Success,
    /// Job reported failure, or the fetch path kept failing
    Failed,
    /// Job finished without a success/failure verdict
    Completed,
}

impl JobStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Loading => "loading",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
        }
    }

    /// Map a status string from a history record.
    ///
    /// Queued or unknown values are reported as `Idle`.
    pub fn from_record(raw: &str) -> Self {
        match normalize_status(raw).as_str() {
            "running" => JobStatus::Running,
            "success" => JobStatus::Success,
            "completed" => JobStatus::Completed,
            "failed" | "failure" | "error" => JobStatus::Failed,
            _ => JobStatus::Idle,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase, trimmed form of a raw status string.
pub(crate) fn normalize_status(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

// ============================================
// Job
// ============================================

/// One deployment job.
///
/// `lines` is append-only for the lifetime of a session. Timestamps are kept
/// as parsed; the epoch-zero sentinel never makes it into these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job identifier
    pub id: String,
    /// What the job does
    pub kind: JobKind,
    /// Current status
    pub status: JobStatus,
    /// Log output in arrival order
    pub lines: Vec<String>,
    /// When the job started (absent if unknown)
    pub started_at: Option<DateTime<Utc>>,
    /// When the job ended (absent if unknown or still running)
    pub ended_at: Option<DateTime<Utc>>,
    /// Kind-specific descriptive fields (target file, hosts, connection, ...)
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    /// A freshly requested job with nothing known about it yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: JobKind::Other,
            status: JobStatus::Idle,
            lines: Vec::new(),
            started_at: None,
            ended_at: None,
            details: serde_json::Map::new(),
        }
    }

    /// First string-like value among `keys` in the descriptive fields.
    ///
    /// Numbers are rendered as text; empty strings are skipped.
    pub fn detail(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| match self.details.get(*key)? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}

// ============================================
// Snapshots and wire payloads
// ============================================

/// Last known `{lines, status}` of a job, as stored in the log cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub lines: Vec<String>,
    pub status: JobStatus,
}

/// Response of `GET /jobs/{id}/logs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsResponse {
    /// Full log so far, oldest first
    #[serde(default)]
    pub logs: Vec<String>,
    /// Raw status string, if the backend reported one
    #[serde(default)]
    pub status: Option<String>,
}
