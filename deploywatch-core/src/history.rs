//! Job history aggregation
//!
//! The history endpoint returns `{ job_id: record }` where records differ by
//! job kind and carry inconsistent timestamps. This module turns that into a
//! list of [`HistoryEntry`] sorted newest first, each with a one-line summary
//! whose layout depends only on the job kind.
//!
//! Fetch problems never escape [`HistoryAggregator::fetch_all`]; they come
//! back as an empty list plus a banner message in [`HistoryReport::error`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{Instrument, Span};

use crate::client::JobApi;
use crate::error::{Error, Result};
use crate::time::{self, DisplayZone};
use crate::types::{Job, JobKind, JobStatus};

const KIND_KEYS: &[&str] = &["type", "kind", "job_type"];
const END_KEYS: &[&str] = &["end_time", "ended_at", "finished_at"];
const START_KEYS: &[&str] = &["start_time", "started_at"];
const FALLBACK_TIME_KEYS: &[&str] = &["timestamp", "created_at"];
const HOST_KEYS: &[&str] = &["target_hosts", "hosts"];

/// One job in the history list.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub job: Job,
    /// Instant used for ordering and display
    pub effective_at: DateTime<Utc>,
    /// One-line description, e.g. `FT app.conf | success | 2024-01-01 09:00:00`
    pub summary: String,
}

/// Outcome of a history fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryReport {
    /// Entries, newest first
    pub entries: Vec<HistoryEntry>,
    /// Banner text when the fetch failed
    pub error: Option<String>,
}

impl HistoryReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Fetches and normalizes the job history.
pub struct HistoryAggregator {
    api: Arc<dyn JobApi>,
    zone: DisplayZone,
    span: Span,
}

impl HistoryAggregator {
    pub fn new(api: Arc<dyn JobApi>, zone: DisplayZone) -> Self {
        Self {
            api,
            zone,
            span: crate::logging::component_span("history"),
        }
    }

    /// Record this aggregator's events under `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Fetch every past job, newest first.
    pub async fn fetch_all(&self) -> HistoryReport {
        let span = self.span.clone();
        async {
            let result = match self.api.fetch_history().await {
                Ok(raw) => parse_history(raw),
                Err(e) => Err(e),
            };

            match result {
                Ok(jobs) => {
                    let entries = build_entries(jobs, Utc::now(), self.zone);
                    tracing::debug!(jobs = entries.len(), "Fetched job history");
                    HistoryReport {
                        entries,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch job history");
                    HistoryReport {
                        entries: Vec::new(),
                        error: Some(banner(&e)),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn banner(error: &Error) -> String {
    match error {
        Error::HistoryFetch(msg) | Error::Transport(msg) => {
            format!("Could not load job history: {msg}")
        }
        other => format!("Could not load job history: {other}"),
    }
}

/// Turn the raw history mapping into jobs, attaching each identifier.
///
/// Fails if the response is not a JSON object or is an error envelope.
/// Individual records that are not objects are skipped.
pub fn parse_history(raw: Value) -> Result<Vec<Job>> {
    let map = match raw {
        Value::Object(map) => map,
        other => {
            return Err(Error::HistoryFetch(format!(
                "expected an object of jobs, got {}",
                json_type(&other)
            )));
        }
    };

    for key in ["error", "detail"] {
        if let Some(Value::String(msg)) = map.get(key) {
            return Err(Error::HistoryFetch(msg.clone()));
        }
    }

    let mut jobs = Vec::with_capacity(map.len());
    for (id, record) in map {
        match record {
            Value::Object(record) => jobs.push(job_from_record(id, record)),
            other => {
                tracing::warn!(job_id = %id, kind = json_type(&other), "Skipping non-object history record");
            }
        }
    }
    Ok(jobs)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build a [`Job`] from one raw history record.
pub fn job_from_record(id: String, mut record: Map<String, Value>) -> Job {
    let kind = first_str(&record, KIND_KEYS)
        .map(JobKind::from_raw)
        .unwrap_or(JobKind::Other);
    let status = first_str(&record, &["status"])
        .map(JobStatus::from_record)
        .unwrap_or(JobStatus::Idle);
    let ended_at = first_time(&record, END_KEYS);
    let started_at =
        first_time(&record, START_KEYS).or_else(|| first_time(&record, FALLBACK_TIME_KEYS));

    record.insert("id".to_string(), Value::String(id.clone()));

    Job {
        id,
        kind,
        status,
        lines: Vec::new(),
        started_at,
        ended_at,
        details: record,
    }
}

fn first_str<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str))
}

fn first_time(record: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|key| record.get(*key).and_then(time::parse_timestamp_value))
}

/// Compute effective instants and summaries, newest first.
///
/// Ties are broken by job identifier so the order is stable.
pub fn build_entries(jobs: Vec<Job>, now: DateTime<Utc>, zone: DisplayZone) -> Vec<HistoryEntry> {
    let mut entries: Vec<HistoryEntry> = jobs
        .into_iter()
        .map(|job| {
            let effective_at = time::effective_instant_at(&job, now);
            let summary = summarize(&job, effective_at, zone);
            HistoryEntry {
                job,
                effective_at,
                summary,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.effective_at
            .cmp(&a.effective_at)
            .then_with(|| a.job.id.cmp(&b.job.id))
    });
    entries
}

/// One-line description of a job: `{prefix} | {status} | {time}`.
pub fn summarize(job: &Job, effective_at: DateTime<Utc>, zone: DisplayZone) -> String {
    let field = |keys: &[&str]| job.detail(keys).unwrap_or_else(|| "-".to_string());

    let mut prefix = match job.kind {
        JobKind::File => format!(
            "FT {}",
            field(&["file_name", "filename", "target_file", "file"])
        ),
        JobKind::Sql => format!(
            "SQL {}",
            field(&["sql_file", "database", "connection", "db_name"])
        ),
        JobKind::Systemd => format!(
            "SYSTEMD {} {}",
            field(&["action", "command"]),
            field(&["service", "unit"])
        ),
        JobKind::Shell => format!("SHELL {}", field(&["command", "script", "shell_command"])),
        JobKind::Rollback => format!(
            "ROLLBACK {}",
            field(&["original_job_id", "rollback_of", "deployment_id"])
        ),
        JobKind::Template => format!(
            "TPL {}",
            field(&["ft_number", "feature_number", "ft", "template_name"])
        ),
        JobKind::Other => format!("JOB {}", job.id),
    };

    if let Some(hosts) = host_count(job) {
        let noun = if hosts == 1 { "host" } else { "hosts" };
        prefix.push_str(&format!(" @ {hosts} {noun}"));
    }

    format!(
        "{} | {} | {}",
        prefix,
        job.status,
        time::display(effective_at, zone)
    )
}

fn host_count(job: &Job) -> Option<usize> {
    let count = HOST_KEYS.iter().find_map(|key| match job.details.get(*key)? {
        Value::Array(hosts) => Some(hosts.len()),
        Value::String(hosts) => Some(
            hosts
                .split(',')
                .filter(|h| !h.trim().is_empty())
                .count(),
        ),
        _ => None,
    })?;
    (count > 0).then_some(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        utc("2025-06-01T00:00:00Z")
    }

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("record must be an object"),
        }
    }

    #[test]
    fn test_template_sentinel_end_uses_start() {
        let jobs = parse_history(json!({
            "j3": {
                "type": "template",
                "ft_number": "FT-1024",
                "status": "success",
                "end_time": "1970-01-01T00:00:00Z",
                "start_time": "2024-01-01T00:00:00Z"
            }
        }))
        .unwrap();

        let entries = build_entries(jobs, now(), DisplayZone::utc());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].effective_at, utc("2024-01-01T00:00:00Z"));
        assert_eq!(entries[0].job.ended_at, None);
        assert_eq!(
            entries[0].summary,
            "TPL FT-1024 | success | 2024-01-01 00:00:00"
        );
    }

    #[test]
    fn test_sorted_newest_first() {
        let jobs = parse_history(json!({
            "old": { "type": "file", "end_time": "2024-01-01T00:00:00" },
            "new": { "type": "sql", "start_time": "2024-03-01T00:00:00" },
            "mid": { "type": "shell", "end_time": "2024-02-01T00:00:00", "start_time": "2023-12-01T00:00:00" }
        }))
        .unwrap();

        let ids: Vec<_> = build_entries(jobs, now(), DisplayZone::utc())
            .into_iter()
            .map(|e| e.job.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_missing_times_sort_as_now() {
        let jobs = parse_history(json!({
            "undated": { "type": "file", "end_time": "1970-01-01T00:00:00Z" },
            "dated": { "type": "file", "end_time": "2024-01-01T00:00:00Z" }
        }))
        .unwrap();

        let entries = build_entries(jobs, now(), DisplayZone::utc());
        assert_eq!(entries[0].job.id, "undated");
        assert_eq!(entries[0].effective_at, now());
    }

    #[test]
    fn test_identifier_attached() {
        let job = job_from_record("abc".to_string(), record(json!({ "type": "file" })));
        assert_eq!(job.details.get("id"), Some(&json!("abc")));
        assert_eq!(job.kind, JobKind::File);
        assert_eq!(job.status, JobStatus::Idle);
    }

    #[test]
    fn test_summary_per_kind() {
        let ts = utc("2024-01-01T00:00:00Z");
        let zone: DisplayZone = "+09:00".parse().unwrap();
        let cases = [
            (
                json!({ "type": "file", "file_name": "app.conf", "status": "success", "target_hosts": ["a", "b"] }),
                "FT app.conf @ 2 hosts | success | 2024-01-01 09:00:00",
            ),
            (
                json!({ "type": "sql", "database": "orders", "status": "failed" }),
                "SQL orders | failed | 2024-01-01 09:00:00",
            ),
            (
                json!({ "type": "systemd", "action": "restart", "service": "nginx", "hosts": "web1" }),
                "SYSTEMD restart nginx @ 1 host | idle | 2024-01-01 09:00:00",
            ),
            (
                json!({ "type": "shell", "command": "df -h", "status": "running" }),
                "SHELL df -h | running | 2024-01-01 09:00:00",
            ),
            (
                json!({ "type": "rollback", "original_job_id": "j9", "status": "completed" }),
                "ROLLBACK j9 | completed | 2024-01-01 09:00:00",
            ),
            (
                json!({ "type": "template", "status": "success" }),
                "TPL - | success | 2024-01-01 09:00:00",
            ),
            (
                json!({ "type": "ansible", "status": "error" }),
                "JOB x | failed | 2024-01-01 09:00:00",
            ),
        ];

        for (raw, expected) in cases {
            let job = job_from_record("x".to_string(), record(raw));
            assert_eq!(summarize(&job, ts, zone), expected);
        }
    }

    #[test]
    fn test_bad_shapes_are_errors() {
        assert!(matches!(
            parse_history(json!(["j1", "j2"])),
            Err(Error::HistoryFetch(_))
        ));
        assert!(matches!(
            parse_history(json!({ "error": "unauthorized" })),
            Err(Error::HistoryFetch(msg)) if msg == "unauthorized"
        ));
    }

    #[test]
    fn test_non_object_records_skipped() {
        let jobs = parse_history(json!({
            "j1": { "type": "file" },
            "j2": "garbage",
            "j3": null
        }))
        .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "j1");
    }

    #[test]
    fn test_banner_text() {
        assert_eq!(
            banner(&Error::HistoryFetch("response is not JSON".to_string())),
            "Could not load job history: response is not JSON"
        );
    }
}
