//! Timestamp normalization
//!
//! The backend emits naive timestamps that are UTC by contract, mixed with
//! RFC 3339 strings, unix seconds, and an epoch-zero placeholder meaning
//! "unknown". Everything is normalized to `DateTime<Utc>` here, and rendered
//! in the configured display zone only at the edge.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::Job;

/// Naive layouts accepted after the RFC 3339 attempt.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Display layout for instants.
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a timestamp string as the backend means it.
///
/// Strings without a zone suffix are read as UTC. Returns `None` for empty or
/// unparseable input and for the epoch-zero sentinel.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(&format!("{raw}Z"))
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        })?;

    reject_sentinel(parsed)
}

/// Parse a timestamp field from a raw JSON record (string or unix seconds).
pub fn parse_timestamp_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_timestamp(s),
        serde_json::Value::Number(n) => {
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp(secs, 0).and_then(reject_sentinel)
        }
        _ => None,
    }
}

/// Whether an instant is the "unknown" placeholder (1970-01-01T00:00:00Z).
pub fn is_sentinel(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() == 0
}

fn reject_sentinel(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if is_sentinel(&ts) {
        None
    } else {
        Some(ts)
    }
}

/// The single instant used to sort and display a job.
///
/// Prefers a valid end time, then a valid start time, then "now".
pub fn effective_instant(job: &Job) -> DateTime<Utc> {
    effective_instant_at(job, Utc::now())
}

/// [`effective_instant`] with an explicit "now", for deterministic callers.
pub fn effective_instant_at(job: &Job, now: DateTime<Utc>) -> DateTime<Utc> {
    job.ended_at
        .into_iter()
        .chain(job.started_at)
        .find(|ts| !is_sentinel(ts))
        .unwrap_or(now)
}

/// Time zone used for rendering instants.
///
/// Only fixed offsets are supported; `"UTC"` and `"Z"` are accepted aliases
/// for `+00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayZone(FixedOffset);

impl DisplayZone {
    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.0
    }
}

impl Default for DisplayZone {
    fn default() -> Self {
        Self::utc()
    }
}

impl FromStr for DisplayZone {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("z") || s.is_empty() {
            return Ok(Self::utc());
        }

        let invalid = || Error::Config(format!("invalid display time zone: {s:?}"));

        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = match rest.split_once(':') {
            Some((h, m)) => (h, m),
            None if rest.len() == 4 && rest.is_ascii() => rest.split_at(2),
            None => (rest, "0"),
        };
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if hours > 23 || minutes > 59 {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl std::fmt::Display for DisplayZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.local_minus_utc() == 0 {
            f.write_str("UTC")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Render an instant in the display zone.
pub fn display(ts: DateTime<Utc>, zone: DisplayZone) -> String {
    ts.with_timezone(&zone.offset()).format(DISPLAY_FORMAT).to_string()
}
