//! Server-push channel for one job
//!
//! Turns raw push payloads into [`ChannelEvent`]s. Payloads that are not
//! valid event JSON are dropped and logged; they never end the channel. A
//! transport failure (including the server closing the connection before a
//! terminal status) is reported exactly once, after which the channel yields
//! nothing. A channel that stays silent past its idle timeout counts as a
//! transport failure too.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;

use crate::client::{JobApi, MessageStream};
use crate::error::{Error, Result};
use crate::types::{normalize_status, JobStatus};

/// Parsed event from the push channel.
#[derive(Debug)]
pub enum ChannelEvent {
    /// One log line
    Log(String),
    /// Explicit "running" signal
    Running,
    /// Terminal status reported by the server
    Terminal(JobStatus),
    /// Channel-level failure; the caller should close the channel and fall back
    Error(Error),
}

/// Wire shape of one push payload.
#[derive(Debug, Deserialize)]
struct PushMessage {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Map a push-channel status string.
///
/// Anything other than `running` ends the job; unknown values end it as
/// `Completed`.
pub fn channel_status(raw: &str) -> Option<JobStatus> {
    match normalize_status(raw).as_str() {
        "running" => None,
        "success" => Some(JobStatus::Success),
        "completed" => Some(JobStatus::Completed),
        "failed" | "failure" | "error" => Some(JobStatus::Failed),
        other => {
            tracing::warn!(status = %other, "Unknown terminal status on push channel");
            Some(JobStatus::Completed)
        }
    }
}

/// Parse one push payload into zero or more events.
///
/// A payload carrying both fields yields the log line first.
pub fn parse_payload(data: &str) -> Result<Vec<ChannelEvent>> {
    let msg: PushMessage = serde_json::from_str(data)
        .map_err(|e| Error::MalformedEvent(format!("{}: {:?}", e, truncate(data, 120))))?;

    let mut events = Vec::with_capacity(2);
    if let Some(line) = msg.message {
        events.push(ChannelEvent::Log(line));
    }
    if let Some(status) = msg.status {
        events.push(match channel_status(&status) {
            Some(terminal) => ChannelEvent::Terminal(terminal),
            None => ChannelEvent::Running,
        });
    }
    Ok(events)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Open push channel for one job.
pub struct StreamChannel {
    job_id: String,
    inner: Option<MessageStream>,
    pending: VecDeque<ChannelEvent>,
    idle_timeout: Option<Duration>,
}

impl StreamChannel {
    /// Open the channel. A handshake failure is returned as an error.
    pub async fn open(api: &dyn JobApi, job_id: &str) -> Result<Self> {
        let inner = api.open_stream(job_id).await?;
        Ok(Self::from_stream(job_id, inner))
    }

    /// Wrap an already-open payload stream.
    pub fn from_stream(job_id: &str, inner: MessageStream) -> Self {
        Self {
            job_id: job_id.to_string(),
            inner: Some(inner),
            pending: VecDeque::new(),
            idle_timeout: None,
        }
    }

    /// Fail the channel when no payload arrives for `limit`.
    pub fn with_idle_timeout(mut self, limit: Duration) -> Self {
        self.idle_timeout = Some(limit);
        self
    }

    /// Next event, or `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let inner = self.inner.as_mut()?;
            let next = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, inner.next())
                    .await
                    .map_err(|_| limit),
                None => Ok(inner.next().await),
            };
            let next = match next {
                Ok(next) => next,
                Err(limit) => {
                    self.close();
                    return Some(ChannelEvent::Error(Error::Transport(format!(
                        "no push event for {}s",
                        limit.as_secs()
                    ))));
                }
            };
            match next {
                Some(Ok(data)) => match parse_payload(&data) {
                    Ok(events) if events.is_empty() => {
                        tracing::debug!(job_id = %self.job_id, "Push payload without message or status");
                    }
                    Ok(events) => self.pending.extend(events),
                    Err(e) => {
                        tracing::warn!(job_id = %self.job_id, error = %e, "Dropping malformed push event");
                    }
                },
                Some(Err(e)) => {
                    self.close();
                    return Some(ChannelEvent::Error(e));
                }
                None => {
                    self.close();
                    return Some(ChannelEvent::Error(Error::Transport(
                        "push channel closed before a terminal status".to_string(),
                    )));
                }
            }
        }
    }

    /// Drop the underlying connection. Further calls to `next_event` return `None`.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!(job_id = %self.job_id, "Push channel closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn channel(items: Vec<Result<String>>) -> StreamChannel {
        StreamChannel::from_stream("j1", stream::iter(items).boxed())
    }

    #[test]
    fn test_parse_log_and_status() {
        let events = parse_payload(r#"{"message":"step 1"}"#).unwrap();
        assert!(matches!(events.as_slice(), [ChannelEvent::Log(l)] if l == "step 1"));

        let events = parse_payload(r#"{"status":"running"}"#).unwrap();
        assert!(matches!(events.as_slice(), [ChannelEvent::Running]));

        let events = parse_payload(r#"{"message":"done","status":"SUCCESS"}"#).unwrap();
        assert!(matches!(
            events.as_slice(),
            [ChannelEvent::Log(_), ChannelEvent::Terminal(JobStatus::Success)]
        ));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_payload("not json"),
            Err(Error::MalformedEvent(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"message": 12}"#),
            Err(Error::MalformedEvent(_))
        ));
        assert!(parse_payload("{}").unwrap().is_empty());
    }

    #[test]
    fn test_channel_status_mapping() {
        assert_eq!(channel_status("running"), None);
        assert_eq!(channel_status("failed"), Some(JobStatus::Failed));
        assert_eq!(channel_status("completed"), Some(JobStatus::Completed));
        assert_eq!(channel_status("cancelled"), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_skipped() {
        let mut ch = channel(vec![
            Ok("garbage".to_string()),
            Ok(r#"{"message":"a"}"#.to_string()),
            Ok("{}".to_string()),
            Ok(r#"{"status":"failed"}"#.to_string()),
        ]);

        assert!(matches!(ch.next_event().await, Some(ChannelEvent::Log(l)) if l == "a"));
        assert!(matches!(
            ch.next_event().await,
            Some(ChannelEvent::Terminal(JobStatus::Failed))
        ));
    }

    #[tokio::test]
    async fn test_error_reported_once() {
        let mut ch = channel(vec![
            Ok(r#"{"message":"a"}"#.to_string()),
            Err(Error::Transport("reset".to_string())),
            Ok(r#"{"message":"never"}"#.to_string()),
        ]);

        assert!(matches!(ch.next_event().await, Some(ChannelEvent::Log(_))));
        assert!(matches!(ch.next_event().await, Some(ChannelEvent::Error(_))));
        assert!(!ch.is_open());
        assert!(ch.next_event().await.is_none());
        assert!(ch.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_end_of_stream_is_channel_error() {
        let mut ch = channel(vec![Ok(r#"{"message":"a"}"#.to_string())]);

        assert!(matches!(ch.next_event().await, Some(ChannelEvent::Log(_))));
        assert!(matches!(
            ch.next_event().await,
            Some(ChannelEvent::Error(Error::Transport(_)))
        ));
        assert!(ch.next_event().await.is_none());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("배포로그", 2), "배포");
        assert_eq!(truncate("ab", 5), "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_channel_times_out() {
        let items = stream::iter(vec![Ok(r#"{"message":"a"}"#.to_string())]);
        let mut ch = StreamChannel::from_stream("j1", items.chain(stream::pending()).boxed())
            .with_idle_timeout(Duration::from_secs(30));

        assert!(matches!(ch.next_event().await, Some(ChannelEvent::Log(_))));
        let started = tokio::time::Instant::now();
        assert!(matches!(
            ch.next_event().await,
            Some(ChannelEvent::Error(Error::Transport(_)))
        ));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(!ch.is_open());
        assert!(ch.next_event().await.is_none());
    }
}
