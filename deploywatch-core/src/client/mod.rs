//! Deployment server client
//!
//! The engine talks to the server only through the [`JobApi`] trait:
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌────────────────────────┐
//! │ JobObserver  │ ──► │   JobApi     │ ──► │ GET /jobs/{id}/logs    │
//! │ History...   │     │ (HttpJobApi) │     │ GET /jobs/history      │
//! └──────────────┘     └──────────────┘     │ SSE /jobs/{id}/logs    │
//!                                           └────────────────────────┘
//! ```
//!
//! Tests substitute an in-memory implementation.

mod http;
mod sse;

pub use http::HttpJobApi;
pub use sse::SseDecoder;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::types::LogsResponse;

/// Raw push payloads (the `data` of each server-sent event), in arrival order.
///
/// An `Err` item is a transport failure on the channel.
pub type MessageStream = BoxStream<'static, Result<String>>;

/// Operations the observation engine needs from the deployment server.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Fetch a job's full log so far and its raw status.
    async fn fetch_logs(&self, job_id: &str) -> Result<LogsResponse>;

    /// Fetch the job-history mapping (`{ job_id: record }`) as raw JSON.
    async fn fetch_history(&self) -> Result<serde_json::Value>;

    /// Open the server-push channel for a job.
    ///
    /// Fails when the channel cannot be established (handshake failure).
    async fn open_stream(&self, job_id: &str) -> Result<MessageStream>;
}
