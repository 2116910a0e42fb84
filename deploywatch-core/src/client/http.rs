//! HTTP implementation of [`JobApi`]
//!
//! One-shot requests (log fetch, history) share a client with a total request
//! timeout. The push channel uses a second client with only a connect timeout,
//! since a healthy stream may stay open for the whole deployment.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::types::LogsResponse;

use super::sse::SseDecoder;
use super::{JobApi, MessageStream};

const EVENT_STREAM: &str = "text/event-stream";

/// reqwest-backed client for the deployment server
pub struct HttpJobApi {
    http_client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
}

impl HttpJobApi {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url.trim().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_token: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .default_headers(headers.clone())
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let stream_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create stream client: {}", e)))?;

        Ok(Self {
            http_client,
            stream_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn logs_url(&self, job_id: &str) -> String {
        format!(
            "{}/jobs/{}/logs",
            self.base_url,
            urlencoding::encode(job_id)
        )
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn fetch_logs(&self, job_id: &str) -> Result<LogsResponse> {
        let response = self
            .http_client
            .get(self.logs_url(job_id))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Transport(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("failed to parse log response: {}", e)))
    }

    async fn fetch_history(&self) -> Result<serde_json::Value> {
        let url = format!("{}/jobs/history", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::HistoryFetch(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::HistoryFetch(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::HistoryFetch(format!("API error ({}): {}", status, body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::HistoryFetch(format!("response is not JSON: {}", e)))
    }

    async fn open_stream(&self, job_id: &str) -> Result<MessageStream> {
        let response = self
            .stream_client
            .get(self.logs_url(job_id))
            .header(ACCEPT, EVENT_STREAM)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("stream handshake failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "stream handshake rejected ({})",
                status
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(EVENT_STREAM) {
            return Err(Error::Transport(format!(
                "server does not support push (content type {:?})",
                content_type
            )));
        }

        tracing::debug!(job_id = %job_id, "Push channel established");

        let bytes = Box::pin(response.bytes_stream());
        let stream = futures_util::stream::unfold(
            (bytes, SseDecoder::new(), VecDeque::new()),
            |(mut bytes, mut decoder, mut pending)| async move {
                loop {
                    if let Some(data) = pending.pop_front() {
                        return Some((Ok(data), (bytes, decoder, pending)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                        Some(Err(e)) => {
                            let err = Error::Transport(format!("stream read failed: {}", e));
                            return Some((Err(err), (bytes, decoder, pending)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}
