//! # deploywatch-core
//!
//! Observation engine for long-running deployment jobs.
//!
//! This library provides:
//! - [`JobObserver`]: attaches to a job by identifier and streams its status
//!   and log lines, using the server-push channel and falling back to polling
//! - [`HistoryAggregator`]: past jobs, normalized and sorted newest first
//! - [`LogCache`]: session-scoped store of finished jobs
//! - Configuration and logging infrastructure
//!
//! The engine never starts deployments; it only observes jobs that something
//! else started, identified by an opaque string.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deploywatch_core::{Config, HttpJobApi, JobObserver, LogCache, ObserverSettings};
//!
//! # async fn run() -> deploywatch_core::Result<()> {
//! let config = Config::load()?;
//! let api = Arc::new(HttpJobApi::new(&config.server)?);
//! let observer = JobObserver::new(api, LogCache::new(), ObserverSettings::from(&config.observer));
//!
//! let mut observation = observer.observe("job-42");
//! while let Some(line) = observation.next_line().await {
//!     println!("{line}");
//! }
//! println!("finished: {}", observation.status());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use cache::LogCache;
pub use client::{HttpJobApi, JobApi, MessageStream};
pub use config::Config;
pub use error::{Error, Result};
pub use history::{HistoryAggregator, HistoryEntry, HistoryReport};
pub use observer::{JobObserver, Observation, ObserverSettings};
pub use time::DisplayZone;
pub use types::*;

// Public modules
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod observer;
pub mod poll;
pub mod stream;
pub mod time;
pub mod types;
