//! Linkgrab Core Library
//!
//! Crawls one web page, keeps the linked files whose MIME type is wanted, and
//! downloads them concurrently with per-file pause, resume and cancel.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`task`] - Single-use tasks, background workers and the bounded batch executor
//! - [`mime`] - MIME type registry with wildcard matching and presets
//! - [`crawl`] - Link extraction from an HTML page
//! - [`evaluate`] - `HEAD` probing, MIME filtering and filename synthesis
//! - [`download`] - HTTP client and the per-file transfer state machine
//! - [`config`] - Pipeline settings and JSON config files
//! - [`pipeline`] - The stages wired together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod crawl;
pub mod download;
pub mod evaluate;
pub mod mime;
pub mod pipeline;
pub mod task;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig, default_threads};
pub use crawl::{CrawlError, LinkType, crawl, extract_links};
pub use download::{
    DownloadError, DownloadEvent, DownloadItem, DownloadObserver, DownloadState, HttpClient,
};
pub use evaluate::{DownloadRequest, Evaluation, FileEvaluator, RejectReason};
pub use mime::{MimeError, MimeRegistry, MimeType};
pub use pipeline::{DownloadBatch, DownloadControls, Pipeline, PipelineError, PipelineReport};
pub use task::{
    BatchExecutor, Completion, ExecutorError, MAX_CONCURRENCY, MIN_CONCURRENCY, Task, TaskError,
    Worker,
};
