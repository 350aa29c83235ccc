//! HTTP access and the per-file transfer state machine.
//!
//! # Features
//!
//! - One shared [`HttpClient`] with connect/read timeouts for all traffic
//! - [`DownloadItem`]: streaming transfer that can be paused, resumed and cancelled
//! - Per-item observers for state changes and progress
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use linkgrab_core::download::{DownloadEvent, DownloadItem, DownloadState, HttpClient};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let item = Arc::new(DownloadItem::new(
//!     Url::parse("https://example.com/photo.png")?,
//!     "./downloads",
//!     "photo.png",
//! ));
//! item.subscribe(Arc::new(|event: &DownloadEvent| {
//!     if let DownloadEvent::Progress { percent, .. } = event {
//!         println!("{percent:.0}%");
//!     }
//! }));
//! let state = item.run(&HttpClient::new()).await;
//! assert!(state.is_terminal());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod item;
mod state;

pub use client::{FetchedPage, HttpClient};
pub use error::DownloadError;
pub use item::{DownloadEvent, DownloadItem, DownloadObserver, DownloadSnapshot, ObserverId};
pub use state::{DownloadState, ParseStateError};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
