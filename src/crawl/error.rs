//! Error types for the crawl module.

use thiserror::Error;

use crate::download::DownloadError;

/// Errors that abort a crawl. Individual bad links are skipped, never reported.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The page URL is not an absolute `http`/`https` URL.
    #[error("invalid page URL: {url}")]
    InvalidUrl {
        /// The rejected URL string.
        url: String,
    },

    /// The page could not be fetched.
    #[error("failed to fetch page: {0}")]
    Fetch(#[source] DownloadError),
}

impl CrawlError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}
