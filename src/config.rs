//! Pipeline configuration: defaults, JSON file loading and validation.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crawl::{LinkType, parse_page_url};
use crate::download::HttpClient;
use crate::download::constants::{CONNECT_TIMEOUT_SECS, CRAWL_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::mime::MimeRegistry;
use crate::task::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Errors raised while loading or validating a [`PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for this schema.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The page URL is missing or not an absolute http(s) URL.
    #[error("invalid page URL: {url:?}")]
    InvalidPageUrl {
        /// The rejected value.
        url: String,
    },

    /// The thread count is outside the executor limits.
    #[error("invalid thread count {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}")]
    InvalidThreads {
        /// The rejected value.
        value: usize,
    },

    /// A timeout was set to zero.
    #[error("{field} must be greater than zero")]
    ZeroTimeout {
        /// Name of the offending setting.
        field: &'static str,
    },
}

/// Default worker count: twice the available parallelism, within executor limits.
#[must_use]
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .saturating_mul(2)
        .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Everything a [`Pipeline`](crate::Pipeline) run needs.
///
/// Every field has a default, so a config file only lists what it changes:
///
/// ```json
/// { "page_url": "https://example.com/gallery", "threads": 4, "link_type": "image" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Page whose links are crawled.
    pub page_url: String,
    /// Directory receiving the downloaded files.
    pub output_dir: PathBuf,
    /// Concurrency for both evaluation and download.
    pub threads: usize,
    /// Which elements to take links from.
    pub link_type: LinkType,
    /// Timeout for fetching the page.
    pub crawl_timeout_secs: u64,
    /// Connect timeout for every request.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for probes and downloads.
    pub read_timeout_secs: u64,
    /// File types to keep.
    pub filter: MimeRegistry,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_url: String::new(),
            output_dir: PathBuf::from("."),
            threads: default_threads(),
            link_type: LinkType::default(),
            crawl_timeout_secs: CRAWL_TIMEOUT_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            filter: MimeRegistry::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a default config for `page_url`, saving into `output_dir`.
    #[must_use]
    pub fn new(page_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            page_url: page_url.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a config from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`]. The result is
    /// not validated; call [`validate`](Self::validate) once overrides are applied.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks page URL, thread count and timeouts.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_page_url(&self.page_url).map_err(|_| ConfigError::InvalidPageUrl {
            url: self.page_url.clone(),
        })?;
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.threads) {
            return Err(ConfigError::InvalidThreads {
                value: self.threads,
            });
        }
        for (field, value) in [
            ("crawl_timeout_secs", self.crawl_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout { field });
            }
        }
        Ok(())
    }

    /// Timeout applied to the page fetch.
    #[must_use]
    pub fn crawl_timeout(&self) -> Duration {
        Duration::from_secs(self.crawl_timeout_secs)
    }

    /// Builds the HTTP client shared by every stage.
    #[must_use]
    pub fn http_client(&self) -> HttpClient {
        HttpClient::new_with_timeouts(self.connect_timeout_secs, self.read_timeout_secs)
    }
}
