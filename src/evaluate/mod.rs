//! Turns crawled links into download requests, filtered by MIME type.
//!
//! Each link is probed with a `HEAD` request. Its declared `Content-Type` is
//! looked up in a [`MimeRegistry`]; unknown types are rejected, known ones get
//! a sanitized destination filename with a normalized extension.
//!
//! # Example
//!
//! ```no_run
//! use linkgrab_core::download::HttpClient;
//! use linkgrab_core::evaluate::FileEvaluator;
//! use linkgrab_core::mime::MimeRegistry;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut evaluator = FileEvaluator::new(HttpClient::new(), MimeRegistry::common_images(), 8)?;
//! evaluator.add(Url::parse("https://example.com/cat.png")?, "./images")?;
//! evaluator.on_complete(|accepted| {
//!     println!("{} files to fetch", accepted.len());
//!     Ok(())
//! });
//! let evaluations = evaluator.start()?.wait().await?;
//! println!("{} links evaluated", evaluations.len());
//! # Ok(())
//! # }
//! ```

mod filename;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use filename::{
    FALLBACK_BASE, build_filename, filename_from_url, resolve_extension, sanitize_base,
    split_filename,
};

use crate::download::{DownloadItem, HttpClient};
use crate::mime::MimeRegistry;
use crate::task::{BatchExecutor, BatchHandle, ExecutorError, Task, TaskOutcome};

/// An accepted link: where to fetch it from and where to store it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Source URL.
    pub url: Url,
    /// Sanitized file name including extension.
    pub filename: String,
    /// Destination directory.
    pub directory: PathBuf,
}

impl DownloadRequest {
    /// Full destination path.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    /// Creates the transfer for this request.
    #[must_use]
    pub fn into_item(self) -> DownloadItem {
        DownloadItem::new(self.url, &self.directory, &self.filename)
    }
}

/// Why a link produced no download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The response declared no usable `Content-Type`.
    MissingContentType,
    /// The declared type is not in the registry.
    UnwantedType(String),
    /// The probe request failed.
    Failed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingContentType => write!(f, "no content type"),
            Self::UnwantedType(mime) => write!(f, "unwanted type {mime}"),
            Self::Failed(message) => write!(f, "probe failed: {message}"),
        }
    }
}

/// Outcome of evaluating one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The link should be downloaded.
    Accepted(DownloadRequest),
    /// The link was filtered out or could not be probed.
    Rejected {
        /// The evaluated link.
        url: Url,
        /// Why it was dropped.
        reason: RejectReason,
    },
}

impl Evaluation {
    /// The evaluated link.
    #[must_use]
    pub fn url(&self) -> &Url {
        match self {
            Self::Accepted(request) => &request.url,
            Self::Rejected { url, .. } => url,
        }
    }

    /// Returns the request if the link was accepted.
    #[must_use]
    pub fn accepted(&self) -> Option<&DownloadRequest> {
        match self {
            Self::Accepted(request) => Some(request),
            Self::Rejected { .. } => None,
        }
    }

    /// Consumes the evaluation, returning the request if accepted.
    #[must_use]
    pub fn into_accepted(self) -> Option<DownloadRequest> {
        match self {
            Self::Accepted(request) => Some(request),
            Self::Rejected { .. } => None,
        }
    }
}

/// Probes one link and decides whether and under which name to download it.
///
/// Never fails: network errors become [`RejectReason::Failed`].
#[instrument(skip(client, registry, directory), fields(url = %url))]
pub async fn evaluate(
    client: &HttpClient,
    registry: &MimeRegistry,
    url: Url,
    directory: &Path,
) -> Evaluation {
    let response = match client.head(&url).await {
        Ok(response) => response,
        Err(error) => {
            debug!(error = %error, "probe failed");
            return Evaluation::Rejected {
                url,
                reason: RejectReason::Failed(error.to_string()),
            };
        }
    };

    let Some(content_type) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
    else {
        debug!("no content type");
        return Evaluation::Rejected {
            url,
            reason: RejectReason::MissingContentType,
        };
    };

    let Some(entry) = registry.lookup(&content_type) else {
        debug!(content_type = %content_type, "type not wanted");
        return Evaluation::Rejected {
            url,
            reason: RejectReason::UnwantedType(content_type),
        };
    };

    let name = filename_from_url(response.url());
    let (base, existing) = split_filename(&name);
    let extension = resolve_extension(entry, existing);
    let filename = build_filename(base, extension.as_deref());
    debug!(content_type = %content_type, filename = %filename, "link accepted");

    Evaluation::Accepted(DownloadRequest {
        url,
        filename,
        directory: directory.to_path_buf(),
    })
}

/// Evaluates many links concurrently on its own [`BatchExecutor`].
///
/// The aggregate callbacks receive the accepted requests only, after every
/// link has been evaluated.
pub struct FileEvaluator {
    client: HttpClient,
    registry: Arc<MimeRegistry>,
    executor: BatchExecutor<Url, Evaluation>,
}

impl FileEvaluator {
    /// Creates an evaluator probing at most `concurrency` links at once.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidConcurrency`] for out-of-range values.
    pub fn new(
        client: HttpClient,
        registry: MimeRegistry,
        concurrency: usize,
    ) -> Result<Self, ExecutorError> {
        Ok(Self {
            client,
            registry: Arc::new(registry),
            executor: BatchExecutor::new(concurrency)?,
        })
    }

    /// Queues `url` for evaluation into `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::AlreadyStarted`] after [`start`](Self::start).
    pub fn add(
        &mut self,
        url: Url,
        directory: impl Into<PathBuf>,
    ) -> Result<&mut Self, ExecutorError> {
        let task = self.task(url, directory.into());
        self.executor.add(task)?;
        Ok(self)
    }

    /// Queues `url` and calls `on_accepted` as soon as it yields a request.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::AlreadyStarted`] after [`start`](Self::start).
    pub fn add_with<F>(
        &mut self,
        url: Url,
        directory: impl Into<PathBuf>,
        on_accepted: F,
    ) -> Result<&mut Self, ExecutorError>
    where
        F: Fn(&DownloadRequest) + Send + Sync + 'static,
    {
        let task = self
            .task(url, directory.into())
            .done(move |evaluation: &Evaluation| {
                if let Some(request) = evaluation.accepted() {
                    on_accepted(request);
                }
                Ok(())
            });
        self.executor.add(task)?;
        Ok(self)
    }

    /// Registers a callback receiving every accepted request once all links
    /// are evaluated.
    pub fn on_complete<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&[DownloadRequest]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.executor
            .on_complete(move |outcomes: &[TaskOutcome<Evaluation>]| {
                let accepted: Vec<DownloadRequest> = outcomes
                    .iter()
                    .filter_map(|outcome| outcome.as_ref().ok())
                    .filter_map(Evaluation::accepted)
                    .cloned()
                    .collect();
                callback(&accepted)
            });
        self
    }

    /// Number of links queued and not yet started.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.executor.pending()
    }

    /// Starts evaluating every queued link.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::AlreadyStarted`] on a second call and
    /// [`ExecutorError::NoRuntime`] outside a tokio runtime.
    pub fn start(&mut self) -> Result<EvaluatorHandle, ExecutorError> {
        info!(
            links = self.executor.pending(),
            filter = %self.registry,
            "evaluating links"
        );
        Ok(EvaluatorHandle {
            inner: self.executor.start()?,
        })
    }

    /// Stops evaluating links that have not started yet.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    fn task(&self, url: Url, directory: PathBuf) -> Task<Url, Evaluation> {
        let client = self.client.clone();
        let registry = Arc::clone(&self.registry);
        Task::new(url, move |url| async move {
            Ok(evaluate(&client, &registry, url, &directory).await)
        })
    }
}

impl fmt::Debug for FileEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEvaluator")
            .field("registry", &self.registry.name())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Awaitable result of [`FileEvaluator::start`].
#[derive(Debug)]
pub struct EvaluatorHandle {
    inner: BatchHandle<Evaluation>,
}

impl EvaluatorHandle {
    /// Waits for every evaluation, in completion order.
    ///
    /// Links whose evaluation never ran (shutdown) or panicked are logged and
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Interrupted`] if the batch was torn down.
    pub async fn wait(self) -> Result<Vec<Evaluation>, ExecutorError> {
        let outcomes = self.inner.wait().await?;
        Ok(outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(evaluation) => Some(evaluation),
                Err(error) => {
                    warn!(error = %error, "link evaluation did not finish");
                    None
                }
            })
            .collect())
    }
}

/// Keeps the accepted requests of `evaluations`.
#[must_use]
pub fn accepted_requests(evaluations: Vec<Evaluation>) -> Vec<DownloadRequest> {
    evaluations
        .into_iter()
        .filter_map(Evaluation::into_accepted)
        .collect()
}
