//! Crawl → evaluate → download, wired together.
//!
//! [`Pipeline::fetch`] crawls the configured page on a background [`Worker`]
//! and probes every link, returning the accepted [`DownloadRequest`]s.
//! [`Pipeline::download`] starts those requests on a separate executor and
//! hands back a [`DownloadBatch`] with per-item control. [`Pipeline::run`]
//! does both and waits for the result.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::crawl::{CrawlError, crawl};
use crate::download::{DownloadItem, DownloadObserver, DownloadState, HttpClient};
use crate::evaluate::{DownloadRequest, FileEvaluator, accepted_requests};
use crate::task::{
    BatchExecutor, BatchHandle, ExecutorError, Task, TaskError, TaskOutcome, Worker,
};

/// Errors that abort a whole pipeline run.
///
/// Problems with individual links or files never surface here; they are
/// recorded as rejections or as items ending in [`DownloadState::Error`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(ConfigError),

    /// The page could not be crawled.
    #[error("crawl failed: {0}")]
    Crawl(#[source] CrawlError),

    /// An executor rejected its setup.
    #[error(transparent)]
    Executor(ExecutorError),

    /// The crawl worker stopped without reporting back.
    #[error("crawl worker stopped before reporting a result")]
    CrawlAborted,

    /// The output directory could not be created.
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Final tally of a download batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Requests handed to the download stage.
    pub requested: usize,
    /// Items that ended `Completed`.
    pub completed: usize,
    /// Items that ended `Cancelled`, including ones that never ran.
    pub cancelled: usize,
    /// Items that ended `Error` or whose task failed.
    pub failed: usize,
}

impl PipelineReport {
    /// Counts the terminal states in `outcomes`.
    #[must_use]
    pub fn tally(outcomes: &[TaskOutcome<Arc<DownloadItem>>]) -> Self {
        let mut report = Self {
            requested: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.as_ref().map(|item| item.state()) {
                Ok(DownloadState::Completed) => report.completed += 1,
                Ok(DownloadState::Cancelled) | Err(TaskError::Shutdown) => report.cancelled += 1,
                _ => report.failed += 1,
            }
        }
        report
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested, {} completed, {} cancelled, {} failed",
            self.requested, self.completed, self.cancelled, self.failed
        )
    }
}

/// Shared pause/resume/cancel control over every item of a batch.
#[derive(Debug, Clone)]
pub struct DownloadControls {
    items: Arc<[Arc<DownloadItem>]>,
}

impl DownloadControls {
    /// Pauses every downloading item. Returns how many were paused.
    pub fn pause_all(&self) -> usize {
        self.items.iter().filter(|item| item.pause()).count()
    }

    /// Resumes every paused item. Returns how many were resumed.
    pub fn resume_all(&self) -> usize {
        self.items.iter().filter(|item| item.resume()).count()
    }

    /// Cancels every unfinished item. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.items.iter().filter(|item| item.cancel()).count()
    }

    /// Items under control.
    #[must_use]
    pub fn items(&self) -> &[Arc<DownloadItem>] {
        &self.items
    }
}

/// A started set of downloads.
#[derive(Debug)]
pub struct DownloadBatch {
    controls: DownloadControls,
    handle: BatchHandle<Arc<DownloadItem>>,
}

impl DownloadBatch {
    /// Items in request order.
    #[must_use]
    pub fn items(&self) -> &[Arc<DownloadItem>] {
        self.controls.items()
    }

    /// Cloneable controls usable while [`wait`](Self::wait) is pending.
    #[must_use]
    pub fn controls(&self) -> DownloadControls {
        self.controls.clone()
    }

    /// See [`DownloadControls::pause_all`].
    pub fn pause_all(&self) -> usize {
        self.controls.pause_all()
    }

    /// See [`DownloadControls::resume_all`].
    pub fn resume_all(&self) -> usize {
        self.controls.resume_all()
    }

    /// See [`DownloadControls::cancel_all`].
    pub fn cancel_all(&self) -> usize {
        self.controls.cancel_all()
    }

    /// Waits for every item to reach a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Executor`] if the batch was torn down.
    pub async fn wait(self) -> Result<PipelineReport, PipelineError> {
        let outcomes = self.handle.wait().await.map_err(PipelineError::Executor)?;
        Ok(PipelineReport::tally(&outcomes))
    }
}

/// The crawl, evaluate and download stages for one page.
///
/// # Example
///
/// ```no_run
/// use linkgrab_core::{MimeRegistry, Pipeline, PipelineConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut config = PipelineConfig::new("https://example.com/gallery", "./images");
/// config.filter = MimeRegistry::common_images();
/// let report = Pipeline::new(config)?.run(None).await?;
/// println!("{report}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    client: HttpClient,
}

impl Pipeline {
    /// Validates `config` and builds the shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] for an invalid configuration.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;
        let client = config.http_client();
        Ok(Self { config, client })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Crawls the page and evaluates every link found.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Crawl`] if the page cannot be fetched. Links
    /// that fail evaluation are dropped, not reported as errors.
    pub async fn fetch(&self) -> Result<Vec<DownloadRequest>, PipelineError> {
        self.fetch_with(|_| {}).await
    }

    /// Like [`fetch`](Self::fetch), calling `on_accepted` for each request as
    /// soon as its link is accepted.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    #[instrument(skip(self, on_accepted), fields(url = %self.config.page_url))]
    pub async fn fetch_with<F>(&self, on_accepted: F) -> Result<Vec<DownloadRequest>, PipelineError>
    where
        F: Fn(&DownloadRequest) + Send + Sync + 'static,
    {
        let links = self.crawl_links().await?;

        let mut evaluator = FileEvaluator::new(
            self.client.clone(),
            self.config.filter.clone(),
            self.config.threads,
        )
        .map_err(PipelineError::Executor)?;
        let on_accepted = Arc::new(on_accepted);
        for link in links {
            let on_accepted = Arc::clone(&on_accepted);
            evaluator
                .add_with(link, self.config.output_dir.clone(), move |request| {
                    on_accepted(request);
                })
                .map_err(PipelineError::Executor)?;
        }

        let evaluations = evaluator
            .start()
            .map_err(PipelineError::Executor)?
            .wait()
            .await
            .map_err(PipelineError::Executor)?;
        let evaluated = evaluations.len();
        let requests = accepted_requests(evaluations);
        info!(
            evaluated,
            accepted = requests.len(),
            filter = %self.config.filter,
            "links evaluated"
        );
        Ok(requests)
    }

    async fn crawl_links(&self) -> Result<Vec<url::Url>, PipelineError> {
        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();
        let link_type = self.config.link_type;
        let timeout = self.config.crawl_timeout();

        let worker = Worker::new(move |page_url: String, progress| async move {
            progress.report(0, 1);
            let result = crawl(&client, &page_url, link_type, timeout).await;
            progress.report(1, 1);
            let found = result.as_ref().map_or(0, Vec::len);
            // Receiver only disappears if the caller gave up on the crawl.
            let _ = tx.send(result);
            Ok(found)
        })
        .named("crawl")
        .error(|error| warn!(error = %error, "crawl worker failed"));
        let handle = worker.start(self.config.page_url.clone());

        let result = rx.await.map_err(|_| PipelineError::CrawlAborted)?;
        handle.join().await;
        result.map_err(PipelineError::Crawl)
    }

    /// Starts downloading `requests`, at most `threads` at a time.
    ///
    /// `observer`, if given, is subscribed to every item before it starts.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::OutputDir`] if the output directory cannot be
    /// created and [`PipelineError::Executor`] outside a tokio runtime.
    pub async fn download(
        &self,
        requests: Vec<DownloadRequest>,
        observer: Option<DownloadObserver>,
    ) -> Result<DownloadBatch, PipelineError> {
        let output_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| PipelineError::OutputDir {
                path: output_dir.clone(),
                source,
            })?;

        let items: Arc<[Arc<DownloadItem>]> = requests
            .into_iter()
            .map(|request| Arc::new(request.into_item()))
            .collect();

        let mut executor = BatchExecutor::new(self.config.threads).map_err(PipelineError::Executor)?;
        for item in items.iter() {
            if let Some(observer) = &observer {
                item.subscribe(Arc::clone(observer));
            }
            let client = self.client.clone();
            let task = Task::new(Arc::clone(item), move |item: Arc<DownloadItem>| async move {
                item.run(&client).await;
                Ok(item)
            });
            executor.add(task).map_err(PipelineError::Executor)?;
        }
        executor.on_complete(|outcomes: &[TaskOutcome<Arc<DownloadItem>>]| {
            info!(report = %PipelineReport::tally(outcomes), "downloads finished");
            Ok(())
        });

        let handle = executor.start().map_err(PipelineError::Executor)?;
        Ok(DownloadBatch {
            controls: DownloadControls { items },
            handle,
        })
    }

    /// Fetches, downloads everything accepted, and waits for the result.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch) and [`download`](Self::download).
    pub async fn run(&self, observer: Option<DownloadObserver>) -> Result<PipelineReport, PipelineError> {
        let requests = self.fetch().await?;
        self.download(requests, observer).await?.wait().await
    }
}
