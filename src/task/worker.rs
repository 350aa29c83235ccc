//! Single-task asynchronous worker.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use super::{CompletionHandle, Task, TaskError, notify_all, run_guarded};

type ProgressSink = Arc<dyn Fn(u64, u64) + Send + Sync>;
type ErrorHandler = Box<dyn FnOnce(TaskError) + Send>;
type WorkerWork<T, R> =
    Box<dyn FnOnce(T, ProgressReporter) -> BoxFuture<'static, Result<R, TaskError>> + Send>;

/// Handle given to a worker's job for reporting progress.
///
/// Forwards `(progress, max)` pairs to the sink registered with
/// [`Worker::progress`]; does nothing when no sink was registered.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    sink: Option<ProgressSink>,
}

impl ProgressReporter {
    /// Reports that `progress` out of `max` units are done.
    pub fn report(&self, progress: u64, max: u64) {
        if let Some(sink) = &self.sink {
            sink(progress, max);
        }
    }

    /// Returns true if a progress sink is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sink.is_some()
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Runs exactly one job on its own tokio task.
///
/// Configure with the builder methods, then call [`start`](Self::start).
/// If the job fails and an error handler is registered, the handler receives
/// the error. Without an error handler a failure is fatal: it is logged and
/// the process exits with status 1.
///
/// Cancellation is best-effort: [`WorkerHandle::cancel`] suppresses the
/// completion callbacks but never interrupts the running job.
pub struct Worker<T, R> {
    name: Option<String>,
    work: WorkerWork<T, R>,
    done: Vec<CompletionHandle<R>>,
    error: Option<ErrorHandler>,
    progress: ProgressReporter,
}

impl<T, R> Worker<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Creates a worker for `work`.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: FnOnce(T, ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        Self {
            name: None,
            work: Box::new(move |input, progress| work(input, progress).boxed()),
            done: Vec::new(),
            error: None,
            progress: ProgressReporter::default(),
        }
    }

    /// Names the worker; the name is attached to its tracing span.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a completion callback. Many may be added.
    #[must_use]
    pub fn done<F>(mut self, callback: F) -> Self
    where
        F: Fn(&R) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.done.push(Arc::new(callback));
        self
    }

    /// Sets the error handler, replacing any previous one.
    #[must_use]
    pub fn error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(TaskError) + Send + 'static,
    {
        self.error = Some(Box::new(handler));
        self
    }

    /// Sets the sink that receives the job's progress reports.
    #[must_use]
    pub fn progress<F>(mut self, sink: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.progress = ProgressReporter {
            sink: Some(Arc::new(sink)),
        };
        self
    }

    /// Starts the job with `input` and returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self, input: T) -> WorkerHandle {
        let Self {
            name,
            work,
            done,
            error: error_handler,
            progress,
        } = self;

        let flags = Arc::new(WorkerFlags::default());
        let span = info_span!("worker", name = name.as_deref().unwrap_or("unnamed"));
        let task_flags = Arc::clone(&flags);
        let mut task = Task::new(input, move |input| work(input, progress));

        let join = tokio::spawn(
            async move {
                debug!("worker started");
                let outcome = run_guarded(&mut task).await;
                task_flags.complete.store(true, Ordering::SeqCst);
                match outcome {
                    Ok(result) => {
                        if task_flags.cancelled.load(Ordering::SeqCst) {
                            debug!("worker cancelled, completion callbacks suppressed");
                        } else {
                            notify_all(&done, &result);
                        }
                    }
                    Err(e) => match error_handler {
                        Some(handler) => handler(e),
                        None => {
                            error!(error = %e, "worker failed with no error handler registered");
                            std::process::exit(1);
                        }
                    },
                }
            }
            .instrument(span),
        );

        WorkerHandle { flags, join }
    }
}

impl<T, R> fmt::Debug for Worker<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("callbacks", &self.done.len())
            .field("has_error_handler", &self.error.is_some())
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct WorkerFlags {
    cancelled: AtomicBool,
    complete: AtomicBool,
}

/// Control handle for a started [`Worker`].
#[derive(Debug)]
pub struct WorkerHandle {
    flags: Arc<WorkerFlags>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Requests cancellation. The completion callbacks will not fire if the
    /// job finishes after this call.
    pub fn cancel(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true once the job has finished running.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.flags.complete.load(Ordering::SeqCst)
    }

    /// Waits for the worker, including its callbacks or error handler.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            warn!(error = %e, "worker task aborted");
        }
    }
}
