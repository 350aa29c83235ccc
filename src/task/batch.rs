//! Bounded-concurrency batch executor with a single aggregate completion.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, info, instrument};

use super::{CompletionHandle, Task, TaskError, notify_all, run_guarded};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Per-task result recorded by a [`BatchExecutor`].
///
/// Failed, panicked and never-run tasks are recorded as errors so that every
/// submitted task counts toward completion.
pub type TaskOutcome<R> = Result<R, TaskError>;

/// Error type for batch executor operations.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Tasks were added, or the batch started, after it had already started.
    #[error("batch has already been started")]
    AlreadyStarted,

    /// `start()` was called outside a tokio runtime.
    #[error("no tokio runtime available to submit tasks")]
    NoRuntime,

    /// The batch was dropped before it delivered its results.
    #[error("batch was interrupted before all tasks completed")]
    Interrupted,
}

/// Runs a known set of tasks concurrently and reports once when all are done.
///
/// # Concurrency Model
///
/// - Each task runs in its own tokio task
/// - A semaphore permit is acquired before a task starts (at most `N` run at once)
/// - Each executor owns its semaphore, so separate executors never share slots
/// - Result collection and the "last one finished" decision are serialized by a
///   single mutex, so the aggregate callbacks fire exactly once
///
/// Once the last result is recorded the semaphore is closed and the aggregate
/// callbacks run in registration order with the full result list.
pub struct BatchExecutor<T, R> {
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    pending: Vec<TrackedTask<T, R>>,
    shared: Arc<Mutex<BatchState<R>>>,
    started: bool,
}

struct BatchState<R> {
    results: Vec<TaskOutcome<R>>,
    submitted: usize,
    fired: bool,
    callbacks: Vec<CompletionHandle<[TaskOutcome<R>]>>,
    waiter: Option<oneshot::Sender<Vec<TaskOutcome<R>>>>,
}

impl<T, R> BatchExecutor<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Creates an executor running at most `concurrency` tasks at once.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidConcurrency`] if the value is outside
    /// `MIN_CONCURRENCY..=MAX_CONCURRENCY`.
    #[instrument(level = "debug")]
    pub fn new(concurrency: usize) -> Result<Self, ExecutorError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(ExecutorError::InvalidConcurrency { value: concurrency });
        }

        Ok(Self {
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            pending: Vec::new(),
            shared: Arc::new(Mutex::new(BatchState {
                results: Vec::new(),
                submitted: 0,
                fired: false,
                callbacks: Vec::new(),
                waiter: None,
            })),
            started: false,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the number of tasks queued and not yet submitted.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queues a task. Must be called before [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::AlreadyStarted`] after the batch has started.
    pub fn add(&mut self, task: Task<T, R>) -> Result<&mut Self, ExecutorError> {
        if self.started {
            return Err(ExecutorError::AlreadyStarted);
        }
        self.pending.push(TrackedTask {
            task,
            slot: self.slot(),
        });
        Ok(self)
    }

    /// Queues every task in `tasks`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::AlreadyStarted`] after the batch has started.
    pub fn add_all<I>(&mut self, tasks: I) -> Result<&mut Self, ExecutorError>
    where
        I: IntoIterator<Item = Task<T, R>>,
    {
        for task in tasks {
            self.add(task)?;
        }
        Ok(self)
    }

    /// Registers an aggregate completion callback.
    pub fn on_complete<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&[TaskOutcome<R>]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.shared).callbacks.push(Arc::new(callback));
        self
    }

    /// Submits every queued task and returns without waiting for them.
    ///
    /// An empty batch completes immediately with no results.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::AlreadyStarted`] on a second call and
    /// [`ExecutorError::NoRuntime`] outside a tokio runtime.
    pub fn start(&mut self) -> Result<BatchHandle<R>, ExecutorError> {
        if self.started {
            return Err(ExecutorError::AlreadyStarted);
        }
        let runtime = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
        self.started = true;

        let tasks = std::mem::take(&mut self.pending);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.shared);
            state.submitted = tasks.len();
            state.waiter = Some(tx);
        }

        info!(
            tasks = tasks.len(),
            concurrency = self.concurrency,
            "starting batch"
        );

        if tasks.is_empty() {
            self.slot().finish_if_done();
        }
        for tracked in tasks {
            runtime.spawn(tracked.run());
        }

        Ok(BatchHandle { receiver: rx })
    }

    /// Stops accepting new work. Tasks not yet running are recorded as
    /// [`TaskError::Shutdown`]. Idempotent.
    pub fn shutdown(&self) {
        if !self.semaphore.is_closed() {
            debug!("shutting down batch executor");
            self.semaphore.close();
        }
    }

    /// Returns true once the executor no longer accepts work.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.semaphore.is_closed()
    }

    fn slot(&self) -> CompletionSlot<R> {
        CompletionSlot {
            shared: Arc::clone(&self.shared),
            semaphore: Arc::clone(&self.semaphore),
        }
    }
}

impl<T, R> fmt::Debug for BatchExecutor<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("concurrency", &self.concurrency)
            .field("pending", &self.pending.len())
            .field("started", &self.started)
            .field("shutdown", &self.semaphore.is_closed())
            .finish_non_exhaustive()
    }
}

/// Awaitable result of a started batch.
#[derive(Debug)]
pub struct BatchHandle<R> {
    receiver: oneshot::Receiver<Vec<TaskOutcome<R>>>,
}

impl<R> BatchHandle<R> {
    /// Waits until every task finished and the aggregate callbacks returned.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Interrupted`] if the batch was torn down before
    /// delivering its results.
    pub async fn wait(self) -> Result<Vec<TaskOutcome<R>>, ExecutorError> {
        self.receiver.await.map_err(|_| ExecutorError::Interrupted)
    }
}

/// A task paired with the completion slot of the executor it was added to.
struct TrackedTask<T, R> {
    task: Task<T, R>,
    slot: CompletionSlot<R>,
}

impl<T, R> TrackedTask<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    async fn run(mut self) {
        let semaphore = Arc::clone(&self.slot.semaphore);
        let outcome = match semaphore.acquire_owned().await {
            Ok(permit) => {
                let outcome = run_guarded(&mut self.task).await;
                drop(permit);
                outcome
            }
            Err(_) => {
                debug!("executor shut down, task skipped");
                Err(TaskError::Shutdown)
            }
        };
        self.slot.record(outcome);
    }
}

/// Shared per-executor bookkeeping that decides when the batch is done.
struct CompletionSlot<R> {
    shared: Arc<Mutex<BatchState<R>>>,
    semaphore: Arc<Semaphore>,
}

impl<R> CompletionSlot<R> {
    fn record(&self, outcome: TaskOutcome<R>) {
        lock(&self.shared).results.push(outcome);
        self.finish_if_done();
    }

    fn finish_if_done(&self) {
        let finished = {
            let mut state = lock(&self.shared);
            if state.fired || state.results.len() < state.submitted {
                None
            } else {
                state.fired = true;
                Some((
                    std::mem::take(&mut state.results),
                    std::mem::take(&mut state.callbacks),
                    state.waiter.take(),
                ))
            }
        };

        let Some((results, callbacks, waiter)) = finished else {
            return;
        };

        self.semaphore.close();
        info!(results = results.len(), "batch complete");
        notify_all(&callbacks, results.as_slice());
        if let Some(waiter) = waiter {
            // Receiver may already be gone; the callbacks have the results.
            let _ = waiter.send(results);
        }
    }
}

fn lock<R>(shared: &Mutex<BatchState<R>>) -> MutexGuard<'_, BatchState<R>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn sleepy_task(n: u64) -> Task<u64, u64> {
        Task::new(n, |n| async move {
            tokio::time::sleep(Duration::from_millis(20 - n)).await;
            Ok(n)
        })
    }

    #[test]
    fn test_executor_new_valid_concurrency() {
        let executor = BatchExecutor::<(), ()>::new(1).unwrap();
        assert_eq!(executor.concurrency(), 1);
        let executor = BatchExecutor::<(), ()>::new(100).unwrap();
        assert_eq!(executor.concurrency(), 100);
    }

    #[test]
    fn test_executor_new_invalid_concurrency() {
        assert!(matches!(
            BatchExecutor::<(), ()>::new(0),
            Err(ExecutorError::InvalidConcurrency { value: 0 })
        ));
        assert!(matches!(
            BatchExecutor::<(), ()>::new(101),
            Err(ExecutorError::InvalidConcurrency { value: 101 })
        ));
    }

    #[test]
    fn test_executor_start_outside_runtime_fails() {
        let mut executor = BatchExecutor::<u64, u64>::new(2).unwrap();
        executor.add(sleepy_task(1)).unwrap();
        assert!(matches!(executor.start(), Err(ExecutorError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_aggregate_fires_once_after_all_tasks() {
        let mut executor = BatchExecutor::new(3).unwrap();
        executor.add_all((0..10).map(sleepy_task)).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let seen_len = Arc::new(AtomicUsize::new(0));
        let (f, l) = (Arc::clone(&fired), Arc::clone(&seen_len));
        executor.on_complete(move |results: &[TaskOutcome<u64>]| {
            f.fetch_add(1, Ordering::SeqCst);
            l.store(results.len(), Ordering::SeqCst);
            Ok(())
        });

        let results = executor.start().unwrap().wait().await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(seen_len.load(Ordering::SeqCst), 10);

        let mut values: Vec<u64> = results.into_iter().map(Result::unwrap).collect();
        values.sort_unstable();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        assert!(executor.is_shutdown());
    }

    #[tokio::test]
    async fn test_individual_callbacks_run_before_aggregate() {
        let individual = Arc::new(AtomicUsize::new(0));
        let observed_at_aggregate = Arc::new(AtomicUsize::new(usize::MAX));

        let mut executor = BatchExecutor::new(4).unwrap();
        for n in 0..8 {
            let counter = Arc::clone(&individual);
            executor
                .add(sleepy_task(n).done(move |_: &u64| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }
        let (counter, observed) = (Arc::clone(&individual), Arc::clone(&observed_at_aggregate));
        executor.on_complete(move |_: &[TaskOutcome<u64>]| {
            observed.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        });

        executor.start().unwrap().wait().await.unwrap();
        assert_eq!(observed_at_aggregate.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut executor = BatchExecutor::new(2).unwrap();

        for _ in 0..6 {
            let (running, peak) = (Arc::clone(&running), Arc::clone(&peak));
            executor
                .add(Task::new((), move |()| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }

        executor.start().unwrap().wait().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_and_panicking_tasks_still_count() {
        let mut executor = BatchExecutor::new(2).unwrap();
        executor
            .add(Task::new(1_u8, |n| async move { Ok(n) }))
            .unwrap()
            .add(Task::new(2_u8, |_| async { Err(TaskError::failed("bad input")) }))
            .unwrap()
            .add(Task::new(3_u8, |n| async move {
                if n == 3 {
                    panic!("task three panicked");
                }
                Ok(n)
            }))
            .unwrap();

        let results = executor.start().unwrap().wait().await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(TaskError::Failed("bad input".to_string()))));
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(TaskError::Panicked(msg)) if msg.contains("three")))
        );
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately() {
        let mut executor = BatchExecutor::<u8, u8>::new(1).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        executor.on_complete(move |results: &[TaskOutcome<u8>]| {
            assert!(results.is_empty());
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let results = executor.start().unwrap().wait().await.unwrap();
        assert!(results.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_and_start_after_start_are_rejected() {
        let mut executor = BatchExecutor::new(1).unwrap();
        executor.add(sleepy_task(1)).unwrap();
        let handle = executor.start().unwrap();

        assert!(matches!(
            executor.add(sleepy_task(2)),
            Err(ExecutorError::AlreadyStarted)
        ));
        assert!(matches!(executor.start(), Err(ExecutorError::AlreadyStarted)));
        assert_eq!(handle.wait().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_records_every_task_as_skipped() {
        let mut executor = BatchExecutor::new(2).unwrap();
        executor.add_all((0..4).map(sleepy_task)).unwrap();
        executor.shutdown();
        executor.shutdown();

        let results = executor.start().unwrap().wait().await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| *r == Err(TaskError::Shutdown)));
    }

    #[tokio::test]
    async fn test_failing_aggregate_callback_does_not_block_later_ones() {
        let mut executor = BatchExecutor::new(1).unwrap();
        executor.add(sleepy_task(5)).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        executor
            .on_complete(|_: &[TaskOutcome<u64>]| anyhow::bail!("ui went away"))
            .on_complete(move |_: &[TaskOutcome<u64>]| {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        executor.start().unwrap().wait().await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_executor_error_display() {
        let msg = ExecutorError::InvalidConcurrency { value: 0 }.to_string();
        assert!(msg.contains("invalid concurrency"));
        assert!(msg.contains("100"));
    }
}
