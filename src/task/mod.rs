//! Asynchronous task primitives.
//!
//! This module provides the building blocks the rest of the crate uses to run
//! work off the caller's task and deliver results through callbacks:
//!
//! - [`Completion`] - single-method result callback
//! - [`Task`] - one unit of work plus the callbacks fanned out on success
//! - [`Worker`] - runs one task on its own tokio task, with cancellation
//! - [`BatchExecutor`] - runs many tasks with bounded concurrency and fires
//!   one aggregate callback when every task has finished
//!
//! # Example
//!
//! ```no_run
//! use linkgrab_core::task::{BatchExecutor, Task, TaskError};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut executor = BatchExecutor::new(4)?;
//! for n in 0..10_u32 {
//!     executor.add(Task::new(n, |n| async move { Ok::<_, TaskError>(n * 2) }))?;
//! }
//! executor.on_complete(|results: &[Result<u32, TaskError>]| {
//!     println!("{} tasks finished", results.len());
//!     Ok(())
//! });
//! let results = executor.start()?.wait().await?;
//! assert_eq!(results.len(), 10);
//! # Ok(())
//! # }
//! ```

mod batch;
mod worker;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tracing::warn;

pub use batch::{
    BatchExecutor, BatchHandle, ExecutorError, MAX_CONCURRENCY, MIN_CONCURRENCY, TaskOutcome,
};
pub use worker::{ProgressReporter, Worker, WorkerHandle};

/// Errors produced while running a [`Task`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task was run a second time.
    #[error("task has already been run")]
    AlreadyRun,

    /// The unit of work returned an error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The unit of work panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The owning executor was shut down before the task got to run.
    #[error("executor shut down before the task could run")]
    Shutdown,
}

impl TaskError {
    /// Creates a work failure from any displayable error.
    pub fn failed(error: impl fmt::Display) -> Self {
        Self::Failed(error.to_string())
    }
}

/// Callback invoked with the result of a finished unit of work.
///
/// Implemented for every `Fn(&R) -> anyhow::Result<()>` closure. A returned
/// error (or a panic) is logged and swallowed; it never reaches the executor
/// and never stops the remaining callbacks from running.
pub trait Completion<R: ?Sized>: Send + Sync {
    /// Handles a finished result.
    ///
    /// # Errors
    ///
    /// Any error is logged by the caller and otherwise ignored.
    fn on_complete(&self, result: &R) -> anyhow::Result<()>;
}

impl<R: ?Sized, F> Completion<R> for F
where
    F: Fn(&R) -> anyhow::Result<()> + Send + Sync,
{
    fn on_complete(&self, result: &R) -> anyhow::Result<()> {
        self(result)
    }
}

/// Shared handle to a registered completion callback.
pub type CompletionHandle<R> = Arc<dyn Completion<R>>;

type Work<T, R> = Box<dyn FnOnce(T) -> BoxFuture<'static, Result<R, TaskError>> + Send>;

/// A single-use unit of work with its completion callbacks.
///
/// The input is captured when the task is created. Running the task consumes
/// the input and the work; a second [`run`](Self::run) returns
/// [`TaskError::AlreadyRun`].
pub struct Task<T, R> {
    input: Option<T>,
    work: Option<Work<T, R>>,
    callbacks: Vec<CompletionHandle<R>>,
}

impl<T, R> Task<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Creates a task that will call `work(input)` when run.
    pub fn new<F, Fut>(input: T, work: F) -> Self
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        Self {
            input: Some(input),
            work: Some(Box::new(move |input| work(input).boxed())),
            callbacks: Vec::new(),
        }
    }

    /// Appends a completion callback. Callbacks fire in registration order.
    #[must_use]
    pub fn done<F>(mut self, callback: F) -> Self
    where
        F: Fn(&R) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Appends an already shared completion callback.
    #[must_use]
    pub fn done_with(mut self, callback: CompletionHandle<R>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Appends a completion callback to a task that has not run yet.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::AlreadyRun`] once the task has started running.
    pub fn add_completion(&mut self, callback: CompletionHandle<R>) -> Result<(), TaskError> {
        if self.has_run() {
            return Err(TaskError::AlreadyRun);
        }
        self.callbacks.push(callback);
        Ok(())
    }

    /// Returns true once [`run`](Self::run) has been called.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.work.is_none()
    }

    /// Returns the input value, if the task has not run yet.
    #[must_use]
    pub fn input(&self) -> Option<&T> {
        self.input.as_ref()
    }

    /// Runs the work and fans the result out to every callback.
    ///
    /// Callbacks are only invoked on success, on the calling task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::AlreadyRun`] on reuse, or whatever error the work
    /// itself produced.
    pub async fn run(&mut self) -> Result<R, TaskError> {
        let (Some(work), Some(input)) = (self.work.take(), self.input.take()) else {
            return Err(TaskError::AlreadyRun);
        };
        let result = work(input).await?;
        notify_all(&self.callbacks, &result);
        Ok(result)
    }
}

impl<T, R> fmt::Debug for Task<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("has_run", &self.work.is_none())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Invokes every callback with `result`, logging and swallowing failures.
pub(crate) fn notify_all<R: ?Sized>(callbacks: &[CompletionHandle<R>], result: &R) {
    for (index, callback) in callbacks.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| callback.on_complete(result))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(index, error = %error, "completion callback failed"),
            Err(payload) => warn!(
                index,
                panic = %panic_message(payload.as_ref()),
                "completion callback panicked"
            ),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs a task, converting a panic in the work into [`TaskError::Panicked`].
pub(crate) async fn run_guarded<T, R>(task: &mut Task<T, R>) -> Result<R, TaskError>
where
    T: Send + 'static,
    R: Send + 'static,
{
    match AssertUnwindSafe(task.run()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_task_run_returns_work_result() {
        let mut task = Task::new(21_u32, |n| async move { Ok(n * 2) });
        assert_eq!(task.input(), Some(&21));
        assert_eq!(task.run().await.unwrap(), 42);
        assert!(task.has_run());
    }

    #[tokio::test]
    async fn test_task_callbacks_fire_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&order);
        let second = Arc::clone(&order);

        let mut task = Task::new("x".to_string(), |s: String| async move { Ok(s.to_uppercase()) })
            .done(move |r: &String| {
                first.lock().unwrap().push(format!("first:{r}"));
                Ok(())
            })
            .done(move |r: &String| {
                second.lock().unwrap().push(format!("second:{r}"));
                Ok(())
            });

        task.run().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first:X", "second:X"]);
    }

    #[tokio::test]
    async fn test_task_failing_callback_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut task = Task::new((), |()| async { Ok(1_u8) })
            .done(|_: &u8| anyhow::bail!("observer broke"))
            .done(|_: &u8| panic!("observer panicked"))
            .done(move |_: &u8| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        assert_eq!(task.run().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_second_run_is_rejected() {
        let mut task = Task::new(1_u8, |n| async move { Ok(n) });
        task.run().await.unwrap();
        assert_eq!(task.run().await, Err(TaskError::AlreadyRun));
    }

    #[tokio::test]
    async fn test_task_add_completion_after_run_is_rejected() {
        let mut task = Task::new(1_u8, |n| async move { Ok(n) });
        task.add_completion(Arc::new(|_: &u8| Ok(()))).unwrap();
        task.run().await.unwrap();
        assert_eq!(
            task.add_completion(Arc::new(|_: &u8| Ok(()))),
            Err(TaskError::AlreadyRun)
        );
    }

    #[tokio::test]
    async fn test_task_error_skips_callbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut task = Task::new((), |()| async { Err::<u8, _>(TaskError::failed("boom")) })
            .done(move |_: &u8| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        assert_eq!(task.run().await, Err(TaskError::Failed("boom".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_guarded_converts_panic() {
        let mut task = Task::new((), |()| async {
            if true {
                panic!("work exploded");
            }
            Ok(0_u8)
        });
        let outcome = run_guarded(&mut task).await;
        assert_eq!(outcome, Err(TaskError::Panicked("work exploded".to_string())));
    }

    #[test]
    fn test_task_error_display() {
        assert!(TaskError::AlreadyRun.to_string().contains("already been run"));
        assert!(TaskError::failed("disk full").to_string().contains("disk full"));
    }
}
