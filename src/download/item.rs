//! A single pausable, cancellable transfer of one URL into one file.

use std::ffi::OsStr;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use reqwest::Response;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::HttpClient;
use super::constants::CHUNK_SIZE;
use super::error::DownloadError;
use super::state::DownloadState;
use crate::task::panic_message;

/// Notification delivered to every observer of a [`DownloadItem`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DownloadEvent {
    /// The item entered a new state.
    StateChanged {
        /// State just entered.
        state: DownloadState,
    },
    /// More bytes were written.
    Progress {
        /// Bytes written so far.
        bytes: u64,
        /// Declared body length.
        size: u64,
        /// `bytes / size` as a percentage.
        percent: f64,
    },
}

/// Callback invoked synchronously for each [`DownloadEvent`].
///
/// Observers run on the transfer task while the item's lock is held. They
/// must return quickly and must not call back into the item they observe.
pub type DownloadObserver = Arc<dyn Fn(&DownloadEvent) + Send + Sync>;

/// Token returned by [`DownloadItem::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Point-in-time copy of an item's mutable fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadSnapshot {
    /// Current state.
    pub state: DownloadState,
    /// Bytes written so far.
    pub bytes: u64,
    /// Declared body length, once known.
    pub size: Option<u64>,
    /// Progress percentage (0 until the size is known).
    pub percent: f64,
}

struct Shared {
    state: DownloadState,
    bytes: u64,
    size: Option<u64>,
    error: Option<String>,
    observers: Vec<(ObserverId, DownloadObserver)>,
    next_observer: u64,
}

impl Shared {
    #[allow(clippy::cast_precision_loss)]
    fn percent(&self) -> f64 {
        match self.size {
            Some(size) if size > 0 => self.bytes as f64 / size as f64 * 100.0,
            _ => 0.0,
        }
    }

    fn emit(&self, event: &DownloadEvent) {
        for (id, observer) in &self.observers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(event))) {
                warn!(
                    observer = id.0,
                    panic = %panic_message(payload.as_ref()),
                    "download observer panicked"
                );
            }
        }
    }
}

/// One file transfer with observable state and progress.
///
/// The item is shared (usually behind an `Arc`) between the task that calls
/// [`run`](Self::run) and whoever controls it through [`pause`](Self::pause),
/// [`resume`](Self::resume) and [`cancel`](Self::cancel). All mutable fields
/// sit behind one per-item lock; items never share locks with each other.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use linkgrab_core::download::{DownloadEvent, DownloadItem, HttpClient};
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let item = DownloadItem::new(Url::parse("https://example.com/cat.png")?, "./out", "cat.png");
/// item.subscribe(Arc::new(|event: &DownloadEvent| println!("{event:?}")));
/// let state = item.run(&HttpClient::new()).await;
/// println!("finished as {state}");
/// # Ok(())
/// # }
/// ```
pub struct DownloadItem {
    url: Url,
    path: PathBuf,
    shared: Mutex<Shared>,
    wake: Notify,
}

impl DownloadItem {
    /// Creates an item that will write `url` to `directory/filename`.
    #[must_use]
    pub fn new(url: Url, directory: impl AsRef<Path>, filename: &str) -> Self {
        Self {
            url,
            path: directory.as_ref().join(filename),
            shared: Mutex::new(Shared {
                state: DownloadState::Uninitialised,
                bytes: 0,
                size: None,
                error: None,
                observers: Vec::new(),
                next_observer: 0,
            }),
            wake: Notify::new(),
        }
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Destination file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Destination file name.
    #[must_use]
    pub fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.lock().state
    }

    /// Declared body length, known once the connection is open.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.lock().size
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }

    /// Progress percentage in `0.0..=100.0`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.lock().percent()
    }

    /// Consistent copy of state, counters and progress.
    #[must_use]
    pub fn snapshot(&self) -> DownloadSnapshot {
        let shared = self.lock();
        DownloadSnapshot {
            state: shared.state,
            bytes: shared.bytes,
            size: shared.size,
            percent: shared.percent(),
        }
    }

    /// Message of the failure that moved the item to `Error`, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Registers an observer for state and progress events.
    pub fn subscribe(&self, observer: DownloadObserver) -> ObserverId {
        let mut shared = self.lock();
        let id = ObserverId(shared.next_observer);
        shared.next_observer += 1;
        shared.observers.push((id, observer));
        id
    }

    /// Removes an observer. Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut shared = self.lock();
        let before = shared.observers.len();
        shared.observers.retain(|(registered, _)| *registered != id);
        shared.observers.len() != before
    }

    /// Parks the copy loop. Only honoured while `Downloading`.
    pub fn pause(&self) -> bool {
        self.apply(DownloadState::Paused, |_| true)
    }

    /// Wakes a paused copy loop. No-op unless `Paused`.
    pub fn resume(&self) -> bool {
        let resumed = self.apply(DownloadState::Downloading, |current| {
            current == DownloadState::Paused
        });
        if resumed {
            self.wake.notify_one();
        }
        resumed
    }

    /// Requests cancellation.
    ///
    /// Ignored once the item is `Completed`, `Cancelled` or `Error`. The copy
    /// loop notices at its next step; a paused loop is woken to do so.
    pub fn cancel(&self) -> bool {
        let cancelled = self.apply(DownloadState::Cancelled, |_| true);
        if cancelled {
            self.wake.notify_one();
        }
        cancelled
    }

    /// Runs the transfer to a terminal state and returns that state.
    ///
    /// Failures are recorded on the item (see [`error_message`](Self::error_message))
    /// rather than returned. An item that is no longer `Uninitialised` is not
    /// started again and never opens a connection.
    #[instrument(skip(self, client), fields(url = %self.url))]
    pub async fn run(&self, client: &HttpClient) -> DownloadState {
        if !self.apply(DownloadState::Initialised, |_| true) {
            let state = self.state();
            debug!(state = %state, "transfer not started");
            return state;
        }

        if let Err(error) = self.transfer(client).await {
            warn!(error = %error, path = %self.path.display(), "download failed");
            self.fail(&error);
        }

        let snapshot = self.snapshot();
        info!(
            state = %snapshot.state,
            bytes = snapshot.bytes,
            path = %self.path.display(),
            "download finished"
        );
        snapshot.state
    }

    async fn transfer(&self, client: &HttpClient) -> Result<(), DownloadError> {
        let response = client.get(&self.url).await?;
        let size = response
            .content_length()
            .filter(|len| *len > 0)
            .ok_or_else(|| DownloadError::missing_content_length(self.url.as_str()))?;
        self.record_size(size);

        if !self.apply(DownloadState::Downloading, |current| {
            current == DownloadState::Initialised
        }) {
            debug!("cancelled while connecting");
            return Ok(());
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        let file = File::create(&self.path)
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        let mut writer = BufWriter::new(file);

        let copied = self.copy_body(response, &mut writer, size).await;
        let flushed = writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(&self.path, e));
        copied.and(flushed)
    }

    async fn copy_body(
        &self,
        response: Response,
        writer: &mut BufWriter<File>,
        size: u64,
    ) -> Result<(), DownloadError> {
        let mut stream = response.bytes_stream();

        'body: loop {
            if !self.wait_while_paused().await {
                return Ok(());
            }
            if self.bytes() >= size {
                break;
            }
            let Some(chunk) = stream.next().await else {
                warn!(bytes = self.bytes(), size, "body ended before declared length");
                break;
            };
            let chunk = chunk.map_err(|e| DownloadError::network(self.url.as_str(), e))?;

            let mut offset = 0;
            while offset < chunk.len() {
                if !self.wait_while_paused().await {
                    return Ok(());
                }
                let remaining = size.saturating_sub(self.bytes());
                if remaining == 0 {
                    continue 'body;
                }
                let step = CHUNK_SIZE
                    .min(chunk.len() - offset)
                    .min(usize::try_from(remaining).unwrap_or(usize::MAX));
                writer
                    .write_all(&chunk[offset..offset + step])
                    .await
                    .map_err(|e| DownloadError::io(&self.path, e))?;
                offset += step;
                self.advance(step as u64, size);
            }
        }

        self.finish().await;
        Ok(())
    }

    /// Returns true once the loop may continue, false if it must stop.
    async fn wait_while_paused(&self) -> bool {
        loop {
            match self.state() {
                DownloadState::Downloading => return true,
                DownloadState::Paused => {
                    debug!(bytes = self.bytes(), "transfer parked");
                    self.wake.notified().await;
                }
                _ => return false,
            }
        }
    }

    async fn finish(&self) {
        while self.wait_while_paused().await {
            if self.apply(DownloadState::Completed, |_| true) {
                return;
            }
        }
    }

    fn record_size(&self, size: u64) {
        let mut shared = self.lock();
        shared.size = Some(size);
        let event = DownloadEvent::Progress {
            bytes: shared.bytes,
            size,
            percent: shared.percent(),
        };
        shared.emit(&event);
    }

    fn advance(&self, written: u64, size: u64) {
        let mut shared = self.lock();
        shared.bytes = (shared.bytes + written).min(size);
        let event = DownloadEvent::Progress {
            bytes: shared.bytes,
            size,
            percent: shared.percent(),
        };
        shared.emit(&event);
    }

    fn fail(&self, error: &DownloadError) {
        {
            let mut shared = self.lock();
            if shared.state.is_terminal() {
                debug!(state = %shared.state, "late failure ignored");
                return;
            }
            shared.error = Some(error.to_string());
        }
        self.apply(DownloadState::Error, |_| true);
    }

    /// Moves to `next` if `guard` accepts the current state and the state
    /// machine allows the step. Observers hear about applied transitions only.
    fn apply(&self, next: DownloadState, guard: impl FnOnce(DownloadState) -> bool) -> bool {
        let mut shared = self.lock();
        let current = shared.state;
        if !(guard(current) && current.can_transition_to(next)) {
            debug!(url = %self.url, from = %current, to = %next, "transition ignored");
            return false;
        }
        shared.state = next;
        debug!(url = %self.url, from = %current, to = %next, "state changed");
        shared.emit(&DownloadEvent::StateChanged { state: next });
        true
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DownloadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("DownloadItem")
            .field("url", &self.url.as_str())
            .field("path", &self.path)
            .field("state", &snapshot.state)
            .field("bytes", &snapshot.bytes)
            .field("size", &snapshot.size)
            .finish_non_exhaustive()
    }
}
