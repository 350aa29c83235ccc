//! Progress bar for download runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use linkgrab_core::{DownloadEvent, DownloadObserver, DownloadState};

/// Creates the files bar, or a hidden one when `visible` is false.
pub(crate) fn files_bar(total: usize, visible: bool) -> ProgressBar {
    let total = u64::try_from(total).unwrap_or(u64::MAX);
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} files {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Observer advancing `bar` once per item that reaches a terminal state.
pub(crate) fn observer(bar: ProgressBar) -> DownloadObserver {
    let failed = Arc::new(AtomicU64::new(0));
    Arc::new(move |event: &DownloadEvent| {
        let DownloadEvent::StateChanged { state } = *event else {
            return;
        };
        if !state.is_terminal() {
            return;
        }
        bar.inc(1);
        if state == DownloadState::Error {
            let failed = failed.fetch_add(1, Ordering::SeqCst) + 1;
            bar.set_message(format!("({failed} failed)"));
        }
    })
}
