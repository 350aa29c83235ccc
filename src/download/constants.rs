//! Constants for the download module (timeouts, transfer chunking).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default timeout for fetching the page that gets crawled (30 seconds).
pub const CRAWL_TIMEOUT_SECS: u64 = 30;

/// Upper bound on the bytes written per step of the transfer loop.
///
/// Pause and cancel requests are observed between steps, so this also bounds
/// how far a transfer runs on after being told to stop.
pub const CHUNK_SIZE: usize = 4096;
