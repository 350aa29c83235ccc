//! Lifecycle states of a single transfer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// State of a [`DownloadItem`](super::DownloadItem).
///
/// Variants are declared in rank order. A cancel request is only honoured
/// while the current rank is at most [`DownloadState::Paused`], so a stale
/// cancel never overwrites a finished result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Created, not yet started.
    Uninitialised,
    /// Started; connection being opened.
    Initialised,
    /// Body is being copied to disk.
    Downloading,
    /// Copy loop parked until resumed or cancelled.
    Paused,
    /// Whole body written.
    Completed,
    /// Stopped on request; any partial file is left in place.
    Cancelled,
    /// Connect, read or write failed.
    Error,
}

impl DownloadState {
    /// All states in rank order.
    pub const ALL: [Self; 7] = [
        Self::Uninitialised,
        Self::Initialised,
        Self::Downloading,
        Self::Paused,
        Self::Completed,
        Self::Cancelled,
        Self::Error,
    ];

    /// Priority rank used to arbitrate racing transitions.
    #[must_use]
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Returns true for `Completed`, `Cancelled` and `Error`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }

    /// Returns true if a cancel request issued in this state takes effect.
    #[must_use]
    pub fn is_cancellable(self) -> bool {
        self.rank() <= Self::Paused.rank()
    }

    /// Returns whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Uninitialised, Self::Initialised)
            | (Self::Initialised | Self::Paused, Self::Downloading)
            | (Self::Downloading, Self::Paused | Self::Completed) => true,
            (current, Self::Cancelled) => current.is_cancellable(),
            (current, Self::Error) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Returns the lowercase name used in logs and serialized output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialised => "uninitialised",
            Self::Initialised => "initialised",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown [`DownloadState`] name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid download state: {value}")]
pub struct ParseStateError {
    /// The rejected input.
    pub value: String,
}

impl std::str::FromStr for DownloadState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStateError {
                value: s.to_string(),
            })
    }
}
