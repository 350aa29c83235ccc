//! Destination filename synthesis for accepted links.

use std::borrow::Cow;

use tracing::{debug, warn};
use url::Url;

use crate::mime::MimeType;

/// Base name used when a URL yields nothing usable.
pub const FALLBACK_BASE: &str = "download";

/// Returns the last path segment of `url`, percent-decoded.
///
/// Returns an empty string for URLs ending in `/`.
#[must_use]
pub fn filename_from_url(url: &Url) -> String {
    let Some(last) = url.path_segments().and_then(|mut segments| segments.next_back()) else {
        return String::new();
    };
    urlencoding::decode(last)
        .map(Cow::into_owned)
        .unwrap_or_else(|error| {
            debug!(segment = last, error = %error, "URL decoding failed, using raw segment");
            last.to_string()
        })
}

/// Splits a filename at its last `.` into base name and extension.
///
/// A leading dot (`.profile`) and a trailing dot (`photo.`) do not start an
/// extension.
#[must_use]
pub fn split_filename(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(index) if index > 0 => {
            let extension = &name[index + 1..];
            if extension.is_empty() {
                (&name[..index], None)
            } else {
                (&name[..index], Some(extension))
            }
        }
        _ => (name, None),
    }
}

/// Replaces every character outside `[a-zA-Z0-9.-]` with `_`.
///
/// Empty or dot-only results fall back to [`FALLBACK_BASE`] so the name can
/// never address a parent directory.
#[must_use]
pub fn sanitize_base(base: &str) -> String {
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.chars().all(|c| c == '.') {
        FALLBACK_BASE.to_string()
    } else {
        sanitized
    }
}

/// Picks the extension for a file whose MIME type resolved to `entry`.
///
/// - An extension the entry registers is kept, in its registered spelling
///   (`PNG` becomes `png`).
/// - Otherwise the entry's canonical extension replaces it.
/// - Entries without extensions (such as `*/*`) keep the URL's extension.
///
/// Returns `None`, after logging a warning, when no extension can be chosen.
#[must_use]
pub fn resolve_extension(entry: &MimeType, existing: Option<&str>) -> Option<String> {
    if let Some(ext) = existing
        && let Some(registered) = entry.registered_extension(ext)
    {
        return Some(registered.to_string());
    }
    if let Some(canonical) = entry.default_extension() {
        return Some(canonical.to_string());
    }
    let kept = existing.map(|ext| sanitize_base(&ext.to_lowercase()));
    if kept.is_none() {
        warn!(mime = %entry.mime(), "no extension available for file");
    }
    kept
}

/// Joins a sanitized base name and an optional extension.
#[must_use]
pub fn build_filename(base: &str, extension: Option<&str>) -> String {
    let base = sanitize_base(base);
    match extension {
        Some(ext) if !ext.is_empty() => format!("{base}.{ext}"),
        _ => base,
    }
}
