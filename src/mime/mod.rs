//! MIME type registry used to decide which crawled files are wanted.
//!
//! A [`MimeRegistry`] is a named, ordered set of [`MimeType`] entries. Each
//! entry maps a MIME type (optionally with `*` wildcard segments) to its file
//! extensions, the first being the canonical one. Exact lookups go through
//! hash indexes; wildcard matches fall back to a scan in registration order.
//!
//! Registries are plain values. The presets ([`MimeRegistry::common_images`]
//! and friends) build a fresh registry on every call.
//!
//! # Example
//!
//! ```
//! use linkgrab_core::mime::MimeRegistry;
//!
//! let mut registry = MimeRegistry::new("pictures");
//! registry.register("image/*", ["png", "jpg"]).unwrap();
//!
//! assert!(registry.has_mime("image/png"));
//! assert!(!registry.has_mime("text/png"));
//! assert_eq!(registry.lookup("image/jpeg").and_then(|m| m.default_extension()), Some("png"));
//! ```

mod error;

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use error::MimeError;

/// Segment grammar: a lone `*` or an RFC 6838 restricted name.
#[allow(clippy::expect_used)]
static MIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*|[a-z0-9][a-z0-9!#$&^_.+-]*)/(\*|[a-z0-9][a-z0-9!#$&^_.+-]*)$")
        .expect("MIME type regex is valid")
});

const WILDCARD: &str = "*";
const MATCH_ANYTHING: &str = "*/*";

/// Normalizes `type/subtype[;params]` to lower-case `type/subtype`.
fn parse_essence(value: &str) -> Result<String, MimeError> {
    let essence = value.split(';').next().unwrap_or("").trim().to_lowercase();
    if MIME_PATTERN.is_match(&essence) {
        Ok(essence)
    } else {
        Err(MimeError::invalid_format(value))
    }
}

fn segments(essence: &str) -> (&str, &str) {
    essence.split_once('/').unwrap_or((essence, ""))
}

fn segment_matches(a: &str, b: &str) -> bool {
    a == b || a == WILDCARD || b == WILDCARD
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// A MIME type and its file extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MimeTypeRepr")]
pub struct MimeType {
    mime: String,
    extensions: Vec<String>,
}

#[derive(Deserialize)]
struct MimeTypeRepr {
    mime: String,
    #[serde(default)]
    extensions: Vec<String>,
}

impl TryFrom<MimeTypeRepr> for MimeType {
    type Error = MimeError;

    fn try_from(repr: MimeTypeRepr) -> Result<Self, Self::Error> {
        Self::new(&repr.mime, repr.extensions)
    }
}

impl MimeType {
    /// Creates an entry, validating the MIME string.
    ///
    /// Extensions are lower-cased and stripped of a leading dot; empty ones
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`MimeError::InvalidFormat`] if `mime` is not `type/subtype`.
    pub fn new<I, S>(mime: &str, extensions: I) -> Result<Self, MimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mime = parse_essence(mime)?;
        let extensions = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| !ext.is_empty())
            .collect();
        Ok(Self { mime, extensions })
    }

    /// The match-anything entry `*/*` with no extensions.
    #[must_use]
    pub fn wildcard() -> Self {
        Self {
            mime: MATCH_ANYTHING.to_string(),
            extensions: Vec::new(),
        }
    }

    /// Builds an entry from known-good static data.
    fn preset(mime: &str, extensions: &[&str]) -> Self {
        Self {
            mime: mime.to_string(),
            extensions: extensions.iter().map(|ext| (*ext).to_string()).collect(),
        }
    }

    /// The normalized `type/subtype` string.
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Registered extensions, canonical first.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// The canonical extension, if any were registered.
    #[must_use]
    pub fn default_extension(&self) -> Option<&str> {
        self.extensions.first().map(String::as_str)
    }

    /// Case-insensitive extension check.
    #[must_use]
    pub fn has_extension(&self, ext: &str) -> bool {
        self.registered_extension(ext).is_some()
    }

    /// Returns the registered spelling of `ext`, if it is registered.
    #[must_use]
    pub fn registered_extension(&self, ext: &str) -> Option<&str> {
        let wanted = normalize_extension(ext);
        self.extensions
            .iter()
            .find(|registered| **registered == wanted)
            .map(String::as_str)
    }

    /// Returns true if this is the `*/*` entry.
    #[must_use]
    pub fn is_match_anything(&self) -> bool {
        self.mime == MATCH_ANYTHING
    }

    /// Wildcard-aware match against a query MIME string.
    ///
    /// `a/b` matches `x/y` when each segment is equal or either side is `*`.
    /// Invalid queries never match.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        parse_essence(query).is_ok_and(|essence| self.matches_essence(&essence))
    }

    fn matches_essence(&self, essence: &str) -> bool {
        let (query_type, query_sub) = segments(essence);
        let (own_type, own_sub) = segments(&self.mime);
        segment_matches(query_type, own_type) && segment_matches(query_sub, own_sub)
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extensions.is_empty() {
            write!(f, "{}", self.mime)
        } else {
            write!(f, "{} ({})", self.mime, self.extensions.join(", "))
        }
    }
}

/// A named, ordered collection of [`MimeType`] entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RegistryRepr", into = "RegistryRepr")]
pub struct MimeRegistry {
    name: String,
    entries: Vec<MimeType>,
    by_extension: HashMap<String, usize>,
    by_mime: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct RegistryRepr {
    name: String,
    #[serde(default)]
    entries: Vec<MimeType>,
}

impl From<RegistryRepr> for MimeRegistry {
    fn from(repr: RegistryRepr) -> Self {
        let mut registry = Self::new(repr.name);
        for entry in repr.entries {
            registry.add(entry);
        }
        registry
    }
}

impl From<MimeRegistry> for RegistryRepr {
    fn from(registry: MimeRegistry) -> Self {
        Self {
            name: registry.name,
            entries: registry.entries,
        }
    }
}

impl MimeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            by_extension: HashMap::new(),
            by_mime: HashMap::new(),
        }
    }

    /// Validates and registers a MIME type with its extensions.
    ///
    /// # Errors
    ///
    /// Returns [`MimeError::InvalidFormat`] for a malformed MIME string.
    pub fn register<I, S>(&mut self, mime: &str, extensions: I) -> Result<&mut Self, MimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = MimeType::new(mime, extensions)?;
        Ok(self.add(entry))
    }

    /// Builder form of [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns [`MimeError::InvalidFormat`] for a malformed MIME string.
    pub fn with<I, S>(mut self, mime: &str, extensions: I) -> Result<Self, MimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.register(mime, extensions)?;
        Ok(self)
    }

    /// Adds an already validated entry. Earlier registrations keep priority in
    /// the lookup indexes.
    pub fn add(&mut self, entry: MimeType) -> &mut Self {
        let index = self.entries.len();
        self.by_mime.entry(entry.mime.clone()).or_insert(index);
        for ext in &entry.extensions {
            self.by_extension.entry(ext.clone()).or_insert(index);
        }
        self.entries.push(entry);
        self
    }

    /// Appends every entry of `other`.
    pub fn extend(&mut self, other: &MimeRegistry) -> &mut Self {
        for entry in &other.entries {
            self.add(entry.clone());
        }
        self
    }

    /// The registry's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entries in registration order.
    #[must_use]
    pub fn entries(&self) -> &[MimeType] {
        &self.entries
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if a `*/*` entry is registered.
    #[must_use]
    pub fn is_match_anything(&self) -> bool {
        self.by_mime.contains_key(MATCH_ANYTHING)
    }

    /// Returns true if any entry registers `ext`, or if the registry matches
    /// anything.
    #[must_use]
    pub fn has_extension(&self, ext: &str) -> bool {
        self.is_match_anything() || self.by_extension.contains_key(&normalize_extension(ext))
    }

    /// Returns true if [`lookup`](Self::lookup) finds an entry for `mime`.
    #[must_use]
    pub fn has_mime(&self, mime: &str) -> bool {
        self.lookup(mime).is_some()
    }

    /// Finds the entry for `mime`: exact match first, then the first
    /// wildcard-compatible entry in registration order.
    ///
    /// Parameters such as `; charset=utf-8` are ignored. Invalid strings find
    /// nothing.
    #[must_use]
    pub fn lookup(&self, mime: &str) -> Option<&MimeType> {
        let essence = parse_essence(mime).ok()?;
        if let Some(&index) = self.by_mime.get(&essence) {
            return self.entries.get(index);
        }
        self.entries
            .iter()
            .find(|entry| entry.matches_essence(&essence))
    }

    /// Looks up the entry registering `ext`.
    #[must_use]
    pub fn lookup_extension(&self, ext: &str) -> Option<&MimeType> {
        self.by_extension
            .get(&normalize_extension(ext))
            .and_then(|&index| self.entries.get(index))
    }

    /// A registry accepting every MIME type.
    #[must_use]
    pub fn wildcard() -> Self {
        let mut registry = Self::new("Everything");
        registry.add(MimeType::wildcard());
        registry
    }

    /// Common image formats.
    #[must_use]
    pub fn common_images() -> Self {
        Self::preset(
            "Common Images",
            &[
                ("image/gif", &["gif"]),
                ("image/png", &["png"]),
                ("image/bmp", &["bmp", "bm"]),
                ("image/tiff", &["tiff", "tif"]),
                ("image/jpeg", &["jpg", "jpe", "jpeg", "jps", "jfif"]),
                ("image/webp", &["webp"]),
                ("image/svg+xml", &["svg"]),
            ],
        )
    }

    /// Common text formats.
    #[must_use]
    pub fn common_texts() -> Self {
        Self::preset(
            "Common Texts",
            &[
                ("text/plain", &["txt", "text", "log", "list"]),
                (
                    "text/html",
                    &["html", "htm", "php", "htmls", "xhtml", "htx", "shtml"],
                ),
                ("text/xml", &["xml"]),
                ("text/richtext", &["rt", "rtf", "rtx"]),
                ("text/ecmascript", &["js"]),
                ("text/javascript", &["js"]),
                ("text/css", &["css"]),
                ("text/csv", &["csv"]),
            ],
        )
    }

    /// Common audio formats.
    #[must_use]
    pub fn common_audio() -> Self {
        Self::preset(
            "Common Audio",
            &[
                ("audio/mpeg", &["mp3", "mpga", "mp2"]),
                ("audio/wav", &["wav"]),
                ("audio/x-wav", &["wav"]),
                ("audio/ogg", &["ogg", "oga"]),
                ("audio/flac", &["flac"]),
                ("audio/aac", &["aac"]),
                ("audio/mp4", &["m4a"]),
                ("audio/webm", &["weba"]),
            ],
        )
    }

    /// Every built-in preset, in menu order.
    #[must_use]
    pub fn presets() -> Vec<Self> {
        vec![
            Self::wildcard(),
            Self::common_images(),
            Self::common_texts(),
            Self::common_audio(),
        ]
    }

    /// Resolves a preset by short name: `wildcard`, `images`, `texts`, `audio`.
    #[must_use]
    pub fn preset_named(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "wildcard" | "all" | "any" => Some(Self::wildcard()),
            "images" | "image" => Some(Self::common_images()),
            "texts" | "text" => Some(Self::common_texts()),
            "audio" => Some(Self::common_audio()),
            _ => None,
        }
    }

    fn preset(name: &str, table: &[(&str, &[&str])]) -> Self {
        let mut registry = Self::new(name);
        for (mime, extensions) in table {
            registry.add(MimeType::preset(mime, extensions));
        }
        registry
    }
}

impl Default for MimeRegistry {
    fn default() -> Self {
        Self::wildcard()
    }
}

impl fmt::Display for MimeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
