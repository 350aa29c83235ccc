//! Link extraction from a single HTML page.
//!
//! [`crawl`] fetches a page and returns the absolute URLs of its anchors,
//! images, or both. Relative and protocol-relative links resolve against the
//! page's final URL (or its `<base href>`), links that do not resolve to an
//! `http`/`https` URL are skipped, and duplicates are removed keeping the
//! first occurrence.
//!
//! # Example
//!
//! ```
//! use linkgrab_core::crawl::{LinkType, extract_links};
//! use url::Url;
//!
//! let page = Url::parse("https://example.com/gallery/").unwrap();
//! let html = r#"<a href="a.png">a</a><img src="//cdn.example.com/b.jpg">"#;
//! let links = extract_links(html, &page, LinkType::Both);
//! assert_eq!(links[0].as_str(), "https://example.com/gallery/a.png");
//! assert_eq!(links[1].as_str(), "https://cdn.example.com/b.jpg");
//! ```

mod error;

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

pub use error::CrawlError;

use crate::download::HttpClient;

#[allow(clippy::expect_used)]
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector is valid"));

#[allow(clippy::expect_used)]
static IMAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("image selector is valid"));

#[allow(clippy::expect_used)]
static BASE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("base[href]").expect("base selector is valid"));

/// Which elements to collect links from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// `<a href>` only.
    Anchor,
    /// `<img src>` only.
    Image,
    /// Anchors and images.
    #[default]
    Both,
}

impl LinkType {
    fn anchors(self) -> bool {
        matches!(self, Self::Anchor | Self::Both)
    }

    fn images(self) -> bool {
        matches!(self, Self::Image | Self::Both)
    }

    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anchor => "anchor",
            Self::Image => "image",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anchor" | "anchors" | "a" => Ok(Self::Anchor),
            "image" | "images" | "img" => Ok(Self::Image),
            "both" | "all" => Ok(Self::Both),
            _ => Err(format!("invalid link type: {s} (expected anchor, image or both)")),
        }
    }
}

/// Parses and checks a page URL.
///
/// # Errors
///
/// Returns [`CrawlError::InvalidUrl`] unless `page_url` is an absolute
/// `http`/`https` URL.
pub fn parse_page_url(page_url: &str) -> Result<Url, CrawlError> {
    let url = Url::parse(page_url.trim()).map_err(|_| CrawlError::invalid_url(page_url))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CrawlError::invalid_url(page_url));
    }
    Ok(url)
}

/// Fetches `page_url` and extracts its links.
///
/// `timeout` bounds the page fetch only.
///
/// # Errors
///
/// Returns [`CrawlError::InvalidUrl`] for a malformed page URL and
/// [`CrawlError::Fetch`] if the page cannot be retrieved.
#[instrument(skip(client), fields(url = %page_url))]
pub async fn crawl(
    client: &HttpClient,
    page_url: &str,
    link_type: LinkType,
    timeout: Duration,
) -> Result<Vec<Url>, CrawlError> {
    let url = parse_page_url(page_url)?;
    let page = client
        .fetch_page(&url, timeout)
        .await
        .map_err(CrawlError::Fetch)?;

    let links = extract_links(&page.body, &page.url, link_type);
    info!(links = links.len(), link_type = %link_type, "page crawled");
    Ok(links)
}

/// Extracts absolute links from an already fetched document.
#[must_use]
pub fn extract_links(html: &str, page_url: &Url, link_type: LinkType) -> Vec<Url> {
    let document = Html::parse_document(html);
    let base = document
        .select(&BASE_SELECTOR)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone());

    let mut raw = Vec::new();
    if link_type.anchors() {
        raw.extend(
            document
                .select(&ANCHOR_SELECTOR)
                .filter_map(|element| element.value().attr("href")),
        );
    }
    if link_type.images() {
        raw.extend(
            document
                .select(&IMAGE_SELECTOR)
                .filter_map(|element| element.value().attr("src")),
        );
    }

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for value in raw {
        let Some(link) = resolve_link(&base, value) else {
            debug!(value, "skipping unusable link");
            continue;
        };
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}

fn resolve_link(base: &Url, value: &str) -> Option<Url> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('#') {
        return None;
    }
    let mut link = base.join(value).ok()?;
    if !matches!(link.scheme(), "http" | "https") {
        return None;
    }
    link.set_fragment(None);
    Some(link)
}
