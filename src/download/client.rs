//! HTTP client wrapper shared by the crawler, the evaluator and downloads.
//!
//! The `HttpClient` is created once per pipeline and cloned into every task,
//! so all requests share one connection pool.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// HTTP client with the timeouts and User-Agent used for all linkgrab traffic.
///
/// # Example
///
/// ```no_run
/// use linkgrab_core::download::HttpClient;
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let response = client.head(&Url::parse("https://example.com/cat.png")?).await?;
/// println!("{:?}", response.headers().get("content-type"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// A fetched HTML page together with the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects; relative links resolve against this.
    pub url: Url,
    /// Response body decoded as text.
    pub body: String,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes (for large files)
    /// - No transparent decompression, so `Content-Length` reflects the stored bytes
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(user_agent::default_user_agent())
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Issues a `HEAD` request and returns the successful response.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on transport failures, timeouts, or a non-2xx status.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn head(&self, url: &Url) -> Result<Response, DownloadError> {
        self.send(self.client.head(url.clone()), url).await
    }

    /// Issues a `GET` request and returns the successful response with its
    /// body still unread.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on transport failures, timeouts, or a non-2xx status.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get(&self, url: &Url) -> Result<Response, DownloadError> {
        self.send(self.client.get(url.clone()), url).await
    }

    /// Fetches a page as text, bounding the whole exchange by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Timeout` when `timeout` elapses, and the same
    /// errors as [`get`](Self::get) otherwise.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn fetch_page(&self, url: &Url, timeout: Duration) -> Result<FetchedPage, DownloadError> {
        let response = self
            .send(self.client.get(url.clone()).timeout(timeout), url)
            .await?;
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| DownloadError::network(url.as_str(), e))?;
        debug!(final_url = %final_url, bytes = body.len(), "page fetched");
        Ok(FetchedPage {
            url: final_url,
            body,
        })
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, DownloadError> {
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "non-success response");
            return Err(DownloadError::http_status(url.as_str(), status.as_u16()));
        }
        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url_for(server: &MockServer, route: &str) -> Url {
        Url::parse(&format!("{}{route}", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_head_returns_headers_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/cat.png"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png"))
            .expect(1)
            .mount(&server)
            .await;

        let response = HttpClient::new()
            .head(&url_for(&server, "/cat.png"))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "image/png"
        );
    }

    #[tokio::test]
    async fn test_get_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let error = HttpClient::new()
            .get(&url_for(&server, "/missing.png"))
            .await
            .unwrap_err();
        assert!(
            matches!(error, DownloadError::HttpStatus { status: 404, .. }),
            "unexpected error: {error:?}"
        );
    }

    #[tokio::test]
    async fn test_fetch_page_reports_final_url_after_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/new/index.html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new/index.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let page = HttpClient::new()
            .fetch_page(&url_for(&server, "/old"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(page.url.path(), "/new/index.html");
        assert_eq!(page.body, "<html></html>");
    }

    #[tokio::test]
    async fn test_fetch_page_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("slow")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let error = HttpClient::new()
            .fetch_page(&url_for(&server, "/"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(
            matches!(error, DownloadError::Timeout { .. }),
            "unexpected error: {error:?}"
        );
    }
}
