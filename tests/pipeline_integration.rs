//! End-to-end tests: crawl a mock page, evaluate its links, download the
//! accepted files.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use linkgrab_core::{
    CrawlError, DownloadEvent, DownloadObserver, DownloadState, LinkType, MimeRegistry, Pipeline,
    PipelineConfig, PipelineError,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GALLERY: &str = r#"
    <html><body>
      <a href="a.png">first</a>
      <a href="/docs/c.html">docs</a>
      <img src="/b.txt">
      <img src="a.png">
    </body></html>
"#;

/// Serves the gallery page plus HEAD and GET for every linked file.
async fn gallery_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gallery/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(GALLERY),
        )
        .mount(&server)
        .await;

    for (route, content_type, body) in [
        ("/gallery/a.png", "image/png", vec![0x89_u8; 300]),
        ("/b.txt", "text/plain; charset=utf-8", b"plain text".to_vec()),
        ("/docs/c.html", "text/html", b"<p>doc</p>".to_vec()),
    ] {
        Mock::given(method("HEAD"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", content_type))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;
    }
    server
}

fn config(server: &MockServer, dir: &TempDir, filter: MimeRegistry) -> PipelineConfig {
    let mut config = PipelineConfig::new(format!("{}/gallery/", server.uri()), dir.path());
    config.threads = 4;
    config.filter = filter;
    config
}

#[tokio::test]
async fn test_pipeline_downloads_only_matching_images() {
    let server = gallery_server().await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let pipeline = Pipeline::new(config(&server, &dir, MimeRegistry::common_images())).unwrap();

    let report = pipeline.run(None).await.unwrap();

    assert_eq!(report.requested, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(std::fs::read(dir.path().join("a.png")).unwrap(), vec![0x89_u8; 300]);
    assert!(!dir.path().join("b.txt").exists());
    assert!(!dir.path().join("c.html").exists());
}

#[tokio::test]
async fn test_fetch_reports_each_accepted_request() {
    let server = gallery_server().await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut filter = MimeRegistry::common_images();
    filter.extend(&MimeRegistry::common_texts());
    let pipeline = Pipeline::new(config(&server, &dir, filter)).unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let mut requests = pipeline
        .fetch_with(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    requests.sort_by(|a, b| a.filename.cmp(&b.filename));

    let names: Vec<&str> = requests.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["a.png", "b.txt", "c.html"]);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert!(requests.iter().all(|r| r.directory == dir.path()));
}

#[tokio::test]
async fn test_anchor_only_crawl_skips_images() {
    let server = gallery_server().await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut config = config(&server, &dir, MimeRegistry::wildcard());
    config.link_type = LinkType::Anchor;
    let pipeline = Pipeline::new(config).unwrap();

    let mut names: Vec<String> = pipeline
        .fetch()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.filename)
        .collect();
    names.sort();

    assert_eq!(names, vec!["a.png", "c.html"]);
}

#[tokio::test]
async fn test_observer_sees_every_item_finish() {
    let server = gallery_server().await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let pipeline = Pipeline::new(config(&server, &dir, MimeRegistry::wildcard())).unwrap();

    let finished = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&finished);
    let observer: DownloadObserver = Arc::new(move |event: &DownloadEvent| {
        if let DownloadEvent::StateChanged { state } = event
            && state.is_terminal()
        {
            sink.lock().unwrap().push(*state);
        }
    });

    let report = pipeline.run(Some(observer)).await.unwrap();

    assert_eq!(report.requested, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(
        *finished.lock().unwrap(),
        vec![DownloadState::Completed; 3]
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
        "plain text"
    );
}

#[tokio::test]
async fn test_page_without_links_downloads_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>nothing</body></html>"))
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = PipelineConfig::new(format!("{}/empty", server.uri()), dir.path());

    let report = Pipeline::new(config).unwrap().run(None).await.unwrap();

    assert_eq!(report.requested, 0);
}

#[tokio::test]
async fn test_unreachable_page_is_a_crawl_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = PipelineConfig::new(format!("{}/gallery/", server.uri()), dir.path());

    let result = Pipeline::new(config).unwrap().fetch().await;

    assert!(matches!(
        result,
        Err(PipelineError::Crawl(CrawlError::Fetch(_)))
    ));
}

#[tokio::test]
async fn test_rejected_probe_does_not_block_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<a href="/gone.png">x</a><a href="/ok.png">y</a>"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/ok.png"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png"))
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = PipelineConfig::new(format!("{}/", server.uri()), dir.path());

    let requests = Pipeline::new(config).unwrap().fetch().await.unwrap();

    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].filename, "ok.png");
}
