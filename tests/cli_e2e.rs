//! End-to-end CLI tests for the linkgrab binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Starts a mock server with a page linking one image and one text file.
fn start_site() -> MockServer {
    tokio_test::block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a href="/notes.txt">n</a><img src="/logo.png">"#),
            )
            .mount(&server)
            .await;
        for (route, content_type, body) in [
            ("/logo.png", "image/png", &b"\x89PNG-logo"[..]),
            ("/notes.txt", "text/plain", &b"notes"[..]),
        ] {
            Mock::given(method("HEAD"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).insert_header("content-type", content_type))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
                .mount(&server)
                .await;
        }
        server
    })
}

fn linkgrab() -> Command {
    let mut cmd = Command::cargo_bin("linkgrab").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_describes_tool() {
    linkgrab()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Download the files linked"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_binary_version_prints_name() {
    linkgrab()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("linkgrab"));
}

#[test]
fn test_binary_rejects_unknown_flag() {
    linkgrab()
        .arg("--frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument"));
}

#[test]
fn test_binary_without_url_fails() {
    linkgrab()
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid page URL"));
}

#[test]
fn test_binary_rejects_unknown_filter() {
    linkgrab()
        .args(["https://example.com", "--filter", "videos"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown filter preset"));
}

#[test]
fn test_binary_dry_run_lists_matches_without_downloading() {
    let server = start_site();
    let dir = TempDir::new().unwrap();

    linkgrab()
        .arg(server.uri())
        .args(["--filter", "images", "-q", "--dry-run", "-o"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("/logo.png\t"))
        .stdout(predicate::str::contains("notes.txt").not());

    assert!(!dir.path().join("logo.png").exists());
}

#[test]
fn test_binary_downloads_filtered_files() {
    let server = start_site();
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");

    linkgrab()
        .arg(server.uri())
        .args(["--filter", "texts", "-c", "2", "-o"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("Download complete"));

    assert_eq!(std::fs::read_to_string(out.join("notes.txt")).unwrap(), "notes");
    assert!(!out.join("logo.png").exists());
}

#[test]
fn test_binary_reads_config_file() {
    let server = start_site();
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("linkgrab.json");
    std::fs::write(
        &config,
        format!(
            r#"{{ "page_url": "{}/", "link_type": "image", "output_dir": {:?} }}"#,
            server.uri(),
            dir.path().join("images")
        ),
    )
    .unwrap();

    linkgrab()
        .arg("--config")
        .arg(&config)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("logo.png"))
        .stdout(predicate::str::contains("notes.txt").not());
}
