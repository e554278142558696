//! Integration tests for the firmware catalog.
//!
//! These tests run the catalog operations against mock HTTP servers, through
//! the real reqwest transport.

use std::time::Duration;

use etube_core::fetch::RetryBudget;
use etube_core::{
    BackoffPolicy, CatalogError, CatalogSettings, FetchError, FirmwareCatalog, HttpTimeouts,
    ScrapedModels, SearchRange, Version,
};
use tempfile::TempDir;
use wiremock::matchers::{header_exists, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn record(server: &MockServer, filename: &str, version: &str) -> String {
    format!(
        r#"{{"filename":"{filename}","version":"{version}","filesize":16,"md5":"0cc175b9c0f1b6a8","type":"SC","download_url":"{}/files/{filename}"}}"#,
        server.uri()
    )
}

fn settings(server: &MockServer, low: &str, high: &str) -> CatalogSettings {
    CatalogSettings {
        api_base_url: format!("{}/etube/firmware", server.uri()),
        download_base_url: format!("{}/files", server.uri()),
        pages: vec![format!("{}/products/apps/e-tube-project-cyclist.html", server.uri())],
        search_range: SearchRange::new(
            Version::parse(low).expect("valid low"),
            Version::parse(high).expect("valid high"),
        )
        .expect("valid range"),
        timeouts: HttpTimeouts {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(5),
        },
        backoff: BackoffPolicy::none(),
        max_retries: RetryBudget::Limited(2),
    }
}

fn catalog(settings: CatalogSettings) -> FirmwareCatalog {
    FirmwareCatalog::new(settings).expect("client should build")
}

fn version_in(request: &Request) -> Version {
    let segment = request
        .url
        .path_segments()
        .and_then(Iterator::last)
        .expect("version segment");
    Version::parse(segment).expect("version in path")
}

/// Mounts an API whose answer changes once, at `breakpoint`.
async fn mount_step_api(server: &MockServer, breakpoint: Version, before: String, after: String) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/etube/firmware/[0-9.]+$"))
        .respond_with(move |request: &Request| {
            let body = if version_in(request) >= breakpoint {
                after.clone()
            } else {
                before.clone()
            };
            ResponseTemplate::new(200).set_body_string(body)
        })
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_list_for_version_filters_and_sorts() {
    let server = MockServer::start().await;
    let body = format!(
        r#"[{},{},{{"filename":"","version":"1.0.0","filesize":null,"md5":null,"type":null,"download_url":""}}]"#,
        record(&server, "SC-E8000_4.3.1.bin", "4.3.1"),
        record(&server, "BM-E8010_4.0.0.bin", "4.0.0"),
    );
    Mock::given(method("GET"))
        .and(path("/etube/firmware/4.2.0"))
        .and(header_exists("sec-fetch-mode"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let firmware = catalog(settings(&server, "4.0.0", "4.5.0"))
        .list_for_version("4.2.0")
        .await
        .expect("listing should succeed");

    let names: Vec<&str> = firmware.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, ["BM-E8010_4.0.0.bin", "SC-E8000_4.3.1.bin"]);
}

#[tokio::test]
async fn test_list_for_version_fatal_status_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/etube/firmware/4.2.0"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = catalog(settings(&server, "4.0.0", "4.5.0"))
        .list_for_version("4.2.0")
        .await
        .expect_err("404 should fail");

    match err {
        CatalogError::Fetch(fetch) => assert_eq!(fetch.status(), Some(404)),
        other => panic!("expected fetch error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_for_version_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/etube/firmware/4.2.0"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/etube/firmware/4.2.0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("[{}]", record(&server, "FW-1.0.0.bin", "1.0.0"))),
        )
        .mount(&server)
        .await;

    let firmware = catalog(settings(&server, "4.0.0", "4.5.0"))
        .list_for_version("4.2.0")
        .await
        .expect("third attempt should succeed");

    assert_eq!(firmware.len(), 1);
    assert_eq!(server.received_requests().await.expect("recorded").len(), 3);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_returns_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/etube/firmware/4.2.0"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = catalog(settings(&server, "4.0.0", "4.5.0"))
        .list_for_version("4.2.0")
        .await
        .expect_err("429 should exhaust the budget");

    assert!(matches!(
        err,
        CatalogError::Fetch(FetchError::HttpStatus { status: 429, .. })
    ));
    // One attempt plus two retries.
    assert_eq!(server.received_requests().await.expect("recorded").len(), 3);
}

#[tokio::test]
async fn test_list_all_bisected_finds_both_sides_of_a_step() {
    let server = MockServer::start().await;
    let old = format!("[{}]", record(&server, "FW-1.0.0.bin", "1.0.0"));
    let new = format!(
        "[{},{}]",
        record(&server, "FW-1.0.0.bin", "1.0.0"),
        record(&server, "FW-1.1.0.bin", "1.1.0")
    );
    mount_step_api(&server, Version::parse("4.3.7").expect("valid"), old, new).await;

    let firmware = catalog(settings(&server, "4.0.0", "4.5.0"))
        .list_all_bisected()
        .await
        .expect("discovery should succeed");

    let names: Vec<&str> = firmware.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, ["FW-1.0.0.bin", "FW-1.1.0.bin"]);

    let requests = server.received_requests().await.expect("recorded");
    let mut paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    let total = paths.len();
    paths.sort_unstable();
    paths.dedup();
    assert_eq!(paths.len(), total, "no version should be requested twice");
    assert!(total < 40, "bisection used {total} requests");
}

#[tokio::test]
async fn test_discover_all_reconciles_and_verifies() {
    let server = MockServer::start().await;
    let payload = format!(
        "[{},{}]",
        record(&server, "SC-E8000_4.0.0.bin", "4.0.0"),
        record(&server, "XYZ123_1.0.0.bin", "1.0.0")
    );
    mount_step_api(&server, Version::MAX, payload.clone(), payload).await;

    Mock::given(method("GET"))
        .and(path("/products/apps/e-tube-project-cyclist.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><table class="firmware-table"><tbody>
                <tr><td class="firmware-modelNo">Cycle computer (SC-E8000)</td><td class="firmware-version">4.0.0</td></tr>
                <tr><td class="firmware-modelNo">Cycle computer (SC-E8000)</td><td class="firmware-version">4.1.0</td></tr>
                <tr><td class="firmware-modelNo">Cycle computer (SC-E8000)</td><td class="firmware-version">4.2.0</td></tr>
            </tbody></table></body></html>"#,
        ))
        .mount(&server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/files/SC-E8000_4.1.0.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path_regex(r"^/files/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let firmware = catalog(settings(&server, "4.0.0", "4.5.0"))
        .discover_all()
        .await
        .expect("pipeline should succeed");

    let names: Vec<&str> = firmware.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(
        names,
        ["SC-E8000_4.0.0.bin", "SC-E8000_4.2.0.bin", "XYZ123_1.0.0.bin"]
    );
    let synthesized = &firmware[1];
    assert_eq!(synthesized.version, "4.2.0");
    assert_eq!(synthesized.filesize, None);
    assert_eq!(synthesized.md5, None);
    assert_eq!(synthesized.kind.as_deref(), Some("SC"));
    assert_eq!(
        synthesized.download_url,
        format!("{}/files/SC-E8000_4.2.0.bin", server.uri())
    );
}

#[tokio::test]
async fn test_discover_all_with_external_scrape_skips_pages() {
    let server = MockServer::start().await;
    let payload = format!("[{}]", record(&server, "FW-2.3.4.bin", "2.3.4"));
    mount_step_api(&server, Version::MAX, payload.clone(), payload).await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/products/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let scraped: ScrapedModels = [("FW", "2.3.4"), ("FW", "2.5.0")].into_iter().collect();
    let firmware = catalog(settings(&server, "4.0.0", "4.5.0"))
        .discover_all_with(&scraped)
        .await
        .expect("pipeline should succeed");

    let names: Vec<&str> = firmware.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, ["FW-2.3.4.bin", "FW-2.5.0.bin"]);
}

#[tokio::test]
async fn test_download_writes_files_and_skips_existing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/FW-1.0.0.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"firmware-1".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/FW-2.0.0.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"firmware-2".to_vec()))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/FW-3.0.0.bin"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let list: Vec<etube_core::Firmware> = serde_json::from_str(&format!(
        "[{},{},{}]",
        record(&server, "FW-1.0.0.bin", "1.0.0"),
        record(&server, "FW-2.0.0.bin", "2.0.0"),
        record(&server, "FW-3.0.0.bin", "3.0.0"),
    ))
    .expect("valid list");

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let target = temp_dir.path().join("firmware");
    std::fs::create_dir_all(&target).expect("create target");
    std::fs::write(target.join("FW-2.0.0.bin"), b"kept").expect("seed existing file");

    let summary = catalog(settings(&server, "4.0.0", "4.5.0"))
        .download(&list, &target, false)
        .await
        .expect("batch should complete");

    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        std::fs::read(target.join("FW-1.0.0.bin")).expect("downloaded"),
        b"firmware-1"
    );
    assert_eq!(
        std::fs::read(target.join("FW-2.0.0.bin")).expect("kept"),
        b"kept"
    );
    assert!(!target.join("FW-3.0.0.bin").exists());
}
