// Tests for NapsDownloader and the URL manifest
// Uses mockito for HTTP mocking

use backon::ExponentialBuilder;
use mockito::Server;
use naps_pmf_prep::importers::downloader::{DataUrlManifest, DownloadError, NapsDownloader};
use std::time::Duration;

// Retries in milliseconds so server-error tests stay fast
fn create_test_downloader() -> NapsDownloader {
    NapsDownloader::new(Duration::from_secs(5))
        .unwrap()
        .with_retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5))
                .with_max_times(2),
        )
}

#[tokio::test]
async fn test_download_success() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/S100119_PM25_2023_EN.zip")
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_body(b"fake zip data")
        .create_async()
        .await;

    let downloader = create_test_downloader();
    let bytes = downloader
        .download(&format!("{}/S100119_PM25_2023_EN.zip", server.url()))
        .await
        .unwrap();

    assert_eq!(bytes, b"fake zip data");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_404() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/missing.xlsx")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let downloader = create_test_downloader();
    let result = downloader
        .download(&format!("{}/missing.xlsx", server.url()))
        .await;

    match result.unwrap_err() {
        DownloadError::NotFound(msg) => {
            assert!(msg.contains("missing.xlsx"));
            assert!(msg.contains("not found"));
        }
        other => panic!("Expected NotFound error, got {other:?}"),
    }

    // 404 is not retried
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let mut server = Server::new_async().await;

    // one attempt plus two retries
    let mock = server
        .mock("GET", "/flaky.xlsx")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let downloader = create_test_downloader();
    let result = downloader
        .download(&format!("{}/flaky.xlsx", server.url()))
        .await;

    match result.unwrap_err() {
        DownloadError::ServerError(msg) => {
            assert!(msg.contains("503"));
            assert!(msg.contains("flaky.xlsx"));
        }
        other => panic!("Expected ServerError, got {other:?}"),
    }

    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_error_is_http_error() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/forbidden.xlsx")
        .with_status(403)
        .create_async()
        .await;

    let downloader = create_test_downloader();
    let result = downloader
        .download(&format!("{}/forbidden.xlsx", server.url()))
        .await;

    assert!(matches!(result, Err(DownloadError::HttpError(_))));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_to_dir_uses_encoded_file_name() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/download")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(b"stations")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let url = format!("{}/download?path=%2Fdata%2FStations2023.xlsx", server.url());

    let downloader = create_test_downloader();
    let path = downloader
        .download_to_dir(&url, dir.path(), None)
        .await
        .unwrap();

    assert_eq!(path, dir.path().join("Stations2023.xlsx"));
    assert_eq!(std::fs::read(&path).unwrap(), b"stations");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_download_leaves_no_file() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("GET", "/gone.xlsx")
        .with_status(404)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = create_test_downloader();
    let result = downloader
        .download_to_dir(&format!("{}/gone.xlsx", server.url()), dir.path(), None)
        .await;

    assert!(result.is_err());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_download_all_continues_after_failure() {
    let mut server = Server::new_async().await;

    let _ok_a = server
        .mock("GET", "/a.xlsx")
        .with_status(200)
        .with_body(b"a")
        .create_async()
        .await;
    let _ok_b = server
        .mock("GET", "/b.xlsx")
        .with_status(200)
        .with_body(b"b")
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/c.xlsx")
        .with_status(404)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("data_urls.csv");
    std::fs::write(
        &manifest_path,
        format!(
            "type,description,url,notes\n\
             integrated,PM2.5,{0}/a.xlsx,\n\
             integrated,PM2.5,{0}/b.xlsx,x\n\
             integrated,PM2.5,{0}/c.xlsx,\n\
             integrated,PM10,{0}/d.xlsx,\n",
            server.url()
        ),
    )
    .unwrap();

    let manifest = DataUrlManifest::from_path(&manifest_path).unwrap();
    let entries = manifest.integrated_pm25();
    assert_eq!(entries.len(), 3);

    let out_dir = dir.path().join("integrated");
    let downloader = create_test_downloader();
    let summary = downloader.download_all(&entries, &out_dir, 2).await;

    assert_eq!(summary.downloaded.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].0.ends_with("/c.xlsx"));
    assert_eq!(std::fs::read(out_dir.join("a.xlsx")).unwrap(), b"a");
    assert_eq!(std::fs::read(out_dir.join("b.xlsx")).unwrap(), b"b");
}

#[test]
fn test_manifest_missing_file() {
    let result = DataUrlManifest::from_path(std::path::Path::new("/nonexistent/data_urls.csv"));
    assert!(matches!(result, Err(DownloadError::Manifest(_))));
}
