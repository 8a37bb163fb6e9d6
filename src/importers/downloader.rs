use backon::{BackoffBuilder, ExponentialBuilder};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::utils::file_name_from_url;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36";

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("File not found (404): {0}")]
    NotFound(String),

    #[error("Server error (5xx): {0}")]
    ServerError(String),

    #[error("Cannot derive a file name from URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read URL manifest: {0}")]
    Manifest(#[from] csv::Error),
}

/// One row of the data URL manifest (`data_urls.csv`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataUrlEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub url: String,
}

/// Download links for NAPS integrated data, station metadata and
/// continuous data
#[derive(Debug, Clone, Default)]
pub struct DataUrlManifest {
    entries: Vec<DataUrlEntry>,
}

impl DataUrlManifest {
    pub fn new(entries: Vec<DataUrlEntry>) -> Self {
        Self { entries }
    }

    pub fn from_path(path: &Path) -> Result<Self, DownloadError> {
        let mut reader = csv::Reader::from_path(path)?;
        let entries = reader
            .deserialize()
            .collect::<Result<Vec<DataUrlEntry>, _>>()?;
        debug!("Read {} entries from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[DataUrlEntry] {
        &self.entries
    }

    /// Integrated PM2.5 speciation archives
    pub fn integrated_pm25(&self) -> Vec<&DataUrlEntry> {
        self.filter(|e| e.kind == "integrated" && e.description == "PM2.5")
    }

    pub fn metadata(&self) -> Vec<&DataUrlEntry> {
        self.filter(|e| e.kind == "meta")
    }

    pub fn continuous(&self) -> Vec<&DataUrlEntry> {
        self.filter(|e| e.kind == "continuous")
    }

    /// The stations workbook link
    pub fn station(&self) -> Option<&DataUrlEntry> {
        self.entries
            .iter()
            .find(|e| e.description.to_lowercase().contains("station"))
    }

    fn filter(&self, keep: impl Fn(&DataUrlEntry) -> bool) -> Vec<&DataUrlEntry> {
        self.entries.iter().filter(|e| keep(e)).collect()
    }
}

#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub downloaded: Vec<PathBuf>,
    /// (url, error message)
    pub failed: Vec<(String, String)>,
}

/// Downloader for NAPS open-data files
#[derive(Clone)]
pub struct NapsDownloader {
    client: Client,
    retry: ExponentialBuilder,
}

impl NapsDownloader {
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            retry: ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(30))
                .with_factor(2.0)
                .with_max_times(3)
                .with_jitter(),
        }
    }

    /// Override the retry schedule for server errors
    pub fn with_retry(mut self, retry: ExponentialBuilder) -> Self {
        self.retry = retry;
        self
    }

    /// Download a file, retrying server errors with exponential backoff
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut delays = self.retry.build();
        loop {
            match self.fetch(url).await {
                Err(DownloadError::ServerError(msg)) => match delays.next() {
                    Some(delay) => {
                        warn!("{msg}; retrying in {:.1}s", delay.as_secs_f64());
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(DownloadError::ServerError(msg)),
                },
                other => return other,
            }
        }
    }

    /// Download `url` into `dir` and return the written path
    ///
    /// The file name defaults to the one derived from the URL. The file only
    /// appears once the whole body has been written.
    pub async fn download_to_dir(
        &self,
        url: &str,
        dir: &Path,
        file_name: Option<&str>,
    ) -> Result<PathBuf, DownloadError> {
        let file_name = match file_name {
            Some(name) => name.to_string(),
            None => {
                file_name_from_url(url).ok_or_else(|| DownloadError::InvalidUrl(url.to_string()))?
            }
        };

        let bytes = self.download(url).await?;

        std::fs::create_dir_all(dir)?;
        let path = dir.join(&file_name);
        let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
        temp_file.write_all(&bytes)?;
        temp_file
            .persist(&path)
            .map_err(|e| DownloadError::Io(e.error))?;

        info!("Downloaded: {}", file_name);
        Ok(path)
    }

    /// Download every entry into `dir`, `concurrency` at a time
    ///
    /// A failed download is logged and recorded; the others continue.
    pub async fn download_all(
        &self,
        entries: &[&DataUrlEntry],
        dir: &Path,
        concurrency: usize,
    ) -> DownloadSummary {
        info!("Downloading {} files to {}", entries.len(), dir.display());

        let results: Vec<_> = stream::iter(entries.iter().map(|e| e.url.clone()))
            .map(|url| async move {
                let result = self.download_to_dir(&url, dir, None).await;
                (url, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut summary = DownloadSummary::default();
        for (url, result) in results {
            match result {
                Ok(path) => summary.downloaded.push(path),
                Err(e) => {
                    warn!("Failed to download {}: {}", url, e);
                    summary.failed.push((url, e.to_string()));
                }
            }
        }

        info!(
            "Downloaded {} files, {} failed",
            summary.downloaded.len(),
            summary.failed.len()
        );
        summary
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await?;
            debug!("Downloaded {url} ({} bytes)", bytes.len());
            Ok(bytes.to_vec())
        } else if status.as_u16() == 404 {
            Err(DownloadError::NotFound(format!("{url} not found on server")))
        } else if status.is_server_error() {
            Err(DownloadError::ServerError(format!(
                "Server error {status} while downloading {url}"
            )))
        } else {
            Err(response
                .error_for_status()
                .err()
                .map(DownloadError::HttpError)
                .unwrap_or_else(|| DownloadError::ServerError(format!("Unexpected status {status}"))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str, description: &str, url: &str) -> DataUrlEntry {
        DataUrlEntry {
            kind: kind.to_string(),
            description: description.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_manifest_filters() {
        let manifest = DataUrlManifest::new(vec![
            entry("integrated", "PM2.5", "https://host/a"),
            entry("integrated", "PM10", "https://host/b"),
            entry("meta", "NAPS Station list", "https://host/c"),
            entry("continuous", "PM2.5 speciation", "https://host/d"),
        ]);

        assert_eq!(manifest.integrated_pm25().len(), 1);
        assert_eq!(manifest.metadata().len(), 1);
        assert_eq!(manifest.continuous().len(), 1);
        assert_eq!(manifest.station().unwrap().url, "https://host/c");
    }
}
