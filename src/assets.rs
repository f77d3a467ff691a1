//! Recognizer model asset provisioning
//!
//! Recognition engines need a directory of model files for the session's
//! language. [`ModelAssets::provision`] downloads the per-language archive
//! over HTTP, unpacks it into a persistent cache directory and returns the
//! path; a warm cache (marked by its manifest) short-circuits the download
//! unless `force` is set. Engines consume only [`ModelAssets::directory`]
//! and stay agnostic to how it was produced.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Marks a fully provisioned model directory.
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum AssetsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Download of {url} failed with status {status}")]
    Download { status: u16, url: String },
    #[error("Invalid assets URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Manifest error: {0}")]
    Manifest(String),
    #[error("Assets directory not found: {0}")]
    MissingDirectory(String),
}

#[derive(Debug, Clone)]
pub struct AssetsConfig {
    /// Base URL the per-language archives (`model_{lang}.zip`) live under.
    pub base_url: String,
    /// Directory the unpacked models are cached in, one subdirectory per
    /// language.
    pub cache_dir: PathBuf,
}

/// Written next to the unpacked model files once provisioning succeeded.
#[derive(Debug, Serialize, Deserialize)]
struct AssetsManifest {
    language: String,
    source_url: String,
    entries: usize,
}

/// A provisioned model directory for one language.
#[derive(Debug)]
pub struct ModelAssets {
    directory: PathBuf,
}

impl ModelAssets {
    /// Ensure the model files for `language` exist in the cache and return
    /// them.
    ///
    /// A warm cache returns immediately unless `force` re-downloads it.
    /// The archive is streamed to disk, unpacked on the blocking pool and
    /// removed afterwards; the manifest is written last, so an interrupted
    /// provisioning never counts as warm. Language codes are matched
    /// case-insensitively.
    pub async fn provision(
        config: &AssetsConfig,
        language: &str,
        force: bool,
    ) -> Result<Self, AssetsError> {
        let language = language.to_lowercase();
        let directory = config.cache_dir.join(format!("model-{}", language));
        let manifest_path = directory.join(MANIFEST_FILE);

        if !force && tokio::fs::try_exists(&manifest_path).await? {
            log::debug!(
                "Assets: cache hit for '{}' at {}",
                language,
                directory.display()
            );
            return Ok(Self { directory });
        }

        tokio::fs::create_dir_all(&directory).await?;

        let archive_name = format!("model_{}.zip", language);
        let base = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let url = Url::parse(&base)?.join(&archive_name)?;

        log::info!("Assets: downloading {}", url);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let response = client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetsError::Download {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let archive_path = directory.join(&archive_name);
        let mut archive_file = tokio::fs::File::create(&archive_path).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            archive_file.write_all(&chunk?).await?;
        }
        archive_file.flush().await?;
        drop(archive_file);

        let unpack_archive = archive_path.clone();
        let unpack_dir = directory.clone();
        let entries =
            tokio::task::spawn_blocking(move || Self::unpack(&unpack_archive, &unpack_dir))
                .await
                .map_err(|e| AssetsError::Archive(format!("unpack task failed: {}", e)))??;
        tokio::fs::remove_file(&archive_path).await?;
        log::info!(
            "Assets: unpacked {} entries into {}",
            entries,
            directory.display()
        );

        let manifest = AssetsManifest {
            language,
            source_url: url.to_string(),
            entries,
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| AssetsError::Manifest(e.to_string()))?;
        tokio::fs::write(&manifest_path, json).await?;

        Ok(Self { directory })
    }

    /// Adopt a directory that was provisioned by other means.
    pub fn from_directory(directory: impl Into<PathBuf>) -> Result<Self, AssetsError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(AssetsError::MissingDirectory(
                directory.display().to_string(),
            ));
        }
        Ok(Self { directory })
    }

    /// The directory holding the model files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn unpack(archive: &Path, destination: &Path) -> Result<usize, AssetsError> {
        let file = std::fs::File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| AssetsError::Archive(e.to_string()))?;
        zip.extract(destination)
            .map_err(|e| AssetsError::Archive(e.to_string()))?;
        Ok(zip.len())
    }
}
