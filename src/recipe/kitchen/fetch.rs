// src/recipe/kitchen/fetch.rs

//! Source fetching with a checksum-keyed cache
//!
//! Layout under the cache directory:
//!
//! ```text
//! downloads/<algo>_<hex>   verified archives and remote patches
//! sources/<algo>_<hex>/    extracted archive trees
//! tmp/                     in-flight downloads and extractions
//! ```
//!
//! Both entries are published by renaming out of `tmp/`, so a cache entry
//! is either complete or absent. Content is verified before it is
//! published; a mismatch never reaches `downloads/`.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::recipe::kitchen::archive::{extract_archive, source_root};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Transfers a URL's content into a local file
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written
    fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Downloader over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("conary-kitchen/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        info!("Downloading {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to download {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let mut file = File::create(dest).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {e}", dest.display()))
        })?;
        io::copy(&mut response, &mut file)
            .map_err(|e| Error::IoError(format!("Failed to write downloaded data: {e}")))
    }
}

/// Result of fetching a source archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSource {
    /// Verified archive in the cache
    pub archive: PathBuf,
    /// Root of the extracted source tree
    pub source_dir: PathBuf,
    /// Whether the extracted tree was already cached
    pub cached: bool,
}

/// Fetches and caches checksummed content
pub struct Fetcher<'a> {
    cache_dir: PathBuf,
    downloader: &'a dyn Downloader,
}

impl<'a> Fetcher<'a> {
    pub fn new(cache_dir: impl Into<PathBuf>, downloader: &'a dyn Downloader) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            downloader,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn download_path(&self, checksum: &Checksum) -> PathBuf {
        self.cache_dir.join("downloads").join(checksum.cache_key())
    }

    fn source_path(&self, checksum: &Checksum) -> PathBuf {
        self.cache_dir.join("sources").join(checksum.cache_key())
    }

    fn tmp_dir(&self) -> Result<PathBuf> {
        let tmp = self.cache_dir.join("tmp");
        fs::create_dir_all(&tmp).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {e}", tmp.display()))
        })?;
        Ok(tmp)
    }

    /// Fetch a file, verifying it against `checksum`
    ///
    /// A cached copy is reused when it still matches. On mismatch the
    /// downloaded bytes are discarded and nothing is cached.
    pub fn fetch_file(&self, url: &str, checksum: &Checksum) -> Result<PathBuf> {
        let target = self.download_path(checksum);

        if target.is_file() {
            match checksum.verify_file(&target)? {
                Ok(()) => {
                    debug!("Cache hit for {} ({})", url, checksum);
                    return Ok(target);
                }
                Err(actual) => {
                    warn!(
                        "Cached {} is corrupt (got {}), downloading again",
                        target.display(),
                        actual
                    );
                    fs::remove_file(&target)?;
                }
            }
        }

        let temp = tempfile::NamedTempFile::new_in(self.tmp_dir()?)?;
        let bytes = self.downloader.download(url, temp.path())?;

        if let Err(actual) = checksum.verify_file(temp.path())? {
            // `temp` is removed on drop
            return Err(Error::ChecksumMismatch {
                url: url.to_string(),
                expected: checksum.to_string(),
                actual: actual.to_string(),
            });
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        temp.persist(&target).map_err(|e| {
            Error::IoError(format!("Failed to store {}: {}", target.display(), e.error))
        })?;

        info!("Fetched {} ({} bytes)", url, bytes);
        Ok(target)
    }

    /// Fetch and extract a source archive
    ///
    /// `extract_dir` names the source root inside the archive when it does
    /// not consist of a single top-level directory.
    pub fn fetch_source(
        &self,
        url: &str,
        checksum: &Checksum,
        extract_dir: Option<&str>,
    ) -> Result<FetchedSource> {
        let extracted = self.source_path(checksum);

        if extracted.is_dir() {
            debug!("Using extracted source {}", extracted.display());
            return Ok(FetchedSource {
                archive: self.download_path(checksum),
                source_dir: source_root(&extracted, extract_dir)?,
                cached: true,
            });
        }

        let archive = self.fetch_file(url, checksum)?;

        let staging = tempfile::Builder::new()
            .prefix("extract-")
            .tempdir_in(self.tmp_dir()?)?;
        extract_archive(&archive, url, staging.path())?;

        if let Some(parent) = extracted.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = fs::rename(staging.path(), &extracted) {
            // Another fetch published the same tree first
            if !extracted.is_dir() {
                return Err(Error::IoError(format!(
                    "Failed to publish {}: {}",
                    extracted.display(),
                    e
                )));
            }
        }

        Ok(FetchedSource {
            archive,
            source_dir: source_root(&extracted, extract_dir)?,
            cached: false,
        })
    }
}
