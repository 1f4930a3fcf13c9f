//! The shared package cache (`<root>/pkgs`).
//!
//! Each record maps to `<pkgs>/<name>-<version>-<build>/`, an extracted
//! copy of its archive plus `info/repodata_record.json`. An entry is
//! extracted-valid once that file exists and matches the record's checksum.
//! Entries are never pruned here.
//!
//! Concurrent `ensure` calls for one entry serialize twice: on an in-process
//! async mutex and on an exclusive lock file that other processes honour.

pub mod download;
pub mod extract;
pub mod lock;

pub use download::{DownloadError, download_file};
pub use extract::{ArchiveType, ExtractError, extract_package};
pub use lock::EntryLock;

use crate::fsutil;
use crate::reporter::Reporter;
use crate::retry::RetryPolicy;
use mamba_schema::{PackageRecord, Sha256Hash};
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Name of the record file written into every extracted entry.
pub const REPODATA_RECORD: &str = "info/repodata_record.json";

/// Why a package could not be made available.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The archive checksum (or size, without a checksum) did not match
    /// after a refetch.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .file.display())]
    Corrupted {
        /// The offending archive.
        file: PathBuf,
        /// Checksum from the record.
        expected: String,
        /// Checksum of the downloaded bytes.
        actual: String,
    },
    /// The archive could not be downloaded.
    #[error("failed to download {url}: {source}")]
    Download {
        /// Archive URL.
        url: String,
        /// Underlying error.
        #[source]
        source: DownloadError,
    },
    /// The archive could not be unpacked.
    #[error("failed to extract {}: {source}", .archive.display())]
    Extract {
        /// The archive.
        archive: PathBuf,
        /// Underlying error.
        #[source]
        source: ExtractError,
    },
    /// A download was needed in offline mode.
    #[error("{package} is not in the package cache and offline mode is enabled")]
    Offline {
        /// `name-version-build` of the package.
        package: String,
    },
    /// None of the cache roots accepts writes.
    #[error("no writable package cache directory")]
    NoWritableRoot,
    /// A cache file could not be read or written.
    #[error("package cache I/O error at {}: {source}", .path.display())]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Observable state of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntryState {
    /// Nothing on disk.
    Absent,
    /// A download or extraction is running in this process.
    Fetching,
    /// Extracted and matching the record.
    ExtractedValid,
    /// Something is on disk but it does not match the record.
    Stale,
}

/// A package ready to link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPackage {
    /// The extracted directory.
    pub extracted_dir: PathBuf,
    /// The archive it came from.
    pub tarball: PathBuf,
}

/// Download and extraction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Archives fetched over the network.
    pub downloads: usize,
    /// Archives unpacked.
    pub extractions: usize,
}

#[derive(Debug)]
struct Inner {
    roots: Vec<PathBuf>,
    client: Client,
    retry: RetryPolicy,
    offline: bool,
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Mutex<HashSet<String>>,
    downloads: AtomicUsize,
    extractions: AtomicUsize,
}

/// Handle to the package cache; clones share state.
#[derive(Debug, Clone)]
pub struct PackageCache {
    inner: Arc<Inner>,
}

/// Marks a key as in flight for as long as it lives.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlight<'a> {
    fn new(set: &'a Mutex<HashSet<String>>, key: &str) -> Self {
        set.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
        Self {
            set,
            key: key.to_string(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Archive file name for a record, falling back to the dist name.
pub fn archive_file_name(record: &PackageRecord) -> String {
    if record.file_name.is_empty() {
        format!("{}.tar.bz2", record.dist_name())
    } else {
        record.file_name.clone()
    }
}

fn stored_record_matches(stored: &PackageRecord, wanted: &PackageRecord) -> bool {
    match (&stored.sha256, &wanted.sha256) {
        (Some(a), Some(b)) => a == b,
        _ => stored.file_name == wanted.file_name && stored.size == wanted.size,
    }
}

fn archive_matches(path: &Path, record: &PackageRecord) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    match &record.sha256 {
        Some(expected) => Sha256Hash::compute_file(path).is_ok_and(|actual| actual == *expected),
        None => record.size == 0 || meta.len() == record.size,
    }
}

/// Expected and actual values when a downloaded archive does not match its
/// record. The sha256 decides when present, otherwise a known size.
fn download_mismatch(
    record: &PackageRecord,
    path: &Path,
    actual: &Sha256Hash,
) -> Result<Option<(String, String)>, CacheError> {
    if let Some(expected) = &record.sha256 {
        return Ok((expected != actual).then(|| (expected.to_string(), actual.to_string())));
    }
    if record.size == 0 {
        return Ok(None);
    }
    let len = std::fs::metadata(path)
        .map_err(|e| CacheError::io(path, e))?
        .len();
    Ok((len != record.size).then(|| (format!("{} bytes", record.size), format!("{len} bytes"))))
}

impl PackageCache {
    /// A cache over `roots`, searched in order; writes go to the first
    /// writable one.
    pub fn new(roots: Vec<PathBuf>, client: Client, retry: RetryPolicy, offline: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                roots,
                client,
                retry,
                offline,
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                downloads: AtomicUsize::new(0),
                extractions: AtomicUsize::new(0),
            }),
        }
    }

    /// Cache roots in lookup order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.inner.roots
    }

    /// Counters since this cache was created.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            downloads: self.inner.downloads.load(Ordering::SeqCst),
            extractions: self.inner.extractions.load(Ordering::SeqCst),
        }
    }

    /// Where `record` is (or would be) extracted under `root`.
    pub fn entry_dir(root: &Path, record: &PackageRecord) -> PathBuf {
        root.join(record.dist_name())
    }

    fn valid_entry(dir: &Path, record: &PackageRecord) -> bool {
        std::fs::read(dir.join(REPODATA_RECORD))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<PackageRecord>(&bytes).ok())
            .is_some_and(|stored| stored_record_matches(&stored, record))
    }

    fn find_valid(&self, record: &PackageRecord) -> Option<CachedPackage> {
        let file_name = archive_file_name(record);
        self.inner.roots.iter().find_map(|root| {
            let dir = Self::entry_dir(root, record);
            Self::valid_entry(&dir, record).then(|| CachedPackage {
                extracted_dir: dir,
                tarball: root.join(&file_name),
            })
        })
    }

    fn find_archive(&self, record: &PackageRecord) -> Option<PathBuf> {
        let file_name = archive_file_name(record);
        self.inner
            .roots
            .iter()
            .map(|root| root.join(&file_name))
            .find(|path| archive_matches(path, record))
    }

    fn writable_root(&self) -> Option<&Path> {
        self.inner
            .roots
            .iter()
            .find(|root| {
                std::fs::create_dir_all(root).is_ok()
                    && tempfile::NamedTempFile::new_in(root).is_ok()
            })
            .map(PathBuf::as_path)
    }

    /// Current state of the entry for `record`.
    pub fn state(&self, record: &PackageRecord) -> CacheEntryState {
        let key = record.dist_name();
        let fetching = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key);
        if fetching {
            return CacheEntryState::Fetching;
        }
        if self.find_valid(record).is_some() {
            return CacheEntryState::ExtractedValid;
        }
        let file_name = archive_file_name(record);
        let anything = self.inner.roots.iter().any(|root| {
            Self::entry_dir(root, record).exists() || root.join(&file_name).exists()
        });
        if anything {
            CacheEntryState::Stale
        } else {
            CacheEntryState::Absent
        }
    }

    /// Whether making `record` available requires a network download.
    pub fn needs_download(&self, record: &PackageRecord) -> bool {
        self.find_valid(record).is_none() && self.find_archive(record).is_none()
    }

    fn entry_mutex(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Make sure `record` is extracted and valid, downloading if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the archive cannot be obtained, fails its
    /// checksum twice, or cannot be extracted.
    pub async fn ensure(
        &self,
        record: &PackageRecord,
        reporter: &dyn Reporter,
    ) -> Result<CachedPackage, CacheError> {
        let key = record.dist_name();
        let entry = self.entry_mutex(&key);
        let _guard = entry.lock().await;

        if let Some(found) = self.find_valid(record) {
            tracing::debug!("{key}: cache hit at {}", found.extracted_dir.display());
            return Ok(found);
        }

        let root = self
            .writable_root()
            .ok_or(CacheError::NoWritableRoot)?
            .to_path_buf();
        let lock_path = root.join(format!("{key}.lock"));
        let _lock = tokio::task::spawn_blocking({
            let lock_path = lock_path.clone();
            move || EntryLock::acquire(&lock_path)
        })
        .await
        .map_err(|e| CacheError::io(&lock_path, std::io::Error::other(e)))?
        .map_err(|e| CacheError::io(&lock_path, e))?;

        // Another process may have finished while we waited for the lock.
        if let Some(found) = self.find_valid(record) {
            tracing::debug!("{key}: extracted by another process");
            return Ok(found);
        }

        let _in_flight = InFlight::new(&self.inner.in_flight, &key);
        let tarball = match self.find_archive(record) {
            Some(existing) => {
                tracing::debug!("{key}: reusing archive {}", existing.display());
                existing
            }
            None => self.fetch_archive(record, &root, reporter).await?,
        };

        reporter.extracting(&record.name, record.version.as_str());
        let dir = Self::entry_dir(&root, record);
        self.extract_entry(record, &tarball, &root, &dir).await?;
        self.inner.extractions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("{key}: extracted to {}", dir.display());

        Ok(CachedPackage {
            extracted_dir: dir,
            tarball,
        })
    }

    async fn fetch_archive(
        &self,
        record: &PackageRecord,
        root: &Path,
        reporter: &dyn Reporter,
    ) -> Result<PathBuf, CacheError> {
        let key = record.dist_name();
        if self.inner.offline {
            return Err(CacheError::Offline { package: key });
        }

        let dest = root.join(archive_file_name(record));
        let name = record.name.as_str();
        let version = record.version.as_str();
        let progress = |current: u64, total: Option<u64>| {
            reporter.downloading(name, version, current, total.or(Some(record.size)));
        };

        // One refetch after a checksum mismatch, then give up.
        let mut attempt = 1;
        loop {
            let actual = self
                .inner
                .retry
                .run(&key, || {
                    download_file(&self.inner.client, &record.url, &dest, &progress)
                })
                .await
                .map_err(|source| CacheError::Download {
                    url: record.url.clone(),
                    source,
                })?;
            self.inner.downloads.fetch_add(1, Ordering::SeqCst);

            let Some((expected, actual)) = download_mismatch(record, &dest, &actual)? else {
                return Ok(dest);
            };
            tracing::warn!(
                "{key}: checksum mismatch on attempt {attempt} (expected {expected}, got {actual})"
            );
            std::fs::remove_file(&dest).map_err(|e| CacheError::io(&dest, e))?;
            if attempt == 2 {
                reporter.failed(name, version, "checksum mismatch");
                return Err(CacheError::Corrupted {
                    file: dest,
                    expected,
                    actual,
                });
            }
            attempt += 1;
        }
    }

    async fn extract_entry(
        &self,
        record: &PackageRecord,
        tarball: &Path,
        root: &Path,
        dir: &Path,
    ) -> Result<(), CacheError> {
        let record = record.clone();
        let tarball = tarball.to_path_buf();
        let root = root.to_path_buf();
        let dir = dir.to_path_buf();
        let join_path = dir.clone();

        tokio::task::spawn_blocking(move || {
            let staging = tempfile::Builder::new()
                .prefix(".extract-")
                .tempdir_in(&root)
                .map_err(|e| CacheError::io(&root, e))?;
            extract_package(&tarball, staging.path()).map_err(|source| CacheError::Extract {
                archive: tarball.clone(),
                source,
            })?;

            let mut stored = record;
            stored.file_name = archive_file_name(&stored);
            let json = serde_json::to_vec_pretty(&stored)
                .map_err(|e| CacheError::io(&dir, std::io::Error::other(e)))?;
            let record_path = staging.path().join(REPODATA_RECORD);
            fsutil::write_atomic(&record_path, &json).map_err(|e| CacheError::io(&record_path, e))?;

            if dir.exists() {
                std::fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
            }
            std::fs::rename(staging.path(), &dir).map_err(|e| CacheError::io(&dir, e))?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::io(&join_path, std::io::Error::other(e)))?
    }
}
