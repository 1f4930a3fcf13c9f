//! Per-subdir metadata loading with a local cache.
//!
//! The cache file is the upstream document with the response headers
//! needed for revalidation embedded as `_url`, `_etag`, `_mod` and
//! `_cache_control`.

use super::FetchError;
use crate::config::FetchSettings;
use crate::fsutil;
use crate::http::{HttpError, file_url_path};
use mamba_schema::{Channel, PackageRecord, Platform, RepoData, Sha256Hash};
use reqwest::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Cache file name for a repodata URL.
pub fn cache_file_name(url: &str) -> String {
    let digest = Sha256Hash::compute(url.as_bytes());
    format!("{}.json", &digest.as_str()[..8])
}

/// `max-age` directive of a `Cache-Control` header.
pub fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.trim().parse().ok())
        .map(Duration::from_secs)
}

/// Where a loaded document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Fresh cache, no network.
    Cache,
    /// Cache confirmed by a `304`.
    Revalidated,
    /// New document downloaded.
    Downloaded,
    /// Read from a `file://` channel.
    Local,
}

impl LoadOrigin {
    /// Short label for progress output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cached",
            Self::Revalidated => "up to date",
            Self::Downloaded => "downloaded",
            Self::Local => "local",
        }
    }
}

/// One channel subdir and the location of its cached metadata.
#[derive(Debug, Clone)]
pub struct SubdirData {
    /// Owning channel.
    pub channel: Channel,
    /// Platform of this subdir.
    pub platform: Platform,
    /// Position of the channel in the user's list.
    pub channel_index: usize,
    name: String,
    repodata_url: String,
    cache_path: PathBuf,
}

/// A subdir with its document loaded.
#[derive(Debug)]
pub struct LoadedSubdir {
    /// The subdir.
    pub subdir: SubdirData,
    /// The parsed document.
    pub repodata: RepoData,
    /// How it was obtained.
    pub origin: LoadOrigin,
}

impl LoadedSubdir {
    /// Records stamped with channel, subdir and download URL.
    pub fn into_records(self) -> Vec<PackageRecord> {
        let channel = &self.subdir.channel;
        let platform = self.subdir.platform;
        self.repodata
            .into_records(&channel.name, platform.as_str(), &channel.subdir_url(platform))
    }
}

struct CachedRepoData {
    repodata: RepoData,
    age: Duration,
}

enum Fetched {
    NotModified,
    Body {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
        cache_control: Option<String>,
    },
}

impl SubdirData {
    /// Describe `channel`'s `platform` subdir, caching under `cache_dir`.
    pub fn new(
        channel: &Channel,
        channel_index: usize,
        platform: Platform,
        cache_dir: &Path,
    ) -> Self {
        let repodata_url = channel.repodata_url(platform);
        Self {
            channel: channel.clone(),
            platform,
            channel_index,
            name: format!("{}/{}", channel.name, platform.as_str()),
            cache_path: cache_dir.join(cache_file_name(&repodata_url)),
            repodata_url,
        }
    }

    /// `channel/platform`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL of the upstream document.
    pub fn repodata_url(&self) -> &str {
        &self.repodata_url
    }

    /// Local cache file.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Load the document, hitting the network only when the cache is stale.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when no usable copy can be obtained.
    pub async fn load(
        &self,
        client: &Client,
        settings: &FetchSettings,
        offline: bool,
    ) -> Result<LoadedSubdir, FetchError> {
        if let Some(path) = file_url_path(&self.repodata_url) {
            let bytes = tokio::fs::read(&path).await.map_err(|source| FetchError::Http {
                subdir: self.name.clone(),
                source: HttpError::Local { path, source },
            })?;
            let repodata = self.parse(&bytes)?;
            return Ok(self.loaded(repodata, LoadOrigin::Local));
        }

        let cached = self.read_cache().await;

        if offline {
            return match cached {
                Some(c) => Ok(self.loaded(c.repodata, LoadOrigin::Cache)),
                None => Err(FetchError::OfflineMiss {
                    subdir: self.name.clone(),
                    path: self.cache_path.clone(),
                }),
            };
        }

        if let Some(c) = &cached {
            let ttl = settings.local_repodata_ttl.or_else(|| {
                c.repodata.cache_control.as_deref().and_then(max_age)
            });
            if ttl.is_some_and(|ttl| c.age < ttl) {
                tracing::debug!("{}: cache is fresh ({}s old)", self.name, c.age.as_secs());
                return Ok(self.loaded(c.repodata.clone(), LoadOrigin::Cache));
            }
        }

        let fetched = settings
            .retry
            .run(&self.name, || self.conditional_get(client, cached.as_ref()))
            .await;

        match (fetched, cached) {
            (Ok(Fetched::NotModified), Some(c)) => {
                tracing::debug!("{}: not modified", self.name);
                if let Err(e) = fsutil::touch(&self.cache_path) {
                    tracing::warn!("failed to touch {}: {e}", self.cache_path.display());
                }
                Ok(self.loaded(c.repodata, LoadOrigin::Revalidated))
            }
            (Ok(Fetched::NotModified), None) => Err(FetchError::Http {
                subdir: self.name.clone(),
                source: HttpError::Status {
                    url: self.repodata_url.clone(),
                    status: StatusCode::NOT_MODIFIED,
                },
            }),
            (
                Ok(Fetched::Body {
                    body,
                    etag,
                    last_modified,
                    cache_control,
                }),
                _,
            ) => {
                let repodata = self.store(&body, etag, last_modified, cache_control)?;
                Ok(self.loaded(repodata, LoadOrigin::Downloaded))
            }
            (Err(e), Some(c)) => {
                tracing::warn!("{}: {e}; using cached metadata", self.name);
                Ok(self.loaded(c.repodata, LoadOrigin::Cache))
            }
            (Err(source), None) => Err(FetchError::Http {
                subdir: self.name.clone(),
                source,
            }),
        }
    }

    fn loaded(&self, repodata: RepoData, origin: LoadOrigin) -> LoadedSubdir {
        LoadedSubdir {
            subdir: self.clone(),
            repodata,
            origin,
        }
    }

    fn parse(&self, bytes: &[u8]) -> Result<RepoData, FetchError> {
        serde_json::from_slice(bytes).map_err(|source| FetchError::Parse {
            subdir: self.name.clone(),
            source,
        })
    }

    async fn read_cache(&self) -> Option<CachedRepoData> {
        let bytes = tokio::fs::read(&self.cache_path).await.ok()?;
        let modified = tokio::fs::metadata(&self.cache_path)
            .await
            .ok()?
            .modified()
            .ok()?;

        let repodata: RepoData = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("ignoring unreadable cache {}: {e}", self.cache_path.display());
                return None;
            }
        };
        if repodata.url.as_deref().is_some_and(|u| u != self.repodata_url) {
            tracing::debug!("{}: cache belongs to another URL", self.name);
            return None;
        }

        Some(CachedRepoData {
            repodata,
            age: SystemTime::now().duration_since(modified).unwrap_or_default(),
        })
    }

    async fn conditional_get(
        &self,
        client: &Client,
        cached: Option<&CachedRepoData>,
    ) -> Result<Fetched, HttpError> {
        let url = &self.repodata_url;
        let mut request = client.get(url);
        if let Some(c) = cached {
            if let Some(etag) = &c.repodata.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = &c.repodata.last_modified {
                request = request.header(IF_MODIFIED_SINCE, modified);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpError::transport(url, e))?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.clone(),
                status,
            });
        }

        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);
        let cache_control = header(CACHE_CONTROL);

        let body = response
            .bytes()
            .await
            .map_err(|e| HttpError::transport(url, e))?;

        Ok(Fetched::Body {
            body: body.to_vec(),
            etag,
            last_modified,
            cache_control,
        })
    }

    fn store(
        &self,
        body: &[u8],
        etag: Option<String>,
        last_modified: Option<String>,
        cache_control: Option<String>,
    ) -> Result<RepoData, FetchError> {
        let mut repodata = self.parse(body)?;
        repodata.url = Some(self.repodata_url.clone());
        repodata.etag = etag;
        repodata.last_modified = last_modified;
        repodata.cache_control = cache_control;

        let encoded = serde_json::to_vec(&repodata).map_err(|source| FetchError::Parse {
            subdir: self.name.clone(),
            source,
        })?;
        fsutil::write_atomic(&self.cache_path, &encoded).map_err(|source| FetchError::Io {
            subdir: self.name.clone(),
            path: self.cache_path.clone(),
            source,
        })?;
        tracing::debug!("{}: cached {} records", self.name, repodata.len());
        Ok(repodata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use mamba_schema::DEFAULT_CHANNEL_ALIAS;

    const DOC: &str = r#"{"packages": {"foo-1.0-0.tar.bz2": {"name": "foo", "version": "1.0", "build": "0", "depends": []}}}"#;

    fn settings() -> FetchSettings {
        FetchSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..FetchSettings::default()
        }
    }

    fn subdir(server_url: &str, cache: &Path) -> SubdirData {
        let channel =
            Channel::resolve(&format!("{server_url}/chan"), DEFAULT_CHANNEL_ALIAS).unwrap();
        SubdirData::new(&channel, 0, Platform::Linux64, cache)
    }

    #[test]
    fn test_cache_file_name_is_stable() {
        let a = cache_file_name("https://conda.anaconda.org/conda-forge/linux-64/repodata.json");
        let b = cache_file_name("https://conda.anaconda.org/conda-forge/linux-64/repodata.json");
        let c = cache_file_name("https://conda.anaconda.org/conda-forge/noarch/repodata.json");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), "01234567.json".len());
    }

    #[test]
    fn test_max_age_parsing() {
        assert_eq!(max_age("public, max-age=1200"), Some(Duration::from_secs(1200)));
        assert_eq!(max_age("no-cache"), None);
    }

    #[tokio::test]
    async fn test_download_then_revalidate() {
        let mut server = mockito::Server::new_async().await;
        let cache = tempfile::tempdir().unwrap();
        let client = Client::new();
        let sd = subdir(&server.url(), cache.path());

        let first = server
            .mock("GET", "/chan/linux-64/repodata.json")
            .with_status(200)
            .with_header("etag", "\"v1\"")
            .with_body(DOC)
            .expect(1)
            .create_async()
            .await;

        let loaded = sd.load(&client, &settings(), false).await.unwrap();
        assert_eq!(loaded.origin, LoadOrigin::Downloaded);
        assert_eq!(loaded.repodata.len(), 1);
        first.assert_async().await;

        let cached: RepoData =
            serde_json::from_slice(&std::fs::read(sd.cache_path()).unwrap()).unwrap();
        assert_eq!(cached.etag.as_deref(), Some("\"v1\""));
        assert_eq!(cached.url.as_deref(), Some(sd.repodata_url()));

        let revalidate = server
            .mock("GET", "/chan/linux-64/repodata.json")
            .match_header("if-none-match", "\"v1\"")
            .with_status(304)
            .expect(1)
            .create_async()
            .await;

        let loaded = sd.load(&client, &settings(), false).await.unwrap();
        assert_eq!(loaded.origin, LoadOrigin::Revalidated);
        assert_eq!(loaded.repodata.len(), 1);
        revalidate.assert_async().await;
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_network() {
        let mut server = mockito::Server::new_async().await;
        let cache = tempfile::tempdir().unwrap();
        let client = Client::new();
        let sd = subdir(&server.url(), cache.path());

        let mock = server
            .mock("GET", "/chan/linux-64/repodata.json")
            .with_status(200)
            .with_header("cache-control", "public, max-age=3600")
            .with_body(DOC)
            .expect(1)
            .create_async()
            .await;

        sd.load(&client, &settings(), false).await.unwrap();
        let again = sd.load(&client, &settings(), false).await.unwrap();
        assert_eq!(again.origin, LoadOrigin::Cache);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_offline_uses_cache_or_fails() {
        let cache = tempfile::tempdir().unwrap();
        let client = Client::new();
        let sd = subdir("http://127.0.0.1:9", cache.path());

        let err = sd.load(&client, &settings(), true).await.unwrap_err();
        assert!(matches!(err, FetchError::OfflineMiss { .. }));

        std::fs::write(sd.cache_path(), DOC).unwrap();
        let loaded = sd.load(&client, &settings(), true).await.unwrap();
        assert_eq!(loaded.origin, LoadOrigin::Cache);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let cache = tempfile::tempdir().unwrap();
        let sd = subdir(&server.url(), cache.path());

        let mock = server
            .mock("GET", "/chan/linux-64/repodata.json")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = sd.load(&Client::new(), &settings(), false).await.unwrap_err();
        assert!(matches!(err, FetchError::Http { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let cache = tempfile::tempdir().unwrap();
        let sd = subdir(&server.url(), cache.path());

        let mock = server
            .mock("GET", "/chan/linux-64/repodata.json")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let err = sd.load(&Client::new(), &settings(), false).await.unwrap_err();
        match err {
            FetchError::Http { source, .. } => {
                assert_eq!(source.status(), Some(StatusCode::NOT_FOUND));
            }
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stale_cache_survives_network_failure() {
        let mut server = mockito::Server::new_async().await;
        let cache = tempfile::tempdir().unwrap();
        let sd = subdir(&server.url(), cache.path());
        std::fs::write(sd.cache_path(), DOC).unwrap();

        let _mock = server
            .mock("GET", "/chan/linux-64/repodata.json")
            .with_status(500)
            .create_async()
            .await;

        let loaded = sd.load(&Client::new(), &settings(), false).await.unwrap();
        assert_eq!(loaded.origin, LoadOrigin::Cache);
        assert_eq!(loaded.into_records()[0].channel, format!("{}/chan", server.url()));
    }

    #[tokio::test]
    async fn test_file_channel() {
        let chan = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(chan.path().join("linux-64")).unwrap();
        std::fs::write(chan.path().join("linux-64/repodata.json"), DOC).unwrap();

        let url = format!("file://{}", chan.path().display());
        let channel = Channel::resolve(&url, DEFAULT_CHANNEL_ALIAS).unwrap();
        let sd = SubdirData::new(&channel, 0, Platform::Linux64, cache.path());
        let loaded = sd.load(&Client::new(), &settings(), false).await.unwrap();
        assert_eq!(loaded.origin, LoadOrigin::Local);

        let records = loaded.into_records();
        assert_eq!(records[0].url, format!("{url}/linux-64/foo-1.0-0.tar.bz2"));
    }
}
