//! Streaming package downloads with SHA256 computed on the fly.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use mamba_schema::Sha256Hash;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::http::{HttpError, file_url_path};
use crate::retry::Transience;

/// A failed package download.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The transfer itself failed.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Writing the archive to disk failed.
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        /// Destination file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl Transience for DownloadError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_transient(),
            Self::Io { .. } => false,
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Download `url` to `dest`, returning the SHA256 of the bytes written.
///
/// Data is streamed to `<dest>.partial` and renamed into place once
/// complete, so `dest` never holds a truncated archive. `progress` receives
/// the running byte count and the advertised total. `file://` URLs are
/// copied.
///
/// # Errors
///
/// Returns [`DownloadError`] on a non-success status, a transport failure,
/// or a local write failure.
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
) -> Result<Sha256Hash, DownloadError> {
    let io_err = |source: std::io::Error| DownloadError::Io {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(source) = file_url_path(url) {
        let bytes = tokio::fs::read(&source)
            .await
            .map_err(|e| HttpError::Local { path: source, source: e })?;
        tokio::fs::write(dest, &bytes).await.map_err(io_err)?;
        progress(bytes.len() as u64, Some(bytes.len() as u64));
        return Ok(Sha256Hash::compute(&bytes));
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| HttpError::transport(url, e))?;
    if !response.status().is_success() {
        return Err(HttpError::Status {
            url: url.to_string(),
            status: response.status(),
        }
        .into());
    }

    let total = response.content_length();
    let partial = partial_path(dest);
    let mut file = File::create(&partial).await.map_err(io_err)?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;

    progress(0, total);
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                tokio::fs::remove_file(&partial).await.ok();
                return Err(HttpError::transport(url, e).into());
            }
        };
        file.write_all(&chunk).await.map_err(io_err)?;
        hasher.write_all(&chunk).map_err(io_err)?;
        downloaded += chunk.len() as u64;
        progress(downloaded, total);
    }
    file.flush().await.map_err(io_err)?;
    drop(file);

    tokio::fs::rename(&partial, dest).await.map_err(io_err)?;
    Ok(Sha256Hash::from_hasher(hasher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_streams_and_hashes() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/c/linux-64/foo-1.0-0.tar.bz2")
            .with_body("archive bytes")
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("foo-1.0-0.tar.bz2");
        let seen = AtomicU64::new(0);

        let hash = download_file(
            &Client::new(),
            &format!("{}/c/linux-64/foo-1.0-0.tar.bz2", server.url()),
            &dest,
            &|current, _| seen.store(current, Ordering::SeqCst),
        )
        .await
        .unwrap();

        assert_eq!(hash, Sha256Hash::compute(b"archive bytes"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive bytes");
        assert_eq!(seen.load(Ordering::SeqCst), 13);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_status_error_leaves_nothing_behind() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/missing.conda")
            .with_status(404)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.conda");

        let err = download_file(
            &Client::new(),
            &format!("{}/missing.conda", server.url()),
            &dest,
            &|_, _| {},
        )
        .await
        .unwrap_err();

        assert!(!err.is_transient());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_file_url_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.tar.bz2");
        std::fs::write(&source, b"local").unwrap();
        let dest = dir.path().join("dest.tar.bz2");

        let hash = download_file(
            &Client::new(),
            &format!("file://{}", source.display()),
            &dest,
            &|_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(hash, Sha256Hash::compute(b"local"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"local");
    }
}
