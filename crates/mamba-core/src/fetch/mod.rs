//! Channel metadata acquisition.
//!
//! [`SubdirData`] loads one `repodata.json` with local caching and HTTP
//! revalidation; [`FetchCoordinator`] runs many of them under a shared
//! concurrency bound.

pub mod coordinator;
pub mod subdir;

pub use coordinator::{FetchCoordinator, FetchOutcome};
pub use subdir::{LoadOrigin, LoadedSubdir, SubdirData, cache_file_name};

use crate::http::HttpError;
use std::path::PathBuf;
use thiserror::Error;

/// Why one subdir could not be loaded.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The download failed and no cached copy exists.
    #[error("failed to fetch {subdir}: {source}")]
    Http {
        /// Subdir name (`channel/platform`).
        subdir: String,
        /// Underlying transfer error.
        #[source]
        source: HttpError,
    },
    /// Offline mode with a cold cache.
    #[error("{subdir}: no cached metadata at {} and offline mode is enabled", .path.display())]
    OfflineMiss {
        /// Subdir name.
        subdir: String,
        /// Expected cache file.
        path: PathBuf,
    },
    /// The document is not valid repodata.
    #[error("{subdir}: invalid repodata: {source}")]
    Parse {
        /// Subdir name.
        subdir: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// The metadata cache could not be written.
    #[error("{subdir}: cache write failed at {}: {source}", .path.display())]
    Io {
        /// Subdir name.
        subdir: String,
        /// Cache file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The fetch never completed because the batch was aborted.
    #[error("{subdir}: fetch aborted")]
    Aborted {
        /// Subdir name.
        subdir: String,
    },
}

impl FetchError {
    /// The subdir this error belongs to.
    pub fn subdir(&self) -> &str {
        match self {
            Self::Http { subdir, .. }
            | Self::OfflineMiss { subdir, .. }
            | Self::Parse { subdir, .. }
            | Self::Io { subdir, .. }
            | Self::Aborted { subdir } => subdir,
        }
    }
}
