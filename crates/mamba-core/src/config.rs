//! Run configuration.
//!
//! A [`Config`] is built once by the front-end and passed by reference to
//! every stage. Nothing in the core reads the environment.

use crate::retry::RetryPolicy;
use mamba_schema::{DEFAULT_CHANNEL_ALIAS, Platform};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of concurrent network transfers.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Behaviour switches for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Flags {
    /// Never touch the network; use cached metadata and packages only.
    pub offline: bool,
    /// Stop after presenting the plan.
    pub dry_run: bool,
    /// Skip the confirmation prompt.
    pub always_yes: bool,
    /// Emit machine-readable output.
    pub json: bool,
    /// Suppress progress output.
    pub quiet: bool,
    /// Allow the solver to replace installed packages with older versions.
    pub allow_downgrade: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            offline: false,
            dry_run: false,
            always_yes: false,
            json: false,
            quiet: false,
            allow_downgrade: true,
        }
    }
}

/// Network settings shared by metadata and package downloads.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Maximum in-flight transfers.
    pub concurrency: usize,
    /// Abort the remaining subdir fetches after this many failures.
    pub fail_fast: Option<usize>,
    /// Retry behaviour for transient errors.
    pub retry: RetryPolicy,
    /// Treat cached repodata younger than this as fresh regardless of
    /// `Cache-Control`.
    pub local_repodata_ttl: Option<Duration>,
    /// In offline mode, skip subdirs with no cached copy instead of failing.
    pub tolerate_missing_subdirs: bool,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Verify server certificates.
    pub ssl_verify: bool,
    /// Extra CA bundle (PEM) to trust.
    pub cacert_path: Option<PathBuf>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fail_fast: None,
            retry: RetryPolicy::default(),
            local_repodata_ttl: None,
            tolerate_missing_subdirs: false,
            connect_timeout: Duration::from_secs(30),
            ssl_verify: true,
            cacert_path: None,
        }
    }
}

/// Everything one `create`/`install` run needs to know.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root holding the shared `pkgs/` cache.
    pub root_prefix: PathBuf,
    /// Environment being created or modified.
    pub target_prefix: PathBuf,
    /// Channels in priority order (first wins).
    pub channels: Vec<String>,
    /// Base URL bare channel names resolve against.
    pub channel_alias: String,
    /// Target platform.
    pub platform: Platform,
    /// Additional package cache roots, searched after `<root>/pkgs`.
    pub extra_pkgs_dirs: Vec<PathBuf>,
    /// Behaviour switches.
    pub flags: Flags,
    /// Network settings.
    pub fetch: FetchSettings,
}

impl Config {
    /// A configuration with defaults for everything except the two prefixes.
    pub fn new(root_prefix: impl Into<PathBuf>, target_prefix: impl Into<PathBuf>) -> Self {
        Self {
            root_prefix: root_prefix.into(),
            target_prefix: target_prefix.into(),
            channels: Vec::new(),
            channel_alias: DEFAULT_CHANNEL_ALIAS.to_string(),
            platform: Platform::current(),
            extra_pkgs_dirs: Vec::new(),
            flags: Flags::default(),
            fetch: FetchSettings::default(),
        }
    }

    /// Package cache roots in lookup order.
    pub fn pkgs_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.root_prefix.join("pkgs")];
        dirs.extend(self.extra_pkgs_dirs.iter().cloned());
        dirs
    }

    /// Directory holding cached repodata documents.
    pub fn repodata_cache_dir(&self) -> PathBuf {
        self.root_prefix.join("pkgs").join("cache")
    }

    /// `conda-meta/` of the target prefix.
    pub fn conda_meta_dir(&self) -> PathBuf {
        conda_meta_dir(&self.target_prefix)
    }
}

/// `conda-meta/` directory of any prefix.
pub fn conda_meta_dir(prefix: &Path) -> PathBuf {
    prefix.join("conda-meta")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_layout() {
        let mut config = Config::new("/opt/mamba", "/opt/mamba/envs/dev");
        config.extra_pkgs_dirs.push(PathBuf::from("/shared/pkgs"));

        assert_eq!(
            config.pkgs_dirs(),
            vec![PathBuf::from("/opt/mamba/pkgs"), PathBuf::from("/shared/pkgs")]
        );
        assert_eq!(config.repodata_cache_dir(), PathBuf::from("/opt/mamba/pkgs/cache"));
        assert_eq!(
            config.conda_meta_dir(),
            PathBuf::from("/opt/mamba/envs/dev/conda-meta")
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::new("/r", "/t");
        assert!(config.flags.allow_downgrade);
        assert!(!config.flags.offline);
        assert_eq!(config.fetch.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.channel_alias, DEFAULT_CHANNEL_ALIAS);
    }
}
