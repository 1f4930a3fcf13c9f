//! Shared run context.
//!
//! Groups the configuration with the long-lived handles built from it (HTTP
//! client, package cache, reporter) so the pipeline stages take one argument.

use mamba_core::Config;
use mamba_core::Reporter;
use mamba_core::cache::PackageCache;
use mamba_core::http::build_client;
use std::fmt;
use std::sync::Arc;

/// Everything one create/install run shares.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub client: reqwest::Client,
    pub cache: PackageCache,
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Build the HTTP client and package cache for `config`.
    pub fn new(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self, mamba_core::Error> {
        let client = build_client(&config.fetch)?;
        let cache = PackageCache::new(
            config.pkgs_dirs(),
            client.clone(),
            config.fetch.retry,
            config.flags.offline,
        );
        Ok(Self {
            config: Arc::new(config),
            client,
            cache,
            reporter,
        })
    }
}
