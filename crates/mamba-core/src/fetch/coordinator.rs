use super::{FetchError, LoadedSubdir, SubdirData};
use crate::config::FetchSettings;
use crate::reporter::Reporter;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Result of fetching a batch of subdirs.
///
/// Every subdir handed to [`FetchCoordinator::fetch_all`] ends up in
/// exactly one of the three lists, each kept in input order.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Successfully loaded subdirs.
    pub loaded: Vec<LoadedSubdir>,
    /// Subdirs that failed, one error each.
    pub failures: Vec<FetchError>,
    /// Subdirs skipped because they were missing offline.
    pub skipped: Vec<String>,
}

impl FetchOutcome {
    /// Whether every subdir loaded or was tolerably skipped.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs many [`SubdirData::load`] calls under one concurrency bound.
pub struct FetchCoordinator {
    client: Client,
    settings: FetchSettings,
    offline: bool,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("settings", &self.settings)
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    /// Create a coordinator sharing `client` across all transfers.
    pub fn new(
        client: Client,
        settings: FetchSettings,
        offline: bool,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            client,
            settings,
            offline,
            reporter,
        }
    }

    /// Load every subdir, reporting failures individually.
    ///
    /// Once `fail_fast` failures have been seen the remaining tasks are
    /// aborted and reported as [`FetchError::Aborted`].
    pub async fn fetch_all(&self, subdirs: Vec<SubdirData>) -> FetchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let names: Vec<String> = subdirs.iter().map(|s| s.name().to_string()).collect();
        let mut set = JoinSet::new();

        for (index, subdir) in subdirs.into_iter().enumerate() {
            let client = self.client.clone();
            let settings = self.settings.clone();
            let semaphore = semaphore.clone();
            let offline = self.offline;
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, subdir.load(&client, &settings, offline).await)
            });
        }

        let mut finished = vec![false; names.len()];
        let mut loaded = Vec::new();
        let mut failures = Vec::new();
        let mut skipped = Vec::new();

        while let Some(joined) = set.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    if !e.is_cancelled() {
                        tracing::error!("fetch task failed: {e}");
                    }
                    continue;
                }
            };
            finished[index] = true;

            match result {
                Ok(subdir) => {
                    self.reporter
                        .subdir_loaded(subdir.subdir.name(), subdir.origin.as_str());
                    loaded.push((index, subdir));
                }
                Err(FetchError::OfflineMiss { subdir, .. })
                    if self.offline && self.settings.tolerate_missing_subdirs =>
                {
                    tracing::warn!("{subdir}: not cached, skipping in offline mode");
                    self.reporter.warning(&format!("{subdir}: not cached, skipped"));
                    skipped.push((index, subdir));
                }
                Err(e) => {
                    tracing::warn!("{e}");
                    failures.push((index, e));
                    if self
                        .settings
                        .fail_fast
                        .is_some_and(|limit| failures.len() >= limit)
                    {
                        set.abort_all();
                    }
                }
            }
        }

        for (index, name) in names.into_iter().enumerate() {
            if !finished[index] {
                failures.push((index, FetchError::Aborted { subdir: name }));
            }
        }

        loaded.sort_by_key(|(i, _)| *i);
        failures.sort_by_key(|(i, _)| *i);
        skipped.sort_by_key(|(i, _)| *i);

        FetchOutcome {
            loaded: loaded.into_iter().map(|(_, s)| s).collect(),
            failures: failures.into_iter().map(|(_, e)| e).collect(),
            skipped: skipped.into_iter().map(|(_, s)| s).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use crate::retry::RetryPolicy;
    use mamba_schema::{Channel, DEFAULT_CHANNEL_ALIAS, Platform};
    use std::time::Duration;

    const DOC: &str = r#"{"packages": {}}"#;

    fn settings() -> FetchSettings {
        FetchSettings {
            retry: RetryPolicy::none(),
            ..FetchSettings::default()
        }
    }

    fn subdirs(base: &str, cache: &std::path::Path) -> Vec<SubdirData> {
        let channel = Channel::resolve(&format!("{base}/chan"), DEFAULT_CHANNEL_ALIAS).unwrap();
        Platform::Linux64
            .search_order()
            .into_iter()
            .map(|p| SubdirData::new(&channel, 0, p, cache))
            .collect()
    }

    #[tokio::test]
    async fn test_reports_each_subdir_individually() {
        let mut server = mockito::Server::new_async().await;
        let cache = tempfile::tempdir().unwrap();
        let _ok = server
            .mock("GET", "/chan/linux-64/repodata.json")
            .with_body(DOC)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/chan/noarch/repodata.json")
            .with_status(404)
            .create_async()
            .await;

        let coordinator =
            FetchCoordinator::new(Client::new(), settings(), false, Arc::new(NullReporter));
        let outcome = coordinator.fetch_all(subdirs(&server.url(), cache.path())).await;

        assert_eq!(outcome.loaded.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].subdir().ends_with("/noarch"));
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_offline_tolerates_missing_subdirs() {
        let cache = tempfile::tempdir().unwrap();
        let mut settings = settings();
        settings.tolerate_missing_subdirs = true;
        let all = subdirs("http://127.0.0.1:9", cache.path());
        std::fs::write(all[0].cache_path(), DOC).unwrap();

        let coordinator =
            FetchCoordinator::new(Client::new(), settings, true, Arc::new(NullReporter));
        let outcome = coordinator.fetch_all(all).await;

        assert_eq!(outcome.loaded.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_remaining() {
        let mut server = mockito::Server::new_async().await;
        let cache = tempfile::tempdir().unwrap();
        let _broken = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let mut settings = settings();
        settings.fail_fast = Some(1);
        settings.concurrency = 1;
        settings.connect_timeout = Duration::from_secs(5);

        let coordinator =
            FetchCoordinator::new(Client::new(), settings, false, Arc::new(NullReporter));
        let many: Vec<SubdirData> = (0..6)
            .flat_map(|i| subdirs(&format!("{}/c{i}", server.url()), cache.path()))
            .collect();
        let outcome = coordinator.fetch_all(many).await;

        assert!(outcome.loaded.is_empty());
        assert_eq!(outcome.failures.len(), 12);
        assert!(
            outcome
                .failures
                .iter()
                .any(|e| matches!(e, FetchError::Aborted { .. }))
        );
    }
}
