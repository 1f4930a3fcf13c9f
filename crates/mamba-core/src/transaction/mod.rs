//! Turning a solution into prefix mutations.
//!
//! [`Transaction::from_solution`] diffs the solver output against the
//! installed records, [`Transaction::plan`] summarises the diff for the
//! user, and [`Transaction::execute`] applies it. Execution stops at the
//! first failed step; steps already applied stay applied and their
//! `conda-meta` records are already on disk.

pub mod link;

pub use link::{LinkError, LinkedPackage, link_package, unlink_package};

use crate::cache::{CacheError, CachedPackage, PackageCache};
use crate::prefix::{PrefixData, PrefixError};
use crate::reporter::Reporter;
use mamba_schema::{Link, MatchSpec, PackageRecord, PrefixRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One change to the prefix.
#[derive(Debug, Clone)]
pub enum Operation {
    /// A package that is not installed yet.
    Install(PackageRecord),
    /// An installed package replaced by a different record of the same name.
    Change {
        /// The installed record.
        old: Box<PrefixRecord>,
        /// Its replacement.
        new: PackageRecord,
    },
    /// An installed package that is no longer wanted.
    Remove(Box<PrefixRecord>),
}

impl Operation {
    /// The package name this operation is about.
    pub fn name(&self) -> &str {
        match self {
            Self::Install(new) | Self::Change { new, .. } => &new.name,
            Self::Remove(old) => &old.record.name,
        }
    }

    /// The record to link, if any.
    pub fn link_record(&self) -> Option<&PackageRecord> {
        match self {
            Self::Install(new) | Self::Change { new, .. } => Some(new),
            Self::Remove(_) => None,
        }
    }
}

/// An atomic unit of execution.
#[derive(Debug, Clone, Copy)]
pub enum TransactionStep<'a> {
    /// Remove an installed package's files and record.
    Unlink(&'a PrefixRecord),
    /// Materialise a package and write its record.
    Link(&'a PackageRecord),
}

impl fmt::Display for TransactionStep<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlink(old) => write!(f, "unlink {}", old.record.dist_name()),
            Self::Link(new) => write!(f, "link {}", new.dist_name()),
        }
    }
}

/// How a plan entry changes a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Newly installed.
    Install,
    /// Replaced by a higher version.
    Upgrade,
    /// Replaced by a lower version.
    Downgrade,
    /// Same version, different build or channel.
    Change,
    /// Removed.
    Remove,
}

impl ActionKind {
    /// Verb for display.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Change => "change",
            Self::Remove => "remove",
        }
    }
}

/// Version, build and channel of one side of a plan entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    /// Version string.
    pub version: String,
    /// Build string.
    pub build: String,
    /// Source channel.
    pub channel: String,
    /// Archive size in bytes.
    pub size: u64,
}

impl From<&PackageRecord> for PackageSummary {
    fn from(record: &PackageRecord) -> Self {
        Self {
            version: record.version.to_string(),
            build: record.build.clone(),
            channel: record.channel.clone(),
            size: record.size,
        }
    }
}

/// One line of the plan shown before confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// Package name.
    pub name: String,
    /// What happens to it.
    pub kind: ActionKind,
    /// Installed side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<PackageSummary>,
    /// New side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<PackageSummary>,
    /// Bytes to download (zero on a cache hit).
    pub download_bytes: u64,
}

/// The user-facing summary of a transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPlan {
    /// Target prefix.
    pub prefix: PathBuf,
    /// Whether execution will be skipped.
    pub dry_run: bool,
    /// One entry per changed package, in execution order.
    pub entries: Vec<PlanEntry>,
    /// Total bytes to download.
    pub download_bytes: u64,
    /// Total bytes of packages to link.
    pub disk_bytes: u64,
    #[serde(skip)]
    fetch: Vec<PackageRecord>,
    #[serde(skip)]
    link: Vec<PackageRecord>,
    #[serde(skip)]
    unlink: Vec<PackageRecord>,
}

impl TransactionPlan {
    /// Whether nothing would change.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Machine-readable form, shaped like conda's `--json` output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "dry_run": self.dry_run,
            "prefix": self.prefix,
            "actions": {
                "PREFIX": self.prefix,
                "FETCH": self.fetch,
                "LINK": self.link,
                "UNLINK": self.unlink,
            },
        })
    }
}

/// Asks the user whether to go ahead.
pub trait Confirm {
    /// `Ok(true)` to proceed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the answer cannot be read.
    fn confirm(&self, plan: &TransactionPlan) -> std::io::Result<bool>;
}

/// Confirms everything (`--yes`).
#[derive(Debug, Clone, Copy)]
pub struct AlwaysYes;

impl Confirm for AlwaysYes {
    fn confirm(&self, _: &TransactionPlan) -> std::io::Result<bool> {
        Ok(true)
    }
}

/// Failure inside one step.
#[derive(Debug, Error)]
pub enum StepError {
    /// Files could not be placed or removed.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// The `conda-meta` record could not be written.
    #[error(transparent)]
    Prefix(#[from] PrefixError),
    /// The package has no cache entry to link from.
    #[error("{0} is not in the package cache")]
    NotFetched(String),
}

/// Why a transaction did not complete.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A package could not be fetched before any step ran.
    #[error("{package}: {source}")]
    Cache {
        /// `name-version-build`.
        package: String,
        /// Underlying error.
        #[source]
        source: CacheError,
    },
    /// A step failed; earlier steps remain applied.
    #[error(
        "transaction failed at '{failed_step}' (last applied: {}): {source}",
        .last_applied.as_deref().unwrap_or("none")
    )]
    ExecutionFailure {
        /// The step that failed.
        failed_step: String,
        /// The last step that completed.
        last_applied: Option<String>,
        /// Underlying error.
        #[source]
        source: StepError,
    },
}

/// What [`Transaction::execute`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Packages linked.
    pub linked: usize,
    /// Packages unlinked.
    pub unlinked: usize,
}

/// The diff between the installed state and a solution.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    operations: Vec<Operation>,
    requested: HashMap<String, String>,
}

/// Order removals so that dependents go before their dependencies.
fn removal_order(removals: Vec<PrefixRecord>) -> Vec<PrefixRecord> {
    let mut remaining: BTreeMap<String, PrefixRecord> = removals
        .into_iter()
        .map(|r| (r.record.name.clone(), r))
        .collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let needed: BTreeSet<String> = remaining
            .values()
            .flat_map(|r| r.record.depends.iter())
            .filter_map(|d| d.parse::<MatchSpec>().ok().map(|s| s.name))
            .collect();
        let next = remaining
            .keys()
            .find(|name| !needed.contains(*name))
            .or_else(|| remaining.keys().next())
            .cloned();
        if let Some(record) = next.and_then(|name| remaining.remove(&name)) {
            ordered.push(record);
        }
    }
    ordered
}

impl Transaction {
    /// Diff `solution` (dependency-ordered) against `installed`.
    ///
    /// Identical records are kept, new names are installed, different
    /// records of an installed name become a single change, and installed
    /// names missing from the solution are removed.
    pub fn from_solution(
        installed: &PrefixData,
        solution: &[PackageRecord],
        requested: &[MatchSpec],
    ) -> Self {
        let wanted: BTreeSet<&str> = solution.iter().map(|r| r.name.as_str()).collect();
        let removals: Vec<PrefixRecord> = installed
            .records()
            .filter(|r| !wanted.contains(r.record.name.as_str()))
            .cloned()
            .collect();

        let mut operations: Vec<Operation> = removal_order(removals)
            .into_iter()
            .map(|r| Operation::Remove(Box::new(r)))
            .collect();

        for new in solution {
            match installed.get(&new.name) {
                Some(old) if old.record.same_artifact(new) => {}
                Some(old) => operations.push(Operation::Change {
                    old: Box::new(old.clone()),
                    new: new.clone(),
                }),
                None => operations.push(Operation::Install(new.clone())),
            }
        }

        Self {
            operations,
            requested: requested
                .iter()
                .map(|s| (s.name.clone(), s.to_string()))
                .collect(),
        }
    }

    /// Whether the prefix already matches the solution.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations in execution order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Steps in execution order; a change is unlink-old then link-new.
    pub fn steps(&self) -> Vec<TransactionStep<'_>> {
        self.operations
            .iter()
            .flat_map(|op| match op {
                Operation::Install(new) => vec![TransactionStep::Link(new)],
                Operation::Change { old, new } => {
                    vec![TransactionStep::Unlink(old), TransactionStep::Link(new)]
                }
                Operation::Remove(old) => vec![TransactionStep::Unlink(old)],
            })
            .collect()
    }

    /// Summarise the transaction; download sizes come from `cache`.
    pub fn plan(&self, prefix: &Path, cache: &PackageCache, dry_run: bool) -> TransactionPlan {
        let mut plan = TransactionPlan {
            prefix: prefix.to_path_buf(),
            dry_run,
            entries: Vec::new(),
            download_bytes: 0,
            disk_bytes: 0,
            fetch: Vec::new(),
            link: Vec::new(),
            unlink: Vec::new(),
        };

        for op in &self.operations {
            let (kind, old, new) = match op {
                Operation::Install(new) => (ActionKind::Install, None, Some(new)),
                Operation::Change { old, new } => {
                    let kind = match new.version.cmp(&old.record.version) {
                        std::cmp::Ordering::Greater => ActionKind::Upgrade,
                        std::cmp::Ordering::Less => ActionKind::Downgrade,
                        std::cmp::Ordering::Equal => ActionKind::Change,
                    };
                    (kind, Some(&old.record), Some(new))
                }
                Operation::Remove(old) => (ActionKind::Remove, Some(&old.record), None),
            };

            let mut download_bytes = 0;
            if let Some(new) = new {
                if cache.needs_download(new) {
                    download_bytes = new.size;
                    plan.fetch.push(new.clone());
                }
                plan.disk_bytes += new.size;
                plan.link.push(new.clone());
            }
            if let Some(old) = old {
                plan.unlink.push(old.clone());
            }
            plan.download_bytes += download_bytes;
            plan.entries.push(PlanEntry {
                name: op.name().to_string(),
                kind,
                old: old.map(PackageSummary::from),
                new: new.map(PackageSummary::from),
                download_bytes,
            });
        }
        plan
    }

    /// Make every package to link available in the cache, `concurrency` at
    /// a time.
    async fn prefetch(
        &self,
        cache: &PackageCache,
        reporter: &Arc<dyn Reporter>,
        concurrency: usize,
    ) -> Result<HashMap<String, CachedPackage>, TransactionError> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut set = JoinSet::new();
        for record in self.operations.iter().filter_map(Operation::link_record) {
            let record = record.clone();
            let cache = cache.clone();
            let reporter = reporter.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = cache.ensure(&record, &*reporter).await;
                (record, result)
            });
        }

        let mut cached = HashMap::new();
        while let Some(joined) = set.join_next().await {
            let (record, result) = joined.map_err(|e| TransactionError::Cache {
                package: "package download".to_string(),
                source: CacheError::Io {
                    path: PathBuf::new(),
                    source: std::io::Error::other(e),
                },
            })?;
            match result {
                Ok(found) => {
                    cached.insert(record.name.clone(), found);
                }
                Err(source) => {
                    set.abort_all();
                    return Err(TransactionError::Cache {
                        package: record.dist_name(),
                        source,
                    });
                }
            }
        }
        Ok(cached)
    }

    /// Apply the transaction to `prefix`.
    ///
    /// All archives are fetched first; a fetch failure leaves the prefix
    /// untouched. Steps then run one at a time, each persisting its
    /// `conda-meta` change before the next starts.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::Cache`] if a package cannot be fetched and
    /// [`TransactionError::ExecutionFailure`] for the first failed step.
    pub async fn execute(
        &self,
        prefix: &mut PrefixData,
        cache: &PackageCache,
        reporter: Arc<dyn Reporter>,
        concurrency: usize,
    ) -> Result<ExecutionSummary, TransactionError> {
        reporter.section("Fetching packages");
        let cached = self.prefetch(cache, &reporter, concurrency).await?;

        reporter.section("Linking");
        PrefixData::create_layout(prefix.prefix()).map_err(|e| {
            TransactionError::ExecutionFailure {
                failed_step: "create prefix".to_string(),
                last_applied: None,
                source: e.into(),
            }
        })?;

        let mut summary = ExecutionSummary::default();
        let mut last_applied: Option<String> = None;
        for step in self.steps() {
            let result = match step {
                TransactionStep::Unlink(old) => unlink_step(prefix, old, reporter.as_ref()),
                TransactionStep::Link(new) => {
                    self.link_cached(prefix, new, &cached, reporter.as_ref())
                }
            };
            if let Err(source) = result {
                let failed_step = step.to_string();
                tracing::error!("{failed_step} failed: {source}");
                return Err(TransactionError::ExecutionFailure {
                    failed_step,
                    last_applied,
                    source,
                });
            }
            match step {
                TransactionStep::Unlink(_) => summary.unlinked += 1,
                TransactionStep::Link(_) => summary.linked += 1,
            }
            last_applied = Some(step.to_string());
        }
        Ok(summary)
    }

    fn link_cached(
        &self,
        prefix: &mut PrefixData,
        new: &PackageRecord,
        cached: &HashMap<String, CachedPackage>,
        reporter: &dyn Reporter,
    ) -> Result<(), StepError> {
        let found = cached
            .get(&new.name)
            .ok_or_else(|| StepError::NotFetched(new.dist_name()))?;
        self.link(prefix, new, found, reporter)
    }

    fn link(
        &self,
        prefix: &mut PrefixData,
        new: &PackageRecord,
        cached: &CachedPackage,
        reporter: &dyn Reporter,
    ) -> Result<(), StepError> {
        let version = new.version.as_str();
        reporter.linking(&new.name, version);
        let linked = link_package(&cached.extracted_dir, prefix.prefix())?;

        let mut record = PrefixRecord::from_record(new.clone());
        record.files = linked.files;
        record.requested_spec = self.requested.get(&new.name).cloned();
        record.extracted_package_dir = Some(cached.extracted_dir.clone());
        record.package_tarball_full_path = Some(cached.tarball.clone());
        record.link = Some(Link {
            source: cached.extracted_dir.clone(),
            link_type: linked.link_type,
        });
        prefix.insert(record)?;
        reporter.done(&new.name, version, "linked");
        Ok(())
    }
}

fn unlink_step(
    prefix: &mut PrefixData,
    old: &PrefixRecord,
    reporter: &dyn Reporter,
) -> Result<(), StepError> {
    let version = old.record.version.as_str();
    reporter.unlinking(&old.record.name, version);
    unlink_package(prefix.prefix(), &old.files)?;
    prefix.remove(&old.record.name)?;
    reporter.done(&old.record.name, version, "removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::tar_bz2;
    use crate::pool::tests::rec;
    use crate::reporter::NullReporter;
    use crate::retry::RetryPolicy;
    use reqwest::Client;

    fn prefix_with(dir: &Path, records: &[PackageRecord]) -> PrefixData {
        PrefixData::create_layout(dir).unwrap();
        let mut data = PrefixData::load(dir).unwrap();
        for r in records {
            data.insert(PrefixRecord::from_record(r.clone())).unwrap();
        }
        data
    }

    fn cache_in(root: PathBuf, offline: bool) -> PackageCache {
        PackageCache::new(vec![root], Client::new(), RetryPolicy::none(), offline)
    }

    fn names(tx: &Transaction) -> Vec<String> {
        tx.steps().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_identical_solution_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let installed = vec![rec("a", "1.0", "c", &[]), rec("b", "2.0", "c", &[])];
        let prefix = prefix_with(dir.path(), &installed);

        let tx = Transaction::from_solution(&prefix, &installed, &[]);
        assert!(tx.is_empty());
    }

    #[test]
    fn test_upgrade_is_unlink_then_link() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = prefix_with(dir.path(), &[rec("a", "1.0", "c", &[])]);

        let tx = Transaction::from_solution(&prefix, &[rec("a", "2.0", "c", &[])], &[]);
        assert_eq!(names(&tx), ["unlink a-1.0-0", "link a-2.0-0"]);

        let cache = cache_in(dir.path().join("pkgs"), true);
        let plan = tx.plan(dir.path(), &cache, false);
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].kind, ActionKind::Upgrade);
        assert_eq!(plan.entries[0].old.as_ref().unwrap().version, "1.0");
        assert_eq!(plan.entries[0].new.as_ref().unwrap().version, "2.0");
    }

    #[test]
    fn test_removals_go_first_dependents_before_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = prefix_with(
            dir.path(),
            &[
                rec("app", "1.0", "c", &["lib"]),
                rec("lib", "1.0", "c", &[]),
                rec("keep", "1.0", "c", &[]),
            ],
        );

        let tx = Transaction::from_solution(
            &prefix,
            &[rec("keep", "1.0", "c", &[]), rec("new", "1.0", "c", &[])],
            &[],
        );
        assert_eq!(
            names(&tx),
            ["unlink app-1.0-0", "unlink lib-1.0-0", "link new-1.0-0"]
        );
    }

    #[test]
    fn test_downgrade_and_build_change_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = prefix_with(
            dir.path(),
            &[rec("a", "2.0", "c", &[]), rec("b", "1.0", "c", &[])],
        );
        let mut rebuilt = rec("b", "1.0", "c", &[]);
        rebuilt.build = "1".to_string();

        let tx = Transaction::from_solution(&prefix, &[rec("a", "1.0", "c", &[]), rebuilt], &[]);
        let cache = cache_in(dir.path().join("pkgs"), true);
        let kinds: Vec<ActionKind> = tx
            .plan(dir.path(), &cache, true)
            .entries
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, [ActionKind::Downgrade, ActionKind::Change]);
    }

    #[test]
    fn test_plan_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = prefix_with(dir.path(), &[]);
        let mut new = rec("a", "1.0", "c", &[]);
        new.size = 42;
        let tx = Transaction::from_solution(&prefix, &[new], &[]);
        let cache = cache_in(dir.path().join("pkgs"), true);

        let plan = tx.plan(dir.path(), &cache, true);
        assert_eq!(plan.download_bytes, 42);
        let json = plan.to_json();
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["actions"]["LINK"][0]["name"], "a");
        assert_eq!(json["actions"]["FETCH"][0]["name"], "a");
        assert_eq!(json["actions"]["UNLINK"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_execute_links_and_persists() {
        let (bytes, hash) = tar_bz2(&[("bin/a", &b"a2"[..])]);
        let (old_bytes, _) = tar_bz2(&[("bin/a", &b"a1"[..]), ("share/a-old", &b""[..])]);
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/c/linux-64/a-2.0-0.tar.bz2")
            .with_body(bytes.clone())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        let pkgs = dir.path().join("pkgs");
        let cache = cache_in(pkgs.clone(), false);

        // Install a-1.0 by hand so there is something to replace.
        let old_dir = pkgs.join("a-1.0-0");
        std::fs::create_dir_all(&pkgs).unwrap();
        std::fs::write(pkgs.join("a-1.0-0.tar.bz2"), &old_bytes).unwrap();
        crate::cache::extract_package(&pkgs.join("a-1.0-0.tar.bz2"), &old_dir).unwrap();
        let mut prefix = prefix_with(&env, &[]);
        let linked = link_package(&old_dir, &env).unwrap();
        let mut old = PrefixRecord::from_record(rec("a", "1.0", "c", &[]));
        old.files = linked.files;
        prefix.insert(old).unwrap();

        let mut new = rec("a", "2.0", "c", &[]);
        new.url = format!("{}/c/linux-64/a-2.0-0.tar.bz2", server.url());
        new.sha256 = Some(hash);
        let spec: MatchSpec = "a>=2".parse().unwrap();
        let tx = Transaction::from_solution(&prefix, &[new], &[spec]);

        let summary = tx
            .execute(&mut prefix, &cache, Arc::new(NullReporter), 4)
            .await
            .unwrap();
        assert_eq!(summary, ExecutionSummary { linked: 1, unlinked: 1 });
        assert_eq!(std::fs::read(env.join("bin/a")).unwrap(), b"a2");
        assert!(!env.join("share").exists());

        let reloaded = PrefixData::load(&env).unwrap();
        let installed = reloaded.get("a").unwrap();
        assert_eq!(installed.record.version.as_str(), "2.0");
        assert_eq!(installed.requested_spec.as_deref(), Some("a>=2"));
        assert_eq!(installed.files, ["bin/a"]);
        assert!(!env.join("conda-meta/a-1.0-0.json").exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_prefix_untouched() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/c/linux-64/a-1.0-0.tar.bz2")
            .with_status(404)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        let mut prefix = PrefixData::load(&env).unwrap();
        let cache = cache_in(dir.path().join("pkgs"), false);

        let mut new = rec("a", "1.0", "c", &[]);
        new.url = format!("{}/c/linux-64/a-1.0-0.tar.bz2", server.url());
        let tx = Transaction::from_solution(&prefix, &[new], &[]);

        let err = tx
            .execute(&mut prefix, &cache, Arc::new(NullReporter), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::Cache { .. }));
        assert!(!env.exists());
    }

    #[test]
    fn test_link_without_cache_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        let mut prefix = prefix_with(&env, &[]);
        let new = rec("a", "1.0", "c", &[]);
        let tx = Transaction::from_solution(&prefix, &[new.clone()], &[]);

        let err = tx
            .link_cached(&mut prefix, &new, &HashMap::new(), &NullReporter)
            .unwrap_err();
        assert!(matches!(err, StepError::NotFetched(ref name) if name == "a-1.0-0"));
        assert!(PrefixData::load(&env).unwrap().get("a").is_none());
    }

    #[tokio::test]
    async fn test_failed_step_reports_last_applied() {
        let (bytes_a, hash_a) = tar_bz2(&[("bin/a", &b"a"[..])]);
        let (bytes_b, hash_b) = tar_bz2(&[("bin/b", &b"b"[..])]);
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("GET", "/a-1.0-0.tar.bz2")
            .with_body(bytes_a)
            .create_async()
            .await;
        let _b = server
            .mock("GET", "/b-1.0-0.tar.bz2")
            .with_body(bytes_b)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        let mut prefix = prefix_with(&env, &[]);
        // A directory where `b`'s file must go makes its link step fail.
        std::fs::create_dir_all(env.join("bin/b/occupied")).unwrap();
        let cache = cache_in(dir.path().join("pkgs"), false);

        let mut a = rec("a", "1.0", "c", &[]);
        a.url = format!("{}/a-1.0-0.tar.bz2", server.url());
        a.sha256 = Some(hash_a);
        let mut b = rec("b", "1.0", "c", &["a"]);
        b.url = format!("{}/b-1.0-0.tar.bz2", server.url());
        b.sha256 = Some(hash_b);
        let tx = Transaction::from_solution(&prefix, &[a, b], &[]);

        let err = tx
            .execute(&mut prefix, &cache, Arc::new(NullReporter), 2)
            .await
            .unwrap_err();
        match err {
            TransactionError::ExecutionFailure {
                failed_step,
                last_applied,
                ..
            } => {
                assert_eq!(failed_step, "link b-1.0-0");
                assert_eq!(last_applied.as_deref(), Some("link a-1.0-0"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(PrefixData::load(&env).unwrap().get("a").is_some());
        assert!(PrefixData::load(&env).unwrap().get("b").is_none());
    }
}
