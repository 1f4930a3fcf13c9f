//! The package index.
//!
//! A [`Pool`] owns every candidate record in one arena. Records are grouped
//! into repos (the installed prefix, or one channel subdir) that carry a
//! priority; consumers hold [`SolvableId`] / [`RepoId`] handles. The pool is
//! immutable once [`PoolBuilder::finish`] returns.

use mamba_schema::{MatchSpec, PackageRecord, RecordKey};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Priority reserved for the installed repo, above every channel.
pub const INSTALLED_PRIORITY: i32 = i32::MAX;

/// Handle to a repo in a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId(usize);

/// Handle to a record in a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SolvableId(usize);

/// A priority-tagged collection of records from one source.
#[derive(Debug, Clone)]
pub struct Repo {
    /// Display name (`conda-forge/linux-64`, `installed`).
    pub name: String,
    /// Higher wins.
    pub priority: i32,
    /// Tie-break between repos of equal priority (platform over noarch).
    pub subpriority: i32,
    /// Whether this repo is the target prefix.
    pub installed: bool,
    solvables: Vec<SolvableId>,
}

impl Repo {
    /// Records in this repo.
    pub fn solvables(&self) -> &[SolvableId] {
        &self.solvables
    }
}

#[derive(Debug, Clone)]
struct Solvable {
    record: PackageRecord,
    repo: RepoId,
}

/// The searchable package index.
#[derive(Debug, Default)]
pub struct Pool {
    repos: Vec<Repo>,
    solvables: Vec<Solvable>,
    by_name: HashMap<String, Vec<SolvableId>>,
    installed: Option<RepoId>,
}

/// Builds a [`Pool`], deduplicating records as they are added.
#[derive(Debug, Default)]
pub struct PoolBuilder {
    pool: Pool,
    seen: HashSet<RecordKey>,
}

impl PoolBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the installed prefix as the top-priority repo.
    pub fn add_installed(&mut self, records: impl IntoIterator<Item = PackageRecord>) -> RepoId {
        let id = self.add_repo("installed", INSTALLED_PRIORITY, 0, records);
        self.pool.repos[id.0].installed = true;
        self.pool.installed = Some(id);
        id
    }

    /// Add a channel repo. Records already present are skipped.
    pub fn add_repo(
        &mut self,
        name: &str,
        priority: i32,
        subpriority: i32,
        records: impl IntoIterator<Item = PackageRecord>,
    ) -> RepoId {
        let repo_id = RepoId(self.pool.repos.len());
        let mut solvables = Vec::new();

        for record in records {
            if !self.seen.insert(record.key()) {
                continue;
            }
            let id = SolvableId(self.pool.solvables.len());
            self.pool
                .by_name
                .entry(record.name.clone())
                .or_default()
                .push(id);
            self.pool.solvables.push(Solvable {
                record,
                repo: repo_id,
            });
            solvables.push(id);
        }

        tracing::debug!("repo {name}: {} records", solvables.len());
        self.pool.repos.push(Repo {
            name: name.to_string(),
            priority,
            subpriority,
            installed: false,
            solvables,
        });
        repo_id
    }

    /// Freeze the pool, ordering each name's candidates by preference.
    pub fn finish(mut self) -> Pool {
        let mut by_name = std::mem::take(&mut self.pool.by_name);
        for ids in by_name.values_mut() {
            ids.sort_by(|a, b| self.pool.compare_preference(*a, *b));
        }
        self.pool.by_name = by_name;
        self.pool
    }
}

impl Pool {
    /// The record behind a handle.
    pub fn record(&self, id: SolvableId) -> &PackageRecord {
        &self.solvables[id.0].record
    }

    /// The repo a record belongs to.
    pub fn repo_of(&self, id: SolvableId) -> &Repo {
        &self.repos[self.solvables[id.0].repo.0]
    }

    /// A repo by handle.
    pub fn repo(&self, id: RepoId) -> &Repo {
        &self.repos[id.0]
    }

    /// Whether the record is part of the installed prefix.
    pub fn is_installed(&self, id: SolvableId) -> bool {
        Some(self.solvables[id.0].repo) == self.installed
    }

    /// Installed records, if an installed repo was added.
    pub fn installed(&self) -> impl Iterator<Item = SolvableId> + '_ {
        self.installed
            .into_iter()
            .flat_map(|repo| self.repos[repo.0].solvables.iter().copied())
    }

    /// The installed record for `name`.
    pub fn installed_by_name(&self, name: &str) -> Option<SolvableId> {
        self.installed().find(|id| self.record(*id).name == name)
    }

    /// Every record named `name`, most preferred first.
    pub fn candidates_by_name(&self, name: &str) -> &[SolvableId] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// Records matching `spec`, most preferred first.
    pub fn candidates(&self, spec: &MatchSpec) -> Vec<SolvableId> {
        self.candidates_by_name(&spec.name)
            .iter()
            .copied()
            .filter(|id| spec.matches(self.record(*id)))
            .collect()
    }

    /// Every package name in the pool.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_name.keys().map(String::as_str)
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.solvables.len()
    }

    /// Whether the pool holds no records.
    pub fn is_empty(&self) -> bool {
        self.solvables.is_empty()
    }

    /// `Less` means `a` is preferred over `b`.
    ///
    /// Repo priority dominates; version, build number and timestamp only
    /// break ties inside the same priority.
    fn compare_preference(&self, a: SolvableId, b: SolvableId) -> Ordering {
        let (ra, rb) = (self.repo_of(a), self.repo_of(b));
        let (pa, pb) = (self.record(a), self.record(b));
        rb.priority
            .cmp(&ra.priority)
            .then_with(|| rb.subpriority.cmp(&ra.subpriority))
            .then_with(|| pb.version.cmp(&pa.version))
            .then_with(|| pb.build_number.cmp(&pa.build_number))
            .then_with(|| pb.timestamp.cmp(&pa.timestamp))
            .then_with(|| a.cmp(&b))
    }
}
