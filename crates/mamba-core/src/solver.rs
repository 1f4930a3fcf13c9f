//! Dependency solving.
//!
//! Jobs and the installed state are turned into root requirements for
//! [`PoolProvider`] and handed to pubgrub. Solving is CPU-bound and
//! synchronous; async callers run [`solve`] on a blocking thread.

use crate::pool::{Pool, SolvableId};
use crate::pubgrub_adapter::{Candidate, PkgId, PoolProvider};
use mamba_schema::{MatchSpec, PackageRecord};
use pubgrub::error::PubGrubError;
use pubgrub::range::Range;
use pubgrub::report::{DerivationTree, External};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// What a job asks the solver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Make a matching package present.
    Install,
    /// Like `Install`, but an older version may replace the installed one.
    AllowDowngradeInstall,
    /// Make the named package absent.
    Remove,
}

/// One request to the solver.
#[derive(Debug, Clone)]
pub struct SolverJob {
    /// The job kind.
    pub kind: JobKind,
    /// The spec it applies to.
    pub spec: MatchSpec,
}

impl SolverJob {
    /// An install job.
    pub fn install(spec: MatchSpec) -> Self {
        Self {
            kind: JobKind::Install,
            spec,
        }
    }

    /// A remove job.
    pub fn remove(spec: MatchSpec) -> Self {
        Self {
            kind: JobKind::Remove,
            spec,
        }
    }
}

/// Solver switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverFlags {
    /// Whether installed packages may be replaced by older versions.
    pub allow_downgrade: bool,
}

impl Default for SolverFlags {
    fn default() -> Self {
        Self {
            allow_downgrade: true,
        }
    }
}

/// Why solving failed.
#[derive(Debug, Error)]
pub enum SolveError {
    /// No package set satisfies the request.
    #[error(
        "could not satisfy the requested specs ({}):\n  - {}",
        .specs.join(", "),
        .explanation.join("\n  - ")
    )]
    Unsatisfiable {
        /// The requested specs involved in the conflict.
        specs: Vec<String>,
        /// One line per fact in the derivation.
        explanation: Vec<String>,
    },
    /// The solver itself failed.
    #[error("solver failure: {0}")]
    Internal(String),
}

/// A consistent package set, dependencies before dependents.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    solvables: Vec<SolvableId>,
}

impl Solution {
    /// Selected records in dependency order.
    pub fn solvables(&self) -> &[SolvableId] {
        &self.solvables
    }

    /// Selected records cloned out of the pool.
    pub fn records(&self, pool: &Pool) -> Vec<PackageRecord> {
        self.solvables.iter().map(|id| pool.record(*id).clone()).collect()
    }
}

/// Solve `jobs` against `pool`.
///
/// Every installed package that is not removed stays present (with any
/// admissible candidate, the installed one preferred).
///
/// # Errors
///
/// Returns [`SolveError::Unsatisfiable`] with the conflicting specs when no
/// solution exists.
pub fn solve(pool: &Pool, jobs: &[SolverJob], flags: SolverFlags) -> Result<Solution, SolveError> {
    let removed: HashSet<&str> = jobs
        .iter()
        .filter(|j| j.kind == JobKind::Remove)
        .map(|j| j.spec.name.as_str())
        .collect();
    let may_downgrade: HashSet<&str> = jobs
        .iter()
        .filter(|j| j.kind == JobKind::AllowDowngradeInstall)
        .map(|j| j.spec.name.as_str())
        .collect();

    let mut candidates = HashMap::new();
    for name in pool.names() {
        if removed.contains(name) {
            continue;
        }
        let mut ids = pool.candidates_by_name(name).to_vec();
        if !flags.allow_downgrade && !may_downgrade.contains(name) {
            if let Some(installed) = pool.installed_by_name(name) {
                let floor = pool.record(installed).version.clone();
                ids.retain(|id| pool.record(*id).version >= floor);
            }
        }
        candidates.insert(name.to_string(), ids);
    }

    let mut provider = PoolProvider::new(pool, candidates);
    let mut requested: Vec<(String, String)> = Vec::new();
    for job in jobs {
        if job.kind != JobKind::Remove {
            provider.require(&job.spec);
            requested.push((job.spec.name.clone(), job.spec.to_string()));
        }
    }
    for id in pool.installed() {
        let name = &pool.record(id).name;
        if !removed.contains(name.as_str()) {
            provider.keep(name);
        }
    }

    tracing::debug!("solving {} jobs over {} records", jobs.len(), pool.len());
    match pubgrub::solver::resolve(&provider, PkgId::Root, Candidate(0)) {
        Ok(selected) => {
            let chosen: Vec<SolvableId> = selected
                .into_iter()
                .filter_map(|(pkg, version)| match pkg {
                    PkgId::Package(name) => provider.solvable(&name, version),
                    _ => None,
                })
                .collect();
            Ok(Solution {
                solvables: dependency_order(pool, chosen),
            })
        }
        Err(PubGrubError::NoSolution(tree)) => Err(explain(&tree, &provider, &requested)),
        Err(other) => Err(SolveError::Internal(other.to_string())),
    }
}

fn dependency_name(dep: &str) -> Option<String> {
    dep.parse::<MatchSpec>().ok().map(|s| s.name)
}

/// Kahn ordering with alphabetical tie-break; cycles are broken by name.
fn dependency_order(pool: &Pool, chosen: Vec<SolvableId>) -> Vec<SolvableId> {
    let by_name: BTreeMap<String, SolvableId> = chosen
        .into_iter()
        .map(|id| (pool.record(id).name.clone(), id))
        .collect();
    let edges: BTreeMap<&str, BTreeSet<String>> = by_name
        .iter()
        .map(|(name, id)| {
            let deps = pool
                .record(*id)
                .depends
                .iter()
                .filter_map(|d| dependency_name(d))
                .filter(|d| d != name && by_name.contains_key(d))
                .collect();
            (name.as_str(), deps)
        })
        .collect();

    let mut placed: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(by_name.len());
    while order.len() < by_name.len() {
        let mut ready: Vec<&str> = edges
            .iter()
            .filter(|(name, deps)| {
                !placed.contains(*name) && deps.iter().all(|d| placed.contains(d.as_str()))
            })
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            if let Some(first) = edges.keys().find(|n| !placed.contains(*n)) {
                tracing::debug!("dependency cycle through {first}");
                ready.push(first);
            }
        }
        for name in ready {
            placed.insert(name);
            order.push(by_name[name]);
        }
    }
    order
}

fn collect_externals<'t>(
    tree: &'t DerivationTree<PkgId, Candidate>,
    out: &mut Vec<&'t External<PkgId, Candidate>>,
) {
    match tree {
        DerivationTree::External(e) => out.push(e),
        DerivationTree::Derived(d) => {
            collect_externals(&d.cause1, out);
            collect_externals(&d.cause2, out);
        }
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn explain(
    tree: &DerivationTree<PkgId, Candidate>,
    provider: &PoolProvider<'_>,
    requested: &[(String, String)],
) -> SolveError {
    let mut externals = Vec::new();
    collect_externals(tree, &mut externals);

    let mut specs = Vec::new();
    let mut explanation = Vec::new();
    for external in externals {
        if let External::FromDependencyOf(PkgId::Root, _, PkgId::Package(name), _) = external {
            let asked: Vec<&String> = requested
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, spec)| spec)
                .collect();
            if asked.is_empty() {
                push_unique(&mut specs, format!("{name} (installed)"));
            }
            for spec in asked {
                push_unique(&mut specs, spec.clone());
            }
        }
        let line = match external {
            External::NotRoot(..) => continue,
            External::NoVersions(pkg, range) => {
                format!("nothing provides {}", describe(provider, pkg, range))
            }
            External::UnavailableDependencies(pkg, range) => {
                format!("{} has unusable dependencies", describe(provider, pkg, range))
            }
            External::FromDependencyOf(p1, r1, p2, r2) => format!(
                "{} requires {}",
                describe(provider, p1, r1),
                describe(provider, p2, r2)
            ),
        };
        push_unique(&mut explanation, line);
    }

    SolveError::Unsatisfiable { specs, explanation }
}

fn describe(provider: &PoolProvider<'_>, pkg: &PkgId, range: &Range<Candidate>) -> String {
    if let Some(label) = provider.label_of(pkg, range) {
        return label;
    }
    let name = match pkg {
        PkgId::Root => return "the request".to_string(),
        PkgId::Constraint(name) => return format!("constraint on {name}"),
        PkgId::Package(name) => name,
    };
    if *range == Range::exact(Candidate::MISSING) {
        return format!("{name} satisfying all requirements");
    }

    let all = provider.candidates_of(name);
    let mut versions: Vec<String> = Vec::new();
    for (i, id) in all.iter().enumerate() {
        if range.contains(&Candidate(i as u32)) {
            push_unique(&mut versions, provider.pool().record(*id).version.to_string());
        }
    }
    match versions.len() {
        0 => name.clone(),
        n if n <= 4 => format!("{name} [{}]", versions.join("|")),
        n => format!("{name} [{}|... {} more]", versions[..3].join("|"), n - 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolBuilder;
    use crate::pool::tests::rec;

    fn install(specs: &[&str]) -> Vec<SolverJob> {
        specs
            .iter()
            .map(|s| SolverJob::install(s.parse().unwrap()))
            .collect()
    }

    fn names(pool: &Pool, solution: &Solution) -> Vec<String> {
        solution
            .solvables()
            .iter()
            .map(|id| pool.record(*id).dist_name())
            .collect()
    }

    fn channel_pool(records: Vec<PackageRecord>) -> Pool {
        let mut builder = PoolBuilder::new();
        builder.add_repo("c", 1, 0, records);
        builder.finish()
    }

    #[test]
    fn test_dependencies_come_first() {
        let pool = channel_pool(vec![
            rec("app", "1.0", "c", &["lib >=2", "python"]),
            rec("lib", "2.1", "c", &["python"]),
            rec("lib", "1.0", "c", &[]),
            rec("python", "3.11", "c", &[]),
        ]);
        let solution = solve(&pool, &install(&["app"]), SolverFlags::default()).unwrap();
        assert_eq!(
            names(&pool, &solution),
            ["python-3.11-0", "lib-2.1-0", "app-1.0-0"]
        );
    }

    #[test]
    fn test_highest_version_within_repo() {
        let pool = channel_pool(vec![rec("foo", "1.0", "c", &[]), rec("foo", "1.2", "c", &[])]);
        let solution = solve(&pool, &install(&["foo"]), SolverFlags::default()).unwrap();
        assert_eq!(names(&pool, &solution), ["foo-1.2-0"]);
    }

    #[test]
    fn test_priority_tie_break() {
        let mut builder = PoolBuilder::new();
        builder.add_repo("low", 1, 0, vec![rec("foo", "1.0", "low", &[])]);
        builder.add_repo("high", 2, 0, vec![rec("foo", "1.0", "high", &[])]);
        let pool = builder.finish();

        let solution = solve(&pool, &install(&["foo==1.0"]), SolverFlags::default()).unwrap();
        assert_eq!(pool.record(solution.solvables()[0]).channel, "high");
    }

    #[test]
    fn test_conflict_names_both_specs() {
        let pool = channel_pool(vec![
            rec("python", "2.7", "c", &[]),
            rec("python", "3.8", "c", &[]),
            rec("pkg-needs-python3", "1.0", "c", &["python >=3"]),
        ]);
        let err = solve(
            &pool,
            &install(&["python=2.7", "pkg-needs-python3"]),
            SolverFlags::default(),
        )
        .unwrap_err();

        match &err {
            SolveError::Unsatisfiable { specs, explanation } => {
                assert!(specs.contains(&"python=2.7".to_string()), "{specs:?}");
                assert!(specs.contains(&"pkg-needs-python3".to_string()), "{specs:?}");
                assert!(!explanation.is_empty());
            }
            SolveError::Internal(e) => panic!("unexpected internal error: {e}"),
        }
        assert!(err.to_string().contains("python=2.7"));
    }

    #[test]
    fn test_missing_package_is_unsatisfiable() {
        let pool = channel_pool(vec![rec("foo", "1.0", "c", &[])]);
        let err = solve(&pool, &install(&["nope"]), SolverFlags::default()).unwrap_err();
        match err {
            SolveError::Unsatisfiable { specs, explanation } => {
                assert_eq!(specs, ["nope"]);
                assert!(explanation.iter().any(|l| l.contains("nothing provides nope")));
            }
            SolveError::Internal(e) => panic!("unexpected internal error: {e}"),
        }
    }

    #[test]
    fn test_missing_dependency_is_unsatisfiable() {
        let pool = channel_pool(vec![rec("foo", "1.0", "c", &["ghost >=1"])]);
        let err = solve(&pool, &install(&["foo"]), SolverFlags::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ghost >=1"), "{message}");
    }

    #[test]
    fn test_constrains_bind_only_when_present() {
        let mut a = rec("a", "1.0", "c", &[]);
        a.constrains = vec!["b <2".to_string()];
        let pool = channel_pool(vec![
            a,
            rec("b", "1.0", "c", &[]),
            rec("b", "2.0", "c", &[]),
        ]);

        let solution = solve(&pool, &install(&["a", "b"]), SolverFlags::default()).unwrap();
        let got = names(&pool, &solution);
        assert!(got.contains(&"b-1.0-0".to_string()), "{got:?}");

        let solution = solve(&pool, &install(&["a"]), SolverFlags::default()).unwrap();
        assert_eq!(names(&pool, &solution), ["a-1.0-0"]);
    }

    #[test]
    fn test_installed_packages_are_kept_and_preferred() {
        let mut builder = PoolBuilder::new();
        builder.add_installed(vec![rec("foo", "1.0", "c", &[]), rec("keep", "0.1", "c", &[])]);
        builder.add_repo("c", 1, 0, vec![rec("foo", "2.0", "c", &[]), rec("bar", "1.0", "c", &[])]);
        let pool = builder.finish();

        let solution = solve(&pool, &install(&["foo", "bar"]), SolverFlags::default()).unwrap();
        let got = names(&pool, &solution);
        assert_eq!(got, ["bar-1.0-0", "foo-1.0-0", "keep-0.1-0"]);
    }

    #[test]
    fn test_downgrade_needs_permission() {
        let mut builder = PoolBuilder::new();
        builder.add_installed(vec![rec("foo", "2.0", "c", &[])]);
        builder.add_repo("c", 1, 0, vec![rec("foo", "1.0", "c", &[])]);
        let pool = builder.finish();
        let strict = SolverFlags {
            allow_downgrade: false,
        };

        assert!(solve(&pool, &install(&["foo<2"]), strict).is_err());

        let job = SolverJob {
            kind: JobKind::AllowDowngradeInstall,
            spec: "foo<2".parse().unwrap(),
        };
        let solution = solve(&pool, &[job], strict).unwrap();
        assert_eq!(names(&pool, &solution), ["foo-1.0-0"]);

        let solution = solve(&pool, &install(&["foo<2"]), SolverFlags::default()).unwrap();
        assert_eq!(names(&pool, &solution), ["foo-1.0-0"]);
    }

    #[test]
    fn test_remove_job_drops_package() {
        let mut builder = PoolBuilder::new();
        builder.add_installed(vec![rec("foo", "1.0", "c", &[]), rec("bar", "1.0", "c", &[])]);
        let pool = builder.finish();

        let jobs = [SolverJob::remove("bar".parse().unwrap())];
        let solution = solve(&pool, &jobs, SolverFlags::default()).unwrap();
        assert_eq!(names(&pool, &solution), ["foo-1.0-0"]);
    }

    #[test]
    fn test_removing_a_dependency_conflicts() {
        let mut builder = PoolBuilder::new();
        builder.add_installed(vec![rec("app", "1.0", "c", &["lib"]), rec("lib", "1.0", "c", &[])]);
        let pool = builder.finish();

        let jobs = [SolverJob::remove("lib".parse().unwrap())];
        assert!(matches!(
            solve(&pool, &jobs, SolverFlags::default()),
            Err(SolveError::Unsatisfiable { .. })
        ));
    }
}
