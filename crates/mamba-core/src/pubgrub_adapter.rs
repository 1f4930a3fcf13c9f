//! PubGrub adapter for the package pool.
//!
//! Conda versions are not a lattice pubgrub can bump through, so each
//! package name's candidates are numbered by preference (`Candidate(0)` is
//! the most preferred) and match specs become unions of those ordinals.
//! The provider always offers the lowest admissible ordinal, which makes the
//! solver honour repo priority first and version second.
//!
//! Optional `constrains` entries are modelled with a proxy package per
//! constrained name. `foo@k` pins `Constraint(foo)` to `k`; a package that
//! constrains `foo` restricts the proxy to the matching ordinals plus one
//! extra "absent" ordinal, so the constraint is vacuous when `foo` is not
//! selected.

use crate::pool::{Pool, SolvableId};
use mamba_schema::MatchSpec;
use pubgrub::range::Range;
use pubgrub::solver::{Dependencies, DependencyConstraints, DependencyProvider};
use std::borrow::Borrow;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;

/// A package as seen by pubgrub.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum PkgId {
    /// The virtual root whose dependencies are the jobs.
    Root,
    /// A real package name.
    Package(String),
    /// Proxy for optional constraints on a package name.
    Constraint(String),
}

impl fmt::Display for PkgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "the request"),
            Self::Package(name) => write!(f, "{name}"),
            Self::Constraint(name) => write!(f, "{name} (constraint)"),
        }
    }
}

/// Preference ordinal of a candidate within its package name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Candidate(pub u32);

impl Candidate {
    /// An ordinal no package ever has; depending on it yields a clean
    /// "no versions" incompatibility instead of an empty range.
    pub const MISSING: Candidate = Candidate(u32::MAX - 1);
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl pubgrub::version::Version for Candidate {
    fn lowest() -> Self {
        Candidate(0)
    }

    fn bump(&self) -> Self {
        Candidate(self.0.saturating_add(1))
    }
}

/// Serves pool candidates to pubgrub.
#[derive(Debug)]
pub struct PoolProvider<'a> {
    pool: &'a Pool,
    candidates: HashMap<String, Vec<SolvableId>>,
    root: DependencyConstraints<PkgId, Candidate>,
    constrained: HashSet<String>,
    labels: RefCell<Vec<(PkgId, Range<Candidate>, String)>>,
}

impl<'a> PoolProvider<'a> {
    /// Create a provider.
    ///
    /// `candidates` holds the admissible records per name, most preferred
    /// first. Names absent from the map have no candidates.
    pub fn new(pool: &'a Pool, candidates: HashMap<String, Vec<SolvableId>>) -> Self {
        let mut provider = Self {
            pool,
            candidates,
            root: DependencyConstraints::default(),
            constrained: HashSet::new(),
            labels: RefCell::new(Vec::new()),
        };
        provider.constrained = provider.collect_constrained_names();
        provider
    }

    fn collect_constrained_names(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        for ids in self.candidates.values() {
            for id in ids {
                for c in &self.pool.record(*id).constrains {
                    if let Ok(spec) = c.parse::<MatchSpec>() {
                        names.insert(spec.name);
                    }
                }
            }
        }
        names
    }

    /// The pool being solved.
    pub fn pool(&self) -> &'a Pool {
        self.pool
    }

    /// Admissible candidates for `name`, most preferred first.
    pub fn candidates_of(&self, name: &str) -> &[SolvableId] {
        self.candidates.get(name).map_or(&[], Vec::as_slice)
    }

    /// The record selected as `version` of `name`.
    pub fn solvable(&self, name: &str, version: Candidate) -> Option<SolvableId> {
        self.candidates_of(name).get(version.0 as usize).copied()
    }

    /// Range of ordinals of `spec.name` that satisfy `spec`.
    pub fn range_for(&self, spec: &MatchSpec) -> Range<Candidate> {
        let mut range = Range::none();
        let mut run: Option<(u32, u32)> = None;
        for (i, id) in self.candidates_of(&spec.name).iter().enumerate() {
            let i = i as u32;
            if spec.matches(self.pool.record(*id)) {
                run = match run {
                    Some((start, end)) if end == i => Some((start, i + 1)),
                    Some((start, end)) => {
                        range = range.union(&Range::between(Candidate(start), Candidate(end)));
                        Some((i, i + 1))
                    }
                    None => Some((i, i + 1)),
                };
            }
        }
        if let Some((start, end)) = run {
            range = range.union(&Range::between(Candidate(start), Candidate(end)));
        }
        if range == Range::none() {
            Range::exact(Candidate::MISSING)
        } else {
            range
        }
    }

    /// Require `spec` from the root.
    pub fn require(&mut self, spec: &MatchSpec) {
        let range = self.range_for(spec);
        self.label(PkgId::Package(spec.name.clone()), &range, spec.as_str());
        let pkg = PkgId::Package(spec.name.clone());
        let merged = merge(self.root.get(&pkg), range);
        self.root.insert(pkg, merged);
    }

    /// Keep `name` present with any admissible candidate.
    pub fn keep(&mut self, name: &str) {
        let pkg = PkgId::Package(name.to_string());
        if !self.root.contains_key(&pkg) {
            let n = self.candidates_of(name).len() as u32;
            let range = if n == 0 {
                Range::exact(Candidate::MISSING)
            } else {
                Range::between(Candidate(0), Candidate(n))
            };
            self.root.insert(pkg, range);
        }
    }

    /// The human-readable spec recorded for a dependency edge, if any.
    pub fn label_of(&self, pkg: &PkgId, range: &Range<Candidate>) -> Option<String> {
        self.labels
            .borrow()
            .iter()
            .find(|(p, r, _)| p == pkg && r == range)
            .map(|(_, _, label)| label.clone())
    }

    fn label(&self, pkg: PkgId, range: &Range<Candidate>, text: &str) {
        let mut labels = self.labels.borrow_mut();
        if !labels.iter().any(|(p, r, _)| *p == pkg && r == range) {
            labels.push((pkg, range.clone(), text.to_string()));
        }
    }

    fn versions_of(&self, pkg: &PkgId) -> impl Iterator<Item = Candidate> + use<> {
        let n = match pkg {
            PkgId::Root => 1,
            PkgId::Package(name) => self.candidates_of(name).len() as u32,
            // The extra ordinal is "absent".
            PkgId::Constraint(name) => self.candidates_of(name).len() as u32 + 1,
        };
        (0..n).map(Candidate)
    }

    fn package_dependencies(
        &self,
        name: &str,
        version: Candidate,
    ) -> Dependencies<PkgId, Candidate> {
        let Some(id) = self.solvable(name, version) else {
            return Dependencies::Unknown;
        };
        let record = self.pool.record(id);
        let mut deps: DependencyConstraints<PkgId, Candidate> = DependencyConstraints::default();

        for dep in &record.depends {
            let Ok(spec) = dep.parse::<MatchSpec>() else {
                tracing::debug!("{}: unparseable dependency '{dep}'", record.dist_name());
                return Dependencies::Unknown;
            };
            if spec.name == name {
                continue;
            }
            let range = self.range_for(&spec);
            self.label(PkgId::Package(spec.name.clone()), &range, dep);
            let pkg = PkgId::Package(spec.name);
            let merged = merge(deps.get(&pkg), range);
            deps.insert(pkg, merged);
        }

        for constraint in &record.constrains {
            let Ok(spec) = constraint.parse::<MatchSpec>() else {
                continue;
            };
            if spec.name == name {
                continue;
            }
            let absent = Candidate(self.candidates_of(&spec.name).len() as u32);
            let matching = self.range_for(&spec);
            let range = if matching == Range::exact(Candidate::MISSING) {
                Range::exact(absent)
            } else {
                matching.union(&Range::exact(absent))
            };
            self.label(PkgId::Constraint(spec.name.clone()), &range, constraint);
            let pkg = PkgId::Constraint(spec.name);
            let merged = merge(deps.get(&pkg), range);
            deps.insert(pkg, merged);
        }

        if self.constrained.contains(name) {
            deps.insert(PkgId::Constraint(name.to_string()), Range::exact(version));
        }

        Dependencies::Known(deps)
    }
}

/// Intersect two requirements on one package, never producing an empty range.
fn merge(existing: Option<&Range<Candidate>>, range: Range<Candidate>) -> Range<Candidate> {
    let merged = match existing {
        Some(existing) => existing.intersection(&range),
        None => range,
    };
    if merged == Range::none() {
        Range::exact(Candidate::MISSING)
    } else {
        merged
    }
}

impl DependencyProvider<PkgId, Candidate> for PoolProvider<'_> {
    fn choose_package_version<T: Borrow<PkgId>, U: Borrow<Range<Candidate>>>(
        &self,
        potential_packages: impl Iterator<Item = (T, U)>,
    ) -> Result<(T, Option<Candidate>), Box<dyn Error>> {
        Ok(pubgrub::solver::choose_package_with_fewest_versions(
            |pkg: &PkgId| self.versions_of(pkg),
            potential_packages,
        ))
    }

    fn get_dependencies(
        &self,
        pkg: &PkgId,
        version: &Candidate,
    ) -> Result<Dependencies<PkgId, Candidate>, Box<dyn Error>> {
        Ok(match pkg {
            PkgId::Root => Dependencies::Known(self.root.clone()),
            PkgId::Package(name) => self.package_dependencies(name, *version),
            PkgId::Constraint(_) => Dependencies::Known(DependencyConstraints::default()),
        })
    }
}
