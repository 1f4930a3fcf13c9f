//! Match specifications (`numpy >=1.20,<2`, `conda-forge::python=3.11`, ...).

use crate::record::PackageRecord;
use crate::version::{Version, VersionError};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Errors produced when parsing a match spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchSpecError {
    /// Nothing to parse.
    #[error("empty match spec")]
    Empty,
    /// The package name is missing or contains forbidden characters.
    #[error("invalid package name in '{0}'")]
    InvalidName(String),
    /// The version part could not be parsed.
    #[error("invalid version in '{spec}': {source}")]
    InvalidVersion {
        /// The full spec.
        spec: String,
        /// Underlying parse error.
        #[source]
        source: VersionError,
    },
    /// The build part is not a valid glob.
    #[error("invalid build pattern in '{0}'")]
    InvalidBuild(String),
    /// Extra whitespace-separated tokens after the build string.
    #[error("unexpected trailing text in '{0}'")]
    Trailing(String),
}

static OPERATOR_SPACING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(==|!=|>=|<=|~=|[=<>,|])\s*").expect("operator pattern is a valid regex")
});

/// A predicate over versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// Matches everything (`*` or no version given).
    Any,
    /// `==1.2`
    Exact(Version),
    /// `!=1.2`
    NotEqual(Version),
    /// `>1.2`
    Greater(Version),
    /// `>=1.2`
    GreaterEqual(Version),
    /// `<1.2`
    Less(Version),
    /// `<=1.2`
    LessEqual(Version),
    /// `1.2.*` or `=1.2`
    StartsWith(Version),
    /// `!=1.2.*`
    NotStartsWith(Version),
    /// `~=1.2.3`, i.e. `>=1.2.3,1.2.*`
    Compatible(Version),
    /// Comma-joined conjunction.
    All(Vec<VersionSpec>),
    /// Pipe-joined disjunction.
    AnyOf(Vec<VersionSpec>),
}

impl VersionSpec {
    /// Parse a version expression.
    ///
    /// `|` binds looser than `,`, so `>=1,<2|3.*` is `(>=1 and <2) or 3.*`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if any atom is not a valid version.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let input = input.trim();
        if input.is_empty() || input == "*" {
            return Ok(Self::Any);
        }
        if input.contains('|') {
            return input
                .split('|')
                .map(Self::parse)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::AnyOf);
        }
        if input.contains(',') {
            return input
                .split(',')
                .map(Self::parse)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::All);
        }
        Self::parse_atom(input)
    }

    fn parse_atom(atom: &str) -> Result<Self, VersionError> {
        const OPERATORS: [&str; 8] = ["==", "!=", ">=", "<=", "~=", ">", "<", "="];

        let (op, rest) = OPERATORS
            .iter()
            .find_map(|op| atom.strip_prefix(op).map(|rest| (*op, rest.trim())))
            .unwrap_or(("", atom));

        let glob = rest.ends_with('*');
        let bare = rest.trim_end_matches('*').trim_end_matches('.');
        if bare.is_empty() {
            return Ok(match op {
                "!=" => Self::NotStartsWith(Version::from_str("0")?),
                _ => Self::Any,
            });
        }
        let version: Version = bare.parse()?;

        Ok(match op {
            "==" if glob => Self::StartsWith(version),
            "==" => Self::Exact(version),
            "!=" if glob => Self::NotStartsWith(version),
            "!=" => Self::NotEqual(version),
            ">=" => Self::GreaterEqual(version),
            "<=" => Self::LessEqual(version),
            ">" => Self::Greater(version),
            "<" => Self::Less(version),
            "~=" => Self::Compatible(version),
            "=" => Self::StartsWith(version),
            _ if glob => Self::StartsWith(version),
            _ => Self::Exact(version),
        })
    }

    /// Whether `version` satisfies this predicate.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => version == v,
            Self::NotEqual(v) => version != v,
            Self::Greater(v) => version > v,
            Self::GreaterEqual(v) => version >= v,
            Self::Less(v) => version < v,
            Self::LessEqual(v) => version <= v,
            Self::StartsWith(v) => version.starts_with(v),
            Self::NotStartsWith(v) => !version.starts_with(v),
            Self::Compatible(v) => {
                let n = v.component_count();
                version >= v && (n < 2 || version.starts_with(&v.truncated(n - 1)))
            }
            Self::All(specs) => specs.iter().all(|s| s.matches(version)),
            Self::AnyOf(specs) => specs.iter().any(|s| s.matches(version)),
        }
    }

    /// Whether this predicate matches every version.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, specs: &[VersionSpec], sep: &str| {
            for (i, spec) in specs.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                write!(f, "{spec}")?;
            }
            Ok(())
        };
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(v) => write!(f, "=={v}"),
            Self::NotEqual(v) => write!(f, "!={v}"),
            Self::Greater(v) => write!(f, ">{v}"),
            Self::GreaterEqual(v) => write!(f, ">={v}"),
            Self::Less(v) => write!(f, "<{v}"),
            Self::LessEqual(v) => write!(f, "<={v}"),
            Self::StartsWith(v) => write!(f, "{v}.*"),
            Self::NotStartsWith(v) => write!(f, "!={v}.*"),
            Self::Compatible(v) => write!(f, "~={v}"),
            Self::All(specs) => join(f, specs, ","),
            Self::AnyOf(specs) => join(f, specs, "|"),
        }
    }
}

/// Predicate over build strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMatcher {
    /// Literal build string.
    Exact(String),
    /// Glob such as `py38*`.
    Glob(glob::Pattern),
}

impl BuildMatcher {
    fn parse(input: &str) -> Result<Self, MatchSpecError> {
        if input.contains(['*', '?', '[']) {
            glob::Pattern::new(input)
                .map(Self::Glob)
                .map_err(|_| MatchSpecError::InvalidBuild(input.to_string()))
        } else {
            Ok(Self::Exact(input.to_string()))
        }
    }

    /// Whether `build` satisfies this matcher.
    pub fn matches(&self, build: &str) -> bool {
        match self {
            Self::Exact(b) => b == build,
            Self::Glob(p) => p.matches(build),
        }
    }
}

/// A parsed match spec.
///
/// # Example
///
/// ```
/// use mamba_schema::MatchSpec;
///
/// let spec: MatchSpec = "conda-forge::numpy >=1.20,<2".parse().unwrap();
/// assert_eq!(spec.name, "numpy");
/// assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpec {
    /// Lowercased package name.
    pub name: String,
    /// Version predicate.
    pub version: VersionSpec,
    /// Optional build string predicate.
    pub build: Option<BuildMatcher>,
    /// Optional channel restriction (name or URL).
    pub channel: Option<String>,
    source: String,
}

impl MatchSpec {
    /// A spec matching every version of `name`.
    pub fn any_of(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            version: VersionSpec::Any,
            build: None,
            channel: None,
            source: name.to_lowercase(),
        }
    }

    /// The spec as the user wrote it.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `record` satisfies every part of this spec.
    pub fn matches(&self, record: &PackageRecord) -> bool {
        record.name == self.name
            && self.version.matches(&record.version)
            && self.build.as_ref().is_none_or(|b| b.matches(&record.build))
            && self.channel.as_deref().is_none_or(|c| channel_matches(c, &record.channel))
    }
}

fn channel_matches(wanted: &str, channel: &str) -> bool {
    let wanted = wanted.trim_end_matches('/');
    let channel = channel.trim_end_matches('/');
    channel == wanted || channel.ends_with(&format!("/{wanted}"))
}

impl FromStr for MatchSpec {
    type Err = MatchSpecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let source = input.trim();
        if source.is_empty() {
            return Err(MatchSpecError::Empty);
        }
        let invalid_version = |source_err| MatchSpecError::InvalidVersion {
            spec: source.to_string(),
            source: source_err,
        };

        let (channel, rest) = match source.rsplit_once("::") {
            Some((channel, rest)) => (Some(channel.trim().to_string()), rest),
            None => (None, source),
        };

        let normalized = OPERATOR_SPACING.replace_all(rest.trim(), "$1");
        let mut tokens = normalized.split_whitespace();
        let head = tokens.next().ok_or(MatchSpecError::Empty)?;

        let split_at = head.find(['=', '<', '>', '!', '~']).unwrap_or(head.len());
        let (name, expr) = head.split_at(split_at);
        let name = name.to_lowercase();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(MatchSpecError::InvalidName(source.to_string()));
        }

        let mut build = None;
        let version = if expr.starts_with('=') && !expr.starts_with("==") {
            // `name=1.2` is fuzzy, `name=1.2=build` pins the version.
            let body = &expr[1..];
            match body.split_once('=') {
                Some((version, build_str)) => {
                    build = Some(BuildMatcher::parse(build_str)?);
                    let glob = version.ends_with('*');
                    let version: Version = version
                        .trim_end_matches('*')
                        .trim_end_matches('.')
                        .parse()
                        .map_err(invalid_version)?;
                    if glob {
                        VersionSpec::StartsWith(version)
                    } else {
                        VersionSpec::Exact(version)
                    }
                }
                None if body.contains([',', '|', '<', '>', '!', '~']) => {
                    VersionSpec::parse(body).map_err(invalid_version)?
                }
                None => VersionSpec::parse_atom(&format!("={body}")).map_err(invalid_version)?,
            }
        } else if expr.is_empty() {
            match tokens.next() {
                Some(version) => VersionSpec::parse(version).map_err(invalid_version)?,
                None => VersionSpec::Any,
            }
        } else {
            VersionSpec::parse(expr).map_err(invalid_version)?
        };

        if let Some(build_str) = tokens.next() {
            if build.is_some() {
                return Err(MatchSpecError::Trailing(source.to_string()));
            }
            build = Some(BuildMatcher::parse(build_str)?);
        }
        if tokens.next().is_some() {
            return Err(MatchSpecError::Trailing(source.to_string()));
        }

        Ok(Self {
            name,
            version,
            build,
            channel,
            source: source.to_string(),
        })
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn record(name: &str, version: &str, build: &str, channel: &str) -> PackageRecord {
        let mut r = PackageRecord::new(name, v(version), build);
        r.channel = channel.to_string();
        r
    }

    #[test]
    fn test_bare_name() {
        let s = spec("NumPy");
        assert_eq!(s.name, "numpy");
        assert!(s.version.is_any());
        assert!(s.build.is_none());
    }

    #[test]
    fn test_single_equals_is_fuzzy() {
        let s = spec("python=3.8");
        assert!(s.version.matches(&v("3.8.10")));
        assert!(s.version.matches(&v("3.8")));
        assert!(!s.version.matches(&v("3.9.0")));
        assert!(!s.version.matches(&v("3.80")));
    }

    #[test]
    fn test_double_equals_is_exact() {
        let s = spec("python==3.8");
        assert!(s.version.matches(&v("3.8.0")));
        assert!(!s.version.matches(&v("3.8.1")));
    }

    #[test]
    fn test_version_and_build_pinned() {
        let s = spec("numpy=1.21.0=py39h1234_0");
        assert_eq!(s.version, VersionSpec::Exact(v("1.21.0")));
        assert!(s.matches(&record("numpy", "1.21.0", "py39h1234_0", "")));
        assert!(!s.matches(&record("numpy", "1.21.0", "py38h1234_0", "")));
    }

    #[test]
    fn test_space_separated_forms() {
        let s = spec("numpy 1.21.* py39*");
        assert!(s.matches(&record("numpy", "1.21.5", "py39habc_0", "")));
        assert!(!s.matches(&record("numpy", "1.21.5", "py38habc_0", "")));

        let s = spec("numpy >= 1.20 , < 2");
        assert!(s.version.matches(&v("1.26")));
        assert!(!s.version.matches(&v("2.0")));
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        let s = spec("foo >=1.0,<2|3.*");
        assert!(s.version.matches(&v("1.5")));
        assert!(s.version.matches(&v("3.1")));
        assert!(!s.version.matches(&v("2.5")));
    }

    #[test]
    fn test_compatible_release() {
        let s = spec("foo~=1.4.5");
        assert!(s.version.matches(&v("1.4.5")));
        assert!(s.version.matches(&v("1.4.9")));
        assert!(!s.version.matches(&v("1.5.0")));
        assert!(!s.version.matches(&v("1.4.4")));
    }

    #[test]
    fn test_not_equal_glob() {
        let s = spec("foo!=1.*");
        assert!(!s.version.matches(&v("1.3")));
        assert!(s.version.matches(&v("2.0")));
    }

    #[test]
    fn test_channel_prefix() {
        let s = spec("conda-forge::libzlib");
        assert_eq!(s.channel.as_deref(), Some("conda-forge"));
        assert!(s.matches(&record("libzlib", "1.3", "0", "conda-forge")));
        assert!(s.matches(&record(
            "libzlib",
            "1.3",
            "0",
            "https://conda.anaconda.org/conda-forge"
        )));
        assert!(!s.matches(&record("libzlib", "1.3", "0", "defaults")));
    }

    #[test]
    fn test_display_keeps_input() {
        assert_eq!(spec("python=2.7").to_string(), "python=2.7");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<MatchSpec>(), Err(MatchSpecError::Empty));
        assert!(matches!(
            ">=1.0".parse::<MatchSpec>(),
            Err(MatchSpecError::InvalidName(_))
        ));
        assert!(matches!(
            "foo 1.0 build extra".parse::<MatchSpec>(),
            Err(MatchSpecError::Trailing(_))
        ));
        assert!(matches!(
            "foo ==1.0$".parse::<MatchSpec>(),
            Err(MatchSpecError::InvalidVersion { .. })
        ));
    }
}
