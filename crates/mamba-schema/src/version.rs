//! Conda version ordering.
//!
//! A version string is split into an optional epoch (`1!`), the main version
//! and an optional local version (`+local`). Each part is split into
//! components on `.` (with `_` and `-` treated as separators), and each
//! component into alternating numeric and alphabetic segments:
//!
//! ```text
//! 1.2.0rc1  ->  [[1], [2], [0, "rc", 1]]
//! 1!2.0     ->  epoch 1, [[2], [0]]
//! ```
//!
//! Segments compare as `dev` < other strings < numbers < `post`, and missing
//! segments are padded with `0`, so `1.0 == 1.0.0` and `1.0a < 1.0`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing a version string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// The input was empty or whitespace.
    #[error("empty version string")]
    Empty,
    /// The input contained a character outside `[A-Za-z0-9._+!-]`.
    #[error("invalid character '{ch}' in version '{version}'")]
    InvalidCharacter {
        /// The full input.
        version: String,
        /// The offending character.
        ch: char,
    },
    /// The epoch before `!` was not an integer.
    #[error("invalid epoch in version '{0}'")]
    InvalidEpoch(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    // Variant order is the comparison order.
    Str(String),
    Num(u64),
    Post,
}

static ZERO: Segment = Segment::Num(0);

type Component = Vec<Segment>;

/// A parsed conda version.
///
/// Equality follows the ordering, so `Version::from_str("1.0")` equals
/// `Version::from_str("1.0.0")`. Use [`Version::as_str`] when the exact
/// spelling matters.
#[derive(Debug, Clone)]
pub struct Version {
    source: String,
    epoch: u64,
    components: Vec<Component>,
    local: Vec<Component>,
}

impl Version {
    /// The version exactly as it was written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of components in the main version (`1.2.3` has three).
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Whether `self` lies inside the `prefix.*` family.
    ///
    /// Matching is component-wise: `1.10` starts with `1.1`? No. `1.1.3`
    /// starts with `1.1`? Yes.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        if self.epoch != prefix.epoch {
            return false;
        }
        prefix.components.iter().enumerate().all(|(i, want)| {
            let have = self.components.get(i).map_or(&[][..], Vec::as_slice);
            cmp_component(have, want) == Ordering::Equal
        })
    }

    /// The version truncated to its first `n` components, keeping the epoch.
    ///
    /// Used to build the upper bound of a compatible-release (`~=`) spec.
    pub fn truncated(&self, n: usize) -> Version {
        let mut components = self.components.clone();
        components.truncate(n.max(1));
        let main = self
            .source
            .rsplit_once('!')
            .map_or(self.source.as_str(), |(_, rest)| rest);
        let main = main.split_once('+').map_or(main, |(m, _)| m);
        let rendered: Vec<&str> = main.split(['.', '_', '-']).take(n.max(1)).collect();
        let mut source = rendered.join(".");
        if self.epoch != 0 {
            source = format!("{}!{source}", self.epoch);
        }
        Version {
            source,
            epoch: self.epoch,
            components,
            local: Vec::new(),
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim();
        if source.is_empty() {
            return Err(VersionError::Empty);
        }
        let lowered = source.to_lowercase();

        let (epoch, rest) = match lowered.split_once('!') {
            Some((epoch, rest)) => (
                epoch
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidEpoch(source.to_string()))?,
                rest,
            ),
            None => (0, lowered.as_str()),
        };

        let (main, local) = match rest.split_once('+') {
            Some((main, local)) => (main, Some(local)),
            None => (rest, None),
        };

        let components = parse_components(main, source)?;
        let local = match local {
            Some(local) => parse_components(local, source)?,
            None => Vec::new(),
        };

        Ok(Version {
            source: source.to_string(),
            epoch,
            components,
            local,
        })
    }
}

fn parse_components(part: &str, source: &str) -> Result<Vec<Component>, VersionError> {
    // A dash is only a separator when no underscore is present.
    let normalized = if part.contains('_') {
        part.replace('_', ".")
    } else {
        part.replace('-', ".")
    };

    normalized
        .split('.')
        .map(|raw| parse_component(raw, source))
        .collect()
}

fn parse_component(raw: &str, source: &str) -> Result<Component, VersionError> {
    if raw.is_empty() {
        return Ok(vec![Segment::Str("_".to_string())]);
    }

    let mut segments = Vec::new();
    let mut chars = raw.chars().peekable();
    while let Some(&first) = chars.peek() {
        let mut run = String::new();
        let numeric = first.is_ascii_digit();
        while let Some(&ch) = chars.peek() {
            if !ch.is_ascii_alphanumeric() {
                return Err(VersionError::InvalidCharacter {
                    version: source.to_string(),
                    ch,
                });
            }
            if ch.is_ascii_digit() != numeric {
                break;
            }
            run.push(ch);
            chars.next();
        }
        segments.push(if numeric {
            Segment::Num(run.parse().unwrap_or(u64::MAX))
        } else {
            match run.as_str() {
                "post" => Segment::Post,
                // Uppercase sorts before every lowercase word.
                "dev" => Segment::Str("DEV".to_string()),
                _ => Segment::Str(run),
            }
        });
    }

    if !matches!(segments.first(), Some(Segment::Num(_))) {
        segments.insert(0, Segment::Num(0));
    }
    Ok(segments)
}

fn cmp_component(a: &[Segment], b: &[Segment]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let left = a.get(i).unwrap_or(&ZERO);
        let right = b.get(i).unwrap_or(&ZERO);
        match left.cmp(right) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

fn cmp_components(a: &[Component], b: &[Component]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let left = a.get(i).map_or(&[][..], Vec::as_slice);
        let right = b.get(i).map_or(&[][..], Vec::as_slice);
        match cmp_component(left, right) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_components(&self.components, &other.components))
            .then_with(|| cmp_components(&self.local, &other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.source
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_conda_ordering_chain() {
        let chain = [
            "0.4",
            "0.4.0",
            "0.4.1.rc",
            "0.4.1.RC",
            "0.4.1",
            "0.5a1",
            "0.5b3",
            "0.5C1",
            "0.5",
            "0.9.6",
            "0.960923",
            "1.0",
            "1.1dev1",
            "1.1a1",
            "1.1.0dev1",
            "1.1.a1",
            "1.1.0rc1",
            "1.1.0",
            "1.1.0post1",
            "1.1post1",
            "1996.07.12",
            "1!0.4.1",
            "1!3.1.1.6",
            "2!0.4.1",
        ];
        for pair in chain.windows(2) {
            let (a, b) = (v(pair[0]), v(pair[1]));
            assert!(a <= b, "{a} should sort at or before {b}");
        }
    }

    #[test]
    fn test_zero_padding_equality() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1"), v("1.0.0.0"));
        assert_ne!(v("1.0"), v("1.0.1"));
    }

    #[test]
    fn test_dev_sorts_lowest() {
        assert!(v("1.0dev") < v("1.0a"));
        assert!(v("1.0a") < v("1.0"));
        assert!(v("1.0") < v("1.0post"));
    }

    #[test]
    fn test_underscore_and_dash_separators() {
        assert_eq!(v("1_2_3"), v("1.2.3"));
        assert_eq!(v("1-2-3"), v("1.2.3"));
    }

    #[test]
    fn test_local_version_breaks_ties() {
        assert!(v("1.0+1") > v("1.0"));
        assert!(v("1.0+2") > v("1.0+1"));
        assert!(v("1.0+abc") < v("1.0+1"));
    }

    #[test]
    fn test_starts_with() {
        assert!(v("1.1.3").starts_with(&v("1.1")));
        assert!(v("1.1").starts_with(&v("1.1")));
        assert!(!v("1.10").starts_with(&v("1.1")));
        assert!(!v("2.1").starts_with(&v("1")));
        assert!(!v("1!1.1").starts_with(&v("1.1")));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(v("1.4.5").truncated(2).as_str(), "1.4");
        assert_eq!(v("2!1.4.5").truncated(2).as_str(), "2!1.4");
        assert_eq!(v("1.4.5").truncated(2), v("1.4"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!("".parse::<Version>(), Err(VersionError::Empty));
        assert!("1.0*".parse::<Version>().is_err());
        assert!("x!1.0".parse::<Version>().is_err());
    }

    #[test]
    fn test_display_keeps_spelling() {
        assert_eq!(v("1.0.0RC1").to_string(), "1.0.0RC1");
    }
}
