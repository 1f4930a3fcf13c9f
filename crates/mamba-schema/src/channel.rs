use crate::Platform;
use thiserror::Error;

/// Base URL that bare channel names are resolved against.
pub const DEFAULT_CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

/// Errors produced when resolving a channel string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Empty channel string.
    #[error("empty channel name")]
    Empty,
    /// A URL with a scheme we cannot fetch from.
    #[error("unsupported channel URL scheme in '{0}'")]
    UnsupportedScheme(String),
}

/// A resolved package channel.
///
/// `name` is what users see in plans and what `channel::pkg` specs match
/// against; `base_url` is where subdirs live.
///
/// # Example
///
/// ```
/// use mamba_schema::{Channel, Platform, DEFAULT_CHANNEL_ALIAS};
///
/// let ch = Channel::resolve("conda-forge", DEFAULT_CHANNEL_ALIAS).unwrap();
/// assert_eq!(ch.name, "conda-forge");
/// assert_eq!(
///     ch.subdir_url(Platform::Linux64),
///     "https://conda.anaconda.org/conda-forge/linux-64"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    /// Canonical name (`conda-forge`, or the full URL for custom hosts).
    pub name: String,
    /// URL without trailing slash.
    pub base_url: String,
}

impl Channel {
    /// Resolve a user-supplied channel: a bare name against `alias`, a
    /// URL verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] for empty input or unsupported schemes.
    pub fn resolve(input: &str, alias: &str) -> Result<Self, ChannelError> {
        let input = input.trim().trim_end_matches('/');
        if input.is_empty() {
            return Err(ChannelError::Empty);
        }
        let alias = alias.trim_end_matches('/');

        if let Some((scheme, _)) = input.split_once("://") {
            if !matches!(scheme, "http" | "https" | "file") {
                return Err(ChannelError::UnsupportedScheme(input.to_string()));
            }
            let name = input
                .strip_prefix(alias)
                .and_then(|rest| rest.strip_prefix('/'))
                .filter(|rest| !rest.is_empty())
                .unwrap_or(input);
            return Ok(Self {
                name: name.to_string(),
                base_url: input.to_string(),
            });
        }

        Ok(Self {
            name: input.to_string(),
            base_url: format!("{alias}/{input}"),
        })
    }

    /// URL of one platform subdir.
    pub fn subdir_url(&self, platform: Platform) -> String {
        format!("{}/{}", self.base_url, platform.as_str())
    }

    /// URL of a subdir's `repodata.json`.
    pub fn repodata_url(&self, platform: Platform) -> String {
        format!("{}/repodata.json", self.subdir_url(platform))
    }

    /// Whether a record's channel field refers to this channel.
    pub fn matches(&self, channel: &str) -> bool {
        let channel = channel.trim_end_matches('/');
        channel == self.name || channel == self.base_url
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
