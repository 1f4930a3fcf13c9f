//! Shared data types for the mamba workspace.
//!
//! Everything that crosses a crate boundary or a file boundary (repodata
//! documents, `conda-meta` records, match specs) is defined here so the core
//! and the CLI agree on one wire format.

pub mod channel;
pub mod hash;
pub mod match_spec;
pub mod platform;
pub mod record;
pub mod version;

pub use channel::{Channel, ChannelError, DEFAULT_CHANNEL_ALIAS};
pub use hash::Sha256Hash;
pub use match_spec::{BuildMatcher, MatchSpec, MatchSpecError, VersionSpec};
pub use platform::Platform;
pub use record::{Link, LinkType, PackageRecord, PrefixRecord, RecordKey, RepoData, RepoDataInfo};
pub use version::{Version, VersionError};

/// Default placeholder embedded in relocatable package files.
pub const PREFIX_PLACEHOLDER: &str = "/opt/anaconda1anaconda2anaconda3";
