//! Package records as they appear in `repodata.json` and `conda-meta/`.

use crate::{Sha256Hash, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Metadata for one package archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: Version,
    /// Build string, e.g. `py39h1234_0`.
    pub build: String,
    /// Build number; higher wins among equal versions.
    #[serde(default)]
    pub build_number: u64,
    /// Run-time dependencies as match spec strings.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Constraints that only bind if the named package is installed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,
    /// Archive checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Sha256Hash>,
    /// Legacy archive checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    /// Archive size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Platform subdir the record came from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subdir: String,
    /// Build timestamp (milliseconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// License identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// `noarch` kind (`python`, `generic`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noarch: Option<String>,
    /// Archive file name.
    #[serde(rename = "fn", default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    /// Channel the record was loaded from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    /// Full download URL of the archive.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// Identity of a record inside an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    name: String,
    version: String,
    build: String,
    channel: String,
    subdir: String,
    file_name: String,
}

impl PackageRecord {
    /// A minimal record; the remaining fields start empty.
    pub fn new(name: &str, version: Version, build: &str) -> Self {
        Self {
            name: name.to_string(),
            version,
            build: build.to_string(),
            build_number: 0,
            depends: Vec::new(),
            constrains: Vec::new(),
            sha256: None,
            md5: None,
            size: 0,
            subdir: String::new(),
            timestamp: None,
            license: None,
            noarch: None,
            file_name: String::new(),
            channel: String::new(),
            url: String::new(),
        }
    }

    /// `name-version-build`, the cache and `conda-meta` key.
    pub fn dist_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build)
    }

    /// The identity used for index deduplication.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            name: self.name.clone(),
            version: self.version.as_str().to_string(),
            build: self.build.clone(),
            channel: self.channel.clone(),
            subdir: self.subdir.clone(),
            file_name: self.file_name.clone(),
        }
    }

    /// Whether two records describe the same artifact.
    pub fn same_artifact(&self, other: &PackageRecord) -> bool {
        self.name == other.name
            && self.version.as_str() == other.version.as_str()
            && self.build == other.build
            && self.channel == other.channel
            && self.subdir == other.subdir
    }
}

impl std::fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dist_name())
    }
}

/// The `info` block of a repodata document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDataInfo {
    /// Subdir the document describes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

/// A `repodata.json` document, including the revalidation fields embedded
/// when it is written to the local metadata cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoData {
    /// Document info block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<RepoDataInfo>,
    /// `.tar.bz2` archives keyed by file name.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageRecord>,
    /// `.conda` archives keyed by file name.
    #[serde(default, rename = "packages.conda")]
    pub conda_packages: BTreeMap<String, PackageRecord>,
    /// URL the document was fetched from.
    #[serde(default, rename = "_url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `ETag` response header.
    #[serde(default, rename = "_etag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// `Last-Modified` response header.
    #[serde(default, rename = "_mod", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// `Cache-Control` response header.
    #[serde(default, rename = "_cache_control", skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
}

impl RepoData {
    /// Flatten the document into records stamped with their origin.
    ///
    /// When an artifact is published in both formats only the `.conda`
    /// archive is kept.
    pub fn into_records(self, channel: &str, subdir: &str, subdir_url: &str) -> Vec<PackageRecord> {
        let conda_stems: HashSet<String> = self
            .conda_packages
            .keys()
            .filter_map(|f| f.strip_suffix(".conda").map(str::to_string))
            .collect();

        let bz2 = self.packages.into_iter().filter(|(file_name, _)| {
            file_name
                .strip_suffix(".tar.bz2")
                .is_none_or(|stem| !conda_stems.contains(stem))
        });

        bz2.chain(self.conda_packages)
            .map(|(file_name, mut record)| {
                record.url = format!("{}/{file_name}", subdir_url.trim_end_matches('/'));
                record.file_name = file_name;
                record.channel = channel.to_string();
                if record.subdir.is_empty() {
                    record.subdir = subdir.to_string();
                }
                record
            })
            .collect()
    }

    /// Number of records across both archive formats.
    pub fn len(&self) -> usize {
        self.packages.len() + self.conda_packages.len()
    }

    /// Whether the document lists no packages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a file was materialized into the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Hard link into the package cache.
    HardLink,
    /// Symbolic link.
    SoftLink,
    /// Plain copy.
    Copy,
}

/// Where an installed package was linked from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Extracted package directory.
    pub source: PathBuf,
    /// Dominant link type used.
    #[serde(rename = "type")]
    pub link_type: LinkType,
}

/// An installed package, stored as `conda-meta/<dist>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixRecord {
    /// The package metadata.
    #[serde(flatten)]
    pub record: PackageRecord,
    /// Prefix-relative paths owned by this package.
    #[serde(default)]
    pub files: Vec<String>,
    /// The spec the user asked for, when the package was requested explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_spec: Option<String>,
    /// Cache directory the files were linked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_package_dir: Option<PathBuf>,
    /// Cached archive path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_tarball_full_path: Option<PathBuf>,
    /// Link details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
}

impl PrefixRecord {
    /// Wrap a record with no files yet.
    pub fn from_record(record: PackageRecord) -> Self {
        Self {
            record,
            files: Vec::new(),
            requested_spec: None,
            extracted_package_dir: None,
            package_tarball_full_path: None,
            link: None,
        }
    }

    /// File name of the record under `conda-meta/`.
    pub fn meta_file_name(&self) -> String {
        format!("{}.json", self.record.dist_name())
    }
}
