//! Installed-package records of one prefix (`<prefix>/conda-meta/*.json`).
//!
//! Every mutation writes through to disk immediately, so a transaction
//! interrupted half-way leaves one consistent record per completed step.

use crate::config::conda_meta_dir;
use crate::fsutil;
use mamba_schema::PrefixRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Marker file conda writes into every environment's `conda-meta/`.
const HISTORY_FILE: &str = "history";

/// Errors that make a prefix unusable for the requested operation.
#[derive(Debug, Error)]
pub enum PrefixError {
    /// `create` was asked to overwrite an existing environment.
    #[error("prefix already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    /// `install` was pointed at a directory that is not an environment.
    #[error("prefix does not exist or is not an environment: {}", .0.display())]
    Missing(PathBuf),
    /// Reading or writing `conda-meta/` failed.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A record file is not valid JSON.
    #[error("invalid prefix record {}: {source}", .path.display())]
    Parse {
        /// The record file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl PrefixError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whether `prefix` looks like an environment.
pub fn is_environment(prefix: &Path) -> bool {
    conda_meta_dir(prefix).is_dir()
}

/// Fail unless `prefix` can be created.
///
/// # Errors
///
/// Returns [`PrefixError::AlreadyExists`] if anything, even an empty
/// directory, is already at that path.
pub fn check_creatable(prefix: &Path) -> Result<(), PrefixError> {
    if prefix.exists() {
        Err(PrefixError::AlreadyExists(prefix.to_path_buf()))
    } else {
        Ok(())
    }
}

/// Fail unless `prefix` is an existing environment.
///
/// # Errors
///
/// Returns [`PrefixError::Missing`] otherwise.
pub fn check_existing(prefix: &Path) -> Result<(), PrefixError> {
    if is_environment(prefix) {
        Ok(())
    } else {
        Err(PrefixError::Missing(prefix.to_path_buf()))
    }
}

/// The installed records of one prefix, keyed by package name.
#[derive(Debug, Clone)]
pub struct PrefixData {
    prefix: PathBuf,
    records: BTreeMap<String, PrefixRecord>,
}

impl PrefixData {
    /// Load every record under `<prefix>/conda-meta`.
    ///
    /// A prefix without `conda-meta/` has no records.
    ///
    /// # Errors
    ///
    /// Returns [`PrefixError`] if a record file cannot be read or parsed.
    pub fn load(prefix: &Path) -> Result<Self, PrefixError> {
        let meta = conda_meta_dir(prefix);
        let mut records = BTreeMap::new();

        let entries = match std::fs::read_dir(&meta) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    prefix: prefix.to_path_buf(),
                    records,
                });
            }
            Err(e) => return Err(PrefixError::io(&meta, e)),
        };

        for entry in entries {
            let path = entry.map_err(|e| PrefixError::io(&meta, e))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| PrefixError::io(&path, e))?;
            let record: PrefixRecord = serde_json::from_slice(&bytes)
                .map_err(|source| PrefixError::Parse { path: path.clone(), source })?;
            tracing::debug!("installed: {}", record.record.dist_name());
            records.insert(record.record.name.clone(), record);
        }

        Ok(Self {
            prefix: prefix.to_path_buf(),
            records,
        })
    }

    /// Create the environment skeleton (`conda-meta/history`).
    ///
    /// # Errors
    ///
    /// Returns [`PrefixError::Io`] if the directories cannot be created.
    pub fn create_layout(prefix: &Path) -> Result<(), PrefixError> {
        let meta = conda_meta_dir(prefix);
        std::fs::create_dir_all(&meta).map_err(|e| PrefixError::io(&meta, e))?;
        let history = meta.join(HISTORY_FILE);
        if !history.exists() {
            std::fs::write(&history, b"").map_err(|e| PrefixError::io(&history, e))?;
        }
        Ok(())
    }

    /// The prefix path.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// The installed record for `name`.
    pub fn get(&self, name: &str) -> Option<&PrefixRecord> {
        self.records.get(name)
    }

    /// All installed records, sorted by name.
    pub fn records(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.records.values()
    }

    /// Number of installed packages.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace a record and persist it.
    ///
    /// The file of a replaced record with a different dist name is removed.
    ///
    /// # Errors
    ///
    /// Returns [`PrefixError::Io`] if the record cannot be written.
    pub fn insert(&mut self, record: PrefixRecord) -> Result<(), PrefixError> {
        let meta = conda_meta_dir(&self.prefix);
        let path = meta.join(record.meta_file_name());
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| PrefixError::io(&path, std::io::Error::other(e)))?;
        fsutil::write_atomic(&path, &json).map_err(|e| PrefixError::io(&path, e))?;

        if let Some(old) = self.records.insert(record.record.name.clone(), record) {
            let old_path = meta.join(old.meta_file_name());
            if old_path != path {
                remove_if_present(&old_path)?;
            }
        }
        Ok(())
    }

    /// Remove the record for `name` and its file.
    ///
    /// # Errors
    ///
    /// Returns [`PrefixError::Io`] if the record file cannot be deleted.
    pub fn remove(&mut self, name: &str) -> Result<Option<PrefixRecord>, PrefixError> {
        let Some(old) = self.records.remove(name) else {
            return Ok(None);
        };
        remove_if_present(&conda_meta_dir(&self.prefix).join(old.meta_file_name()))?;
        Ok(Some(old))
    }
}

fn remove_if_present(path: &Path) -> Result<(), PrefixError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(PrefixError::io(path, e)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mamba_schema::PackageRecord;

    fn installed(name: &str, version: &str) -> PrefixRecord {
        let mut record = PrefixRecord::from_record(PackageRecord::new(
            name,
            version.parse().unwrap(),
            "0",
        ));
        record.files = vec![format!("bin/{name}")];
        record
    }

    #[test]
    fn test_missing_conda_meta_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let data = PrefixData::load(&dir.path().join("env")).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_insert_persists_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        PrefixData::create_layout(dir.path()).unwrap();
        let mut data = PrefixData::load(dir.path()).unwrap();

        data.insert(installed("foo", "1.0")).unwrap();
        data.insert(installed("foo", "2.0")).unwrap();

        let meta = dir.path().join("conda-meta");
        assert!(meta.join("foo-2.0-0.json").exists());
        assert!(!meta.join("foo-1.0-0.json").exists());

        let reloaded = PrefixData::load(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("foo").unwrap().record.version.as_str(), "2.0");
        assert_eq!(reloaded.get("foo").unwrap().files, ["bin/foo"]);
    }

    #[test]
    fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = PrefixData::load(dir.path()).unwrap();
        data.insert(installed("bar", "0.1")).unwrap();

        let removed = data.remove("bar").unwrap().unwrap();
        assert_eq!(removed.record.name, "bar");
        assert!(data.remove("bar").unwrap().is_none());
        assert!(PrefixData::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_prefix_checks() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");

        assert!(check_creatable(&env).is_ok());
        assert!(matches!(check_existing(&env), Err(PrefixError::Missing(_))));

        PrefixData::create_layout(&env).unwrap();
        assert!(matches!(
            check_creatable(&env),
            Err(PrefixError::AlreadyExists(_))
        ));
        assert!(check_existing(&env).is_ok());
    }

    #[test]
    fn test_empty_directory_is_not_creatable() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        std::fs::create_dir(&env).unwrap();

        assert!(matches!(
            check_creatable(&env),
            Err(PrefixError::AlreadyExists(_))
        ));
        assert!(matches!(check_existing(&env), Err(PrefixError::Missing(_))));
    }

    #[test]
    fn test_ignores_non_json_files() {
        let dir = tempfile::tempdir().unwrap();
        PrefixData::create_layout(dir.path()).unwrap();
        let data = PrefixData::load(dir.path()).unwrap();
        assert!(data.is_empty());
    }
}
