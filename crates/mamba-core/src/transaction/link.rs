//! Materialising extracted packages into a prefix and removing them again.

use crate::fsutil;
use mamba_schema::{LinkType, PREFIX_PLACEHOLDER};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Why a package could not be linked or unlinked.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A filesystem operation failed.
    #[error("{}: {source}", .path.display())]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A binary file cannot hold the target prefix.
    #[error("{}: prefix is longer than the placeholder baked into the binary", .path.display())]
    PrefixTooLong {
        /// The file.
        path: PathBuf,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LinkError + '_ {
    move |source| LinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// How a `has_prefix` file embeds the placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Plain substitution.
    Text,
    /// Same-length, null-padded substitution inside C strings.
    Binary,
}

/// One `info/has_prefix` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixPlaceholder {
    /// The baked-in build prefix.
    pub placeholder: String,
    /// Substitution mode.
    pub mode: FileMode,
}

/// Parse `info/has_prefix`: `path` alone, or `placeholder mode path`.
pub fn parse_has_prefix(contents: &str) -> HashMap<String, PrefixPlaceholder> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let (placeholder, mode, path) = match parts.as_slice() {
                [path] => (PREFIX_PLACEHOLDER, FileMode::Text, *path),
                [placeholder, mode, path] => {
                    let mode = if *mode == "binary" {
                        FileMode::Binary
                    } else {
                        FileMode::Text
                    };
                    (*placeholder, mode, *path)
                }
                _ => return None,
            };
            Some((
                path.trim_matches('"').to_string(),
                PrefixPlaceholder {
                    placeholder: placeholder.trim_matches('"').to_string(),
                    mode,
                },
            ))
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn replace_all(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;
    while let Some(i) = find(data, from, pos) {
        out.extend_from_slice(&data[pos..i]);
        out.extend_from_slice(to);
        pos = i + from.len();
    }
    out.extend_from_slice(&data[pos..]);
    out
}

/// Replace `placeholder` in `data` according to `mode`.
///
/// Binary mode rewrites each NUL-terminated string holding the placeholder
/// in place and pads it with NULs, so offsets inside the file are kept.
/// Returns `None` when the new prefix does not fit.
pub fn replace_prefix(
    data: &[u8],
    placeholder: &str,
    prefix: &str,
    mode: FileMode,
) -> Option<Vec<u8>> {
    let (from, to) = (placeholder.as_bytes(), prefix.as_bytes());
    match mode {
        FileMode::Text => Some(replace_all(data, from, to)),
        FileMode::Binary => {
            let mut out = data.to_vec();
            let mut pos = 0;
            while let Some(start) = find(data, from, pos) {
                let end = data[start..]
                    .iter()
                    .position(|b| *b == 0)
                    .map_or(data.len(), |i| start + i);
                let replaced = replace_all(&data[start..end], from, to);
                if replaced.len() > end - start {
                    return None;
                }
                out[start..start + replaced.len()].copy_from_slice(&replaced);
                out[start + replaced.len()..end].fill(0);
                pos = end;
            }
            Some(out)
        }
    }
}

/// Files placed by [`link_package`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedPackage {
    /// Prefix-relative paths, `/`-separated.
    pub files: Vec<String>,
    /// The link type used for most files.
    pub link_type: LinkType,
}

/// Link every file of `extracted_dir` except `info/` into `prefix`.
///
/// Regular files are hard-linked, falling back to a copy across devices.
/// Files listed in `info/has_prefix` are copied with their placeholder
/// replaced. Existing files at the destination are replaced.
///
/// # Errors
///
/// Returns [`LinkError`] on the first file that cannot be placed.
pub fn link_package(extracted_dir: &Path, prefix: &Path) -> Result<LinkedPackage, LinkError> {
    let has_prefix_path = extracted_dir.join("info").join("has_prefix");
    let placeholders = match std::fs::read_to_string(&has_prefix_path) {
        Ok(contents) => parse_has_prefix(&contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
        Err(e) => return Err(io_err(&has_prefix_path)(e)),
    };
    let prefix_str = prefix.to_string_lossy();

    let mut files = Vec::new();
    let (mut linked, mut copied) = (0usize, 0usize);

    let walker = WalkDir::new(extracted_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == "info"));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(extracted_dir).to_path_buf();
            LinkError::Io {
                path,
                source: e.into(),
            }
        })?;
        if entry.file_type().is_dir() {
            continue;
        }

        let source = entry.path();
        let Ok(relative) = source.strip_prefix(extracted_dir) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let dest = prefix.join(&relative);

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        if dest.symlink_metadata().is_ok() {
            std::fs::remove_file(&dest).map_err(io_err(&dest))?;
        }

        if entry.path_is_symlink() {
            let target = std::fs::read_link(source).map_err(io_err(source))?;
            symlink(&target, &dest)?;
            copied += 1;
        } else if let Some(p) = placeholders.get(&relative) {
            let data = std::fs::read(source).map_err(io_err(source))?;
            let replaced = replace_prefix(&data, &p.placeholder, &prefix_str, p.mode)
                .ok_or_else(|| LinkError::PrefixTooLong { path: dest.clone() })?;
            std::fs::write(&dest, replaced).map_err(io_err(&dest))?;
            let perms = std::fs::metadata(source).map_err(io_err(source))?.permissions();
            std::fs::set_permissions(&dest, perms).map_err(io_err(&dest))?;
            copied += 1;
        } else if std::fs::hard_link(source, &dest).is_ok() {
            linked += 1;
        } else {
            std::fs::copy(source, &dest).map_err(io_err(&dest))?;
            copied += 1;
        }
        files.push(relative);
    }

    Ok(LinkedPackage {
        files,
        link_type: if linked >= copied {
            LinkType::HardLink
        } else {
            LinkType::Copy
        },
    })
}

#[cfg(unix)]
fn symlink(target: &Path, dest: &Path) -> Result<(), LinkError> {
    std::os::unix::fs::symlink(target, dest).map_err(io_err(dest))
}

#[cfg(not(unix))]
fn symlink(target: &Path, dest: &Path) -> Result<(), LinkError> {
    let resolved = dest.parent().map_or_else(|| target.to_path_buf(), |p| p.join(target));
    std::fs::copy(&resolved, dest).map(|_| ()).map_err(io_err(dest))
}

/// Remove `files` (prefix-relative) from `prefix` and prune emptied
/// directories. Files already gone are ignored.
///
/// # Errors
///
/// Returns [`LinkError::Io`] if a file exists but cannot be removed.
pub fn unlink_package(prefix: &Path, files: &[String]) -> Result<(), LinkError> {
    let mut parents = BTreeSet::new();
    for file in files {
        let path = prefix.join(file);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path)(e)),
        }
        if let Some(parent) = path.parent() {
            parents.insert(parent.to_path_buf());
        }
    }
    // Deepest first so nested empty directories go before their parents.
    for dir in parents.iter().rev() {
        fsutil::prune_empty_dirs(dir, prefix);
    }
    Ok(())
}
