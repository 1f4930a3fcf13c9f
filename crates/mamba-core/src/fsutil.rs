//! Small filesystem helpers shared by the metadata cache and prefix store.

use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

/// Write `data` to `path` so readers see either the old or the new file.
///
/// The bytes go to a temporary file in the same directory which is then
/// renamed over the destination.
///
/// # Errors
///
/// Returns an I/O error if the directory is not writable or the rename fails.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Bump the modification time of `path` to now.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened for writing.
pub fn touch(path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::options().append(true).open(path)?;
    file.set_modified(SystemTime::now())
}

/// Remove `dir` and then each empty parent, stopping at `stop`.
pub fn prune_empty_dirs(dir: &Path, stop: &Path) {
    let mut current = Some(dir);
    while let Some(d) = current {
        if d == stop || !d.starts_with(stop) {
            break;
        }
        // Fails on non-empty directories, which ends the walk.
        if std::fs::remove_dir(d).is_err() {
            break;
        }
        current = d.parent();
    }
}
