//! Package archive extraction.
//!
//! Handles the two conda formats: `.tar.bz2` and `.conda` (a zip holding an
//! `info-*.tar.zst` and a `pkg-*.tar.zst`).

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

/// Why an archive could not be unpacked.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Reading the archive or writing its contents failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The file name has no known package extension.
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// The archive is malformed.
    #[error("archive error: {0}")]
    Archive(String),
}

/// Archive formats found in channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// Legacy bzip2-compressed tarball.
    TarBz2,
    /// Zip container with zstd-compressed inner tarballs.
    Conda,
}

impl ArchiveType {
    /// Detect the format from a file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.bz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".conda") {
            Some(Self::Conda)
        } else {
            None
        }
    }

    /// The file extension, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::TarBz2 => ".tar.bz2",
            Self::Conda => ".conda",
        }
    }
}

/// The file name without its archive extension (`numpy-1.26.4-py312_0`).
pub fn strip_extension(file_name: &str) -> &str {
    ArchiveType::from_file_name(file_name)
        .and_then(|ty| file_name.strip_suffix(ty.extension()))
        .unwrap_or(file_name)
}

/// Extract a package archive into `dest_dir`, detecting the format by name.
///
/// # Errors
///
/// Returns an error for unknown formats, malformed archives, or entries that
/// would escape `dest_dir`.
pub fn extract_package(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match ArchiveType::from_file_name(&name) {
        Some(ArchiveType::TarBz2) => extract_tar_bz2(archive_path, dest_dir),
        Some(ArchiveType::Conda) => extract_conda(archive_path, dest_dir),
        None => Err(ExtractError::UnsupportedFormat(name)),
    }
}

fn extract_tar_bz2(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let decoder = BzDecoder::new(BufReader::new(file));
    extract_tar(decoder, dest_dir)
}

/// Every inner `*.tar.zst` of a `.conda` archive lands in `dest_dir`.
fn extract_conda(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| ExtractError::Archive(e.to_string()))?;

    let mut inner = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        if !entry.name().ends_with(".tar.zst") {
            continue;
        }
        tracing::debug!("extracting {} from {}", entry.name(), archive_path.display());
        extract_tar(ZstdDecoder::new(entry)?, dest_dir)?;
        inner += 1;
    }

    if inner == 0 {
        return Err(ExtractError::Archive(format!(
            "{} contains no package tarballs",
            archive_path.display()
        )));
    }
    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        // `unpack_in` refuses paths that would land outside `dest_dir`.
        if !entry.unpack_in(dest_dir)? {
            let path = entry.path()?.display().to_string();
            return Err(ExtractError::Archive(format!("invalid path in archive: {path}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_detects_formats() {
        assert_eq!(ArchiveType::from_file_name("a-1-0.tar.bz2"), Some(ArchiveType::TarBz2));
        assert_eq!(ArchiveType::from_file_name("a-1-0.conda"), Some(ArchiveType::Conda));
        assert_eq!(ArchiveType::from_file_name("a-1-0.zip"), None);
        assert_eq!(strip_extension("a-1-0.conda"), "a-1-0");
        assert_eq!(strip_extension("a-1-0.tar.bz2"), "a-1-0");
    }

    #[test]
    fn test_extract_tar_bz2() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("foo-1.0-0.tar.bz2");
        let tar = tar_bytes(&[("bin/foo", &b"#!/bin/sh\n"[..]), ("info/index.json", &b"{}"[..])]);
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(&tar).unwrap();
        fs::write(&archive, enc.finish().unwrap()).unwrap();

        let dest = dir.path().join("out");
        extract_package(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("bin/foo")).unwrap(), b"#!/bin/sh\n");
        assert!(dest.join("info/index.json").exists());
    }

    #[test]
    fn test_extract_conda() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("foo-1.0-0.conda");
        let pkg = zstd::encode_all(&tar_bytes(&[("lib/libfoo.so", &b"elf"[..])])[..], 3).unwrap();
        let info = zstd::encode_all(&tar_bytes(&[("info/index.json", &b"{}"[..])])[..], 3).unwrap();

        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip.start_file("metadata.json", options).unwrap();
        zip.write_all(br#"{"conda_pkg_format_version": 2}"#).unwrap();
        zip.start_file("pkg-foo-1.0-0.tar.zst", options).unwrap();
        zip.write_all(&pkg).unwrap();
        zip.start_file("info-foo-1.0-0.tar.zst", options).unwrap();
        zip.write_all(&info).unwrap();
        zip.finish().unwrap();

        let dest = dir.path().join("out");
        extract_package(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("lib/libfoo.so")).unwrap(), b"elf");
        assert!(dest.join("info/index.json").exists());
        assert!(!dest.join("metadata.json").exists());
    }

    #[test]
    fn test_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("foo.zip");
        fs::write(&archive, b"").unwrap();
        assert!(matches!(
            extract_package(&archive, dir.path()),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }
}
