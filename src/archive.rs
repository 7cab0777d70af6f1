//! Archive-type detection and safe extraction. Detection is by content
//! magic bytes, never by filename extension, because archives are known to
//! arrive mislabeled.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown archive format")]
    UnknownFormat,
    #[error("archive entry escapes scratch root: {0}")]
    PathTraversal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    PlainTar,
    Gzip,
    Bzip2,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5a, 0x68]; // "BZh"
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// Classifies archive content by reading its magic bytes. The filename is
/// never consulted.
pub fn detect_kind(path: &Path) -> Result<ArchiveKind, ArchiveError> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 512];
    let read = file.read(&mut header)?;
    let header = &header[..read];

    if header.len() >= 2 && header[..2] == GZIP_MAGIC {
        return Ok(ArchiveKind::Gzip);
    }
    if header.len() >= 3 && header[..3] == BZIP2_MAGIC {
        return Ok(ArchiveKind::Bzip2);
    }
    if header.len() >= TAR_MAGIC_OFFSET + 5
        && &header[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == TAR_MAGIC
    {
        return Ok(ArchiveKind::PlainTar);
    }
    // Some tar writers omit the ustar magic but still produce a valid
    // header; fall back to treating anything non-empty and not matching a
    // compressed magic as plain tar only if it looks like a tar header
    // (checksum field parses). Conservative: reject otherwise.
    if header.len() >= 512 && is_plausible_tar_header(&header[..512]) {
        return Ok(ArchiveKind::PlainTar);
    }

    Err(ArchiveError::UnknownFormat)
}

fn is_plausible_tar_header(header: &[u8]) -> bool {
    // Checksum field is at offset 148, 8 bytes, octal ASCII digits/spaces/NUL.
    let checksum_field = &header[148..156];
    checksum_field
        .iter()
        .all(|&b| b == 0 || b == b' ' || (b'0'..=b'7').contains(&b))
        && header.iter().any(|&b| b != 0)
}

/// Extracts `archive_path` (of the given kind) into `dest_dir`, rejecting
/// any entry whose resolved path would escape `dest_dir` (path traversal).
/// On any traversal attempt the whole extraction is aborted.
pub fn extract(
    archive_path: &Path,
    kind: ArchiveKind,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let file = File::open(archive_path)?;

    match kind {
        ArchiveKind::PlainTar => extract_tar(file, dest_dir),
        ArchiveKind::Gzip => extract_tar(flate2::read::GzDecoder::new(file), dest_dir),
        ArchiveKind::Bzip2 => extract_tar(bzip2::read::BzDecoder::new(file), dest_dir),
    }
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        let resolved = dest_dir.join(&entry_path);
        let canonical_dest = dest_dir
            .canonicalize()
            .unwrap_or_else(|_| dest_dir.to_path_buf());
        let normalized = normalize(&resolved);

        if !normalized.starts_with(&canonical_dest) && !normalized.starts_with(dest_dir) {
            return Err(ArchiveError::PathTraversal(entry_path.display().to_string()));
        }
        if entry_path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ArchiveError::PathTraversal(entry_path.display().to_string()));
        }

        if entry.header().entry_type().is_file() {
            if let Some(parent) = resolved.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&resolved)?;
            extracted.push(resolved);
        } else if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&resolved)?;
        } else {
            warn!(path = %entry_path.display(), "skipping non-regular tar entry");
        }
    }

    info!(count = extracted.len(), "extracted archive entries");
    Ok(extracted)
}

fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                result.pop();
            }
            std::path::Component::CurDir => {}
            other => result.push(other),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn detects_plain_tar_by_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tar");
        std::fs::write(&path, write_tar(&[("a.mp3", b"clip")])).unwrap();
        assert_eq!(detect_kind(&path).unwrap(), ArchiveKind::PlainTar);
    }

    #[test]
    fn detects_mislabeled_gzip_extension_as_plain_tar() {
        // Content is plain tar even though the caller might have named it .tar.gz
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tar.gz");
        std::fs::write(&path, write_tar(&[("a.mp3", b"clip")])).unwrap();
        assert_eq!(detect_kind(&path).unwrap(), ArchiveKind::PlainTar);
    }

    #[test]
    fn detects_gzip_by_magic() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.bin");
        let tar_bytes = write_tar(&[("a.mp3", b"clip")]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let gz_bytes = encoder.finish().unwrap();
        std::fs::write(&path, gz_bytes).unwrap();

        assert_eq!(detect_kind(&path).unwrap(), ArchiveKind::Gzip);
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.bin");
        std::fs::write(&path, b"not an archive at all, just junk bytes").unwrap();
        assert!(matches!(
            detect_kind(&path),
            Err(ArchiveError::UnknownFormat)
        ));
    }

    #[test]
    fn extraction_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("archive.tar");
        std::fs::write(&archive_path, write_tar(&[("../evil.mp3", b"x")])).unwrap();

        let dest = tempdir().unwrap();
        let result = extract(&archive_path, ArchiveKind::PlainTar, dest.path());
        assert!(matches!(result, Err(ArchiveError::PathTraversal(_))));
    }

    #[test]
    fn extraction_lists_all_files() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("archive.tar");
        std::fs::write(
            &archive_path,
            write_tar(&[("a.mp3", b"clip-a"), ("b.mp3", b"clip-b")]),
        )
        .unwrap();

        let dest = tempdir().unwrap();
        let extracted = extract(&archive_path, ArchiveKind::PlainTar, dest.path()).unwrap();
        assert_eq!(extracted.len(), 2);
    }
}
