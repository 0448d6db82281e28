//! Archive format detection and sandboxed extraction
//!
//! Only plain tar and gzip-compressed tar are accepted. Entries are streamed one at a
//! time into the destination; header size fields are never used to pre-allocate.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_MAGIC_OFFSET: usize = 257;
const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    GzipTar,
}

/// Counts of what an extraction wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub links: usize,
    pub skipped: usize,
}

/// Classify an archive by its leading bytes, falling back to a `.tar` file name
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;

    if head.starts_with(&GZIP_MAGIC) {
        return Ok(ArchiveFormat::GzipTar);
    }
    if head.len() >= USTAR_MAGIC_OFFSET + USTAR_MAGIC.len()
        && &head[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + USTAR_MAGIC.len()] == USTAR_MAGIC
    {
        return Ok(ArchiveFormat::Tar);
    }
    // Pre-POSIX tar has no magic; trust the declared name only when it says tar
    let declared_tar = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("tar"))
        .unwrap_or(false);
    if declared_tar && head.len() == SNIFF_LEN {
        return Ok(ArchiveFormat::Tar);
    }

    Err(Error::UnsupportedFormat {
        path: path.to_path_buf(),
        signature: hex::encode(&head[..head.len().min(8)]),
    })
}

/// Detect the format of `archive_path` and unpack it into `dest`.
///
/// `dest` is only created once the format is recognized. If extraction fails part way
/// the partially written `dest` is removed again.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<ExtractSummary> {
    let format = detect_format(archive_path)?;
    debug!(archive = %archive_path.display(), ?format, "detected archive format");

    fs::create_dir_all(dest)?;
    let result = unpack(archive_path, format, dest);
    if result.is_err() {
        if let Err(e) = fs::remove_dir_all(dest) {
            debug!(dest = %dest.display(), error = %e, "failed to remove partial contents");
        }
    }
    result
}

fn unpack(archive_path: &Path, format: ArchiveFormat, dest: &Path) -> Result<ExtractSummary> {
    let file = BufReader::new(File::open(archive_path)?);
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::GzipTar => Box::new(GzDecoder::new(file)),
    };
    let corrupt = |e: io::Error| Error::CorruptArchive {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut archive = Archive::new(reader);
    let mut summary = ExtractSummary::default();

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let raw_path = entry.path().map_err(corrupt)?.into_owned();
        let relative = confined_path(&raw_path).ok_or_else(|| Error::UnsafeArchiveEntry {
            entry: raw_path.to_string_lossy().into_owned(),
        })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry_type.is_file() {
            create_parent(&target)?;
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out).map_err(corrupt)?;
            #[cfg(unix)]
            if let Ok(mode) = entry.header().mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target, fs::Permissions::from_mode((mode & 0o777) | 0o600))?;
            }
            summary.files += 1;
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            let link = entry
                .link_name()
                .map_err(corrupt)?
                .map(|l| l.into_owned())
                .ok_or_else(|| Error::CorruptArchive {
                    path: archive_path.to_path_buf(),
                    reason: format!("link {} has no target", raw_path.display()),
                })?;
            create_parent(&target)?;
            write_link(entry_type, &link, &target, dest).map_err(|e| match e {
                Error::UnsafeArchiveEntry { .. } => Error::UnsafeArchiveEntry {
                    entry: format!("{} -> {}", raw_path.display(), link.display()),
                },
                other => other,
            })?;
            summary.links += 1;
        } else {
            debug!(entry = %raw_path.display(), ?entry_type, "skipping unsupported archive entry");
            summary.skipped += 1;
        }
    }

    Ok(summary)
}

/// Relative path of an entry inside the destination, or `None` if it would escape
fn confined_path(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

fn create_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Links may only point downward; any absolute or `..` target is rejected
fn write_link(entry_type: EntryType, link: &Path, target: &Path, dest: &Path) -> Result<()> {
    let unsafe_link = || Error::UnsafeArchiveEntry {
        entry: link.to_string_lossy().into_owned(),
    };
    let relative = confined_path(link).ok_or_else(unsafe_link)?;
    if relative.as_os_str().is_empty() {
        return Err(unsafe_link());
    }

    if entry_type.is_hard_link() {
        fs::hard_link(dest.join(relative), target)?;
        return Ok(());
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(link, target)?;
    #[cfg(not(unix))]
    debug!(target = %target.display(), "symlinks are not supported on this platform");
    Ok(())
}
