//! Archive extraction module
//!
//! Handles tar (plain, gzip, bzip2, xz, zstd) and zip archives. The first
//! path component of every entry is stripped, so `fmt-8.0.1/include/fmt/core.h`
//! lands at `<dest>/include/fmt/core.h`.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

/// Extraction failures.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Reading the archive or writing its contents failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The file name maps to no known format.
    #[error("{0}")]
    UnsupportedFormat(String),

    /// The archive itself is malformed.
    #[error("Archive error: {0}")]
    Archive(String),
}

/// Archive formats recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.tar.gz`, `.tgz`.
    TarGz,
    /// `.tar.bz2`, `.tbz2`.
    TarBz2,
    /// `.tar.xz`, `.txz`.
    TarXz,
    /// `.tar.zst`, `.tzst`.
    TarZst,
    /// Uncompressed `.tar`.
    Tar,
    /// `.zip`.
    Zip,
}

/// Detect archive format from the (multi-part) file extension.
///
/// Compressed single files (`.gz`, `.bz2`, `.xz`, `.zst` without `.tar`) are rejected.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat, ExtractError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let format = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ArchiveFormat::TarGz
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        ArchiveFormat::TarBz2
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        ArchiveFormat::TarXz
    } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        ArchiveFormat::TarZst
    } else if name.ends_with(".tar") {
        ArchiveFormat::Tar
    } else if name.ends_with(".zip") {
        ArchiveFormat::Zip
    } else {
        for ext in ["gz", "bz2", "xz", "zst"] {
            if name.ends_with(&format!(".{ext}")) {
                return Err(ExtractError::UnsupportedFormat(format!(
                    "standalone .{ext} files are not supported, please use .tar.{ext}"
                )));
            }
        }
        return Err(ExtractError::UnsupportedFormat(format!(
            "unsupported archive format: {name}"
        )));
    };
    Ok(format)
}

/// Extract an archive into `dest_dir`, auto-detecting the format.
///
/// Returns the number of regular files written.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<usize, ExtractError> {
    let format = detect_format(archive_path)?;
    let reader = BufReader::new(File::open(archive_path)?);

    match format {
        ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(reader), dest_dir),
        ArchiveFormat::TarBz2 => extract_tar(bzip2::read::BzDecoder::new(reader), dest_dir),
        ArchiveFormat::TarXz => extract_tar(xz2::read::XzDecoder::new(reader), dest_dir),
        ArchiveFormat::TarZst => extract_tar(zstd::stream::Decoder::new(reader)?, dest_dir),
        ArchiveFormat::Tar => extract_tar(reader, dest_dir),
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir),
    }
}

/// Drop the first component and reject anything that could escape the destination.
fn strip_first_component(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut out = PathBuf::new();
    for component in path.components().skip(1) {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ExtractError::Archive(format!(
                    "Invalid path in archive: {}",
                    path.display()
                )));
            }
        }
    }
    Ok((!out.as_os_str().is_empty()).then_some(out))
}

/// Extract a tar stream from a reader
fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<usize, ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    let mut count = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        if !(entry_type.is_file()
            || entry_type.is_dir()
            || entry_type.is_symlink()
            || entry_type.is_hard_link())
        {
            continue;
        }

        let entry_path = entry.path()?.into_owned();
        let Some(relative_path) = strip_first_component(&entry_path)? else {
            continue;
        };
        let absolute_path = dest_dir.join(&relative_path);

        if entry_type.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if entry_type.is_hard_link() {
            let link_name = entry
                .link_name()?
                .ok_or_else(|| ExtractError::Archive("hard link without target".into()))?
                .into_owned();
            let target = strip_first_component(&link_name)?
                .map(|rel| dest_dir.join(rel))
                .ok_or_else(|| ExtractError::Archive("hard link outside archive root".into()))?;
            if fs::hard_link(&target, &absolute_path).is_err() {
                fs::copy(&target, &absolute_path)?;
            }
        } else {
            entry.unpack(&absolute_path)?;
        }

        if entry_type.is_file() {
            count += 1;
        }
    }

    Ok(count)
}

/// Extract a zip archive
fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<usize, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;
    let mut count = 0;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(enclosed) = file.enclosed_name() else {
            continue;
        };
        let Some(relative_path) = strip_first_component(&enclosed)? else {
            continue;
        };
        let absolute_path = dest_dir.join(&relative_path);

        if file.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode & 0o7777))?;
        }
        count += 1;
    }

    Ok(count)
}
