//! Filesystem helpers shared by the cache, build and link layers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Copy a file or a directory tree from `src` to `dst`.
///
/// A file is copied to exactly `dst`. A directory's contents are merged into
/// `dst`, overwriting existing files. Symlinks are recreated rather than
/// followed; absolute links that point inside `src` are rewritten as relative
/// links so the copy does not reach back into the original tree.
pub fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if !meta.is_dir() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        return copy_entry(src, dst, src, dst, &meta);
    }

    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);
        let meta = entry.path().symlink_metadata()?;
        if meta.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_entry(entry.path(), &target, src, dst, &meta)?;
        }
    }
    Ok(())
}

fn copy_entry(
    from: &Path,
    to: &Path,
    src_root: &Path,
    dst_root: &Path,
    meta: &fs::Metadata,
) -> io::Result<()> {
    if meta.file_type().is_symlink() {
        let mut link_target = fs::read_link(from)?;
        if let Ok(inner) = link_target.strip_prefix(src_root) {
            let parent = to.parent().unwrap_or(dst_root);
            link_target = relative_path(parent, &dst_root.join(inner));
        }
        remove_path(to)?;
        return symlink(&link_target, to);
    }
    if fs::symlink_metadata(to).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(to)?;
    }
    fs::copy(from, to)?;
    Ok(())
}

/// Remove whatever is at `path` (file, symlink or directory). Missing is fine.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Total size in bytes of a file or directory tree, not following symlinks.
pub fn path_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .filter(fs::Metadata::is_file)
        .map(|m| m.len())
        .sum()
}

/// Create a symlink at `link` pointing to `target`.
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        let resolved = link.parent().map_or_else(|| target.to_path_buf(), |p| p.join(target));
        if resolved.is_dir() {
            std::os::windows::fs::symlink_dir(target, link)
        } else {
            std::os::windows::fs::symlink_file(target, link)
        }
    }
}

/// Compute a relative path from `from_dir` to `to_path`.
///
/// Both arguments must be absolute paths. The function walks up from
/// `from_dir` to the common ancestor and then descends into `to_path`.
///
/// Example: `relative_path("/a/b/c", "/a/b/d/e")` returns `"../d/e"`.
pub fn relative_path(from_dir: &Path, to_path: &Path) -> PathBuf {
    let from_components: Vec<_> = from_dir.components().collect();
    let to_components: Vec<_> = to_path.components().collect();

    let common_len = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common_len..from_components.len() {
        result.push("..");
    }
    for part in &to_components[common_len..] {
        result.push(part);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_relative_path_cross_dir() {
        let result = relative_path(Path::new("/a/b/lib"), Path::new("/a/b/bin/tool"));
        assert_eq!(result, PathBuf::from("../bin/tool"));
    }

    #[test]
    fn test_copy_file_and_tree() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("include/fmt")).unwrap();
        fs::write(src.join("include/fmt/core.h"), "// core").unwrap();
        fs::write(src.join("README"), "hi").unwrap();

        let dst = tmp.path().join("dst");
        copy_path(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("include/fmt/core.h")).unwrap(), "// core");

        let single = tmp.path().join("nested/one/README.copy");
        copy_path(&src.join("README"), &single).unwrap();
        assert_eq!(fs::read_to_string(single).unwrap(), "hi");
        assert!(path_size(&dst) >= 9);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserves_and_rebases_symlinks() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("lib/libz.so.1"), "elf").unwrap();
        symlink(Path::new("libz.so.1"), &src.join("lib/libz.so")).unwrap();
        symlink(&src.join("lib/libz.so.1"), &src.join("lib/libz.abs")).unwrap();

        let dst = tmp.path().join("dst");
        copy_path(&src, &dst).unwrap();

        assert_eq!(fs::read_link(dst.join("lib/libz.so")).unwrap(), PathBuf::from("libz.so.1"));
        let rebased = fs::read_link(dst.join("lib/libz.abs")).unwrap();
        assert!(!rebased.is_absolute());
        assert_eq!(fs::read_to_string(dst.join("lib/libz.abs")).unwrap(), "elf");
    }

    #[test]
    fn test_remove_path_is_tolerant() {
        let tmp = tempdir().unwrap();
        remove_path(&tmp.path().join("missing")).unwrap();
        let dir = tmp.path().join("d");
        fs::create_dir_all(dir.join("x")).unwrap();
        remove_path(&dir).unwrap();
        assert!(!dir.exists());
    }
}
