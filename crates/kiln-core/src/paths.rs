//! Default on-disk locations: the kiln home, its cache, build and install
//! roots, and the per-project state directory.

use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Name of the hidden per-project state directory.
pub const STATE_DIR: &str = ".kiln";

/// Cache namespace segment under the cache root.
pub const CACHE_NAMESPACE: &str = "kiln";

/// Returns the kiln home directory, or None if the user's home cannot be resolved.
pub fn try_kiln_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("KILN_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".kiln"))
}

/// Returns the kiln home directory (`$KILN_HOME` or `~/.kiln`).
///
/// Falls back to `./.kiln` when no home directory can be resolved.
pub fn kiln_home() -> PathBuf {
    try_kiln_home().unwrap_or_else(|| PathBuf::from(STATE_DIR))
}

/// Cache root: ~/.kiln/cache
pub fn cache_path() -> PathBuf {
    kiln_home().join("cache")
}

/// Default build root: ~/.kiln/build
pub fn build_path() -> PathBuf {
    kiln_home().join("build")
}

/// Default install root: ~/.kiln/install
pub fn install_path() -> PathBuf {
    kiln_home().join("install")
}

/// Logs directory: ~/.kiln/logs
pub fn log_dir() -> PathBuf {
    kiln_home().join("logs")
}

/// Temp path: ~/.kiln/tmp
pub fn tmp_path() -> PathBuf {
    kiln_home().join("tmp")
}

/// Raw archive cache used by the archive fetcher.
///
/// Lives under the platform cache dir so it survives `kiln cache clear`.
pub fn archive_cache_path() -> PathBuf {
    dirs::cache_dir().map_or_else(
        || cache_path().join("archives"),
        |d| d.join(CACHE_NAMESPACE).join("archives"),
    )
}

/// Generate a timestamped build log path for a dependency under `log_dir`.
pub fn build_log_path(log_dir: &Path, name: &str, version: &str) -> PathBuf {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    log_dir.join(format!("build-{name}-{version}-{timestamp}.log"))
}

/// Project state directory: <project>/.kiln
pub fn state_dir(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR)
}

/// Link farm root inside a project: <project>/.kiln/install
pub fn link_root(project_root: &Path) -> PathBuf {
    state_dir(project_root).join("install")
}

/// Install manifest inside a project: <project>/.kiln/install.manifest
pub fn manifest_path(project_root: &Path) -> PathBuf {
    state_dir(project_root).join("install.manifest")
}

/// Extract the filename from a URL, ignoring any query string or fragment.
pub fn filename_from_url(url: &str) -> &str {
    let trimmed = url.split(['?', '#']).next().unwrap_or("");
    trimmed
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://x.org/a/fmt-8.0.1.tar.gz"), "fmt-8.0.1.tar.gz");
        assert_eq!(filename_from_url("https://x.org/a/b.zip?token=1#frag"), "b.zip");
        assert_eq!(filename_from_url("/opt/mirror/zlib.tgz"), "zlib.tgz");
        assert_eq!(filename_from_url("https://x.org/repo/"), "repo");
        assert_eq!(filename_from_url(""), "");
    }

    #[test]
    fn test_project_paths() {
        let root = Path::new("/work/demo");
        assert_eq!(link_root(root), PathBuf::from("/work/demo/.kiln/install"));
        assert_eq!(manifest_path(root), PathBuf::from("/work/demo/.kiln/install.manifest"));
    }
}
