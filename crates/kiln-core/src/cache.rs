//! Two-tier persistent cache.
//!
//! Download entries hold fetched sources and are variant-independent. Build
//! entries hold installed build outputs and are scoped by [`Variant`]:
//!
//! ```text
//! <root>/kiln/<name>/<version>/<filename>       # download entry
//! <root>/kiln/<name>/<version>/<variant_dir>    # build entry
//! <root>/metadata/<cache_key>.json              # per-entry metadata
//! ```
//!
//! Presence on disk is the hit signal. Age is only enforced by
//! [`CacheStore::cleanup`]; a stale entry that is still present is a hit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use kiln_schema::{Dependency, SourceKind, Variant, variant_dir};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::fsutil::{copy_path, path_size, remove_path};
use crate::paths::{CACHE_NAMESPACE, filename_from_url};

/// Default maximum entry age before [`CacheStore::cleanup`] removes it.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const METADATA_DIR: &str = "metadata";

/// Cache store failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No entry where one was expected.
    #[error("cache not found for dependency {name} at {}", path.display())]
    NotFound {
        /// Dependency name.
        name: String,
        /// Where the entry was expected.
        path: PathBuf,
    },

    /// A filesystem operation on the cache failed.
    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A metadata sidecar did not parse.
    #[error("corrupted cache metadata at {}: {source}", path.display())]
    Metadata {
        /// The sidecar file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Another writer panicked while holding the write lock.
    #[error("cache lock poisoned")]
    Poisoned,
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True when the underlying I/O failure was a permission problem.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
    }
}

/// Which tier an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Fetched sources, shared by every variant.
    Download,
    /// Install output for one variant.
    Build,
}

/// Sidecar record written next to every stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// [`CacheStore::cache_key`] of the dependency.
    pub key: String,
    /// Dependency name.
    pub name: String,
    /// Dependency version.
    pub version: String,
    /// Tier of the entry.
    pub kind: EntryKind,
    /// Canonical variant string, build entries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Source URLs at the time of storing.
    pub urls: Vec<String>,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
}

/// One entry as reported by [`CacheStore::list`].
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    /// Dependency name.
    pub name: String,
    /// Dependency version.
    pub version: String,
    /// Filename (download entries) or variant dir (build entries).
    pub entry: String,
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Size on disk in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Older than the store's maximum age.
    pub expired: bool,
}

/// Result of a [`CacheStore::cleanup`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Entries deleted.
    pub removed: usize,
    /// Bytes reclaimed.
    pub freed_bytes: u64,
}

/// Content-keyed, variant-scoped cache rooted at a directory.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    namespace: String,
    max_age: Duration,
    write_lock: Mutex<()>,
}

impl CacheStore {
    /// A store rooted at `root`. Nothing is created until [`init`](Self::init) or the first store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            namespace: CACHE_NAMESPACE.to_string(),
            max_age: DEFAULT_MAX_AGE,
            write_lock: Mutex::new(()),
        }
    }

    /// Override the age after which [`cleanup`](Self::cleanup) removes entries.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Directory everything is stored under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the namespace and metadata directories.
    pub fn init(&self) -> Result<(), CacheError> {
        for dir in [self.namespace_dir(), self.root.join(METADATA_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        }
        Ok(())
    }

    fn namespace_dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    fn entry_dir(&self, dep: &Dependency) -> PathBuf {
        self.namespace_dir().join(&dep.name).join(&dep.version)
    }

    /// Stable fingerprint over every candidate URL, the version, the tag and the legacy hash.
    pub fn cache_key(dep: &Dependency) -> String {
        let mut hasher = Sha256::new();
        for url in &dep.source.urls {
            hasher.update(url.as_bytes());
        }
        hasher.update(dep.version.as_bytes());
        if let Some(tag) = dep.source.tag.as_deref().filter(|t| !t.is_empty()) {
            hasher.update(tag.as_bytes());
        }
        if let Some(hash) = dep.source.hash.as_deref().filter(|h| !h.is_empty()) {
            hasher.update(hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Name of the download entry: the URL's filename, or key plus a kind-specific extension.
    pub fn download_filename(dep: &Dependency) -> String {
        let from_url = dep
            .source
            .urls
            .first()
            .map(|u| filename_from_url(u))
            .unwrap_or_default();
        if !from_url.is_empty() && from_url != "download" {
            return from_url.to_string();
        }

        let ext = match dep.source.kind {
            SourceKind::Archive => ".tar.gz",
            SourceKind::Git => ".git",
            SourceKind::Direct | SourceKind::ExternalIndex => ".bin",
        };
        format!("{}{ext}", Self::cache_key(dep))
    }

    /// `<root>/kiln/<name>/<version>/<download filename>`.
    pub fn download_path(&self, dep: &Dependency) -> PathBuf {
        self.entry_dir(dep).join(Self::download_filename(dep))
    }

    /// `<root>/kiln/<name>/<version>/<variant dir>`.
    pub fn build_path(&self, dep: &Dependency, variant: Option<&Variant>) -> PathBuf {
        self.entry_dir(dep).join(variant_dir(variant))
    }

    fn metadata_path(
        &self,
        dep: &Dependency,
        kind: EntryKind,
        variant: Option<&Variant>,
    ) -> PathBuf {
        let key = Self::cache_key(dep);
        let file = match kind {
            EntryKind::Download => format!("{key}.json"),
            EntryKind::Build => format!("{key}-{}.json", variant_dir(variant)),
        };
        self.root.join(METADATA_DIR).join(file)
    }

    /// Whether a download entry exists for `dep`.
    pub fn is_download_cached(&self, dep: &Dependency) -> bool {
        self.download_path(dep).exists()
    }

    /// Whether a build entry exists for `dep` under `variant`.
    pub fn is_build_cached(&self, dep: &Dependency, variant: Option<&Variant>) -> bool {
        self.build_path(dep, variant).exists()
    }

    /// Copy `source` (file or directory) into the download tier.
    pub fn store(&self, dep: &Dependency, source: &Path) -> Result<PathBuf, CacheError> {
        let dest = self.download_path(dep);
        self.store_at(dep, source, &dest, EntryKind::Download, None)?;
        Ok(dest)
    }

    /// Copy a build output directory into the build tier for `variant`.
    pub fn store_build(
        &self,
        dep: &Dependency,
        source: &Path,
        variant: Option<&Variant>,
    ) -> Result<PathBuf, CacheError> {
        let dest = self.build_path(dep, variant);
        self.store_at(dep, source, &dest, EntryKind::Build, variant)?;
        Ok(dest)
    }

    fn store_at(
        &self,
        dep: &Dependency,
        source: &Path,
        dest: &Path,
        kind: EntryKind,
        variant: Option<&Variant>,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().map_err(|_| CacheError::Poisoned)?;

        remove_path(dest).map_err(|e| CacheError::io(dest, e))?;
        copy_path(source, dest).map_err(|e| CacheError::io(dest, e))?;

        let meta = CacheMetadata {
            key: Self::cache_key(dep),
            name: dep.name.clone(),
            version: dep.version.clone(),
            kind,
            variant: variant.map(Variant::canonical),
            urls: dep.source.urls.clone(),
            stored_at: Utc::now(),
        };
        let meta_path = self.metadata_path(dep, kind, variant);
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| CacheError::Metadata {
            path: meta_path.clone(),
            source: e,
        })?;
        fs::write(&meta_path, json).map_err(|e| CacheError::io(&meta_path, e))?;

        tracing::debug!(
            dependency = %dep.label(),
            path = %dest.display(),
            ?kind,
            "stored cache entry"
        );
        Ok(())
    }

    /// Copy the download entry out into `target_dir`.
    pub fn retrieve(&self, dep: &Dependency, target_dir: &Path) -> Result<(), CacheError> {
        self.retrieve_from(dep, &self.download_path(dep), target_dir)
    }

    /// Copy the build entry for `variant` out into `target_dir`.
    pub fn retrieve_build(
        &self,
        dep: &Dependency,
        target_dir: &Path,
        variant: Option<&Variant>,
    ) -> Result<(), CacheError> {
        self.retrieve_from(dep, &self.build_path(dep, variant), target_dir)
    }

    fn retrieve_from(
        &self,
        dep: &Dependency,
        cached: &Path,
        target_dir: &Path,
    ) -> Result<(), CacheError> {
        let meta = fs::symlink_metadata(cached).map_err(|_| CacheError::NotFound {
            name: dep.name.clone(),
            path: cached.to_path_buf(),
        })?;

        let dest = if meta.is_dir() {
            target_dir.to_path_buf()
        } else {
            target_dir.join(cached.file_name().unwrap_or_default())
        };
        copy_path(cached, &dest).map_err(|e| CacheError::io(&dest, e))
    }

    /// Load the metadata record for an entry, if one was written.
    pub fn metadata(
        &self,
        dep: &Dependency,
        kind: EntryKind,
        variant: Option<&Variant>,
    ) -> Result<Option<CacheMetadata>, CacheError> {
        let path = self.metadata_path(dep, kind, variant);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CacheError::Metadata { path, source })
    }

    /// Drop the download entry and its metadata.
    pub fn invalidate(&self, dep: &Dependency) -> Result<(), CacheError> {
        self.invalidate_at(
            &self.download_path(dep),
            &self.metadata_path(dep, EntryKind::Download, None),
        )
    }

    /// Drop the build entry for `variant` and its metadata.
    pub fn invalidate_build(
        &self,
        dep: &Dependency,
        variant: Option<&Variant>,
    ) -> Result<(), CacheError> {
        self.invalidate_at(
            &self.build_path(dep, variant),
            &self.metadata_path(dep, EntryKind::Build, variant),
        )
    }

    fn invalidate_at(&self, entry: &Path, meta: &Path) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().map_err(|_| CacheError::Poisoned)?;
        remove_path(entry).map_err(|e| CacheError::io(entry, e))?;
        remove_path(meta).map_err(|e| CacheError::io(meta, e))
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > self.max_age)
    }

    /// Every `<name>/<version>/<entry>` path in the namespace, plus metadata files.
    fn walk_entries(&self) -> Vec<(String, String, String, PathBuf)> {
        let mut out = Vec::new();
        for name_dir in read_dir_paths(&self.namespace_dir()) {
            for version_dir in read_dir_paths(&name_dir) {
                for entry in read_dir_paths(&version_dir) {
                    out.push((
                        file_name(&name_dir),
                        file_name(&version_dir),
                        file_name(&entry),
                        entry,
                    ));
                }
            }
        }
        out
    }

    /// Describe every cached entry.
    pub fn list(&self) -> Vec<CacheEntryInfo> {
        self.walk_entries()
            .into_iter()
            .filter_map(|(name, version, entry, path)| {
                let modified = fs::symlink_metadata(&path).and_then(|m| m.modified()).ok()?;
                Some(CacheEntryInfo {
                    size: path_size(&path),
                    expired: self.is_expired(modified),
                    modified: DateTime::<Utc>::from(modified),
                    name,
                    version,
                    entry,
                    path,
                })
            })
            .collect()
    }

    /// Total size of everything under the cache root.
    pub fn size(&self) -> u64 {
        path_size(&self.root)
    }

    /// Remove entries and metadata older than the configured maximum age.
    pub fn cleanup(&self) -> Result<CleanupReport, CacheError> {
        let mut report = CleanupReport::default();

        for info in self.list().into_iter().filter(|i| i.expired) {
            let _guard = self.write_lock.lock().map_err(|_| CacheError::Poisoned)?;
            remove_path(&info.path).map_err(|e| CacheError::io(&info.path, e))?;
            report.removed += 1;
            report.freed_bytes += info.size;
            tracing::debug!(path = %info.path.display(), "expired cache entry removed");
        }

        for meta in read_dir_paths(&self.root.join(METADATA_DIR)) {
            let expired = fs::metadata(&meta)
                .and_then(|m| m.modified())
                .is_ok_and(|t| self.is_expired(t));
            if expired {
                remove_path(&meta).map_err(|e| CacheError::io(&meta, e))?;
            }
        }

        for name_dir in read_dir_paths(&self.namespace_dir()) {
            // Only succeeds on directories left empty by the pass above.
            for version_dir in read_dir_paths(&name_dir) {
                fs::remove_dir(&version_dir).ok();
            }
            fs::remove_dir(&name_dir).ok();
        }

        Ok(report)
    }

    /// Remove every entry and all metadata.
    pub fn clear(&self) -> Result<(), CacheError> {
        {
            let _guard = self.write_lock.lock().map_err(|_| CacheError::Poisoned)?;
            for dir in [self.namespace_dir(), self.root.join(METADATA_DIR)] {
                remove_path(&dir).map_err(|e| CacheError::io(&dir, e))?;
            }
        }
        self.init()
    }
}

fn read_dir_paths(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map(|rd| rd.filter_map(Result::ok).map(|e| e.path()).collect())
        .unwrap_or_default();
    paths.sort();
    paths
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
