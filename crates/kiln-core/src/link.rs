//! Link farm and install manifest.
//!
//! Every top-level entry of an installed dependency is published as an
//! absolute symlink under `<link_root>/<name>/`. The manifest records one
//! JSON object per line and is rewritten through a temp file and rename.
//! Older manifests holding bare target paths are still read; those entries
//! are attributed to a dependency by their location under the link root.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use kiln_schema::{Dependency, Variant};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fsutil::{remove_path, symlink};

/// Failures while publishing or removing links.
#[derive(Error, Debug)]
pub enum LinkError {
    /// A filesystem operation on a link or the manifest failed.
    #[error("link I/O error at {path}: {source}")]
    Io {
        /// Path being touched.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Another writer panicked while holding the manifest lock.
    #[error("manifest lock poisoned")]
    Poisoned,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> LinkError + '_ {
    move |source| LinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One published link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Absolute path of the symlink.
    pub target: PathBuf,
    /// What the link points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Owning dependency; absent in legacy manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
    /// Version that was linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Canonical variant of the linked build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// When the link was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ManifestEntry {
    fn legacy(target: PathBuf) -> Self {
        Self {
            target,
            source: None,
            dependency: None,
            version: None,
            variant: None,
            created_at: None,
        }
    }
}

/// A problem found by [`LinkManager::verify_links`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkIssue {
    /// The manifest lists a path that is gone.
    Missing(PathBuf),
    /// Something other than a symlink sits at the path.
    NotSymlink(PathBuf),
    /// The symlink's destination does not exist.
    Dangling {
        /// The link.
        target: PathBuf,
        /// What it points at.
        points_to: PathBuf,
    },
}

/// Publishes installed trees as symlinks under one root and records them in a manifest.
#[derive(Debug)]
pub struct LinkManager {
    root: PathBuf,
    manifest: PathBuf,
    lock: Mutex<()>,
}

impl LinkManager {
    /// Manager for a project: links under `.kiln/install`, manifest at `.kiln/install.manifest`.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(
            crate::paths::link_root(project_root),
            crate::paths::manifest_path(project_root),
        )
    }

    /// Manager with an explicit link root and manifest file.
    pub fn new(root: impl Into<PathBuf>, manifest: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest: manifest.into(),
            lock: Mutex::new(()),
        }
    }

    /// Directory holding every dependency's links.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The manifest file.
    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    /// Where `name`'s links live.
    pub fn dependency_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Publish each top-level entry of `source_dir` for `dep`.
    ///
    /// Whatever already sits at a target path is removed first. Manifest
    /// entries for the same targets are replaced, never duplicated.
    pub fn install(
        &self,
        dep: &Dependency,
        variant: Option<&Variant>,
        source_dir: &Path,
    ) -> Result<Vec<PathBuf>, LinkError> {
        let source_dir = std::path::absolute(source_dir).map_err(io_err(source_dir))?;
        let dest_dir = self.dependency_dir(&dep.name);
        fs::create_dir_all(&dest_dir).map_err(io_err(&dest_dir))?;

        let mut sources: Vec<PathBuf> = fs::read_dir(&source_dir)
            .map_err(io_err(&source_dir))?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .collect();
        sources.sort();

        let now = Utc::now();
        let variant = variant.map(Variant::canonical).filter(|v| !v.is_empty());
        let mut created = Vec::with_capacity(sources.len());
        for source in sources {
            let Some(file_name) = source.file_name() else {
                continue;
            };
            let target = dest_dir.join(file_name);
            remove_path(&target).map_err(io_err(&target))?;
            symlink(&source, &target).map_err(io_err(&target))?;
            tracing::debug!(target = %target.display(), source = %source.display(), "linked");
            created.push(ManifestEntry {
                target,
                source: Some(source),
                dependency: Some(dep.name.clone()),
                version: Some(dep.version.clone()),
                variant: variant.clone(),
                created_at: Some(now),
            });
        }

        let _guard = self.lock.lock().map_err(|_| LinkError::Poisoned)?;
        let mut entries = self.read_manifest()?;
        entries.retain(|e| !created.iter().any(|c| c.target == e.target));
        let targets = created.iter().map(|c| c.target.clone()).collect();
        entries.extend(created);
        self.write_manifest(&entries)?;
        Ok(targets)
    }

    /// Remove every link recorded for `name` and drop its manifest entries.
    pub fn uninstall(&self, name: &str) -> Result<Vec<PathBuf>, LinkError> {
        let _guard = self.lock.lock().map_err(|_| LinkError::Poisoned)?;
        let (mine, rest): (Vec<_>, Vec<_>) = self
            .read_manifest()?
            .into_iter()
            .partition(|e| self.owner(e).as_deref() == Some(name));

        let mut removed = Vec::with_capacity(mine.len());
        for entry in mine {
            remove_path(&entry.target).map_err(io_err(&entry.target))?;
            removed.push(entry.target);
        }

        let dir = self.dependency_dir(name);
        if fs::read_dir(&dir).is_ok_and(|mut d| d.next().is_none()) {
            fs::remove_dir(&dir).ok();
        }

        self.write_manifest(&rest)?;
        Ok(removed)
    }

    /// Manifest entries belonging to `name`.
    pub fn installed_links(&self, name: &str) -> Result<Vec<ManifestEntry>, LinkError> {
        Ok(self
            .read_manifest()?
            .into_iter()
            .filter(|e| self.owner(e).as_deref() == Some(name))
            .collect())
    }

    /// Check that every recorded target is a symlink that still resolves.
    pub fn verify_links(&self) -> Result<Vec<LinkIssue>, LinkError> {
        let mut issues = Vec::new();
        for entry in self.read_manifest()? {
            let target = entry.target;
            match fs::symlink_metadata(&target) {
                Err(_) => issues.push(LinkIssue::Missing(target)),
                Ok(meta) if !meta.file_type().is_symlink() => {
                    issues.push(LinkIssue::NotSymlink(target));
                }
                Ok(_) => {
                    if !target.exists() {
                        let points_to = fs::read_link(&target).unwrap_or_default();
                        issues.push(LinkIssue::Dangling { target, points_to });
                    }
                }
            }
        }
        Ok(issues)
    }

    /// All manifest entries. A missing manifest is empty.
    pub fn read_manifest(&self) -> Result<Vec<ManifestEntry>, LinkError> {
        let content = match fs::read_to_string(&self.manifest) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.manifest)(e)),
        };

        let mut entries = Vec::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.starts_with('{') {
                match serde_json::from_str::<ManifestEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => tracing::warn!(line, error = %e, "skipping broken manifest line"),
                }
            } else {
                entries.push(ManifestEntry::legacy(PathBuf::from(line)));
            }
        }
        Ok(entries)
    }

    fn write_manifest(&self, entries: &[ManifestEntry]) -> Result<(), LinkError> {
        if let Some(parent) = self.manifest.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let write = || -> io::Result<()> {
            let tmp = crate::io::download::temp_sibling(&self.manifest)?;
            let mut file = io::BufWriter::new(fs::File::create(&tmp)?);
            for entry in entries {
                let line = serde_json::to_string(entry).map_err(io::Error::other)?;
                writeln!(file, "{line}")?;
            }
            file.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
            tmp.persist(&self.manifest).map_err(io::Error::from)
        };
        write().map_err(io_err(&self.manifest))
    }

    fn owner(&self, entry: &ManifestEntry) -> Option<String> {
        if let Some(name) = &entry.dependency {
            return Some(name.clone());
        }
        let rel = entry.target.strip_prefix(&self.root).ok()?;
        rel.components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
    }
}
