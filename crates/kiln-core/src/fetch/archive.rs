//! Archive sources: download once into a raw-archive cache, verify, extract.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_schema::{Dependency, is_local_url};
use reqwest::Client;

use super::{
    Downloader, FetchError, FetchOutcome, FetchRequest, copy_local, try_candidates,
    verify_checksums,
};
use crate::io::download::download_to_file;
use crate::io::extract::extract_archive;
use crate::paths::filename_from_url;

/// Downloads release archives and unpacks them without their top-level folder.
#[derive(Debug, Clone)]
pub struct ArchiveDownloader {
    client: Client,
    cache_root: PathBuf,
}

impl ArchiveDownloader {
    /// Raw archives are kept under `cache_root` between runs.
    pub fn new(client: Client, cache_root: PathBuf) -> Self {
        Self { client, cache_root }
    }

    /// Where the raw archive fetched from `url` is kept:
    /// `<cache_root>/<name>/<version>/<filename>`.
    ///
    /// Forge archive URLs often share a basename (`v1.0.tar.gz`), so the
    /// dependency name is part of the path.
    pub fn cached_archive(&self, dep: &Dependency, url: &str) -> PathBuf {
        let file = match filename_from_url(url) {
            "" => format!("{}-{}.tar.gz", dep.name, dep.version),
            file => file.to_string(),
        };
        self.cache_root.join(&dep.name).join(&dep.version).join(file)
    }

    async fn download_candidate(
        &self,
        req: &FetchRequest<'_>,
        url: &str,
        dest: &Path,
    ) -> Result<(), FetchError> {
        if is_local_url(url) {
            copy_local(Path::new(url), dest).await?;
            return Ok(());
        }
        let dep = req.dep;
        download_to_file(&self.client, url, dest, req.cancel, |current, total| {
            req.reporter.fetching(&dep.name, &dep.version, current, total);
        })
        .await?;
        Ok(())
    }
}

/// The candidate whose cache file is checked for reuse: an existing local
/// file, else the first network URL, else the first local entry.
fn preferred_candidate<'u>(urls: &[&'u str]) -> Option<(usize, &'u str)> {
    let existing_local = urls
        .iter()
        .position(|u| is_local_url(u) && Path::new(u).is_file());
    let network = urls.iter().position(|u| !is_local_url(u));
    existing_local
        .or(network)
        .or((!urls.is_empty()).then_some(0))
        .map(|i| (i, urls[i]))
}

#[async_trait]
impl Downloader for ArchiveDownloader {
    async fn fetch(&self, req: &FetchRequest<'_>) -> Result<FetchOutcome, FetchError> {
        let dep = req.dep;
        let urls = dep.source.ordered_urls();
        let (preferred_index, preferred) =
            preferred_candidate(&urls).ok_or_else(|| FetchError::NoValidUrls(dep.name.clone()))?;

        let cached = self.cached_archive(dep, preferred);
        let reuse = cached.is_file() && self.verify(dep, &cached).await.is_ok();

        let (index, archive) = if reuse {
            tracing::info!(dependency = %dep.label(), path = %cached.display(), "reusing cached archive");
            (preferred_index, cached)
        } else {
            let (index, archive) = try_candidates(&dep.name, &urls, move |_, url| async move {
                let dest = self.cached_archive(dep, url);
                self.download_candidate(req, url, &dest).await?;
                Ok(dest)
            })
            .await?;

            if let Err(e) = self.verify(dep, &archive).await {
                tokio::fs::remove_file(&archive).await.ok();
                return Err(e);
            }
            (index, archive)
        };

        req.reporter.extracting(&dep.name, &dep.version);
        let dest = req.target_dir.to_path_buf();
        let archive_path = archive.clone();
        let files = tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest))
            .await
            .map_err(|e| FetchError::Join(e.to_string()))??;
        tracing::debug!(dependency = %dep.label(), files, "extracted archive");

        Ok(FetchOutcome {
            url: urls[index].to_string(),
            index,
            path: req.target_dir.to_path_buf(),
            reused: reuse,
        })
    }

    async fn verify(&self, dep: &Dependency, path: &Path) -> Result<(), FetchError> {
        if !path.is_file() {
            return Err(FetchError::Verification(format!(
                "archive {} does not exist",
                path.display()
            )));
        }
        verify_checksums(path, dep.source.declared_checksums()).await
    }
}
