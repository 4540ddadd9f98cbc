//! Source retrieval.
//!
//! A [`Downloader`] exists per [`SourceKind`] and exposes exactly two
//! operations, `fetch` and `verify`. [`FetchManager`] owns the registry, the
//! shared HTTP client and a semaphore that bounds how many fetches run at
//! once.
//!
//! Every downloader walks its candidate URLs through [`try_candidates`]:
//! local paths first, first success wins, and when all fail the last error is
//! returned wrapped in [`FetchError::AllMirrorsFailed`].

pub mod archive;
pub mod direct;
pub mod git;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_schema::{Dependency, SourceKind};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::Reporter;
use crate::io::checksum::{ChecksumError, verify_file};
use crate::io::download::DownloadError;
use crate::io::extract::ExtractError;

pub use archive::ArchiveDownloader;
pub use direct::DirectDownloader;
pub use git::GitDownloader;

/// Default number of fetches allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Default whole-request HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Fetch layer failures.
#[derive(Error, Debug)]
pub enum FetchError {
    /// An HTTP download failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The file did not match its declared digests.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// The archive could not be unpacked.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Filesystem failure outside a download.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// No downloader is registered for the source type.
    #[error("unsupported source type: {0}")]
    UnsupportedSource(SourceKind),

    /// Every candidate URL was unusable.
    #[error("no valid URLs found for {0}")]
    NoValidUrls(String),

    /// Each candidate was tried and each failed.
    #[error("all {attempts} candidate URLs failed for {name}: {source}")]
    AllMirrorsFailed {
        /// Dependency name.
        name: String,
        /// Number of candidates tried.
        attempts: usize,
        /// Failure of the last candidate.
        #[source]
        source: Box<FetchError>,
    },

    /// A program the source type needs is not on `PATH`.
    #[error("required tool not found: {0}")]
    ToolMissing(&'static str),

    /// A git subprocess failed.
    #[error("git {command} failed: {stderr}")]
    Git {
        /// The git command line.
        command: String,
        /// What git printed on stderr.
        stderr: String,
    },

    /// The fetched tree failed a post-fetch check.
    #[error("verification failed: {0}")]
    Verification(String),

    /// The cancellation token fired.
    #[error("fetch cancelled")]
    Cancelled,

    /// Wraps a failure with the dependency it belongs to.
    #[error("failed to download {name}: {source}")]
    Dependency {
        /// Dependency name.
        name: String,
        /// The wrapped failure.
        #[source]
        source: Box<FetchError>,
    },

    /// Per-dependency failures from a concurrent batch.
    #[error("download failed for {} dependencies", .0.len())]
    Batch(Vec<(String, FetchError)>),

    /// A fetch task panicked or was aborted.
    #[error("fetch task failed: {0}")]
    Join(String),
}

impl FetchError {
    /// The innermost error, looking through dependency and mirror wrappers.
    pub fn root(&self) -> &FetchError {
        match self {
            Self::Dependency { source, .. } | Self::AllMirrorsFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the failure was a cancellation, at any depth.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.root(),
            Self::Cancelled | Self::Download(DownloadError::Cancelled)
        )
    }

    /// Whether the failure was a checksum mismatch, at any depth.
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self.root(), Self::Checksum(ChecksumError::Mismatch { .. }))
    }
}

/// Tunables for the fetch layer.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Fetches allowed in flight at once.
    pub max_concurrent: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Proxy URL applied to both http and https traffic.
    pub proxy: Option<String>,
    /// Root of the raw-archive cache kept by the archive downloader.
    pub archive_cache: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
            archive_cache: crate::paths::archive_cache_path(),
        }
    }
}

/// Build the shared HTTP client.
pub fn build_client(config: &FetchConfig) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT);
    if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    Ok(builder.build()?)
}

/// Everything a downloader needs for one fetch.
pub struct FetchRequest<'a> {
    /// Dependency being fetched.
    pub dep: &'a Dependency,
    /// Directory to populate.
    pub target_dir: &'a Path,
    /// Cancels the fetch when fired.
    pub cancel: &'a CancellationToken,
    /// Progress sink.
    pub reporter: &'a dyn Reporter,
}

impl std::fmt::Debug for FetchRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRequest")
            .field("dep", &self.dep.name)
            .field("target_dir", &self.target_dir)
            .finish_non_exhaustive()
    }
}

/// What a successful fetch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// The candidate URL that succeeded.
    pub url: String,
    /// Its position in the local-first candidate order.
    pub index: usize,
    /// Where the sources now live.
    pub path: PathBuf,
    /// True when a previously downloaded artifact was reused.
    pub reused: bool,
}

/// A retrieval strategy for one source kind.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Retrieve the dependency's sources into `req.target_dir` and verify them.
    async fn fetch(&self, req: &FetchRequest<'_>) -> Result<FetchOutcome, FetchError>;

    /// Check the integrity of previously fetched content at `path`.
    async fn verify(&self, dep: &Dependency, path: &Path) -> Result<(), FetchError>;
}

/// Try `attempt` on each candidate in order until one succeeds.
///
/// Cancellation stops the walk immediately.
pub async fn try_candidates<'u, T, F, Fut>(
    name: &str,
    urls: &[&'u str],
    mut attempt: F,
) -> Result<(usize, T), FetchError>
where
    F: FnMut(usize, &'u str) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut last_error = None;
    for (index, url) in urls.iter().copied().enumerate() {
        tracing::debug!(dependency = name, url, index, "trying candidate");
        match attempt(index, url).await {
            Ok(value) => return Ok((index, value)),
            Err(e) if e.is_cancelled() => return Err(FetchError::Cancelled),
            Err(e) => {
                tracing::warn!(dependency = name, url, error = %e, "candidate failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(FetchError::AllMirrorsFailed {
            name: name.to_string(),
            attempts: urls.len(),
            source: Box::new(e),
        }),
        None => Err(FetchError::NoValidUrls(name.to_string())),
    }
}

/// Copy a local candidate into `dest` through a temp sibling.
pub(crate) async fn copy_local(src: &Path, dest: &Path) -> Result<u64, FetchError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = crate::io::download::temp_sibling(dest)?;
    let copied = tokio::fs::copy(src, &tmp).await?;
    tmp.persist(dest).map_err(io::Error::from)?;
    Ok(copied)
}

/// Check `path` against the declared digests off the async runtime.
pub(crate) async fn verify_checksums(
    path: &Path,
    declared: BTreeMap<String, String>,
) -> Result<(), FetchError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || verify_file(&path, &declared))
        .await
        .map_err(|e| FetchError::Join(e.to_string()))??;
    Ok(())
}

/// Registry of downloaders behind a bounded-concurrency gate.
pub struct FetchManager {
    downloaders: HashMap<SourceKind, Arc<dyn Downloader>>,
    gate: Arc<Semaphore>,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for FetchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchManager")
            .field("kinds", &self.downloaders.keys().collect::<Vec<_>>())
            .field("available_slots", &self.gate.available_permits())
            .finish_non_exhaustive()
    }
}

impl FetchManager {
    /// Registry with the git, archive and direct downloaders installed.
    pub fn new(config: &FetchConfig, reporter: Arc<dyn Reporter>) -> Result<Self, FetchError> {
        let client = build_client(config)?;
        let mut manager = Self::empty(config.max_concurrent, reporter);
        manager.register(SourceKind::Git, Arc::new(GitDownloader::new()));
        manager.register(
            SourceKind::Archive,
            Arc::new(ArchiveDownloader::new(client.clone(), config.archive_cache.clone())),
        );
        manager.register(SourceKind::Direct, Arc::new(DirectDownloader::new(client)));
        Ok(manager)
    }

    /// Registry with no downloaders.
    pub fn empty(max_concurrent: usize, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            downloaders: HashMap::new(),
            gate: Arc::new(Semaphore::new(max_concurrent.max(1))),
            reporter,
        }
    }

    /// Route sources of `kind` to `downloader`, replacing any earlier one.
    pub fn register(&mut self, kind: SourceKind, downloader: Arc<dyn Downloader>) {
        self.downloaders.insert(kind, downloader);
    }

    /// The downloader registered for `kind`.
    pub fn downloader(&self, kind: SourceKind) -> Result<Arc<dyn Downloader>, FetchError> {
        self.downloaders
            .get(&kind)
            .cloned()
            .ok_or(FetchError::UnsupportedSource(kind))
    }

    /// Fetch one dependency into `target_dir`, waiting for a free slot first.
    pub async fn fetch(
        &self,
        dep: &Dependency,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let downloader = self.downloader(dep.source.kind)?;

        let _permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            permit = self.gate.acquire() => permit.map_err(|_| FetchError::Cancelled)?,
        };

        tokio::fs::create_dir_all(target_dir).await?;
        let req = FetchRequest {
            dep,
            target_dir,
            cancel,
            reporter: self.reporter.as_ref(),
        };

        tracing::info!(dependency = %dep.label(), kind = %dep.source.kind, "fetching");
        downloader
            .fetch(&req)
            .await
            .map_err(|e| match e {
                e if e.is_cancelled() => FetchError::Cancelled,
                other => FetchError::Dependency {
                    name: dep.name.clone(),
                    source: Box::new(other),
                },
            })
    }

    /// Verify previously fetched content with the dependency's downloader.
    pub async fn verify(&self, dep: &Dependency, path: &Path) -> Result<(), FetchError> {
        self.downloader(dep.source.kind)?.verify(dep, path).await
    }

    /// Fetch every dependency concurrently into `<target_root>/<name>`.
    ///
    /// Siblings keep running when one fails. All failures are collected into
    /// [`FetchError::Batch`].
    pub async fn fetch_all(
        self: &Arc<Self>,
        deps: &[Dependency],
        target_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, FetchOutcome)>, FetchError> {
        let mut set: JoinSet<(String, Result<FetchOutcome, FetchError>)> = JoinSet::new();

        for dep in deps {
            let manager = Arc::clone(self);
            let dep = dep.clone();
            let target = target_root.join(&dep.name);
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = manager.fetch(&dep, &target, &cancel).await;
                (dep.name, result)
            });
        }

        let mut fetched = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Ok(outcome))) => fetched.push((name, outcome)),
                Ok((name, Err(e))) => {
                    self.reporter.failed(&name, "", &e.to_string());
                    failures.push((name, e));
                }
                Err(e) => failures.push((String::new(), FetchError::Join(e.to_string()))),
            }
        }

        if failures.is_empty() {
            fetched.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(fetched)
        } else {
            Err(FetchError::Batch(failures))
        }
    }
}
