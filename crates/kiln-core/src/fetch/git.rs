//! Version-control sources.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use kiln_schema::Dependency;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{Downloader, FetchError, FetchOutcome, FetchRequest, try_candidates};
use crate::fsutil::remove_path;

/// Clones repositories with the system `git`.
#[derive(Debug, Clone, Default)]
pub struct GitDownloader;

impl GitDownloader {
    /// A downloader that shells out to `git`.
    pub fn new() -> Self {
        Self
    }

    async fn clone_candidate(
        &self,
        dep: &Dependency,
        url: &str,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        remove_path(target)?;
        let target_str = target.to_string_lossy();

        let tag = dep.source.tag.as_deref().filter(|t| !t.is_empty());
        let result = match tag {
            Some(tag) => {
                run_git(
                    &["clone", "--quiet", "--branch", tag, "--depth", "1", url, &target_str],
                    None,
                    cancel,
                )
                .await
            }
            None => run_git(&["clone", "--quiet", url, &target_str], None, cancel).await,
        };

        let result = match result {
            Ok(_) if tag.is_none() && !dep.version.is_empty() => {
                checkout_version(target, &dep.version, cancel).await
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };

        if result.is_err() {
            remove_path(target).ok();
        }
        result
    }
}

/// Check out `version` as a tag, then a branch, then a raw revision.
async fn checkout_version(
    repo: &Path,
    version: &str,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    if run_git(&["fetch", "--quiet", "--tags", "origin"], Some(repo), cancel)
        .await
        .is_err()
    {
        run_git(&["fetch", "--quiet", "--all"], Some(repo), cancel).await?;
    }

    let tag_ref = format!("refs/tags/{version}");
    let branch_ref = format!("origin/{version}");
    let attempts: [&[&str]; 3] = [
        &["checkout", "--quiet", &tag_ref],
        &["checkout", "--quiet", "-B", version, &branch_ref],
        &["checkout", "--quiet", "--detach", version],
    ];

    let mut last_error = None;
    for args in attempts {
        match run_git(args, Some(repo), cancel).await {
            Ok(_) => {
                tracing::debug!(repo = %repo.display(), version, "checked out");
                return Ok(());
            }
            Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| FetchError::Verification(format!("cannot check out {version}"))))
}

/// Run git and return trimmed stdout. The child is killed if `cancel` fires.
async fn run_git(
    args: &[&str],
    cwd: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<String, FetchError> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FetchError::ToolMissing("git"),
        _ => FetchError::Io(e),
    })?;

    let output = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(FetchError::Cancelled),
        output = child.wait_with_output() => output?,
    };

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(FetchError::Git {
            command: args.first().copied().unwrap_or_default().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl Downloader for GitDownloader {
    async fn fetch(&self, req: &FetchRequest<'_>) -> Result<FetchOutcome, FetchError> {
        which::which("git").map_err(|_| FetchError::ToolMissing("git"))?;

        let dep = req.dep;
        remove_path(req.target_dir)?;
        req.reporter.fetching(&dep.name, &dep.version, 0, None);

        let urls = dep.source.ordered_urls();
        let (index, ()) = try_candidates(&dep.name, &urls, move |_, url| {
            self.clone_candidate(dep, url, req.target_dir, req.cancel)
        })
        .await?;

        self.verify(dep, req.target_dir).await?;

        Ok(FetchOutcome {
            url: urls[index].to_string(),
            index,
            path: req.target_dir.to_path_buf(),
            reused: false,
        })
    }

    async fn verify(&self, dep: &Dependency, path: &Path) -> Result<(), FetchError> {
        if !path.join(".git").exists() {
            return Err(FetchError::Verification(format!(
                "{} is not a git repository",
                path.display()
            )));
        }

        let cancel = CancellationToken::new();
        let head = run_git(&["rev-parse", "HEAD"], Some(path), &cancel).await?;

        if let Some(tag) = dep.source.tag.as_deref().filter(|t| !t.is_empty()) {
            let current = run_git(&["describe", "--tags", "--exact-match"], Some(path), &cancel)
                .await
                .unwrap_or_default();
            if current != tag {
                return Err(FetchError::Verification(format!(
                    "expected tag {tag}, found {}",
                    if current.is_empty() { "no exact tag" } else { &current }
                )));
            }
        }

        if let Some(pinned) = dep.source.hash.as_deref().filter(|h| is_commit_id(h)) {
            let pinned = pinned.to_lowercase();
            if !head.starts_with(&pinned) {
                return Err(FetchError::Verification(format!(
                    "expected commit {pinned}, found {head}"
                )));
            }
        }

        tracing::debug!(dependency = %dep.label(), %head, "git checkout verified");
        Ok(())
    }
}

/// A full or abbreviated commit id. Longer hex strings are content digests.
fn is_commit_id(s: &str) -> bool {
    (7..=40).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullReporter;
    use kiln_schema::{Source, SourceKind};
    use tempfile::tempdir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = std::process::Command::new("git")
            .args(["-c", "user.name=kiln", "-c", "user.email=kiln@localhost"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// Upstream repo with one tagged commit followed by an untagged one.
    fn upstream(root: &Path) -> (std::path::PathBuf, String) {
        let repo = root.join("upstream");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "--quiet"]);
        std::fs::write(repo.join("lib.h"), "v1").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "--quiet", "-m", "first"]);
        git(&repo, &["tag", "v1.0"]);
        let tagged = git(&repo, &["rev-parse", "HEAD"]);
        std::fs::write(repo.join("lib.h"), "v2").unwrap();
        git(&repo, &["commit", "--quiet", "-am", "second"]);
        (repo, tagged)
    }

    fn dep(urls: Vec<String>, tag: Option<&str>, version: &str) -> Dependency {
        Dependency::new(
            "lib",
            version,
            Source {
                kind: SourceKind::Git,
                urls,
                tag: tag.map(str::to_string),
                ..Source::default()
            },
        )
    }

    #[tokio::test]
    async fn test_clone_tag_and_fall_back_past_bad_remote() {
        if which::which("git").is_err() {
            return;
        }
        let tmp = tempdir().unwrap();
        let (repo, tagged) = upstream(tmp.path());
        let missing = tmp.path().join("missing-repo");
        let target = tmp.path().join("src");

        let mut dep = dep(
            vec![
                missing.to_string_lossy().into_owned(),
                repo.to_string_lossy().into_owned(),
            ],
            Some("v1.0"),
            "1.0",
        );
        dep.source.hash = Some(tagged[..12].to_string());

        let cancel = CancellationToken::new();
        let req = FetchRequest {
            dep: &dep,
            target_dir: &target,
            cancel: &cancel,
            reporter: &NullReporter,
        };
        let outcome = GitDownloader::new().fetch(&req).await.unwrap();
        assert_eq!(outcome.index, 1);
        assert_eq!(std::fs::read_to_string(target.join("lib.h")).unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_checkout_version_by_tag_without_pinned_ref() {
        if which::which("git").is_err() {
            return;
        }
        let tmp = tempdir().unwrap();
        let (repo, _) = upstream(tmp.path());
        let target = tmp.path().join("src");
        let dep = dep(vec![repo.to_string_lossy().into_owned()], None, "v1.0");

        let cancel = CancellationToken::new();
        let req = FetchRequest {
            dep: &dep,
            target_dir: &target,
            cancel: &cancel,
            reporter: &NullReporter,
        };
        GitDownloader::new().fetch(&req).await.unwrap();
        assert_eq!(std::fs::read_to_string(target.join("lib.h")).unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_commit_and_plain_dirs() {
        if which::which("git").is_err() {
            return;
        }
        let tmp = tempdir().unwrap();
        let (repo, _) = upstream(tmp.path());
        let downloader = GitDownloader::new();

        let mut pinned = dep(vec![], None, "");
        pinned.source.hash = Some("0000000".into());
        let err = downloader.verify(&pinned, &repo).await.unwrap_err();
        assert!(err.to_string().contains("expected commit 0000000"));

        let plain = tmp.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        let err = downloader.verify(&pinned, &plain).await.unwrap_err();
        assert!(err.to_string().contains("not a git repository"));
    }

    #[test]
    fn test_is_commit_id() {
        assert!(is_commit_id("abc1234"));
        assert!(is_commit_id(&"a".repeat(40)));
        assert!(!is_commit_id(&"a".repeat(64)));
        assert!(!is_commit_id("v1.0.0"));
    }
}
