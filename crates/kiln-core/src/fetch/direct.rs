//! Single-file sources such as header-only libraries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_schema::{Dependency, is_local_url};
use reqwest::Client;

use super::{
    Downloader, FetchError, FetchOutcome, FetchRequest, copy_local, try_candidates,
    verify_checksums,
};
use crate::io::download::download_to_file;
use crate::paths::filename_from_url;

/// Places one file, named after the URL's last segment, into the target directory.
#[derive(Debug, Clone)]
pub struct DirectDownloader {
    client: Client,
}

impl DirectDownloader {
    /// A downloader sharing `client` for every request.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// File name for a direct download; the dependency name when the URL has none.
fn target_file_name(dep: &Dependency, url: &str) -> String {
    match filename_from_url(url) {
        "" | "download" => dep.name.clone(),
        name => name.to_string(),
    }
}

#[async_trait]
impl Downloader for DirectDownloader {
    async fn fetch(&self, req: &FetchRequest<'_>) -> Result<FetchOutcome, FetchError> {
        let dep = req.dep;
        let urls = dep.source.ordered_urls();

        let (index, file) = try_candidates(&dep.name, &urls, move |_, url| async move {
            let dest: PathBuf = req.target_dir.join(target_file_name(dep, url));
            if is_local_url(url) {
                copy_local(Path::new(url), &dest).await?;
            } else {
                download_to_file(&self.client, url, &dest, req.cancel, |current, total| {
                    req.reporter.fetching(&dep.name, &dep.version, current, total);
                })
                .await?;
            }
            Ok(dest)
        })
        .await?;

        if let Err(e) = self.verify(dep, &file).await {
            tokio::fs::remove_file(&file).await.ok();
            return Err(e);
        }

        Ok(FetchOutcome {
            url: urls[index].to_string(),
            index,
            path: req.target_dir.to_path_buf(),
            reused: false,
        })
    }

    async fn verify(&self, dep: &Dependency, path: &Path) -> Result<(), FetchError> {
        if !path.is_file() {
            return Err(FetchError::Verification(format!(
                "file {} does not exist",
                path.display()
            )));
        }
        verify_checksums(path, dep.source.declared_checksums()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullReporter;
    use kiln_schema::{Source, SourceKind};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn dep(urls: Vec<String>) -> Dependency {
        Dependency::new(
            "catch",
            "2.13",
            Source {
                kind: SourceKind::Direct,
                urls,
                sha256: Some(HELLO_SHA256.into()),
                ..Source::default()
            },
        )
    }

    #[test]
    fn test_target_file_name() {
        let d = dep(vec![]);
        assert_eq!(target_file_name(&d, "https://x/catch.hpp?raw=1"), "catch.hpp");
        assert_eq!(target_file_name(&d, "https://x/files/download"), "catch");
        assert_eq!(target_file_name(&d, "https://x/"), "x");
    }

    #[tokio::test]
    async fn test_mirror_fallback_reports_winning_index() {
        let mut server = mockito::Server::new_async().await;
        let _a = server.mock("GET", "/a/catch.hpp").with_status(500).create_async().await;
        let _b = server.mock("GET", "/b/catch.hpp").with_status(404).create_async().await;
        let _c = server
            .mock("GET", "/c/catch.hpp")
            .with_body("hello")
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let dep = dep(["a", "b", "c"]
            .iter()
            .map(|m| format!("{}/{m}/catch.hpp", server.url()))
            .collect());
        let cancel = CancellationToken::new();
        let req = FetchRequest {
            dep: &dep,
            target_dir: tmp.path(),
            cancel: &cancel,
            reporter: &NullReporter,
        };

        let outcome = DirectDownloader::new(Client::new()).fetch(&req).await.unwrap();
        assert_eq!(outcome.index, 2);
        assert!(outcome.url.ends_with("/c/catch.hpp"));
        assert_eq!(std::fs::read_to_string(tmp.path().join("catch.hpp")).unwrap(), "hello");
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["catch.hpp"]);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let _a = server.mock("GET", "/catch.hpp").with_body("tampered").create_async().await;

        let tmp = tempdir().unwrap();
        let dep = dep(vec![format!("{}/catch.hpp", server.url())]);
        let cancel = CancellationToken::new();
        let req = FetchRequest {
            dep: &dep,
            target_dir: tmp.path(),
            cancel: &cancel,
            reporter: &NullReporter,
        };

        let err = DirectDownloader::new(Client::new()).fetch(&req).await.unwrap_err();
        assert!(err.is_checksum_mismatch());
        assert!(err.to_string().contains(HELLO_SHA256));
        assert!(!tmp.path().join("catch.hpp").exists());
    }
}
