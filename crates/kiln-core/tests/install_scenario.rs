//! End-to-end install runs against a mock HTTP server and a recording runner.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use kiln_core::build::{CommandRunner, Invocation, RunError};
use kiln_core::NullReporter;
use kiln_core::ops::{self, Context, Dirs, InstallOptions, Origin, Settings};
use kiln_schema::{BuildSystem, Dependency, ProjectConfig, Source, SourceKind, Variant};
use sha2::{Digest, Sha256};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// Pretends to be cmake: the install step drops a header into the prefix.
#[derive(Default)]
struct FakeCmake {
    calls: Mutex<Vec<Invocation>>,
}

impl FakeCmake {
    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for FakeCmake {
    fn has_program(&self, _program: &str) -> bool {
        true
    }

    async fn run(
        &self,
        invocation: &Invocation,
        _log: Option<&Path>,
        _cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        self.calls.lock().unwrap().push(invocation.clone());
        if invocation.args.first().map(String::as_str) == Some("--install") {
            let prefix = self.prefix().expect("configure ran first");
            let header = prefix.join("include/fmt/core.h");
            std::fs::create_dir_all(header.parent().unwrap()).unwrap();
            std::fs::write(header, "#pragma once\n").unwrap();
        }
        Ok(())
    }

    async fn output(
        &self,
        invocation: &Invocation,
        _cancel: &CancellationToken,
    ) -> Result<String, RunError> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok(String::new())
    }
}

impl FakeCmake {
    fn prefix(&self) -> Option<PathBuf> {
        self.calls.lock().unwrap().iter().find_map(|inv| {
            inv.args.iter().find_map(|a| {
                a.strip_prefix("-DCMAKE_INSTALL_PREFIX=")
                    .map(PathBuf::from)
            })
        })
    }
}

fn fmt_tarball() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let body = b"cmake_minimum_required(VERSION 3.10)\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "fmt-8.0.1/CMakeLists.txt", &body[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn context(root: &Path, runner: Arc<dyn CommandRunner>) -> Context {
    let mut config = ProjectConfig::default();
    config.project.name = "demo".into();
    config.project.version = "1.0.0".into();

    let mut settings =
        Settings::new(root.join("project")).with_dirs(Dirs::under(&root.join("state")));
    settings.variant = Some(Variant::parse("arch=x86_64,platform=linux").unwrap());
    Context::new(&config, settings, runner, Arc::new(NullReporter)).unwrap()
}

#[tokio::test]
async fn test_cmake_dependency_builds_once_then_restores() {
    let body = fmt_tarball();
    let digest = hex::encode(Sha256::digest(&body));
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/fmt-8.0.1.tar.gz")
        .with_body(&body)
        .expect(1)
        .create_async()
        .await;

    let mut dep = Dependency::new(
        "fmt",
        "8.0.1",
        Source {
            kind: SourceKind::Archive,
            urls: vec![format!("{}/fmt-8.0.1.tar.gz", server.url())],
            sha256: Some(digest),
            ..Source::default()
        },
    );
    dep.build_system = BuildSystem::Cmake;
    dep.cmake_options = vec!["-DFMT_TEST=OFF".into()];

    let tmp = tempdir().unwrap();
    let runner = Arc::new(FakeCmake::default());
    let ctx = context(tmp.path(), runner.clone());

    let first = ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(first.origin, Origin::Built);
    assert_eq!(runner.count(), 3);

    let configure = runner.calls.lock().unwrap()[0].clone();
    assert_eq!(configure.program, "cmake");
    assert!(configure.args.iter().any(|a| a == "-DFMT_TEST=OFF"));
    assert!(configure.args.iter().any(|a| a == "-DCMAKE_BUILD_TYPE=Release"));

    let link = ctx.links.dependency_dir("fmt").join("include");
    assert!(link.join("fmt/core.h").exists());
    assert!(
        std::fs::symlink_metadata(&link)
            .unwrap()
            .file_type()
            .is_symlink()
    );

    // Second run: nothing downloaded, nothing spawned.
    let second = ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(second.origin, Origin::BuildCache);
    assert_eq!(runner.count(), 3);
    assert!(link.join("fmt/core.h").exists());
    mock.assert_async().await;

    let entries = ctx.links.installed_links("fmt").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].variant.as_deref(),
        Some("arch=x86_64,platform=linux")
    );
}

#[tokio::test]
async fn test_header_only_dependency_links_download_then_uninstalls() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/json.hpp")
        .with_body("// nlohmann json\n")
        .expect(1)
        .create_async()
        .await;

    let dep = Dependency::new(
        "json",
        "3.11.2",
        Source {
            kind: SourceKind::Direct,
            urls: vec![format!("{}/json.hpp", server.url())],
            ..Source::default()
        },
    );

    let tmp = tempdir().unwrap();
    let runner = Arc::new(FakeCmake::default());
    let ctx = context(tmp.path(), runner.clone());

    let summary = ops::install_all(&ctx, &[dep.clone()], InstallOptions::default()).await;
    assert!(summary.is_success());
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.installed[0].origin, Origin::Fetched);

    let again = ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(again.origin, Origin::DownloadCache);
    assert_eq!(runner.count(), 0);
    mock.assert_async().await;

    let header = ctx.links.dependency_dir("json").join("json.hpp");
    assert_eq!(
        std::fs::read_to_string(&header).unwrap(),
        "// nlohmann json\n"
    );

    let removed = ops::uninstall(&ctx, "json").unwrap();
    assert_eq!(removed, vec![header.clone()]);
    assert!(!header.exists());
    assert!(ctx.links.installed_links("json").unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_dependency_does_not_stop_batch() {
    let mut server = mockito::Server::new_async().await;
    let _missing = server
        .mock("GET", "/missing.h")
        .with_status(404)
        .create_async()
        .await;
    let _present = server
        .mock("GET", "/present.h")
        .with_body("int present;\n")
        .create_async()
        .await;

    let direct = |name: &str, file: &str| {
        Dependency::new(
            name,
            "1.0",
            Source {
                kind: SourceKind::Direct,
                urls: vec![format!("{}/{file}", server.url())],
                ..Source::default()
            },
        )
    };

    let tmp = tempdir().unwrap();
    let ctx = context(tmp.path(), Arc::new(FakeCmake::default()));
    let summary = ops::install_all(
        &ctx,
        &[direct("missing", "missing.h"), direct("present", "present.h")],
        InstallOptions::default(),
    )
    .await;

    assert_eq!(summary.installed.len(), 1);
    assert_eq!(summary.installed[0].name, "present");
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].dependency(), Some("missing"));
    assert_eq!(summary.failed[0].phase(), Some(ops::Phase::Fetch));
    assert_eq!(summary.exit_code(), 1);
}

fn fmt_dependency(url: String, sha256: Option<String>) -> Dependency {
    let mut dep = Dependency::new(
        "fmt",
        "8.0.1",
        Source {
            kind: SourceKind::Archive,
            urls: vec![url],
            sha256,
            ..Source::default()
        },
    );
    dep.build_system = BuildSystem::Cmake;
    dep
}

fn header_dependency(url: String) -> Dependency {
    Dependency::new(
        "catch",
        "2.13.10",
        Source {
            kind: SourceKind::Direct,
            urls: vec![url],
            ..Source::default()
        },
    )
}

#[tokio::test]
async fn test_lost_build_cache_rebuilds_from_cached_sources() {
    let body = fmt_tarball();
    let digest = hex::encode(Sha256::digest(&body));
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/fmt-8.0.1.tar.gz")
        .with_body(&body)
        .expect(1)
        .create_async()
        .await;
    let dep = fmt_dependency(format!("{}/fmt-8.0.1.tar.gz", server.url()), Some(digest));

    let tmp = tempdir().unwrap();
    let runner = Arc::new(FakeCmake::default());
    let ctx = context(tmp.path(), runner.clone());

    let first = ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(first.origin, Origin::Built);

    ctx.cache
        .invalidate_build(&dep, ctx.variant.as_ref())
        .unwrap();
    assert!(ctx.cache.is_download_cached(&dep));

    let second = ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(second.origin, Origin::BuiltFromCache);
    assert_eq!(runner.count(), 6);
    assert!(ctx.cache.is_build_cached(&dep, ctx.variant.as_ref()));
    assert!(
        ctx.links
            .dependency_dir("fmt")
            .join("include/fmt/core.h")
            .exists()
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_force_fetches_again_despite_cache() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/catch.hpp")
        .with_body("// catch\n")
        .expect(2)
        .create_async()
        .await;
    let dep = header_dependency(format!("{}/catch.hpp", server.url()));

    let tmp = tempdir().unwrap();
    let ctx = context(tmp.path(), Arc::new(FakeCmake::default()));

    let first = ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(first.origin, Origin::Fetched);
    assert!(ctx.cache.is_download_cached(&dep));

    let forced = ops::install(
        &ctx,
        &dep,
        InstallOptions {
            force: true,
            ..InstallOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(forced.origin, Origin::Fetched);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_no_cache_leaves_cache_untouched() {
    let body = fmt_tarball();
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/fmt-8.0.1.tar.gz")
        .with_body(&body)
        .create_async()
        .await;
    let dep = fmt_dependency(format!("{}/fmt-8.0.1.tar.gz", server.url()), None);

    let tmp = tempdir().unwrap();
    let runner = Arc::new(FakeCmake::default());
    let ctx = context(tmp.path(), runner.clone());
    let options = InstallOptions {
        no_cache: true,
        ..InstallOptions::default()
    };

    let installed = ops::install(&ctx, &dep, options).await.unwrap();
    assert_eq!(installed.origin, Origin::Built);
    assert!(!ctx.cache.is_download_cached(&dep));
    assert!(!ctx.cache.is_build_cached(&dep, ctx.variant.as_ref()));
    assert!(ctx.cache.list().is_empty());

    // Nothing cached, so the next plain install builds again.
    let again = ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(again.origin, Origin::Built);
    assert_eq!(runner.count(), 6);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_build_cache_falls_back_to_fresh_install() {
    use std::os::unix::net::UnixListener;

    let body = fmt_tarball();
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/fmt-8.0.1.tar.gz")
        .with_body(&body)
        .expect_at_least(1)
        .create_async()
        .await;
    let dep = fmt_dependency(format!("{}/fmt-8.0.1.tar.gz", server.url()), None);

    let tmp = tempdir().unwrap();
    let runner = Arc::new(FakeCmake::default());
    let ctx = context(tmp.path(), runner.clone());

    ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();

    // A socket inside the build entry cannot be copied out, so retrieval fails.
    let entry = ctx.cache.build_path(&dep, ctx.variant.as_ref());
    let socket = tmp.path().join("s");
    let _listener = UnixListener::bind(&socket).unwrap();
    std::fs::rename(&socket, entry.join("include/fmt/broken")).unwrap();

    let recovered = ops::install(&ctx, &dep, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(recovered.origin, Origin::Built);
    assert_eq!(runner.count(), 6);
    assert!(
        ctx.links
            .dependency_dir("fmt")
            .join("include/fmt/core.h")
            .exists()
    );
    // The fresh build replaced the unusable entry.
    assert!(!entry.join("include/fmt/broken").exists());
}
