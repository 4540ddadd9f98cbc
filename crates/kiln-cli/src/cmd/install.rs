//! Install command

use std::path::{Path, PathBuf};

use anyhow::Result;
use kiln_core::ops::{self, InstallOptions};

use super::OpenOptions;

#[derive(Debug)]
pub struct InstallArgs {
    pub names: Vec<String>,
    pub profile: Option<String>,
    pub variant: Option<String>,
    pub toolchain: Option<PathBuf>,
    pub jobs: usize,
    pub options: InstallOptions,
}

/// Install the selected dependencies and return the process exit code.
pub async fn install(project: Option<&Path>, args: InstallArgs) -> Result<i32> {
    let session = super::open(&OpenOptions {
        project,
        profile: args.profile.as_deref(),
        variant: args.variant.as_deref(),
        toolchain: args.toolchain,
        jobs: Some(args.jobs),
    })?;

    let deps = session
        .config
        .select(&args.names, args.profile.as_deref())?;
    if deps.is_empty() {
        println!("Nothing to install.");
        return Ok(0);
    }

    let cancel = session.ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            cancel.cancel();
        }
    });

    let summary = ops::install_all(&session.ctx, &deps, args.options).await;
    for err in &summary.failed {
        eprintln!("error [{}]: {err}", err.kind());
    }
    Ok(summary.exit_code())
}
