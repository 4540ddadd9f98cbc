//! Uninstall and cache maintenance.

use std::path::PathBuf;

use super::{Context, InstallError, Phase};
use crate::cache::CleanupReport;
use crate::link::LinkIssue;

/// Remove `name`'s links from the project and forget them in the manifest.
///
/// Built outputs and cache entries are left alone.
pub fn uninstall(ctx: &Context, name: &str) -> Result<Vec<PathBuf>, InstallError> {
    ctx.reporter.removing(name);
    let removed = ctx
        .links
        .uninstall(name)
        .map_err(|e| InstallError::from(e).during(name, Phase::Link))?;
    if removed.is_empty() {
        ctx.reporter.warning(&format!("{name} has no installed links"));
    } else {
        ctx.reporter
            .done(name, "", &format!("removed {} links", removed.len()));
    }
    Ok(removed)
}

/// Check the project's link farm against the manifest.
pub fn verify(ctx: &Context) -> Result<Vec<LinkIssue>, InstallError> {
    let issues = ctx.links.verify_links()?;
    for issue in &issues {
        let msg = match issue {
            LinkIssue::Missing(target) => format!("missing: {}", target.display()),
            LinkIssue::NotSymlink(target) => format!("not a symlink: {}", target.display()),
            LinkIssue::Dangling { target, points_to } => format!(
                "dangling: {} -> {}",
                target.display(),
                points_to.display()
            ),
        };
        ctx.reporter.warning(&msg);
    }
    Ok(issues)
}

/// Drop expired cache entries, or everything when `all` is set.
pub fn clean_cache(ctx: &Context, all: bool) -> Result<CleanupReport, InstallError> {
    if all {
        let freed = ctx.cache.size();
        ctx.cache.clear()?;
        ctx.reporter.info("cache cleared");
        return Ok(CleanupReport {
            removed: 0,
            freed_bytes: freed,
        });
    }
    let report = ctx.cache.cleanup()?;
    ctx.reporter.info(&format!(
        "removed {} expired cache entries ({} bytes)",
        report.removed, report.freed_bytes
    ));
    Ok(report)
}
