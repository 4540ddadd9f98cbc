//! Reporter trait for dependency injection
//!
//! Core logic reports progress through this trait so it is not coupled to a
//! specific terminal UI. [`NullReporter`] discards everything and
//! [`TracingReporter`] forwards to `tracing`.

/// Receives user-facing progress events from the engine.
pub trait Reporter: Send + Sync {
    /// A new phase of the run has started (e.g. "Installing").
    fn section(&self, title: &str);

    /// Progress of a network download, in bytes.
    fn fetching(&self, name: &str, version: &str, current: u64, total: Option<u64>);

    /// An archive is being unpacked.
    fn extracting(&self, name: &str, version: &str);

    /// A build phase (configure, build, test, install) has started.
    fn building(&self, name: &str, version: &str, phase: &str);

    /// Links are being published into the project tree.
    fn linking(&self, name: &str, version: &str, count: usize);

    /// A dependency is being uninstalled.
    fn removing(&self, name: &str);

    /// Marks a dependency as successfully handled.
    fn done(&self, name: &str, version: &str, detail: &str);

    /// Marks a dependency as failed with a reason.
    fn failed(&self, name: &str, version: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Final tally of a batch operation.
    fn summary(&self, succeeded: usize, failed: usize, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn fetching(&self, name: &str, version: &str, current: u64, total: Option<u64>) {
        (**self).fetching(name, version, current, total);
    }
    fn extracting(&self, name: &str, version: &str) {
        (**self).extracting(name, version);
    }
    fn building(&self, name: &str, version: &str, phase: &str) {
        (**self).building(name, version, phase);
    }
    fn linking(&self, name: &str, version: &str, count: usize) {
        (**self).linking(name, version, count);
    }
    fn removing(&self, name: &str) {
        (**self).removing(name);
    }
    fn done(&self, name: &str, version: &str, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &str, version: &str, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, succeeded: usize, failed: usize, elapsed_secs: f64) {
        (**self).summary(succeeded, failed, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn fetching(&self, _: &str, _: &str, _: u64, _: Option<u64>) {}
    fn extracting(&self, _: &str, _: &str) {}
    fn building(&self, _: &str, _: &str, _: &str) {}
    fn linking(&self, _: &str, _: &str, _: usize) {}
    fn removing(&self, _: &str) {}
    fn done(&self, _: &str, _: &str, _: &str) {}
    fn failed(&self, _: &str, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: usize, _: f64) {}
}

/// Forwards every event to `tracing` at a matching level.
///
/// Byte-level fetch progress is only emitted at `trace`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn section(&self, title: &str) {
        tracing::info!("== {title}");
    }
    fn fetching(&self, name: &str, version: &str, current: u64, total: Option<u64>) {
        tracing::trace!(%name, %version, current, ?total, "fetching");
    }
    fn extracting(&self, name: &str, version: &str) {
        tracing::info!(%name, %version, "extracting");
    }
    fn building(&self, name: &str, version: &str, phase: &str) {
        tracing::info!(%name, %version, %phase, "building");
    }
    fn linking(&self, name: &str, version: &str, count: usize) {
        tracing::info!(%name, %version, count, "linking");
    }
    fn removing(&self, name: &str) {
        tracing::info!(%name, "removing");
    }
    fn done(&self, name: &str, version: &str, detail: &str) {
        tracing::info!(%name, %version, "{detail}");
    }
    fn failed(&self, name: &str, version: &str, reason: &str) {
        tracing::error!(%name, %version, "{reason}");
    }
    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }
    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }
    fn summary(&self, succeeded: usize, failed: usize, elapsed_secs: f64) {
        tracing::info!(succeeded, failed, "finished in {elapsed_secs:.1}s");
    }
}
