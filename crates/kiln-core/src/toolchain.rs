//! Isolated toolchain activation.
//!
//! A [`ToolchainHandle`] is passed explicitly into the build executor. When it
//! carries a [`Toolchain`], that toolchain's environment overrides everything
//! else on spawned processes and its tools are preferred over `PATH`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A provisioned toolchain that build processes should run inside.
pub trait Toolchain: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Environment overrides applied last to every build process.
    fn env_vars(&self) -> BTreeMap<String, String>;

    /// Whether `tool` is provided by this toolchain.
    fn has_tool(&self, tool: &str) -> bool;
}

/// Explicit activation token. The default handle is inactive.
#[derive(Clone, Default)]
pub struct ToolchainHandle(Option<Arc<dyn Toolchain>>);

impl fmt::Debug for ToolchainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(tc) => write!(f, "ToolchainHandle({})", tc.name()),
            None => f.write_str("ToolchainHandle(inactive)"),
        }
    }
}

impl ToolchainHandle {
    /// No toolchain: build processes see the inherited environment.
    pub fn inactive() -> Self {
        Self(None)
    }

    /// Route build processes through `toolchain`.
    pub fn activate(toolchain: Arc<dyn Toolchain>) -> Self {
        Self(Some(toolchain))
    }

    /// Whether a toolchain was activated.
    pub fn is_active(&self) -> bool {
        self.0.is_some()
    }

    /// Variables the active toolchain exports, empty when inactive.
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        self.0.as_ref().map(|tc| tc.env_vars()).unwrap_or_default()
    }

    /// Whether the active toolchain provides `tool`.
    pub fn has_tool(&self, tool: &str) -> bool {
        self.0.as_ref().is_some_and(|tc| tc.has_tool(tool))
    }
}

/// A toolchain laid out as a prefix directory with a `bin/` folder.
///
/// Activation puts `<root>/bin` at the front of `PATH` and exports
/// `KILN_TOOLCHAIN_ROOT`.
#[derive(Debug, Clone)]
pub struct PrefixToolchain {
    name: String,
    root: PathBuf,
}

impl PrefixToolchain {
    /// Toolchain rooted at `root`, named after its last path component.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map_or_else(|| "toolchain".to_string(), |n| n.to_string_lossy().into_owned());
        Self { name, root }
    }

    /// The prefix directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }
}

impl Toolchain for PrefixToolchain {
    fn name(&self) -> &str {
        &self.name
    }

    fn env_vars(&self) -> BTreeMap<String, String> {
        let mut paths = vec![self.bin_dir()];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        let mut env = BTreeMap::new();
        if let Ok(joined) = std::env::join_paths(paths) {
            env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }
        env.insert(
            "KILN_TOOLCHAIN_ROOT".to_string(),
            self.root.to_string_lossy().into_owned(),
        );
        env
    }

    fn has_tool(&self, tool: &str) -> bool {
        self.bin_dir().join(tool).is_file()
    }
}
