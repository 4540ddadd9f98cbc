//! Install orchestration.

pub mod context;
pub mod error;
pub mod install;
pub mod remove;

pub use context::{Context, Dirs, Settings};
pub use error::{ErrorKind, InstallError, Phase};
pub use install::{InstallOptions, InstallSummary, Installed, Origin, install, install_all};
pub use remove::{clean_cache, uninstall, verify};
