//! Cache, fetch, build and link engine for native dependencies.

pub mod build;
pub mod cache;
pub mod detect;
pub mod fetch;
pub mod fsutil;
pub mod io;
pub mod link;
pub mod ops;
pub mod paths;
pub mod toolchain;

pub mod reporter;

pub use build::{BuildExecutor, CommandRunner, SystemRunner, VariableContext};
pub use cache::{CacheError, CacheStore};
pub use fetch::{FetchConfig, FetchError, FetchManager};
pub use link::LinkManager;
pub use reporter::{NullReporter, Reporter, TracingReporter};
pub use toolchain::{PrefixToolchain, Toolchain, ToolchainHandle};

/// User Agent string for outbound requests
pub const USER_AGENT: &str = concat!("kiln-core/", env!("CARGO_PKG_VERSION"));
