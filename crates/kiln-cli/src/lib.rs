//! kiln - native library dependency manager
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! Reads `kiln.toml`, then fetches, builds, caches and links every declared
//! dependency into the project's `.kiln/install` link farm.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.kiln/
//! ├── cache/      # Download and build tiers, keyed by dependency
//! ├── build/      # Staged sources and build trees per variant
//! ├── install/    # Install prefixes per variant
//! ├── logs/       # Build logs
//! └── tmp/        # Scratch space for fetches
//!
//! <project>/.kiln/
//! ├── install/            # Symlinks into install prefixes
//! └── install.manifest    # One JSON record per link
//! ```

pub mod cmd;
pub mod project;
pub mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "kiln")]
#[command(author, version = env!("KILN_VERSION"))]
#[command(about = "kiln - native library dependency manager")]
pub struct Cli {
    /// Project directory (defaults to the nearest parent holding kiln.toml)
    #[arg(long, short = 'C', global = true)]
    pub project: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch, build and link dependencies
    Install {
        /// Dependency names (all, or the profile's, when empty)
        names: Vec<String>,
        /// Ignore cached downloads and builds
        #[arg(long, short = 'f')]
        force: bool,
        /// Neither read from nor write to the cache
        #[arg(long)]
        no_cache: bool,
        /// Build profile to apply
        #[arg(long, short = 'p')]
        profile: Option<String>,
        /// Variant descriptor, e.g. "arch=x86_64,platform=linux"
        #[arg(long)]
        variant: Option<String>,
        /// Run each dependency's test command
        #[arg(long)]
        run_tests: bool,
        /// Toolchain prefix whose bin/ is put first on PATH for builds
        #[arg(long)]
        toolchain: Option<PathBuf>,
        /// Maximum parallel downloads
        #[arg(long, default_value_t = kiln_core::fetch::DEFAULT_MAX_CONCURRENT)]
        jobs: usize,
    },
    /// Remove a dependency's links from the project
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Check the project's links against the install manifest
    Verify,
    /// Inspect and maintain the cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    /// List cache entries
    List,
    /// Print total cache size
    Size,
    /// Remove expired entries
    Clean,
    /// Remove everything
    Clear,
}
