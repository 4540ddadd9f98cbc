//! kiln - native library dependency manager

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln_cli::cmd;
use kiln_cli::cmd::install::InstallArgs;
use kiln_cli::{Cli, Commands};
use kiln_core::ops::InstallOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let project = cli.project.as_deref();
    let code = match cli.command {
        Commands::Install {
            names,
            force,
            no_cache,
            profile,
            variant,
            run_tests,
            toolchain,
            jobs,
        } => {
            let args = InstallArgs {
                names,
                profile,
                variant,
                toolchain,
                jobs,
                options: InstallOptions {
                    force,
                    no_cache,
                    run_tests,
                },
            };
            cmd::install::install(project, args).await?
        }
        Commands::Uninstall { names } => {
            cmd::uninstall::uninstall(project, &names)?;
            0
        }
        Commands::Verify => cmd::verify::verify(project)?,
        Commands::Cache { command } => {
            cmd::cache::cache(project, &command)?;
            0
        }
    };

    std::process::exit(code);
}
