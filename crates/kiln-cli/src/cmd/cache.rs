//! Cache maintenance commands

use std::path::Path;

use anyhow::Result;
use kiln_core::ops;

use super::OpenOptions;
use crate::CacheCommands;

pub fn cache(project: Option<&Path>, command: &CacheCommands) -> Result<()> {
    let session = super::open(&OpenOptions {
        project,
        ..OpenOptions::default()
    })?;
    let ctx = &session.ctx;

    match command {
        CacheCommands::List => {
            let entries = ctx.cache.list();
            if entries.is_empty() {
                println!("Cache is empty.");
                return Ok(());
            }
            for entry in entries {
                println!(
                    "{:<24} {:<12} {:<40} {:>12}{}",
                    entry.name,
                    entry.version,
                    entry.entry,
                    format_size(entry.size),
                    if entry.expired { "  (expired)" } else { "" }
                );
            }
        }
        CacheCommands::Size => {
            println!("{}", format_size(ctx.cache.size()));
        }
        CacheCommands::Clean => {
            let report = ops::clean_cache(ctx, false)?;
            println!(
                "Removed {} entries, freed {}.",
                report.removed,
                format_size(report.freed_bytes)
            );
        }
        CacheCommands::Clear => {
            let report = ops::clean_cache(ctx, true)?;
            println!("Freed {}.", format_size(report.freed_bytes));
        }
    }
    Ok(())
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
