//! Uninstall command

use std::path::Path;

use anyhow::Result;
use kiln_core::ops;

use super::OpenOptions;

pub fn uninstall(project: Option<&Path>, names: &[String]) -> Result<()> {
    let session = super::open(&OpenOptions {
        project,
        ..OpenOptions::default()
    })?;
    for name in names {
        ops::uninstall(&session.ctx, name)?;
    }
    Ok(())
}
