//! Verify command

use std::path::Path;

use anyhow::Result;
use kiln_core::ops;

use super::OpenOptions;

/// Returns the exit code: non-zero when any link is broken.
pub fn verify(project: Option<&Path>) -> Result<i32> {
    let session = super::open(&OpenOptions {
        project,
        ..OpenOptions::default()
    })?;
    let issues = ops::verify(&session.ctx)?;
    if issues.is_empty() {
        println!("All links intact.");
        Ok(0)
    } else {
        println!("{} broken links.", issues.len());
        Ok(1)
    }
}
