//! Locating and loading `kiln.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use kiln_schema::ProjectConfig;

pub const PROJECT_FILE: &str = "kiln.toml";

/// Walk up from `start` to the first directory holding [`PROJECT_FILE`].
pub fn find_root(start: &Path) -> Option<PathBuf> {
    let mut current = start;
    loop {
        if current.join(PROJECT_FILE).exists() {
            return Some(current.to_path_buf());
        }
        current = current.parent()?;
    }
}

/// Resolve the project root from an explicit path or the working directory.
pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.join(PROJECT_FILE).exists() {
            bail!("no {PROJECT_FILE} in {}", path.display());
        }
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    match find_root(&cwd) {
        Some(root) => Ok(root),
        None => bail!("no {PROJECT_FILE} found in {} or any parent", cwd.display()),
    }
}

/// Parse, normalize and validate the project file under `root`.
pub fn load(root: &Path) -> Result<ProjectConfig> {
    let path = root.join(PROJECT_FILE);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse(&text).with_context(|| format!("Invalid {}", path.display()))
}

pub fn parse(text: &str) -> Result<ProjectConfig> {
    let mut config: ProjectConfig = toml::from_str(text)?;
    config.normalize();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_find_root_walks_up() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join(PROJECT_FILE), "[project]\nname = \"demo\"\n").unwrap();
        let nested = tmp.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_root(&nested).as_deref(), Some(tmp.path()));
    }

    #[test]
    fn test_parse_rejects_unknown_profile_entry() {
        let text = r#"
[project]
name = "demo"

[dependencies.fmt]
version = "8.0.1"
source = { type = "archive", urls = ["https://example.com/fmt.tar.gz"] }

[profiles.ci]
dependencies = ["spdlog"]
"#;
        let err = parse(text).unwrap_err();
        assert!(err.to_string().contains("spdlog"));
    }

    #[test]
    fn test_parse_fills_dependency_names() {
        let text = r#"
[project]
name = "demo"

[dependencies.stb]
version = "1.0"
source = { type = "direct", urls = ["https://example.com/stb_image.h"] }
"#;
        let config = parse(text).unwrap();
        assert_eq!(config.dependencies["stb"].name, "stb");
    }
}
