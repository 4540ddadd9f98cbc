//! Project configuration record.
//!
//! This is the plain-data shape handed to the engine by whatever loads the
//! project file. Loading, merging and defaulting live outside this crate.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Dependency, SchemaError, Variant};

/// Project identity and project-level variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project name, used in log output and generated paths.
    pub name: String,
    /// Project version string.
    #[serde(default)]
    pub version: String,
    /// Seed for the build executor's custom variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

/// A named selection of dependencies with variable overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProfile {
    /// Variables layered over the project's own.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Dependency names this profile installs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Variant override for this profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
}

/// Directory overrides. Unset entries fall back to the engine's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirsConfig {
    /// Where per-variant install prefixes are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    /// Scratch root for sources and out-of-tree builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_dir: Option<PathBuf>,
    /// Root of the download and build caches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

/// Everything the engine consumes from project configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Identity and variables.
    pub project: ProjectInfo,
    /// Dependencies keyed by name.
    #[serde(default)]
    pub dependencies: BTreeMap<String, Dependency>,
    /// Named profiles.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, BuildProfile>,
    /// Directory overrides.
    #[serde(default)]
    pub dirs: DirsConfig,
    /// Default build variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    /// HTTP(S) proxy URL for every download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl ProjectConfig {
    /// Copy each mapping key onto its dependency record.
    pub fn normalize(&mut self) {
        for (name, dep) in &mut self.dependencies {
            dep.name.clone_from(name);
        }
    }

    /// Validate every dependency and every profile reference.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for dep in self.dependencies.values() {
            dep.validate()?;
        }
        for (profile_name, profile) in &self.profiles {
            for dep_name in &profile.dependencies {
                if dep_name.is_empty() {
                    return Err(SchemaError::EmptyProfileEntry(profile_name.clone()));
                }
                if !self.dependencies.contains_key(dep_name) {
                    return Err(SchemaError::UnknownDependency(dep_name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&BuildProfile, SchemaError> {
        self.profiles
            .get(name)
            .ok_or_else(|| SchemaError::UnknownProfile(name.to_string()))
    }

    /// Pick the dependencies to act on.
    ///
    /// Explicit names win; otherwise the profile's list; otherwise everything,
    /// in name order.
    pub fn select(
        &self,
        names: &[String],
        profile: Option<&str>,
    ) -> Result<Vec<Dependency>, SchemaError> {
        let wanted: Vec<&str> = if !names.is_empty() {
            names.iter().map(String::as_str).collect()
        } else if let Some(profile) = profile {
            self.profile(profile)?
                .dependencies
                .iter()
                .map(String::as_str)
                .collect()
        } else {
            self.dependencies.keys().map(String::as_str).collect()
        };

        wanted
            .into_iter()
            .map(|name| {
                let mut dep = self
                    .dependencies
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SchemaError::UnknownDependency(name.to_string()))?;
                if dep.name.is_empty() {
                    dep.name = name.to_string();
                }
                Ok(dep)
            })
            .collect()
    }

    /// Project variables overlaid with the profile's variables.
    pub fn variables(&self, profile: Option<&str>) -> Result<BTreeMap<String, String>, SchemaError> {
        let mut vars = self.project.variables.clone();
        if let Some(profile) = profile {
            vars.extend(self.profile(profile)?.variables.clone());
        }
        Ok(vars)
    }

    /// Variant declared by the profile, falling back to the project-level one.
    pub fn configured_variant(&self, profile: Option<&str>) -> Result<Option<Variant>, SchemaError> {
        let from_profile = match profile {
            Some(name) => self.profile(name)?.variant.clone(),
            None => None,
        };
        Ok(from_profile.or_else(|| self.variant.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"
variant = "arch=x86_64,platform=linux"

[project]
name = "demo"
version = "0.3.0"
variables = { BUILD_TYPE = "Debug", LEVEL = "1" }

[dependencies.fmt]
version = "8.0.1"
build_system = "cmake"
cmake_options = ["-DFMT_TEST=OFF"]
source = { type = "archive", urls = ["https://example.com/fmt-8.0.1.tar.gz"], sha256 = "abc" }

[dependencies.json]
version = "3.11.2"
source = { type = "git", urls = ["https://github.com/nlohmann/json.git"], tag = "v3.11.2" }

[profiles.ci]
dependencies = ["fmt"]
variables = { LEVEL = "2" }
variant = "arch=arm64"
"#;

    fn load() -> ProjectConfig {
        let mut config: ProjectConfig = toml::from_str(PROJECT).unwrap();
        config.normalize();
        config
    }

    #[test]
    fn test_deserialize_and_normalize() {
        let config = load();
        assert_eq!(config.project.name, "demo");
        let fmt = &config.dependencies["fmt"];
        assert_eq!(fmt.name, "fmt");
        assert_eq!(fmt.build_system, crate::BuildSystem::Cmake);
        assert_eq!(config.dependencies["json"].source.tag.as_deref(), Some("v3.11.2"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_select_precedence() {
        let config = load();
        let all: Vec<String> = config
            .select(&[], None)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(all, vec!["fmt", "json"]);

        let profile = config.select(&[], Some("ci")).unwrap();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile[0].name, "fmt");

        let explicit = config.select(&["json".to_string()], Some("ci")).unwrap();
        assert_eq!(explicit[0].name, "json");

        assert_eq!(
            config.select(&["boost".to_string()], None),
            Err(SchemaError::UnknownDependency("boost".into()))
        );
        assert_eq!(
            config.select(&[], Some("nightly")),
            Err(SchemaError::UnknownProfile("nightly".into()))
        );
    }

    #[test]
    fn test_profile_overrides() {
        let config = load();
        let vars = config.variables(Some("ci")).unwrap();
        assert_eq!(vars["LEVEL"], "2");
        assert_eq!(vars["BUILD_TYPE"], "Debug");

        let variant = config.configured_variant(Some("ci")).unwrap().unwrap();
        assert_eq!(variant.canonical(), "arch=arm64");
        let base = config.configured_variant(None).unwrap().unwrap();
        assert_eq!(base.canonical(), "arch=x86_64,platform=linux");
    }

    #[test]
    fn test_validate_rejects_dangling_profile_entry() {
        let mut config = load();
        config
            .profiles
            .get_mut("ci")
            .unwrap()
            .dependencies
            .push("missing".into());
        assert_eq!(
            config.validate(),
            Err(SchemaError::UnknownDependency("missing".into()))
        );
    }
}
