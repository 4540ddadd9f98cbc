//! Dependency records as supplied by project configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// How a dependency's sources are retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Version-control clone.
    Git,
    /// Archive download followed by extraction.
    #[default]
    Archive,
    /// A single file copied as-is.
    Direct,
    /// Resolved by an external package index; no URLs required.
    ExternalIndex,
}

impl SourceKind {
    /// Lowercase name as written in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Archive => "archive",
            Self::Direct => "direct",
            Self::ExternalIndex => "external_index",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build-system backend selected by a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    /// `cmake -S/-B`, then build and install.
    Cmake,
    /// In-tree `make` and `make install`.
    Make,
    /// Autotools: `./configure`, then make.
    Configure,
    /// A user-supplied bash script.
    Custom,
    /// Nothing to build (header-only or prebuilt).
    #[default]
    #[serde(alias = "")]
    None,
}

impl BuildSystem {
    /// Lowercase name as written in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cmake => "cmake",
            Self::Make => "make",
            Self::Configure => "configure",
            Self::Custom => "custom",
            Self::None => "none",
        }
    }

    /// Whether the install flow has to run the build executor.
    pub fn requires_build(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// External tool the default commands need on `PATH`, if any.
    pub fn required_tool(&self) -> Option<&'static str> {
        match self {
            Self::Cmake => Some("cmake"),
            Self::Make | Self::Configure => Some("make"),
            Self::Custom | Self::None => None,
        }
    }
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checksum algorithms accepted in source declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChecksumAlgorithm {
    /// MD5, legacy mirrors only.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl ChecksumAlgorithm {
    /// Algorithm name as used in the `checksums` map.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(SchemaError::UnsupportedChecksum(s.to_string())),
        }
    }
}

/// Where and how to obtain a dependency's sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Retrieval method, `type` in configuration.
    #[serde(rename = "type", default)]
    pub kind: SourceKind,
    /// Candidate locations, tried in order with local paths first.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Tag or revision to check out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Legacy single hash: a SHA-256 digest, or a commit id for git sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Expected MD5 digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    /// Expected SHA-1 digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    /// Expected SHA-256 digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Expected SHA-512 digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    /// Algorithm name to expected digest.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

impl Source {
    /// Every declared checksum keyed by lowercase algorithm name.
    ///
    /// Dedicated fields come first and the generic map overrides them. The
    /// legacy `hash` counts as `sha256` when no SHA-256 is declared otherwise.
    pub fn declared_checksums(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let dedicated = [
            ("md5", &self.md5),
            ("sha1", &self.sha1),
            ("sha256", &self.sha256),
            ("sha512", &self.sha512),
        ];
        for (name, value) in dedicated {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                out.insert(name.to_string(), v.to_lowercase());
            }
        }
        for (name, value) in &self.checksums {
            if !value.is_empty() {
                out.insert(name.to_lowercase(), value.to_lowercase());
            }
        }
        if let Some(hash) = self.hash.as_deref().filter(|h| !h.is_empty()) {
            out.entry("sha256".to_string())
                .or_insert_with(|| hash.to_lowercase());
        }
        out
    }

    /// Candidate URLs with local paths ahead of network URLs, order otherwise preserved.
    pub fn ordered_urls(&self) -> Vec<&str> {
        let (local, remote): (Vec<&str>, Vec<&str>) = self
            .urls
            .iter()
            .map(String::as_str)
            .partition(|u| is_local_url(u));
        local.into_iter().chain(remote).collect()
    }
}

/// True for filesystem paths, false for anything with a URL scheme or scp-style git remote.
pub fn is_local_url(url: &str) -> bool {
    !(url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("git@")
        || url.contains("://"))
}

/// Explicit command overrides; each replaces the build system's default for that phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommands {
    /// Replaces the configure step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configure: Option<String>,
    /// Replaces the compile step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Replaces the install step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    /// Run after install when tests are requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
}

/// A third-party source dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Mapping key, copied onto the record by [`ProjectConfig::normalize`](crate::ProjectConfig::normalize).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Declared version; also the cache and install key.
    pub version: String,
    /// Where the sources come from.
    pub source: Source,
    /// Backend used to build the sources.
    #[serde(default)]
    pub build_system: BuildSystem,
    /// Extra arguments for the cmake configure step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmake_options: Vec<String>,
    /// Extra arguments for `make`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub make_options: Vec<String>,
    /// Extra arguments for `./configure`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configure_options: Vec<String>,
    /// Bash script for [`BuildSystem::Custom`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_script: Option<String>,
    /// Per-phase command overrides.
    #[serde(default)]
    pub build_commands: BuildCommands,
    /// Extra environment for this dependency's build processes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Dependency {
    /// Convenience constructor used by tests and programmatic callers.
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source,
            ..Self::default()
        }
    }

    /// Check the record-level invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.version.trim().is_empty() {
            return Err(SchemaError::MissingVersion(self.name.clone()));
        }
        if self.source.kind != SourceKind::ExternalIndex && self.source.urls.is_empty() {
            return Err(SchemaError::MissingUrls(self.name.clone()));
        }
        if self.build_system == BuildSystem::Custom
            && self.custom_script.as_deref().is_none_or(str::is_empty)
            && self.build_commands.configure.is_none()
        {
            return Err(SchemaError::MissingScript(self.name.clone()));
        }
        Ok(())
    }

    /// `name@version`, for messages.
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(urls: &[&str]) -> Source {
        Source {
            kind: SourceKind::Archive,
            urls: urls.iter().map(|u| (*u).to_string()).collect(),
            ..Source::default()
        }
    }

    #[test]
    fn test_local_urls_come_first() {
        let source = archive(&[
            "https://mirror-a/fmt.tar.gz",
            "/opt/mirror/fmt.tar.gz",
            "git@github.com:fmtlib/fmt.git",
            "vendor/fmt.tar.gz",
        ]);
        assert_eq!(
            source.ordered_urls(),
            vec![
                "/opt/mirror/fmt.tar.gz",
                "vendor/fmt.tar.gz",
                "https://mirror-a/fmt.tar.gz",
                "git@github.com:fmtlib/fmt.git",
            ]
        );
        assert!(is_local_url("./x.zip"));
        assert!(!is_local_url("file:///x.zip"));
    }

    #[test]
    fn test_declared_checksums_precedence() {
        let mut source = archive(&["a"]);
        source.hash = Some("AAAA".into());
        assert_eq!(
            source.declared_checksums().get("sha256").map(String::as_str),
            Some("aaaa")
        );

        source.sha256 = Some("bbbb".into());
        source.checksums.insert("SHA512".into(), "CCCC".into());
        source.checksums.insert("sha256".into(), "dddd".into());
        let sums = source.declared_checksums();
        assert_eq!(sums.get("sha256").map(String::as_str), Some("dddd"));
        assert_eq!(sums.get("sha512").map(String::as_str), Some("cccc"));
        assert_eq!(sums.len(), 2);
    }

    #[test]
    fn test_validate_invariants() {
        let mut dep = Dependency::new("zlib", "1.3", archive(&["https://x/zlib.tar.gz"]));
        assert!(dep.validate().is_ok());

        dep.build_system = BuildSystem::Custom;
        assert_eq!(dep.validate(), Err(SchemaError::MissingScript("zlib".into())));
        dep.build_commands.configure = Some("./bootstrap.sh".into());
        assert!(dep.validate().is_ok());

        let mut no_urls = Dependency::new("eigen", "3.4", archive(&[]));
        assert_eq!(no_urls.validate(), Err(SchemaError::MissingUrls("eigen".into())));
        no_urls.source.kind = SourceKind::ExternalIndex;
        assert!(no_urls.validate().is_ok());

        let no_version = Dependency::new("x", " ", archive(&["a"]));
        assert_eq!(no_version.validate(), Err(SchemaError::MissingVersion("x".into())));
    }

    #[test]
    fn test_build_system_deserialization() {
        #[derive(Deserialize)]
        struct Wrapper {
            build_system: BuildSystem,
        }
        let parse = |s: &str| toml::from_str::<Wrapper>(s).map(|w| w.build_system);
        assert_eq!(parse("build_system = \"cmake\"").unwrap(), BuildSystem::Cmake);
        assert_eq!(parse("build_system = \"\"").unwrap(), BuildSystem::None);
        assert!(parse("build_system = \"bazel\"").is_err());
        assert_eq!(BuildSystem::Configure.required_tool(), Some("make"));
        assert!(!BuildSystem::None.requires_build());
    }

    #[test]
    fn test_checksum_algorithm_parse() {
        assert_eq!("SHA256".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha256);
        assert_eq!(
            "crc32".parse::<ChecksumAlgorithm>(),
            Err(SchemaError::UnsupportedChecksum("crc32".into()))
        );
    }
}
