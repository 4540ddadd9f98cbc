//! Per-dependency variable context and two-pass expansion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_schema::{Dependency, Variant, variant_dir};
use regex::{Captures, Regex};
use serde::Serialize;

use super::BuildError;
use super::template::TemplateEngine;

const VAR_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)";

/// Values available to `${VAR}` substitution and to templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableContext {
    /// `${PROJECT_NAME}`
    pub project_name: String,
    /// `${PROJECT_VERSION}`
    pub project_version: String,
    /// `${SOURCE_DIR}`
    pub source_dir: PathBuf,
    /// `${BUILD_DIR}`
    pub build_dir: PathBuf,
    /// `${INSTALL_DIR}`, also `${PREFIX}`.
    pub install_dir: PathBuf,
    /// `${BUILD_TYPE}`, `Release` unless overridden.
    pub build_type: String,
    /// `${CXX_COMPILER}`
    pub cxx_compiler: String,
    /// `${CXX_FLAGS}`
    pub cxx_flags: String,
    /// `${CPU_CORES}`, also `${JOBS}`.
    pub cpu_count: usize,
    /// `${OS}`
    pub os: String,
    /// `${ARCH}`
    pub arch: String,
    /// `${DEP_NAME}`
    pub dep_name: String,
    /// `${DEP_VERSION}`
    pub dep_version: String,
    /// `${VARIANT}` and `${VARIANT_DIR}`.
    pub variant: Option<Variant>,
    /// Highest-precedence variables, seeded from project configuration.
    pub custom: BTreeMap<String, String>,
}

impl VariableContext {
    /// Context with host defaults and empty directories.
    pub fn new(project_name: impl Into<String>, project_version: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            project_version: project_version.into(),
            source_dir: PathBuf::new(),
            build_dir: PathBuf::new(),
            install_dir: PathBuf::new(),
            build_type: "Release".to_string(),
            cxx_compiler: "g++".to_string(),
            cxx_flags: "-O2 -std=c++17".to_string(),
            cpu_count: num_cpus::get(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            dep_name: String::new(),
            dep_version: String::new(),
            variant: None,
            custom: BTreeMap::new(),
        }
    }

    /// Merge `vars` into the custom variables.
    pub fn with_custom(mut self, vars: BTreeMap<String, String>) -> Self {
        self.custom.extend(vars);
        self
    }

    /// Set the variant used for `${VARIANT}` and the cache scope.
    pub fn with_variant(mut self, variant: Option<Variant>) -> Self {
        self.variant = variant;
        self
    }

    /// Derive the context for one dependency build. Directories are made absolute.
    pub fn for_dependency(
        &self,
        dep: &Dependency,
        source_dir: &Path,
        build_dir: &Path,
        install_dir: &Path,
    ) -> Self {
        let mut ctx = self.clone();
        ctx.dep_name.clone_from(&dep.name);
        ctx.dep_version.clone_from(&dep.version);
        ctx.source_dir = absolute(source_dir);
        ctx.build_dir = absolute(build_dir);
        ctx.install_dir = absolute(install_dir);
        if let Some(build_type) = ctx.custom.get("BUILD_TYPE").filter(|v| !v.is_empty()) {
            ctx.build_type.clone_from(build_type);
        }
        ctx
    }

    /// Directory name of the active variant.
    pub fn variant_dir(&self) -> String {
        variant_dir(self.variant.as_ref())
    }

    /// Value of a built-in context field by its variable name.
    pub fn builtin(&self, name: &str) -> Option<String> {
        let path = |p: &Path| p.to_string_lossy().into_owned();
        let value = match name {
            "PROJECT_NAME" => self.project_name.clone(),
            "PROJECT_VERSION" => self.project_version.clone(),
            "SOURCE_DIR" => path(&self.source_dir),
            "BUILD_DIR" => path(&self.build_dir),
            "INSTALL_DIR" | "PREFIX" => path(&self.install_dir),
            "BUILD_TYPE" => self.build_type.clone(),
            "CXX_COMPILER" => self.cxx_compiler.clone(),
            "CXX_FLAGS" => self.cxx_flags.clone(),
            "CPU_CORES" | "JOBS" => self.cpu_count.to_string(),
            "OS" => self.os.clone(),
            "ARCH" => self.arch.clone(),
            "DEP_NAME" => self.dep_name.clone(),
            "DEP_VERSION" => self.dep_version.clone(),
            "VARIANT" | "BUILD_TAG" => self
                .variant
                .as_ref()
                .map(Variant::canonical)
                .unwrap_or_default(),
            "VARIANT_DIR" => self.variant_dir(),
            _ => return None,
        };
        Some(value)
    }

    /// Custom variables, then built-ins, then non-empty process environment.
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.custom
            .get(name)
            .cloned()
            .or_else(|| self.builtin(name))
            .or_else(|| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// First pass: replace `${VAR}` and `$VAR`. Unknown names stay verbatim.
    pub fn substitute(&self, text: &str) -> Result<String, BuildError> {
        let re = Regex::new(VAR_PATTERN)?;
        let out = re.replace_all(text, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            self.lookup(name)
                .unwrap_or_else(|| caps.get(0).map_or("", |m| m.as_str()).to_string())
        });
        Ok(out.into_owned())
    }

    /// Substitute variables, then render the result as a template.
    pub fn expand(&self, text: &str) -> Result<String, BuildError> {
        let substituted = self.substitute(text)?;
        TemplateEngine::new().render(&substituted, &self.template_data(None))
    }

    /// [`expand`](Self::expand) each item.
    pub fn expand_all(&self, items: &[String]) -> Result<Vec<String>, BuildError> {
        items.iter().map(|item| self.expand(item)).collect()
    }

    /// Flat variable map plus `dep` and `variant` objects for templates.
    pub fn template_data(&self, dep: Option<&Dependency>) -> BTreeMap<String, minijinja::Value> {
        const BUILTINS: &[&str] = &[
            "PROJECT_NAME",
            "PROJECT_VERSION",
            "SOURCE_DIR",
            "BUILD_DIR",
            "INSTALL_DIR",
            "PREFIX",
            "BUILD_TYPE",
            "CXX_COMPILER",
            "CXX_FLAGS",
            "CPU_CORES",
            "JOBS",
            "OS",
            "ARCH",
            "DEP_NAME",
            "DEP_VERSION",
            "VARIANT",
            "VARIANT_DIR",
        ];

        let mut data = BTreeMap::new();
        for name in BUILTINS {
            if let Some(value) = self.builtin(name) {
                data.insert((*name).to_string(), minijinja::Value::from(value));
            }
        }
        for (name, value) in &self.custom {
            data.insert(name.clone(), minijinja::Value::from(value.clone()));
        }
        data.insert("ctx".to_string(), minijinja::Value::from_serialize(self));
        if let Some(dep) = dep {
            data.insert("dep".to_string(), minijinja::Value::from_serialize(dep));
        }
        data
    }

    /// Custom variables exported to build processes.
    pub fn env_vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.custom.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_schema::Source;

    fn ctx() -> VariableContext {
        let dep = Dependency::new("fmt", "8.0.1", Source::default());
        VariableContext::new("demo", "0.1.0")
            .with_custom(BTreeMap::from([
                ("LEVEL".to_string(), "3".to_string()),
                ("OS".to_string(), "plan9".to_string()),
            ]))
            .with_variant(Some("arch=x86_64,platform=linux".parse().unwrap()))
            .for_dependency(
                &dep,
                Path::new("/src/fmt"),
                Path::new("/build/fmt"),
                Path::new("/opt/fmt"),
            )
    }

    #[test]
    fn test_substitute_precedence_and_unknowns() {
        let ctx = ctx();
        assert_eq!(
            ctx.substitute("-DP=${INSTALL_DIR} -j$CPU_CORES").unwrap(),
            format!("-DP=/opt/fmt -j{}", ctx.cpu_count)
        );
        assert_eq!(ctx.substitute("$OS").unwrap(), "plan9");
        assert_eq!(ctx.substitute("${LEVEL}x").unwrap(), "3x");
        assert_eq!(
            ctx.substitute("${KILN_SURELY_UNSET_VAR} $ 5$").unwrap(),
            "${KILN_SURELY_UNSET_VAR} $ 5$"
        );
    }

    #[test]
    fn test_expand_runs_template_pass() {
        let ctx = ctx();
        assert_eq!(
            ctx.expand("{{ DEP_NAME | upper }}-${DEP_VERSION}").unwrap(),
            "FMT-8.0.1"
        );
        assert_eq!(
            ctx.expand("{{ replace(DEP_VERSION, '.', '_') }}").unwrap(),
            "8_0_1"
        );
        assert_eq!(ctx.expand("${VARIANT_DIR}").unwrap(), "arch-x86_64,platform-linux");
    }

    #[test]
    fn test_directories_are_absolute() {
        let dep = Dependency::new("zlib", "1.3", Source::default());
        let ctx = VariableContext::new("demo", "")
            .for_dependency(&dep, Path::new("src"), Path::new("b"), Path::new("i"));
        assert!(ctx.source_dir.is_absolute());
        assert!(ctx.build_dir.is_absolute());
        assert!(ctx.install_dir.is_absolute());
    }

    #[test]
    fn test_build_type_from_custom_variables() {
        let dep = Dependency::new("zlib", "1.3", Source::default());
        let ctx = VariableContext::new("demo", "")
            .with_custom(BTreeMap::from([("BUILD_TYPE".to_string(), "Debug".to_string())]))
            .for_dependency(&dep, Path::new("/s"), Path::new("/b"), Path::new("/i"));
        assert_eq!(ctx.build_type, "Debug");
    }
}
