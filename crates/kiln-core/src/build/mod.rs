//! Build executor.
//!
//! Turns a dependency's declared build system into an ordered list of
//! [`BuildStep`]s (configure, build, optional test, install) and runs them
//! through a [`CommandRunner`]. An explicit command override always replaces
//! the strategy default for its phase.
//!
//! Process environment is the inherited environment, then the context's
//! custom variables, then the dependency's own `env`, then the active
//! toolchain's variables, each layer overriding the previous.

pub mod context;
pub mod runner;
pub mod template;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_schema::{BuildCommands, BuildSystem, Dependency};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use context::VariableContext;
pub use runner::{CommandRunner, Invocation, RunError, SystemRunner};
pub use template::TemplateEngine;

use crate::toolchain::ToolchainHandle;
use crate::{NullReporter, Reporter};

/// Generated script file for custom builds, written into the build directory.
pub const SCRIPT_FILE: &str = ".kiln_build_script.sh";

/// The four stages a build moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    /// Generate build files.
    Configure,
    /// Compile.
    Build,
    /// Run the `test` override.
    Test,
    /// Copy output into the install prefix.
    Install,
}

impl BuildPhase {
    /// Lowercase name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Test => "test",
            Self::Install => "install",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build executor failures.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A build process exited non-zero or could not start.
    #[error("{phase} failed for {dependency}: {source}")]
    Phase {
        /// Dependency label.
        dependency: String,
        /// Phase that failed.
        phase: BuildPhase,
        /// Runner error.
        #[source]
        source: RunError,
    },

    /// A single expanded command failed.
    #[error("command `{command}` failed: {source}")]
    Command {
        /// The expanded command line.
        command: String,
        /// Runner error.
        #[source]
        source: RunError,
    },

    /// The build system's program is not on `PATH`.
    #[error("required build tool not found: {tool} (needed by {dependency})")]
    ToolMissing {
        /// Dependency label.
        dependency: String,
        /// Program that was looked up.
        tool: String,
    },

    /// A custom build with nothing to run.
    #[error("custom build of {0} needs a custom_script or a configure command")]
    MissingScript(String),

    /// A custom script template did not render.
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// A variable pattern did not compile.
    #[error("invalid variable pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Preparing the build or log directory failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The cancellation token fired.
    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    /// Phase that failed, when the error came from a build process.
    pub fn phase(&self) -> Option<BuildPhase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Build log tail captured when a phase failed.
    pub fn log_tail(&self) -> Option<&str> {
        match self {
            Self::Phase {
                source: RunError::Exit { tail, .. },
                ..
            } => Some(tail),
            _ => None,
        }
    }

    fn from_run(dep: &Dependency, phase: BuildPhase, source: RunError) -> Self {
        match source {
            RunError::Cancelled => Self::Cancelled,
            source => Self::Phase {
                dependency: dep.label(),
                phase,
                source,
            },
        }
    }
}

/// One process in a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    /// Stage this step belongs to.
    pub phase: BuildPhase,
    /// The process to run.
    pub invocation: Invocation,
}

/// Everything a build will do, computed before anything runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    /// Processes in run order.
    pub steps: Vec<BuildStep>,
    /// Rendered custom script and where it is written.
    pub script: Option<(PathBuf, String)>,
}

/// Per-build switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Run the `test` override between build and install.
    pub run_tests: bool,
}

/// Plans and runs builds for one dependency at a time through a [`CommandRunner`].
pub struct BuildExecutor {
    runner: Arc<dyn CommandRunner>,
    toolchain: ToolchainHandle,
    log_dir: PathBuf,
    reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for BuildExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildExecutor")
            .field("toolchain", &self.toolchain)
            .field("log_dir", &self.log_dir)
            .finish_non_exhaustive()
    }
}

impl BuildExecutor {
    /// Executor with logs under the default log directory and no progress reporting.
    pub fn new(runner: Arc<dyn CommandRunner>, toolchain: ToolchainHandle) -> Self {
        Self {
            runner,
            toolchain,
            log_dir: crate::paths::log_dir(),
            reporter: Arc::new(NullReporter),
        }
    }

    /// Write per-dependency build logs under `log_dir`.
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    /// Report per-phase progress to `reporter`.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The toolchain build processes run under.
    pub fn toolchain(&self) -> &ToolchainHandle {
        &self.toolchain
    }

    /// Reject build declarations that cannot produce any command.
    pub fn validate_build_system(dep: &Dependency) -> Result<(), BuildError> {
        let has_script = dep.custom_script.as_deref().is_some_and(|s| !s.trim().is_empty());
        match dep.build_system {
            BuildSystem::Custom if !has_script && dep.build_commands.configure.is_none() => {
                Err(BuildError::MissingScript(dep.name.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Ensure the tool the default commands need is available, asking the
    /// active toolchain before searching `PATH`. Fully overridden builds
    /// need no tool.
    pub fn check_build_tools(&self, dep: &Dependency) -> Result<(), BuildError> {
        let cmds = &dep.build_commands;
        let uses_defaults = match dep.build_system {
            BuildSystem::Cmake | BuildSystem::Configure => {
                cmds.configure.is_none() || cmds.build.is_none() || cmds.install.is_none()
            }
            BuildSystem::Make => cmds.build.is_none() || cmds.install.is_none(),
            BuildSystem::Custom => dep.custom_script.is_some(),
            BuildSystem::None => false,
        };
        let tool = match dep.build_system {
            BuildSystem::Custom => Some("bash"),
            other => other.required_tool(),
        };
        let Some(tool) = tool.filter(|_| uses_defaults) else {
            return Ok(());
        };

        if self.toolchain.has_tool(tool) || self.runner.has_program(tool) {
            return Ok(());
        }
        Err(BuildError::ToolMissing {
            dependency: dep.name.clone(),
            tool: tool.to_string(),
        })
    }

    /// The dependency's command overrides with variables expanded.
    pub fn build_commands(
        ctx: &VariableContext,
        dep: &Dependency,
    ) -> Result<BuildCommands, BuildError> {
        let expand = |cmd: &Option<String>| cmd.as_deref().map(|c| ctx.expand(c)).transpose();
        Ok(BuildCommands {
            configure: expand(&dep.build_commands.configure)?,
            build: expand(&dep.build_commands.build)?,
            install: expand(&dep.build_commands.install)?,
            test: expand(&dep.build_commands.test)?,
        })
    }

    /// Environment overrides for build processes, lowest precedence first.
    pub fn environment(
        &self,
        ctx: &VariableContext,
        dep: &Dependency,
    ) -> Result<Vec<(String, String)>, BuildError> {
        let mut env: Vec<(String, String)> = ctx
            .env_vars()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (key, value) in &dep.env {
            env.push((key.clone(), ctx.expand(value)?));
        }
        env.extend(self.toolchain.env_vars());
        Ok(env)
    }

    /// Compute the steps for `dep` without running anything.
    pub fn plan(
        &self,
        ctx: &VariableContext,
        dep: &Dependency,
        options: BuildOptions,
    ) -> Result<BuildPlan, BuildError> {
        Self::validate_build_system(dep)?;

        let cmds = Self::build_commands(ctx, dep)?;
        let env = self.environment(ctx, dep)?;
        let src = ctx.source_dir.to_string_lossy().into_owned();
        let build = ctx.build_dir.to_string_lossy().into_owned();
        let prefix = ctx.install_dir.to_string_lossy().into_owned();
        let jobs = ctx.cpu_count.to_string();
        let build_type = ctx.build_type.clone();

        // make and autotools builds happen in-tree; everything else out of tree.
        let work_dir = match dep.build_system {
            BuildSystem::Make | BuildSystem::Configure => ctx.source_dir.clone(),
            _ => ctx.build_dir.clone(),
        };
        let shell = |command: &str| Invocation::shell(command, &work_dir).with_env(env.clone());
        let exec = |program: &str, args: Vec<String>| {
            Invocation::new(program, args, &work_dir).with_env(env.clone())
        };

        let mut plan = BuildPlan::default();
        let (configure, compile, install) = match dep.build_system {
            BuildSystem::None => return Ok(plan),
            BuildSystem::Cmake => {
                let mut args = vec![
                    "-S".to_string(),
                    src,
                    "-B".to_string(),
                    build.clone(),
                    format!("-DCMAKE_INSTALL_PREFIX={prefix}"),
                    format!("-DCMAKE_BUILD_TYPE={build_type}"),
                ];
                args.extend(ctx.expand_all(&dep.cmake_options)?);
                (
                    Some(exec("cmake", args)),
                    Some(exec(
                        "cmake",
                        vec![
                            "--build".into(),
                            build.clone(),
                            "--config".into(),
                            build_type.clone(),
                            "--parallel".into(),
                            jobs,
                        ],
                    )),
                    Some(exec(
                        "cmake",
                        vec!["--install".into(), build, "--config".into(), build_type],
                    )),
                )
            }
            BuildSystem::Make => {
                let mut args = vec![format!("-j{jobs}")];
                args.extend(ctx.expand_all(&dep.make_options)?);
                (
                    None,
                    Some(exec("make", args)),
                    Some(exec("make", vec!["install".into()])),
                )
            }
            BuildSystem::Configure => {
                let mut args = vec![format!("--prefix={prefix}")];
                args.extend(ctx.expand_all(&dep.configure_options)?);
                let script = ctx.source_dir.join("configure").to_string_lossy().into_owned();
                (
                    Some(exec(&script, args)),
                    Some(exec("make", vec![format!("-j{jobs}")])),
                    Some(exec("make", vec!["install".into()])),
                )
            }
            BuildSystem::Custom => {
                let script = dep.custom_script.as_deref().filter(|s| !s.trim().is_empty());
                let compile = match script {
                    Some(script) => {
                        let rendered =
                            TemplateEngine::new().render(script, &ctx.template_data(Some(dep)))?;
                        let path = ctx.build_dir.join(SCRIPT_FILE);
                        let run = exec("bash", vec![path.to_string_lossy().into_owned()]);
                        plan.script = Some((path, rendered));
                        Some(run)
                    }
                    None => None,
                };
                (None, compile, None)
            }
        };

        let configure = cmds.configure.as_deref().map(shell).or(configure);
        let compile = cmds.build.as_deref().map(shell).or(compile);
        let install = cmds.install.as_deref().map(shell).or(install);

        let test = cmds.test.as_deref().filter(|_| options.run_tests).map(shell);

        plan.steps = [
            (BuildPhase::Configure, configure),
            (BuildPhase::Build, compile),
            (BuildPhase::Test, test),
            (BuildPhase::Install, install),
        ]
        .into_iter()
        .filter_map(|(phase, invocation)| {
            invocation.map(|invocation| BuildStep { phase, invocation })
        })
        .collect();
        Ok(plan)
    }

    /// Run every phase for `dep`. The first failing phase aborts the build.
    pub async fn build(
        &self,
        ctx: &VariableContext,
        dep: &Dependency,
        options: BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        self.check_build_tools(dep)?;
        let plan = self.plan(ctx, dep, options)?;
        if plan.steps.is_empty() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&ctx.build_dir).await?;
        tokio::fs::create_dir_all(&ctx.install_dir).await?;
        if let Some((path, body)) = &plan.script {
            write_script(path, body).await?;
        }

        let log = crate::paths::build_log_path(&self.log_dir, &dep.name, &dep.version);
        tracing::info!(
            dependency = %dep.label(),
            build_system = %dep.build_system,
            log = %log.display(),
            "building"
        );

        for step in &plan.steps {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            self.reporter
                .building(&dep.name, &dep.version, step.phase.as_str());
            tracing::debug!(phase = %step.phase, command = %step.invocation, "running build step");
            self.runner
                .run(&step.invocation, Some(&log), cancel)
                .await
                .map_err(|e| BuildError::from_run(dep, step.phase, e))?;
        }
        Ok(())
    }

    /// Run one expanded shell command in the build directory and capture stdout.
    pub async fn execute_with_output(
        &self,
        ctx: &VariableContext,
        dep: &Dependency,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BuildError> {
        let expanded = ctx.expand(command)?;
        let invocation =
            Invocation::shell(&expanded, &ctx.build_dir).with_env(self.environment(ctx, dep)?);
        self.runner
            .output(&invocation, cancel)
            .await
            .map_err(|source| match source {
                RunError::Cancelled => BuildError::Cancelled,
                source => BuildError::Command {
                    command: expanded,
                    source,
                },
            })
    }
}

async fn write_script(path: &Path, body: &str) -> io::Result<()> {
    tokio::fs::write(path, body).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::PrefixToolchain;
    use async_trait::async_trait;
    use kiln_schema::Source;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Invocation>>,
        fail_on: Option<&'static str>,
        empty_path: bool,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        fn has_program(&self, _program: &str) -> bool {
            !self.empty_path
        }

        async fn run(
            &self,
            invocation: &Invocation,
            log: Option<&Path>,
            _cancel: &CancellationToken,
        ) -> Result<(), RunError> {
            self.calls.lock().unwrap().push(invocation.clone());
            match self.fail_on {
                Some(arg) if invocation.args.iter().any(|a| a == arg) => Err(RunError::Exit {
                    command: invocation.to_string(),
                    code: Some(2),
                    log: log.map(Path::to_path_buf),
                    tail: "undefined reference to `fmt::v8::format`".into(),
                }),
                _ => Ok(()),
            }
        }

        async fn output(
            &self,
            invocation: &Invocation,
            _cancel: &CancellationToken,
        ) -> Result<String, RunError> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(invocation.args.join(" "))
        }
    }

    fn dep(build_system: BuildSystem) -> Dependency {
        let mut dep = Dependency::new("fmt", "8.0.1", Source::default());
        dep.build_system = build_system;
        dep
    }

    fn ctx(root: &Path) -> VariableContext {
        VariableContext::new("demo", "0.1.0")
            .with_custom(BTreeMap::from([("LEVEL".to_string(), "custom".to_string())]))
            .for_dependency(
                &dep(BuildSystem::None),
                &root.join("src"),
                &root.join("build"),
                &root.join("prefix"),
            )
    }

    fn executor(recorder: Arc<Recorder>, log_dir: &Path) -> BuildExecutor {
        BuildExecutor::new(recorder, ToolchainHandle::inactive()).with_log_dir(log_dir)
    }

    #[test]
    fn test_cmake_plan() {
        let tmp = tempdir().unwrap();
        let ctx = ctx(tmp.path());
        let mut dep = dep(BuildSystem::Cmake);
        dep.cmake_options = vec!["-DFMT_TEST=OFF".into(), "-DLVL=${LEVEL}".into()];

        let exec = executor(Arc::default(), tmp.path());
        let plan = exec.plan(&ctx, &dep, BuildOptions::default()).unwrap();
        let phases: Vec<_> = plan.steps.iter().map(|s| s.phase).collect();
        assert_eq!(
            phases,
            vec![BuildPhase::Configure, BuildPhase::Build, BuildPhase::Install]
        );

        let configure = &plan.steps[0].invocation;
        assert_eq!(configure.program, "cmake");
        assert!(configure.args.contains(&format!(
            "-DCMAKE_INSTALL_PREFIX={}",
            tmp.path().join("prefix").display()
        )));
        assert!(configure.args.contains(&"-DCMAKE_BUILD_TYPE=Release".to_string()));
        assert!(configure.args.contains(&"-DLVL=custom".to_string()));
        assert!(plan.steps[1]
            .invocation
            .args
            .contains(&ctx.cpu_count.to_string()));
    }

    #[test]
    fn test_overrides_replace_defaults_and_test_phase_is_optional() {
        let tmp = tempdir().unwrap();
        let ctx = ctx(tmp.path());
        let mut dep = dep(BuildSystem::Make);
        dep.build_commands.install = Some("make PREFIX=${INSTALL_DIR} install".into());
        dep.build_commands.test = Some("make check".into());

        let exec = executor(Arc::default(), tmp.path());
        let plan = exec.plan(&ctx, &dep, BuildOptions::default()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].invocation.program, "make");
        assert_eq!(plan.steps[0].invocation.cwd, ctx.source_dir);
        assert_eq!(
            plan.steps[1].invocation.args[1],
            format!("make PREFIX={} install", ctx.install_dir.display())
        );

        let plan = exec
            .plan(&ctx, &dep, BuildOptions { run_tests: true })
            .unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[1].phase, BuildPhase::Test);
        assert_eq!(plan.steps[1].invocation.args[1], "make check");
    }

    #[test]
    fn test_configure_plan_runs_in_source_tree() {
        let tmp = tempdir().unwrap();
        let ctx = ctx(tmp.path());
        let mut dep = dep(BuildSystem::Configure);
        dep.configure_options = vec!["--disable-shared".into()];

        let plan = executor(Arc::default(), tmp.path())
            .plan(&ctx, &dep, BuildOptions::default())
            .unwrap();
        let configure = &plan.steps[0].invocation;
        assert_eq!(
            configure.program,
            ctx.source_dir.join("configure").to_string_lossy()
        );
        assert_eq!(
            configure.args,
            vec![
                format!("--prefix={}", ctx.install_dir.display()),
                "--disable-shared".to_string()
            ]
        );
        // The generated Makefile lands next to `configure`, so make must run there too.
        for step in &plan.steps {
            assert_eq!(step.invocation.cwd, ctx.source_dir, "{:?}", step.phase);
        }
    }

    #[test]
    fn test_environment_precedence() {
        let tmp = tempdir().unwrap();
        let ctx = ctx(tmp.path());
        let mut dep = dep(BuildSystem::Make);
        dep.env = BTreeMap::from([
            ("LEVEL".to_string(), "dep".to_string()),
            ("CFLAGS".to_string(), "-I${INSTALL_DIR}/include".to_string()),
        ]);

        let tc_root = tmp.path().join("tc");
        std::fs::create_dir_all(tc_root.join("bin")).unwrap();
        let exec = BuildExecutor::new(
            Arc::new(Recorder::default()),
            ToolchainHandle::activate(Arc::new(PrefixToolchain::new(&tc_root))),
        );

        let plan = exec.plan(&ctx, &dep, BuildOptions::default()).unwrap();
        let inv = &plan.steps[0].invocation;
        assert_eq!(inv.env_value("LEVEL"), Some("dep"));
        assert_eq!(
            inv.env_value("CFLAGS").unwrap(),
            format!("-I{}/include", ctx.install_dir.display())
        );
        assert!(inv
            .env_value("PATH")
            .unwrap()
            .starts_with(&*tc_root.join("bin").to_string_lossy()));
    }

    #[tokio::test]
    async fn test_custom_script_is_rendered_and_written() {
        let tmp = tempdir().unwrap();
        let ctx = ctx(tmp.path());
        let mut dep = dep(BuildSystem::Custom);
        dep.custom_script =
            Some("#!/bin/bash\n./b2 --prefix={{ INSTALL_DIR }} {{ dep.name | upper }}\n".into());

        let recorder = Arc::new(Recorder::default());
        executor(recorder.clone(), tmp.path())
            .build(&ctx, &dep, BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let script_path = ctx.build_dir.join(SCRIPT_FILE);
        let body = std::fs::read_to_string(&script_path).unwrap();
        assert_eq!(
            body,
            format!("#!/bin/bash\n./b2 --prefix={} FMT\n", ctx.install_dir.display())
        );
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "bash");
        assert_eq!(calls[0].args, vec![script_path.to_string_lossy().into_owned()]);
    }

    #[tokio::test]
    async fn test_custom_without_script_runs_overrides() {
        let tmp = tempdir().unwrap();
        let ctx = ctx(tmp.path());
        let mut dep = dep(BuildSystem::Custom);
        dep.build_commands.configure = Some("./bootstrap.sh".into());
        dep.build_commands.install = Some("./b2 install".into());

        let recorder = Arc::new(Recorder::default());
        executor(recorder.clone(), tmp.path())
            .build(&ctx, &dep, BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        let commands: Vec<String> = recorder
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.args[1].clone())
            .collect();
        assert_eq!(commands, vec!["./bootstrap.sh", "./b2 install"]);
    }

    #[tokio::test]
    async fn test_failure_names_phase_and_stops() {
        let tmp = tempdir().unwrap();
        let ctx = ctx(tmp.path());
        let mut dep = dep(BuildSystem::Cmake);
        dep.build_commands.configure = Some("true".into());
        dep.build_commands.build = Some("false".into());
        dep.build_commands.install = Some("true".into());

        let recorder = Arc::new(Recorder {
            fail_on: Some("false"),
            ..Recorder::default()
        });
        let err = executor(recorder.clone(), tmp.path())
            .build(&ctx, &dep, BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(BuildPhase::Build));
        assert!(err.to_string().starts_with("build failed for fmt@8.0.1"));
        assert!(err.log_tail().unwrap().contains("undefined reference"));
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_validate_and_tool_checks() {
        let dep_without_script = dep(BuildSystem::Custom);
        assert!(matches!(
            BuildExecutor::validate_build_system(&dep_without_script),
            Err(BuildError::MissingScript(_))
        ));
        assert!(BuildExecutor::validate_build_system(&dep(BuildSystem::Cmake)).is_ok());

        let tmp = tempdir().unwrap();
        let tc_root = tmp.path().join("tc");
        std::fs::create_dir_all(tc_root.join("bin")).unwrap();
        std::fs::write(tc_root.join("bin/cmake"), "").unwrap();
        let with_toolchain = BuildExecutor::new(
            Arc::new(Recorder {
                empty_path: true,
                ..Recorder::default()
            }),
            ToolchainHandle::activate(Arc::new(PrefixToolchain::new(&tc_root))),
        );
        assert!(with_toolchain.check_build_tools(&dep(BuildSystem::Cmake)).is_ok());
        assert!(with_toolchain.check_build_tools(&dep(BuildSystem::None)).is_ok());

        let err = with_toolchain
            .check_build_tools(&dep(BuildSystem::Make))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "required build tool not found: make (needed by fmt)"
        );

        let mut overridden = dep(BuildSystem::Make);
        overridden.build_commands.build = Some("ninja".into());
        overridden.build_commands.install = Some("ninja install".into());
        assert!(with_toolchain.check_build_tools(&overridden).is_ok());
    }

    #[tokio::test]
    async fn test_execute_with_output() {
        let tmp = tempdir().unwrap();
        let ctx = ctx(tmp.path());
        let recorder = Arc::new(Recorder::default());
        let out = executor(recorder, tmp.path())
            .execute_with_output(
                &ctx,
                &dep(BuildSystem::Make),
                "echo ${DEP_NAME}",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "-c echo fmt");
    }
}
