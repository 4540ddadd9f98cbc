//! Process execution seam for the build executor.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Lines of build log embedded in a failure.
pub const LOG_TAIL_LINES: usize = 20;

/// Why a spawned process did not succeed.
#[derive(Error, Debug)]
pub enum RunError {
    /// The program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited non-zero or was killed.
    #[error("{command} exited with {}{}", code_text(.code), tail_text(.tail))]
    Exit {
        /// Rendered command line.
        command: String,
        /// Exit status; `None` when killed by a signal.
        code: Option<i32>,
        /// Full log, when output was captured to a file.
        log: Option<PathBuf>,
        /// Last lines of output.
        tail: String,
    },

    /// Reading output or writing the log failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The token fired and the process was killed.
    #[error("cancelled")]
    Cancelled,
}

#[allow(clippy::ref_option)]
fn code_text(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

fn tail_text(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{tail}")
    }
}

/// One process to spawn. `env` entries override the inherited environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path.
    pub program: String,
    /// Arguments, without the program.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Overrides applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Invocation with no environment overrides.
    pub fn new<I, S>(program: impl Into<String>, args: I, cwd: &Path) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.to_path_buf(),
            env: Vec::new(),
        }
    }

    /// `sh -c <command>`.
    pub fn shell(command: &str, cwd: &Path) -> Self {
        Self::new("sh", ["-c", command], cwd)
    }

    /// Replace the environment overrides.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Value the environment will hold for `key`, if overridden.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Spawns build processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Whether `program` can be spawned from `PATH`.
    fn has_program(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    /// Run to completion, appending stdout and stderr to `log` when given.
    async fn run(
        &self,
        invocation: &Invocation,
        log: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<(), RunError>;

    /// Run to completion and return stdout. Stderr goes into the error on failure.
    async fn output(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<String, RunError>;
}

/// Runs processes on the host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        cmd
    }

    fn spawn_error(invocation: &Invocation, source: std::io::Error) -> RunError {
        RunError::Spawn {
            program: invocation.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        log: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        tracing::debug!(command = %invocation, cwd = %invocation.cwd.display(), "spawning");
        let mut cmd = Self::command(invocation);

        match log {
            Some(log_path) => {
                if let Some(parent) = log_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_path)?;
                writeln!(file, "$ {invocation}")?;
                cmd.stdout(Stdio::from(file.try_clone()?))
                    .stderr(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(invocation, e))?;
        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                child.kill().await.ok();
                return Err(RunError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if status.success() {
            return Ok(());
        }
        let tail = log
            .and_then(|p| read_last_lines(p, LOG_TAIL_LINES).ok())
            .unwrap_or_default();
        Err(RunError::Exit {
            command: invocation.to_string(),
            code: status.code(),
            log: log.map(Path::to_path_buf),
            tail,
        })
    }

    async fn output(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<String, RunError> {
        tracing::debug!(command = %invocation, "capturing output");
        let mut cmd = Self::command(invocation);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let child = cmd.spawn().map_err(|e| Self::spawn_error(invocation, e))?;

        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RunError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(RunError::Exit {
                command: invocation.to_string(),
                code: output.status.code(),
                log: None,
                tail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Last `n` lines of a log file, reading at most 16 KiB from its end.
pub fn read_last_lines(path: &Path, n: usize) -> std::io::Result<String> {
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom};

    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(start))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let buffer = String::from_utf8_lossy(&bytes);

    // Drop the partial first line when we started mid-file.
    let content = if start > 0 {
        buffer.find('\n').map_or(&*buffer, |idx| &buffer[idx + 1..])
    } else {
        &buffer
    };

    let lines: Vec<&str> = content.lines().collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].join("\n"))
}
