//! Command execution adapter.
//!
//! Spawns an external process with piped stdout/stderr, streams both line by
//! line as task events and maps the exit code to a task outcome: zero is
//! success, anything else is a [`CommandFailure`].
//!
//! ```rust
//! use dagrun::CommandSpec;
//!
//! let spec = CommandSpec::builder("cargo")
//!     .args(["build", "--release"])
//!     .env("RUSTFLAGS", "-D warnings")
//!     .working_dir("/src/app")
//!     .build();
//!
//! assert_eq!(spec.program(), "cargo");
//! assert_eq!(spec.args(), ["build", "--release"]);
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::interrupt::Interrupt;
use crate::core::environment::Environment;
use crate::core::task::{CommandFailure, TaskError};
use crate::events::TaskEmitter;

/// What to spawn: program, arguments, working directory and env overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    environment: Environment,
}

impl CommandSpec {
    /// A command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            environment: Environment::new(),
        }
    }

    pub fn builder(program: impl Into<String>) -> CommandSpecBuilder {
        CommandSpecBuilder {
            spec: Self::new(program),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Failure diagnostics for this command exiting with `exit_code`.
    pub fn failure(&self, exit_code: i32) -> CommandFailure {
        CommandFailure {
            command: self.program.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            exit_code,
        }
    }
}

/// Builder for [`CommandSpec`].
#[derive(Debug, Clone)]
pub struct CommandSpecBuilder {
    spec: CommandSpec,
}

impl CommandSpecBuilder {
    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace the environment overrides.
    pub fn environment(mut self, env: Environment) -> Self {
        self.spec.environment = env;
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.environment.set(key, value);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec.working_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> CommandSpec {
        self.spec
    }
}

/// Run `spec` to completion, streaming its output through `emitter`.
///
/// All output lines are emitted before this returns. If `interrupt` fires
/// first the process is killed and [`TaskError::Interrupted`] is returned.
pub async fn run_command(
    spec: &CommandSpec,
    emitter: &TaskEmitter,
    interrupt: &Interrupt,
) -> Result<(), TaskError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.environment.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| TaskError::Spawn {
        command: spec.program.clone(),
        source,
    })?;
    debug!(task = %emitter.task_id(), program = %spec.program, pid = ?child.id(), "spawned command");

    let stdout = child.stdout.take().map(|out| {
        let emitter = emitter.clone();
        forward_lines(out, move |line| emitter.stdout(line))
    });
    let stderr = child.stderr.take().map(|err| {
        let emitter = emitter.clone();
        forward_lines(err, move |line| emitter.stderr(line))
    });

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = interrupt.triggered() => None,
    };

    let Some(status) = status else {
        if let Err(err) = child.kill().await {
            warn!(task = %emitter.task_id(), error = %err, "failed to kill interrupted command");
        }
        for reader in [stdout, stderr].into_iter().flatten() {
            reader.abort();
        }
        return Err(TaskError::Interrupted);
    };
    let status = status?;

    // Background children can keep the pipes open after the shell exits.
    let readers: Vec<JoinHandle<()>> = [stdout, stderr].into_iter().flatten().collect();
    let aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
    tokio::select! {
        biased;
        _ = interrupt.triggered() => {
            for reader in aborts {
                reader.abort();
            }
            debug!(task = %emitter.task_id(), "interrupted while draining command output");
            return Err(TaskError::Interrupted);
        }
        _ = async {
            for reader in readers {
                // A reader only fails if it panicked; the exit status is still valid.
                let _ = reader.await;
            }
        } => {}
    }

    let code = status.code().unwrap_or(-1);
    debug!(task = %emitter.task_id(), exit_code = code, "command exited");

    if status.success() {
        Ok(())
    } else {
        Err(TaskError::CommandFailed(spec.failure(code)))
    }
}

fn forward_lines<R>(reader: R, mut emit: impl FnMut(String) + Send + 'static) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    emit(line.trim_end_matches(['\n', '\r']).to_string());
                }
                Err(err) => {
                    warn!(error = %err, "failed to read command output");
                    break;
                }
            }
        }
    })
}
