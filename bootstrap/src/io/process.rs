//! Child process execution for Terraform and AWS CLI invocations.
//!
//! Every external call goes through [`CommandRunner`], so orchestration code
//! can be driven by scripted runners in tests without spawning processes.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Argv-style description of a command. Arguments are never passed through a
/// shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// Environment overrides layered on top of the inherited environment.
    pub env: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Arguments as lossy UTF-8, for matching and logging.
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Program and arguments joined by spaces. Environment overrides are omitted
/// since they may carry credentials.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed ({status}){}", stderr_suffix(.stderr))]
    Failed {
        command: String,
        status: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout_secs}s")]
    TimedOut { command: String, timeout_secs: u64 },

    #[error("`{command}`: {context}")]
    Io {
        command: String,
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\nError output: {trimmed}")
    }
}

/// Synchronous process execution in the two modes the bootstrap needs.
pub trait CommandRunner {
    /// Run with inherited stdio (long-running, operator-monitored steps).
    fn run(&self, spec: &CommandSpec) -> Result<(), CommandError>;

    /// Run with stdout/stderr captured; returns stdout.
    fn capture(&self, spec: &CommandSpec) -> Result<String, CommandError>;
}

/// Runner that spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    /// Kill a command that runs longer than this. `None` waits indefinitely.
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn spawn(&self, spec: &CommandSpec, mut cmd: Command) -> Result<Child, CommandError> {
        debug!("spawning child process");
        cmd.spawn().map_err(|source| {
            error!(err = %source, "failed to spawn command");
            CommandError::Spawn {
                command: spec.to_string(),
                source,
            }
        })
    }

    fn wait(&self, spec: &CommandSpec, child: &mut Child) -> Result<ExitStatus, CommandError> {
        let io_err = |context, source| CommandError::Io {
            command: spec.to_string(),
            context,
            source,
        };
        let Some(timeout) = self.timeout else {
            return child.wait().map_err(|e| io_err("wait for command", e));
        };
        match child
            .wait_timeout(timeout)
            .map_err(|e| io_err("wait for command", e))?
        {
            Some(status) => Ok(status),
            None => {
                warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
                child.kill().map_err(|e| io_err("kill command", e))?;
                child
                    .wait()
                    .map_err(|e| io_err("wait command after kill", e))?;
                Err(CommandError::TimedOut {
                    command: spec.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip_all, fields(command = %spec))]
    fn run(&self, spec: &CommandSpec) -> Result<(), CommandError> {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let mut child = self.spawn(spec, cmd)?;
        let status = self.wait(spec, &mut child)?;
        debug!(exit_code = ?status.code(), "command finished");
        check_status(spec, status, String::new())
    }

    /// Output is drained on reader threads while the child runs so a chatty
    /// stderr cannot block a child writing stdout.
    #[instrument(skip_all, fields(command = %spec))]
    fn capture(&self, spec: &CommandSpec) -> Result<String, CommandError> {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = self.spawn(spec, cmd)?;

        let not_piped = |context| CommandError::Io {
            command: spec.to_string(),
            context,
            source: io::Error::other("stream was not piped"),
        };
        let stdout = child.stdout.take().ok_or_else(|| not_piped("take stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| not_piped("take stderr"))?;
        let stdout_handle = thread::spawn(move || read_stream(stdout));
        let stderr_handle = thread::spawn(move || read_stream(stderr));

        let status = self.wait(spec, &mut child)?;
        let stdout = join_output(spec, stdout_handle, "read stdout")?;
        let stderr = join_output(spec, stderr_handle, "read stderr")?;

        debug!(exit_code = ?status.code(), stdout_bytes = stdout.len(), "command finished");
        check_status(spec, status, String::from_utf8_lossy(&stderr).into_owned())?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

fn check_status(
    spec: &CommandSpec,
    status: ExitStatus,
    stderr: String,
) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }
    warn!(exit_code = ?status.code(), "command failed");
    Err(CommandError::Failed {
        command: spec.to_string(),
        status: describe_status(status),
        code: status.code(),
        stderr,
    })
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn join_output(
    spec: &CommandSpec,
    handle: thread::JoinHandle<io::Result<Vec<u8>>>,
    context: &'static str,
) -> Result<Vec<u8>, CommandError> {
    let result = handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("output reader thread panicked")));
    result.map_err(|source| CommandError::Io {
        command: spec.to_string(),
        context,
        source,
    })
}

fn read_stream<R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn capture_returns_stdout() {
        let out = SystemRunner::default()
            .capture(&sh("printf '{\"a\":1}'"))
            .expect("capture");
        assert_eq!(out, "{\"a\":1}");
    }

    #[test]
    fn capture_surfaces_stderr_on_failure() {
        let err = SystemRunner::default()
            .capture(&sh("echo boom >&2; exit 3"))
            .unwrap_err();
        match &err {
            CommandError::Failed { code, stderr, .. } => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("exit code 3"));
        assert!(message.contains("Error output: boom"));
    }

    #[test]
    fn run_reports_non_zero_exit() {
        let err = SystemRunner::default().run(&sh("exit 1")).unwrap_err();
        assert!(matches!(err, CommandError::Failed { code: Some(1), .. }));
    }

    #[test]
    fn spawn_failure_is_typed() {
        let err = SystemRunner::default()
            .run(&CommandSpec::new("definitely-not-a-real-binary-7f3a"))
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[test]
    fn timeout_kills_the_child() {
        let runner = SystemRunner::new(Some(Duration::from_millis(200)));
        let err = runner.capture(&sh("sleep 5")).unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[test]
    fn env_overrides_and_cwd_apply() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = sh("printf \"$GREETING:$(basename \"$PWD\")\"")
            .cwd(temp.path())
            .env("GREETING", "hi");
        let out = SystemRunner::default().capture(&spec).expect("capture");
        let dir_name = temp
            .path()
            .file_name()
            .expect("file name")
            .to_string_lossy()
            .into_owned();
        assert_eq!(out, format!("hi:{dir_name}"));
    }

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("terraform")
            .args(["plan", "-out=tfplan"])
            .env("AWS_SECRET_ACCESS_KEY", "secret");
        assert_eq!(spec.to_string(), "terraform plan -out=tfplan");
    }
}
