//! Shell executor for running commands in the user's real shell.
//!
//! [`ShellExecutor`] has two modes that share one code path:
//!
//! - [`run`](ShellExecutor::run): output is only buffered.
//! - [`run_live`](ShellExecutor::run_live): output is also mirrored to the
//!   terminal line by line while it is buffered.
//!
//! Both drain the child through the same single reader, so for the same
//! command and environment they produce identical [`CommandResult`]s apart
//! from timing fields.

mod detect;
mod live;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

pub use detect::ShellDescriptor;
pub(crate) use live::ctrl_c;
pub use live::{OutputSink, SilentSink, TerminalSink};

/// Exit status reported when a process ended without any status code.
const UNKNOWN_EXIT: i32 = -1;

#[cfg(unix)]
const SIGINT: i32 = 2;

/// Errors raised when a command cannot be run at all.
///
/// A non-zero exit is not an error; it is reported in
/// [`CommandResult::exit_code`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The shell process could not be started.
    #[error("failed to start {shell}: {source}")]
    Spawn {
        /// Path of the shell that failed to start.
        shell: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Reading the child's output or waiting on it failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The outcome of one command. Only the executor creates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// The command string as given.
    pub command: String,
    /// Everything written to stdout.
    pub stdout: String,
    /// Everything written to stderr.
    pub stderr: String,
    /// Exit code; `128 + signal` for signalled processes.
    pub exit_code: i32,
    /// Directory the command ran in.
    pub working_directory: PathBuf,
    /// When the command started.
    pub timestamp: DateTime<Utc>,
    /// True when the user interrupted the command.
    #[serde(default)]
    pub interrupted: bool,
    /// Wall clock time in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

impl CommandResult {
    /// True for a zero exit that was not interrupted.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.interrupted
    }
}

/// Runs commands through the detected shell and tracks the working directory.
#[derive(Debug)]
pub struct ShellExecutor {
    shell: ShellDescriptor,
    cwd: RwLock<PathBuf>,
}

impl ShellExecutor {
    /// Detect the user's shell and start in the process's current directory.
    pub async fn detect() -> Self {
        Self::new(ShellDescriptor::detect().await, initial_directory())
    }

    /// Create an executor for a specific shell and starting directory.
    pub fn new(shell: ShellDescriptor, cwd: impl Into<PathBuf>) -> Self {
        Self {
            shell,
            cwd: RwLock::new(cwd.into()),
        }
    }

    /// The shell commands run in.
    pub fn shell(&self) -> &ShellDescriptor {
        &self.shell
    }

    /// The directory the next command will run in.
    pub fn working_directory(&self) -> PathBuf {
        match self.cwd.read() {
            Ok(cwd) => cwd.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_working_directory(&self, dir: PathBuf) {
        match self.cwd.write() {
            Ok(mut cwd) => *cwd = dir,
            Err(poisoned) => *poisoned.into_inner() = dir,
        }
    }

    /// Run a command, buffering its output.
    ///
    /// Ctrl-C stops the command; the partial result is still returned.
    pub async fn run(&self, command: &str) -> Result<CommandResult, ExecutionError> {
        self.run_with(command, &mut SilentSink, live::ctrl_c()).await
    }

    /// Run a command, streaming its output to the terminal as it arrives.
    pub async fn run_live(&self, command: &str) -> Result<CommandResult, ExecutionError> {
        self.run_with(command, &mut TerminalSink, live::ctrl_c()).await
    }

    /// Run a command with a custom sink and interrupt signal.
    ///
    /// When `interrupt` resolves the child is killed, reaped, and a result
    /// carrying whatever output was read so far is returned with
    /// [`CommandResult::interrupted`] set.
    pub async fn run_with<S, F>(
        &self,
        command: &str,
        sink: &mut S,
        interrupt: F,
    ) -> Result<CommandResult, ExecutionError>
    where
        S: OutputSink + ?Sized,
        F: Future<Output = ()>,
    {
        let cwd = self.working_directory();
        let timestamp = Utc::now();
        let started = Instant::now();

        if let Some(target) = parse_cd(command) {
            let (stderr, exit_code) = self.change_directory(&cwd, target);
            sink.stderr(stderr.as_bytes());
            return Ok(CommandResult {
                command: command.to_string(),
                stdout: String::new(),
                stderr,
                exit_code,
                working_directory: cwd,
                timestamp,
                interrupted: false,
                duration_ms: elapsed_ms(started),
            });
        }

        tracing::debug!(command = %command, cwd = %cwd.display(), "running command");

        let child = Command::new(&self.shell.path)
            .arg(self.shell.command_flag())
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                shell: self.shell.path.display().to_string(),
                source,
            })?;

        let drained = live::drain(child, sink, interrupt).await?;
        let exit_code = exit_code(&drained.status);
        let interrupted = drained.interrupted || killed_by_sigint(&drained.status);

        tracing::debug!(command = %command, exit_code, interrupted, "command finished");

        Ok(CommandResult {
            command: command.to_string(),
            stdout: String::from_utf8_lossy(&drained.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&drained.stderr).into_owned(),
            exit_code,
            working_directory: cwd,
            timestamp,
            interrupted,
            duration_ms: elapsed_ms(started),
        })
    }

    /// Apply a `cd`, returning the stderr text and exit code.
    fn change_directory(&self, cwd: &Path, target: Option<&str>) -> (String, i32) {
        let Some(dir) = resolve_cd_target(cwd, target) else {
            return ("cd: could not determine home directory\n".to_string(), 1);
        };
        if !dir.is_dir() {
            let shown = target.unwrap_or("~");
            return (format!("cd: no such file or directory: {shown}\n"), 1);
        }
        let dir = dir.canonicalize().unwrap_or(dir);
        tracing::debug!(dir = %dir.display(), "changed directory");
        self.set_working_directory(dir);
        (String::new(), 0)
    }
}

fn initial_directory() -> PathBuf {
    std::env::current_dir()
        .ok()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT
}

#[cfg(unix)]
fn killed_by_sigint(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(SIGINT)
}

#[cfg(not(unix))]
fn killed_by_sigint(_status: &ExitStatus) -> bool {
    false
}

/// Recognise a bare `cd [dir]`, returning its argument.
///
/// Anything compound (`cd x && make`) or relying on shell expansion is left
/// to the shell.
fn parse_cd(command: &str) -> Option<Option<&str>> {
    let rest = command.trim().strip_prefix("cd")?;
    if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }
    let arg = rest.trim();
    if arg.is_empty() {
        return Some(None);
    }
    if arg == "-" || arg.contains([';', '&', '|', '<', '>', '`', '$', '*', '?']) {
        return None;
    }
    let unquoted = arg
        .strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .or_else(|| arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')));
    match unquoted {
        Some(inner) => Some(Some(inner)),
        None if arg.contains(char::is_whitespace) => None,
        None => Some(Some(arg)),
    }
}

fn resolve_cd_target(cwd: &Path, target: Option<&str>) -> Option<PathBuf> {
    match target {
        None | Some("~") => dirs::home_dir(),
        Some(t) => {
            if let Some(rest) = t.strip_prefix("~/") {
                return dirs::home_dir().map(|home| home.join(rest));
            }
            let path = Path::new(t);
            Some(if path.is_absolute() {
                path.to_path_buf()
            } else {
                cwd.join(path)
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cd_forms() {
        assert_eq!(parse_cd("cd"), Some(None));
        assert_eq!(parse_cd("  cd   "), Some(None));
        assert_eq!(parse_cd("cd /tmp"), Some(Some("/tmp")));
        assert_eq!(parse_cd("cd 'My Dir'"), Some(Some("My Dir")));
        assert_eq!(parse_cd("cd \"x y\""), Some(Some("x y")));
    }

    #[test]
    fn test_parse_cd_leaves_compound_commands_to_shell() {
        assert_eq!(parse_cd("cd /tmp && ls"), None);
        assert_eq!(parse_cd("cd $HOME"), None);
        assert_eq!(parse_cd("cd -"), None);
        assert_eq!(parse_cd("cdrecord foo"), None);
        assert_eq!(parse_cd("echo cd"), None);
    }

    #[test]
    fn test_resolve_cd_target_relative() {
        let resolved = resolve_cd_target(Path::new("/base"), Some("sub")).unwrap();
        assert_eq!(resolved, PathBuf::from("/base/sub"));
        let absolute = resolve_cd_target(Path::new("/base"), Some("/etc")).unwrap();
        assert_eq!(absolute, PathBuf::from("/etc"));
    }

    #[test]
    fn test_command_result_success() {
        let mut result = CommandResult {
            command: "true".to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            working_directory: PathBuf::from("/"),
            timestamp: Utc::now(),
            interrupted: false,
            duration_ms: 0,
        };
        assert!(result.success());
        result.interrupted = true;
        assert!(!result.success());
        result.interrupted = false;
        result.exit_code = 1;
        assert!(!result.success());
    }

    #[test]
    fn test_change_directory_missing() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new(ShellDescriptor::fallback(), dir.path());
        let (stderr, code) = executor.change_directory(dir.path(), Some("nope"));
        assert_eq!(code, 1);
        assert!(stderr.contains("no such file or directory: nope"));
        assert_eq!(executor.working_directory(), dir.path());
    }
}
