//! External command execution with a hard per-call timeout.

use crate::Result;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `program` with `args`, waiting at most `timeout`.
///
/// The child is killed when the timeout elapses.
pub async fn run_command<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    timeout: Duration,
) -> Result<CommandOutput> {
    let program = program.as_ref();
    let shown = describe(program, args);
    tracing::debug!("Running: {}", shown);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::error!("Command timed out after {:?}: {}", timeout, shown);
            return Err(crate::Error::Timeout {
                command: shown,
                timeout,
            });
        }
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    })
}

/// Run a command and turn a non-zero exit into `Error::CommandFailed`.
pub async fn run_checked<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    timeout: Duration,
) -> Result<CommandOutput> {
    let program = program.as_ref();
    let output = run_command(program, args, timeout).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(crate::Error::CommandFailed {
            command: describe(program, args),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Check whether a program is on `PATH`.
pub fn is_installed(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(program))))
        .unwrap_or(false)
}

/// Whether `path` is a regular file with an execute bit set.
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn describe<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> String {
    let mut parts = vec![program.to_string_lossy().to_string()];
    parts.extend(args.iter().map(|a| a.as_ref().to_string_lossy().to_string()));
    parts.join(" ")
}
