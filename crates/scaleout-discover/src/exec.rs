//! External command execution for the link control tool.
//!
//! Commands are spawned directly with an argument vector, never through a
//! shell, so interface names need no quoting. There is no per-command
//! timeout: a hung tool stalls the calling pass.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{DiscoverError, Result};

/// Result of an external command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success, -1 = killed by signal).
    pub exit_code: i32,
    /// Trimmed stdout output.
    pub stdout: String,
    /// Trimmed stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Renders a program and its arguments as one line for logs and errors.
pub fn command_line(program: &Path, args: &[&str]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs `program` with `args` and captures its output.
///
/// # Returns
///
/// * `Ok(ExecResult)` - The command ran, successfully or not
/// * `Err(DiscoverError::CommandExec)` - If the command could not be spawned
pub async fn exec(program: &Path, args: &[&str]) -> Result<ExecResult> {
    let command = command_line(program, args);
    tracing::debug!(command = %command, "Executing command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| DiscoverError::CommandExec {
            command: command.clone(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %command, "Command succeeded");
    } else {
        tracing::warn!(
            command = %command,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Runs a command and turns a non-zero exit into an error.
///
/// # Returns
///
/// * `Ok(String)` - The stdout output on success
/// * `Err(DiscoverError)` - If the command cannot be spawned or exits non-zero
pub async fn exec_or_throw(program: &Path, args: &[&str]) -> Result<String> {
    let result = exec(program, args).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(DiscoverError::CommandFailed {
            command: command_line(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tool(name: &str) -> PathBuf {
        which::which(name).unwrap()
    }

    #[test]
    fn test_command_line() {
        let line = command_line(Path::new("/usr/sbin/lldptool"), &["-L", "-i", "ens1"]);
        assert_eq!(line, "/usr/sbin/lldptool -L -i ens1");
        assert_eq!(command_line(Path::new("true"), &[]), "true");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert!(result.success());
        assert_eq!(result.combined_output(), "stdout\nstderr");

        let result = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "error message".to_string(),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "error message");
    }

    #[tokio::test]
    async fn test_exec_echo_is_not_shell_expanded() {
        let result = exec(&tool("echo"), &["$HOME", "a b"]).await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "$HOME a b");
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        let result = exec_or_throw(&tool("false"), &[]).await;
        match result {
            Err(DiscoverError::CommandFailed { exit_code, .. }) => assert_eq!(exit_code, 1),
            other => panic!("Expected CommandFailed error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_missing_binary() {
        let result = exec(Path::new("/nonexistent/lldptool"), &["-h"]).await;
        assert!(matches!(result, Err(DiscoverError::CommandExec { .. })));
    }
}
