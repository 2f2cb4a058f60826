use std::{
    fmt,
    io::{self, Read},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use anyhow::{Result, ensure};
use pullhook_core::util::{format_duration, sanitize_output};
use tokio::process::Command;

/// Exit code reported when the command didn't exit normally or couldn't be
/// started at all.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// Runs the synchronization command in the current working directory.
#[derive(Debug, Clone)]
pub struct SyncRunner {
    command: Vec<String>,
}

/// Outcome of a single [`SyncRunner::execute`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub command: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub output: String,
    pub success: bool,
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "$ {}  (exit:{} in {})\n{}",
            self.command,
            self.exit_code,
            format_duration(self.duration),
            self.output
        )
    }
}

impl SyncRunner {
    pub fn new(command: Vec<String>) -> Result<Self> {
        ensure!(
            command.first().is_some_and(|program| !program.is_empty()),
            "Sync command must name a program"
        );
        Ok(Self { command })
    }

    pub fn command_line(&self) -> String { self.command.join(" ") }

    /// Run the command to completion. Failures are reported in the result,
    /// never returned as errors. There is no timeout.
    pub async fn execute(&self) -> SyncResult {
        let command = self.command_line();
        tracing::info!("- {command}");
        let start = Instant::now();
        let result = self.run_combined().await;
        let duration = start.elapsed();
        let (exit_code, output) = match result {
            Ok((status, output)) if status.success() => (0, output),
            Ok((status, output)) => {
                (status.code().unwrap_or(FAILURE_EXIT_CODE), failure_output(output, &status))
            }
            Err(e) => (FAILURE_EXIT_CODE, failure_output(Vec::new(), &e)),
        };
        SyncResult {
            command,
            exit_code,
            duration,
            output: sanitize_output(&output).into_owned(),
            success: exit_code == 0,
        }
    }

    /// Spawn the command with stdout and stderr sharing a single pipe so the
    /// output keeps its original interleaving.
    async fn run_combined(&self) -> io::Result<(ExitStatus, Vec<u8>)> {
        let (mut reader, writer) = io::pipe()?;
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        let mut child = cmd.spawn()?;
        // Release our copies of the write end, otherwise the reader never sees EOF.
        drop(cmd);
        let reader = tokio::task::spawn_blocking(move || {
            let mut output = Vec::new();
            reader.read_to_end(&mut output).map(|_| output)
        });
        let status = child.wait().await?;
        let output = reader.await.map_err(io::Error::other)??;
        Ok((status, output))
    }
}

fn failure_output(output: Vec<u8>, err: &dyn fmt::Display) -> Vec<u8> {
    if output.is_empty() { format!("<failure>\n{err}\n").into_bytes() } else { output }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> SyncRunner {
        SyncRunner::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()]).unwrap()
    }

    #[test]
    fn test_new_requires_program() {
        assert!(SyncRunner::new(vec![]).is_err());
        assert!(SyncRunner::new(vec![String::new()]).is_err());
        let runner = SyncRunner::new(vec!["git".into(), "pull".into()]).unwrap();
        assert_eq!(runner.command_line(), "git pull");
    }

    #[tokio::test]
    async fn test_execute_success() {
        let result = sh("printf out; printf err 1>&2").execute().await;
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
        assert_eq!(result.command, "sh -c printf out; printf err 1>&2");
    }

    #[tokio::test]
    async fn test_execute_interleaved() {
        let result = sh("echo one; echo two 1>&2; echo three").execute().await;
        assert_eq!(result.output, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_execute_exit_code() {
        let result = sh("echo conflict; exit 3").execute().await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.output, "conflict\n");
    }

    #[tokio::test]
    async fn test_execute_failure_without_output() {
        let result = sh("exit 1").execute().await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.output, "<failure>\nexit status: 1\n");
    }

    #[tokio::test]
    async fn test_execute_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-binary");
        let runner = SyncRunner::new(vec![missing.to_string_lossy().into_owned()]).unwrap();
        let result = runner.execute().await;
        assert!(!result.success);
        assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
        assert!(result.output.starts_with("<failure>\n"));
    }

    #[tokio::test]
    async fn test_execute_sanitizes_output() {
        let result = sh(r"printf '\377ok\n'").execute().await;
        assert!(result.success);
        assert_eq!(result.output, "ok\n");
    }

    #[test]
    fn test_display() {
        let result = SyncResult {
            command: "git pull --prune --quiet".to_string(),
            exit_code: 1,
            duration: Duration::from_nanos(1_234_567_890),
            output: "fatal: not a git repository\n".to_string(),
            success: false,
        };
        assert_eq!(
            result.to_string(),
            "$ git pull --prune --quiet  (exit:1 in 1.235s)\nfatal: not a git repository\n"
        );
    }
}
