//! Subprocess execution with timeout enforcement.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::command::ScanCommand;
use crate::error::{Result, ScanError};

/// Captured output of a finished scan process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs scanner commands as child processes.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run the command to completion, enforcing the wall-clock timeout.
    ///
    /// On timeout the whole process group is killed so helper processes
    /// spawned by the scanner do not linger.
    pub async fn execute(
        &self,
        command: &ScanCommand,
        timeout: Duration,
    ) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(command = %command, "Spawning scan process");
        let child = cmd.spawn().map_err(|e| ScanError::ExecutionFailed {
            code: None,
            stderr: format!("failed to spawn {}: {e}", command.program),
        })?;
        #[cfg(unix)]
        let pid = child.id();

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ScanError::ExecutionFailed {
                code: None,
                stderr: format!("failed to collect scan output: {e}"),
            })?,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Scan process timed out");
                #[cfg(unix)]
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                return Err(ScanError::ExecutionFailed {
                    code: None,
                    stderr: format!("scan timed out after {}s", timeout.as_secs()),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ScanError::ExecutionFailed {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        warn!(pid, error = %e, "Failed to kill scan process group");
    }
}
