//! External analysis binary supervision.
//!
//! Analysis binaries are opaque executables with an argv/exit-code
//! contract: exit 0 is success (stderr may still carry warnings), any
//! other exit is failure with stderr as the diagnostic. Output is
//! streamed line-by-line for observability and stderr is buffered so it
//! is never discarded.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics;

/// Outcome of a successful binary invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Always 0 on the success path.
    pub exit_code: i32,
    /// Accumulated stderr; non-empty stderr on exit 0 means warnings.
    pub stderr: String,
}

/// Supervises invocation of external analysis binaries.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run a binary to completion.
    ///
    /// Fails fast with a `ProcessExecution` error if the binary is
    /// missing or not executable; never silently proceeds.
    pub async fn execute(
        &self,
        binary_path: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<ProcessOutput> {
        self.check_executable(binary_path)?;

        info!(binary = %binary_path, args = ?args, "Spawning analysis binary");

        let mut command = Command::new(binary_path);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            metrics::record_process_spawn("spawn_error");
            Error::ProcessExecution(format!("Failed to spawn '{}': {}", binary_path, e))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(stream = "stdout", "{}", line);
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut buffered = String::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(stream = "stderr", "{}", line);
                    buffered.push_str(&line);
                    buffered.push('\n');
                }
            }
            buffered
        });

        let status = child.wait().await.map_err(|e| {
            Error::ProcessExecution(format!("Failed to wait for '{}': {}", binary_path, e))
        })?;

        stdout_task.await.ok();
        let stderr_buf = stderr_task.await.unwrap_or_default();

        let code = status.code().unwrap_or(-1);
        if status.success() {
            if !stderr_buf.is_empty() {
                warn!(binary = %binary_path, "Binary succeeded with warnings on stderr");
            }
            metrics::record_process_spawn("success");
            Ok(ProcessOutput {
                exit_code: 0,
                stderr: stderr_buf,
            })
        } else {
            metrics::record_process_spawn("failure");
            Err(Error::ProcessExecution(format!(
                "'{}' exited with code {}: {}",
                binary_path,
                code,
                stderr_buf.trim_end()
            )))
        }
    }

    /// Verify the binary is present and executable before spawning.
    fn check_executable(&self, binary_path: &str) -> Result<()> {
        let path = PathBuf::from(binary_path);
        let meta = std::fs::metadata(&path).map_err(|_| {
            Error::ProcessExecution(format!("Binary not found: {}", binary_path))
        })?;
        if !meta.is_file() {
            return Err(Error::ProcessExecution(format!(
                "Binary is not a regular file: {}",
                binary_path
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                return Err(Error::ProcessExecution(format!(
                    "Binary is not executable: {}",
                    binary_path
                )));
            }
        }

        Ok(())
    }
}
