//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use vn_core::Error;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of trailing stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8). When streamed through a
    /// callback only the trailing lines are kept.
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// Children are spawned with `kill_on_drop`, so dropping the returned future
/// (for example when a job deadline fires) kills the process.
///
/// # Example
///
/// ```no_run
/// use vn_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> vn_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "error", "-print_format", "json", "-show_streams"])
///     .arg("/path/to/video.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Kill the process when `token` is cancelled.
    pub fn cancel_on(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn(&self, mut cmd: Command) -> vn_core::Result<Child> {
        tracing::debug!(tool = %self.program_name(), args = ?self.args, "spawning");
        cmd.spawn()
            .map_err(|e| Error::tool(self.program_name(), format!("failed to spawn: {e}")))
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone().unwrap_or_else(CancellationToken::new)
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::Tool`] if spawning fails or the process exits non-zero
    ///   (message includes the stderr tail).
    /// - [`Error::Timeout`] if the process outlives the timeout.
    /// - [`Error::Cancelled`] if the cancellation token fires.
    pub async fn execute(&self) -> vn_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = self.command();
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let child = self.spawn(cmd)?;
        let cancel = self.cancel_token();

        // Dropping the wait future drops the child, which kills it.
        let result = tokio::select! {
            r = tokio::time::timeout(self.timeout, child.wait_with_output()) => r,
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { tool: program_name });
            }
        };

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(Error::tool(
                        program_name,
                        format!(
                            "exited with status {}: {}",
                            output.status,
                            stderr_tail(&tool_output.stderr)
                        ),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(Error::Timeout {
                tool: program_name,
                after: self.timeout,
            }),
        }
    }

    /// Execute the command, handing every stderr line to `on_line` as it
    /// arrives. Stdout is discarded.
    ///
    /// Used for ffmpeg `-progress pipe:2` parsing. Errors follow
    /// [`execute`](Self::execute).
    pub async fn execute_with_stderr_callback(
        &self,
        mut on_line: impl FnMut(&str),
    ) -> vn_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = self.command();
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        let mut child = self.spawn(cmd)?;
        let cancel = self.cancel_token();

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool(&program_name, "stderr was not captured"))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        return Err(Error::tool(
                            program_name,
                            format!("failed to read stderr: {e}"),
                        ));
                    }
                },
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    return Err(Error::Timeout { tool: program_name, after: self.timeout });
                }
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(Error::Cancelled { tool: program_name });
                }
            }
        }

        // stderr closed; the process is exiting.
        let waited = tokio::select! {
            s = child.wait() => Ok(s),
            _ = &mut deadline => Err(Error::Timeout { tool: program_name.clone(), after: self.timeout }),
            _ = cancel.cancelled() => Err(Error::Cancelled { tool: program_name.clone() }),
        };
        let status = match waited {
            Ok(s) => s.map_err(|e| {
                Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
            })?,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };

        let stderr = tail.into_iter().collect::<Vec<_>>().join("\n");
        if !status.success() {
            return Err(Error::tool(
                program_name,
                format!("exited with status {status}: {}", stderr.trim()),
            ));
        }

        Ok(ToolOutput {
            status,
            stdout: String::new(),
            stderr,
        })
    }
}

/// The last [`STDERR_TAIL_LINES`] non-empty lines of `stderr`.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let err = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn timeout_fires() {
        let err = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "unexpected error: {err}");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn cancellation_kills_process() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .cancel_on(token)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }), "unexpected error: {err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn non_zero_exit_is_transient_tool_error() {
        let err = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo boom >&2; exit 3"])
            .execute()
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn stderr_callback_receives_lines() {
        let mut seen = Vec::new();
        let out = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo frame=1 >&2; echo progress=end >&2"])
            .execute_with_stderr_callback(|line| seen.push(line.to_string()))
            .await
            .unwrap();
        assert!(out.status.success());
        assert_eq!(seen, vec!["frame=1", "progress=end"]);
    }

    #[tokio::test]
    async fn stderr_callback_timeout() {
        let err = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute_with_stderr_callback(|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line{i}\n")).collect();
        let tail = stderr_tail(&text);
        assert!(tail.starts_with("line10"));
        assert!(tail.ends_with("line29"));
    }
}
