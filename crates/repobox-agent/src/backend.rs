//! AI agent adapter (4.D): spawns the configured AI CLI, streams its
//! stdout/stderr line-by-line into the output sink, and enforces an
//! output line cap and deadline. Never itself commits, pushes, or
//! touches git.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use repobox_core::error::ExecutionError;
use repobox_core::sink::OutputPort;
use repobox_core::types::OutputStream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Maximum bytes a single scanned line may grow to before it is flushed
/// as-is; stdout/stderr lines are not expected to exceed 1 MiB but the
/// scanner must not choke if one does (4.D.3).
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AgentConfig {
    pub enabled: bool,
    pub cli_path: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_output_lines: u64,
}

pub struct ExecuteRequest<'a> {
    pub workdir: &'a str,
    pub prompt: &'a str,
    pub environment: &'a str,
    pub job_id: &'a str,
    pub session_id: &'a str,
}

pub struct Agent {
    config: AgentConfig,
    sink: Arc<dyn OutputPort>,
}

impl Agent {
    pub fn new(config: AgentConfig, sink: Arc<dyn OutputPort>) -> Self {
        Self { config, sink }
    }

    pub async fn execute(
        &self,
        request: ExecuteRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        if !self.config.enabled {
            return self.execute_mock(&request).await;
        }
        self.execute_live(&request, cancel).await
    }

    /// Mock mode (4.D.1): writes a sentinel file describing the job
    /// instead of spawning anything, so the rest of the pipeline stays
    /// testable without a live API key.
    async fn execute_mock(&self, request: &ExecuteRequest<'_>) -> Result<(), ExecutionError> {
        let payload = serde_json::json!({
            "job_id": request.job_id,
            "prompt": request.prompt,
            "environment": request.environment,
            "mode": "mock",
        });
        let path = std::path::Path::new(request.workdir).join(format!("job-{}.json", request.job_id));
        let body = serde_json::to_string_pretty(&payload).unwrap_or_default();
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ExecutionError::SpawnFailure(format!("mock sentinel write failed: {e}")))?;
        Ok(())
    }

    async fn execute_live(
        &self,
        request: &ExecuteRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let mut cmd = Command::new(&self.config.cli_path);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("text")
            .arg("-p")
            .arg(request.prompt)
            .env("ANTHROPIC_API_KEY", &self.config.api_key)
            .current_dir(request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailure(e.to_string()))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let pid = child.id().map(|pid| pid as i32);

        // `child` moves entirely into this future so only one `&mut child`
        // ever exists; the timeout/cancel arms below signal by raw pid
        // instead of calling back into `child`.
        let io_and_wait = async move {
            self.drain(stdout, stderr, request.session_id).await;
            child.wait().await
        };

        tokio::select! {
            status = io_and_wait => match status {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(ExecutionError::NonZeroExit(status.code().unwrap_or(-1))),
                Err(e) => Err(ExecutionError::SpawnFailure(e.to_string())),
            },
            _ = tokio::time::sleep(self.config.timeout) => {
                if let Some(pid) = pid {
                    terminate_process_group(pid).await;
                }
                Err(ExecutionError::Timeout)
            }
            _ = cancel.cancelled() => {
                if let Some(pid) = pid {
                    terminate_process_group(pid).await;
                }
                Err(ExecutionError::Cancelled)
            }
        }
    }

    async fn drain(
        &self,
        stdout: impl tokio::io::AsyncRead + Unpin,
        stderr: impl tokio::io::AsyncRead + Unpin,
        session_id: &str,
    ) {
        let mut lines_forwarded = 0u64;
        let mut truncated = false;

        let mut stdout_reader = BufReader::new(stdout);
        let mut stderr_reader = BufReader::new(stderr);
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout_done = false;
        let mut stderr_done = false;

        loop {
            if stdout_done && stderr_done {
                break;
            }
            tokio::select! {
                result = read_capped_line(&mut stdout_reader, &mut stdout_buf), if !stdout_done => {
                    match result {
                        Some(line) => {
                            self.forward(session_id, OutputStream::Stdout, line, &mut lines_forwarded, &mut truncated).await;
                        }
                        None => stdout_done = true,
                    }
                }
                result = read_capped_line(&mut stderr_reader, &mut stderr_buf), if !stderr_done => {
                    match result {
                        Some(line) => {
                            self.forward(session_id, OutputStream::Stderr, line, &mut lines_forwarded, &mut truncated).await;
                        }
                        None => stderr_done = true,
                    }
                }
            }
        }
    }

    async fn forward(
        &self,
        session_id: &str,
        stream: OutputStream,
        line: String,
        lines_forwarded: &mut u64,
        truncated: &mut bool,
    ) {
        if *lines_forwarded >= self.config.max_output_lines {
            if !*truncated {
                *truncated = true;
                self.sink
                    .append_runner(session_id, "output truncated: line cap reached".to_string())
                    .await;
            }
            return;
        }
        *lines_forwarded += 1;
        self.sink.append_agent(session_id, stream, line).await;
    }
}

/// Reads one line, accepting lines up to [`MAX_LINE_BYTES`] before
/// flushing what has been read so far rather than growing unbounded.
/// `None` means EOF with no more data.
async fn read_capped_line(
    reader: &mut BufReader<impl tokio::io::AsyncRead + Unpin>,
    buf: &mut Vec<u8>,
) -> Option<String> {
    buf.clear();
    loop {
        let available = match reader.fill_buf().await {
            Ok(available) => available,
            Err(_) => return None,
        };
        if available.is_empty() {
            return if buf.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(buf).into_owned())
            };
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&available[..pos]);
            reader.consume(pos + 1);
            return Some(String::from_utf8_lossy(buf).into_owned());
        }
        let take = available.len().min(MAX_LINE_BYTES - buf.len().min(MAX_LINE_BYTES));
        buf.extend_from_slice(&available[..take]);
        let consumed = available.len();
        reader.consume(consumed);
        if buf.len() >= MAX_LINE_BYTES {
            return Some(String::from_utf8_lossy(buf).into_owned());
        }
    }
}

/// Sends the process group (the child was spawned with `process_group(0)`,
/// so it is its own group leader) a terminate signal, then polls for it to
/// exit, escalating to a kill once a grace period elapses. Operates on the
/// raw pid rather than the `Child` handle: by the time this runs, `child`
/// is owned by the drain/wait future racing alongside it in `execute_live`.
async fn terminate_process_group(pid: i32) {
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }

    let grace = Duration::from_secs(5);
    let poll_interval = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < grace {
        tokio::time::sleep(poll_interval).await;
        waited += poll_interval;
        let still_alive = unsafe { libc::kill(-pid, 0) == 0 };
        if !still_alive {
            return;
        }
    }

    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}
