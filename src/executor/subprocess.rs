//! Subprocess executor
//!
//! Runs the generated harness in a child interpreter process. The child gets
//! its own process group so that it and everything it spawns can be killed
//! with one signal, and an address-space ceiling applied before exec.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::harness::{self, HarnessFailure, Marker, ReturnPayload};
use super::{ExecutionRequest, ExecutionResult, Executor, SENTINEL_EXIT_CODE};
use crate::config::GraderConfig;

/// How long to wait for the output pipes to close after the child is gone
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Error)]
enum ExecutorError {
    #[error("interpreter not found: {0}")]
    InterpreterNotFound(String),
    #[error("failed to prepare harness file: {0}")]
    Harness(#[source] io::Error),
    #[error("failed to encode input data: {0}")]
    Input(#[from] serde_json::Error),
    #[error("failed to spawn interpreter: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to wait for interpreter: {0}")]
    Wait(#[source] io::Error),
    #[error("child {0} pipe was not captured")]
    MissingPipe(&'static str),
}

/// Bytes read from one output stream.
///
/// `head` holds the first bytes up to the cap. Once the stream runs past the
/// cap, `tail` holds its last bytes, up to the cap as well.
#[derive(Debug, Default)]
struct Captured {
    head: Vec<u8>,
    tail: Vec<u8>,
    truncated: bool,
}

impl Captured {
    /// Head and tail joined; bytes between them are missing when the stream
    /// was more than twice the cap
    fn window(&self) -> String {
        let mut bytes = Vec::with_capacity(self.head.len() + self.tail.len());
        bytes.extend_from_slice(&self.head);
        bytes.extend_from_slice(&self.tail);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Executor that runs each request in a fresh interpreter process
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    interpreter: PathBuf,
    work_dir: PathBuf,
    /// Address-space ceiling in MB (0 disables)
    memory_limit_mb: u64,
    /// Cap per output stream in bytes
    max_output_bytes: usize,
    marker: Option<Marker>,
}

impl SubprocessExecutor {
    pub fn new(interpreter: impl AsRef<Path>) -> Self {
        Self {
            interpreter: interpreter.as_ref().to_path_buf(),
            work_dir: std::env::temp_dir(),
            memory_limit_mb: 512,
            max_output_bytes: 8 * 1024 * 1024,
            marker: None,
        }
    }

    pub fn from_config(config: &GraderConfig) -> Self {
        Self::new(&config.interpreter)
            .with_work_dir(&config.work_dir)
            .with_memory_limit_mb(config.memory_limit_mb)
            .with_max_output_bytes(config.max_output_bytes)
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_memory_limit_mb(mut self, memory_limit_mb: u64) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Check that the interpreter can be started at all
    pub async fn ensure_interpreter_available(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.interpreter)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Failed to start interpreter {:?}", self.interpreter))?;
        if !output.status.success() {
            anyhow::bail!(
                "Interpreter {:?} exited with {} on --version",
                self.interpreter,
                output.status
            );
        }
        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.trim().to_string())
    }

    #[cfg(test)]
    fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError> {
        let marker = self.marker.clone().unwrap_or_else(Marker::generate);
        let script = harness::render(&request.code, &marker);
        let input = serde_json::to_vec(&request.input)?;

        // Removed on drop, whichever way this function returns
        let harness_file = tempfile::Builder::new()
            .prefix("harness_")
            .suffix(".py")
            .tempfile_in(&self.work_dir)
            .map_err(ExecutorError::Harness)?;
        fs::write(harness_file.path(), &script)
            .await
            .map_err(ExecutorError::Harness)?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-I")
            .arg(harness_file.path())
            .current_dir(&self.work_dir)
            .env_clear()
            .env(
                "PATH",
                std::env::var_os("PATH").unwrap_or_else(|| FALLBACK_PATH.into()),
            )
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let memory_limit_bytes = memory_limit_bytes(self.memory_limit_mb);
        // SAFETY: the closure only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || apply_rlimits(memory_limit_bytes));
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ExecutorError::InterpreterNotFound(self.interpreter.display().to_string())
            } else {
                ExecutorError::Spawn(e)
            }
        })?;
        // The child leads its own group, so its pid is the group id
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));

        let mut stdin = child.stdin.take().ok_or(ExecutorError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ExecutorError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ExecutorError::MissingPipe("stderr"))?;

        let writer = tokio::spawn(async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        });
        let stdout_reader = tokio::spawn(read_capped(stdout, self.max_output_bytes));
        let stderr_reader = tokio::spawn(read_capped(stderr, self.max_output_bytes));

        let timeout = Duration::from_millis(request.timeout_ms);
        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let elapsed = start.elapsed();

        // Descendants can outlive the harness, so the whole group goes every time
        if let Some(pgid) = pgid {
            kill_group(pgid);
        }

        let status = match waited {
            Ok(status) => Some(status.map_err(ExecutorError::Wait)?),
            Err(_) => {
                debug!("Execution timed out after {}ms", request.timeout_ms);
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap timed out child: {}", e);
                }
                None
            }
        };

        match writer.await {
            Ok(Err(e)) => debug!("Child stdin closed early: {}", e),
            Err(e) => warn!("Stdin writer task failed: {}", e),
            Ok(Ok(())) => {}
        }
        let stdout = collect(stdout_reader, "stdout").await;
        let stderr = collect(stderr_reader, "stderr").await;

        let mut stderr_text = String::from_utf8_lossy(&stderr.head).into_owned();
        let mut split = harness::split_stdout(&stdout.window(), &marker);
        if stdout.truncated {
            truncate_bytes(&mut split.stdout, self.max_output_bytes);
            append_note(
                &mut stderr_text,
                &format!("[grader] stdout truncated at {} bytes", self.max_output_bytes),
            );
        }
        if stderr.truncated {
            append_note(
                &mut stderr_text,
                &format!("[grader] stderr truncated at {} bytes", self.max_output_bytes),
            );
        }

        let Some(status) = status else {
            append_note(&mut stderr_text, "Execution timed out.");
            return Ok(ExecutionResult {
                stdout: split.stdout,
                stderr: stderr_text,
                return_value: None,
                exit_code: Some(SENTINEL_EXIT_CODE),
                execution_time_ms: request.timeout_ms,
                timed_out: true,
                is_successful: false,
                error: None,
                failure: None,
            });
        };

        let exit_code = exit_code_of(status);
        let return_value = match split.payload {
            ReturnPayload::Value(value) => Some(value),
            ReturnPayload::Missing => {
                if exit_code == 0 && !split.stdout.is_empty() {
                    warn!("Program exited successfully without a return value marker");
                    append_note(
                        &mut stderr_text,
                        "Warning: program exited successfully but no return value was found in stdout.",
                    );
                }
                None
            }
            ReturnPayload::Corrupt(reason) => {
                warn!("Return value payload could not be decoded: {}", reason);
                append_note(
                    &mut stderr_text,
                    &format!("Warning: return value could not be decoded ({}).", reason),
                );
                None
            }
        };

        let failure = if exit_code != 0 {
            HarnessFailure::from_stderr(&stderr.window())
        } else {
            None
        };

        debug!(
            "Execution finished: exit_code={}, time_ms={}, stdout_len={}, stderr_len={}",
            exit_code,
            elapsed.as_millis(),
            split.stdout.len(),
            stderr_text.len()
        );

        Ok(ExecutionResult {
            stdout: split.stdout,
            stderr: stderr_text,
            return_value,
            exit_code: Some(exit_code),
            execution_time_ms: elapsed.as_millis() as u64,
            timed_out: false,
            is_successful: exit_code == 0,
            error: None,
            failure,
        })
    }
}

#[async_trait]
impl Executor for SubprocessExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        match self.run(request).await {
            Ok(result) => result,
            Err(ExecutorError::InterpreterNotFound(path)) => {
                let message = format!(
                    "Executor internal error: interpreter not found ({}). This might be a misconfiguration.",
                    path
                );
                error!("{}", message);
                ExecutionResult::internal_error(message.clone(), message)
            }
            Err(e) => {
                let message = format!("Executor internal error: {}", e);
                error!("{} ({:?})", message, e);
                ExecutionResult::internal_error(message.clone(), format!("{}\nDetails: {:?}", message, e))
            }
        }
    }
}

fn apply_rlimits(memory_limit_bytes: u64) -> io::Result<()> {
    setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
    if memory_limit_bytes > 0 {
        setrlimit(Resource::RLIMIT_AS, memory_limit_bytes, memory_limit_bytes)?;
    }
    Ok(())
}

/// RLIMIT_AS value for a ceiling in MB; huge values saturate to no limit
fn memory_limit_bytes(memory_limit_mb: u64) -> u64 {
    memory_limit_mb.saturating_mul(1024 * 1024)
}

fn kill_group(pgid: Pid) {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

/// Exit code, or the negated signal number if the child was killed by one
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(SENTINEL_EXIT_CODE)
}

/// Read the stream to its end, keeping the first and the last `limit` bytes
async fn read_capped<R>(reader: R, limit: usize) -> io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut limited = reader.take(limit as u64);
    limited.read_to_end(&mut head).await?;
    let mut rest = limited.into_inner();

    let mut tail = Vec::new();
    let mut truncated = false;
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = rest.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        truncated = true;
        tail.extend_from_slice(&chunk[..n]);
        // Trim in batches
        if tail.len() > limit.saturating_mul(2) {
            tail.drain(..tail.len() - limit);
        }
    }
    if tail.len() > limit {
        tail.drain(..tail.len() - limit);
    }
    Ok(Captured {
        head,
        tail,
        truncated,
    })
}

/// Cut `text` to at most `max_bytes`, on a char boundary
fn truncate_bytes(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

async fn collect(mut handle: JoinHandle<io::Result<Captured>>, stream: &str) -> Captured {
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            warn!("Failed to read child {}: {}", stream, e);
            Captured::default()
        }
        Ok(Err(e)) => {
            warn!("Child {} reader task failed: {}", stream, e);
            Captured::default()
        }
        Err(_) => {
            warn!("Child {} did not close in time, discarding it", stream);
            handle.abort();
            Captured::default()
        }
    }
}

fn append_note(stderr: &mut String, note: &str) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(note);
}
