//! Scanner process execution
//!
//! Handles:
//! - Running the built command through the platform shell
//! - Capturing stdout/stderr up to a buffer ceiling, optionally streaming
//!   chunks to the caller as they arrive
//! - Best-effort cancellation by process id, keeping partial output
//!
//! A nonzero exit is not treated as "no result": the scanner routinely exits
//! nonzero on partial success, so the captured output travels with the error.

use std::collections::BTreeMap;
use std::future::Future;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::constants::DEFAULT_MAX_BUFFER_BYTES;
use crate::errors::ExecutionError;
use crate::models::Platform;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Captured process output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Output exceeded the buffer ceiling and was cut
    pub truncated: bool,
}

/// Incremental output forwarded while the process runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// Per-invocation execution options
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Bytes kept per stream; the rest is drained and dropped
    pub max_buffer_bytes: usize,
    /// Environment overrides on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// Receives output chunks as they are read
    pub output: Option<mpsc::UnboundedSender<OutputChunk>>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            env: BTreeMap::new(),
            output: None,
        }
    }
}

/// Executes scanner command lines
pub trait ProcessRunner: Send + Sync {
    fn execute(
        &self,
        command: &str,
        options: &ExecOptions,
        cancel: &CancelHandle,
    ) -> impl Future<Output = Result<ProcessOutput, ExecutionError>> + Send;
}

struct CancelState {
    pid: Mutex<Option<u32>>,
    requested: watch::Sender<bool>,
}

/// Shared cancellation flag for one pipeline run.
///
/// Clones observe the same state. The runner attaches the child pid once
/// the process has started.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("pid", &self.pid())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            inner: Arc::new(CancelState {
                pid: Mutex::new(None),
                requested,
            }),
        }
    }

    /// Request termination. Kills the attached process tree, if any.
    pub fn cancel(&self) {
        self.inner.requested.send_replace(true);
        if let Some(pid) = self.pid() {
            if kill_process_tree(pid) {
                log::info!("Cancelled scanner process {}", pid);
            } else {
                log::debug!("Scanner process {} already gone on cancel", pid);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.requested.borrow()
    }

    /// Pid of the running scanner process
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid.lock().ok().and_then(|pid| *pid)
    }

    pub(crate) fn attach(&self, pid: u32) {
        if let Ok(mut slot) = self.inner.pid.lock() {
            *slot = Some(pid);
        }
    }

    pub(crate) fn detach(&self) {
        if let Ok(mut slot) = self.inner.pid.lock() {
            *slot = None;
        }
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.inner.requested.subscribe();
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

/// Terminate a process and everything it spawned.
///
/// The scanner runs under a shell, so killing only the shell pid would leave
/// the scanner holding the output pipes. Descendants are collected before
/// anything is killed since they get reparented once their parent dies.
/// Returns false if the root process no longer exists.
pub fn kill_process_tree(pid: u32) -> bool {
    let root = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    if system.process(root).is_none() {
        return false;
    }

    let mut tree = vec![root];
    let mut cursor = 0;
    while cursor < tree.len() {
        let parent = tree[cursor];
        tree.extend(
            system
                .processes()
                .iter()
                .filter(|(_, process)| process.parent() == Some(parent))
                .map(|(child, _)| *child),
        );
        cursor += 1;
    }

    // Leaves first
    for pid in tree.iter().rev() {
        if let Some(process) = system.process(*pid) {
            process.kill();
        }
    }
    true
}

/// Runs commands through `sh -c` or `cmd /C`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    platform: Platform,
}

impl ShellRunner {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    fn shell_command(&self, command: &str) -> Command {
        match self.platform {
            Platform::Posix => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
            Platform::Windows => {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(command);
                cmd
            }
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

impl ProcessRunner for ShellRunner {
    async fn execute(
        &self,
        command: &str,
        options: &ExecOptions,
        cancel: &CancelHandle,
    ) -> Result<ProcessOutput, ExecutionError> {
        log::debug!("Executing: {}", command);

        let mut cmd = self.shell_command(command);
        cmd.envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(ExecutionError::Spawn)?;
        if let Some(pid) = child.id() {
            cancel.attach(pid);
        }

        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(collect_stream(
                stdout,
                options.max_buffer_bytes,
                options.output.clone(),
                OutputChunk::Stdout,
            ))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(collect_stream(
                stderr,
                options.max_buffer_bytes,
                options.output.clone(),
                OutputChunk::Stderr,
            ))
        });

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                if let Some(pid) = child.id() {
                    kill_process_tree(pid);
                }
                let _ = child.start_kill();
                child.wait().await
            }
        };
        cancel.detach();

        let (stdout, stdout_truncated) = join_stream(stdout_task).await;
        let (stderr, stderr_truncated) = join_stream(stderr_task).await;

        let exit_code = status.as_ref().ok().and_then(|s| s.code());
        let output = ProcessOutput {
            stdout,
            stderr,
            exit_code,
            truncated: stdout_truncated || stderr_truncated,
        };

        if output.truncated {
            log::warn!(
                "Scanner output exceeded {} bytes and was truncated",
                options.max_buffer_bytes
            );
        }

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled { partial: output });
        }

        match status {
            Ok(status) if status.success() => Ok(output),
            Ok(status) => Err(ExecutionError::NonZeroExit {
                exit_code: status.code(),
                partial: output,
            }),
            Err(e) => {
                log::warn!("Failed waiting for scanner process: {}", e);
                Err(ExecutionError::NonZeroExit {
                    exit_code: None,
                    partial: output,
                })
            }
        }
    }
}

async fn join_stream(task: Option<tokio::task::JoinHandle<(String, bool)>>) -> (String, bool) {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => (String::new(), false),
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes
async fn collect_stream<R>(
    mut reader: R,
    limit: usize,
    output: Option<mpsc::UnboundedSender<OutputChunk>>,
    wrap: fn(String) -> OutputChunk,
) -> (String, bool)
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::debug!("Stopped reading scanner stream: {}", e);
                break;
            }
        };

        if let Some(ref tx) = output {
            let _ = tx.send(wrap(String::from_utf8_lossy(&chunk[..n]).into_owned()));
        }

        let room = limit.saturating_sub(kept.len());
        if room >= n {
            kept.extend_from_slice(&chunk[..n]);
        } else {
            kept.extend_from_slice(&chunk[..room]);
            truncated = true;
        }
    }

    (String::from_utf8_lossy(&kept).into_owned(), truncated)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let runner = ShellRunner::new(Platform::Posix);
        let output = runner
            .execute("printf out; printf err >&2", &ExecOptions::default(), &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        assert_eq!(output.exit_code, Some(0));
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_partial_output() {
        let runner = ShellRunner::new(Platform::Posix);
        let err = runner
            .execute("printf partial; exit 3", &ExecOptions::default(), &CancelHandle::new())
            .await
            .unwrap_err();
        match err {
            ExecutionError::NonZeroExit { exit_code, partial } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(partial.stdout, "partial");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_buffer_ceiling_truncates() {
        let runner = ShellRunner::new(Platform::Posix);
        let options = ExecOptions {
            max_buffer_bytes: 4,
            ..ExecOptions::default()
        };
        let output = runner
            .execute("printf 0123456789", &options, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, "0123");
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn test_env_overrides_and_streaming() {
        let runner = ShellRunner::new(Platform::Posix);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut options = ExecOptions {
            output: Some(tx),
            ..ExecOptions::default()
        };
        options.env.insert("SCANVAULT_TEST_VAR".to_string(), "hello".to_string());

        let output = runner
            .execute("printf \"$SCANVAULT_TEST_VAR\"", &options, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello");

        let mut streamed = String::new();
        while let Ok(chunk) = rx.try_recv() {
            if let OutputChunk::Stdout(text) = chunk {
                streamed.push_str(&text);
            }
        }
        assert_eq!(streamed, "hello");
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_output() {
        let runner = ShellRunner::new(Platform::Posix);
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let err = runner
            .execute("echo started; sleep 30", &ExecOptions::default(), &cancel)
            .await
            .unwrap_err();
        match err {
            ExecutionError::Cancelled { partial } => assert!(partial.stdout.contains("started")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(cancel.pid().is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_reports_exit_127() {
        let runner = ShellRunner::new(Platform::Posix);
        // The shell reports a missing binary with exit code 127
        let err = runner
            .execute("/nonexistent/scanner-binary", &ExecOptions::default(), &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NonZeroExit { exit_code: Some(127), .. }));
    }
}
