//! Long-lived interpreter process with crash and timeout recovery
//!
//! One interpreter (in a container or on the host) serves every execution so
//! that variables and imports persist between calls. A background task
//! drains its output into a bounded queue of protocol messages.

use std::{
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::codec::FramedRead;

use super::{
    frame::{StreamDemuxer, StreamKind},
    protocol::{ExecuteRequest, SandboxMessage, BOOTSTRAP},
    CodeExecutor, ExecutionOutput, SandboxError,
};
use crate::config::{SandboxConfig, SandboxRuntime};

const KILL_GRACE: Duration = Duration::from_secs(2);

enum RunFailure {
    Timeout,
    Crashed(String),
    Protocol(String),
}

struct SandboxProcess {
    child: Child,
    stdin: ChildStdin,
    replies: mpsc::Receiver<SandboxMessage>,
    reader: JoinHandle<()>,
    stderr_drain: Option<JoinHandle<()>>,
    /// (program, name) of the container to remove on shutdown
    container: Option<(String, String)>,
}

fn build_command(config: &SandboxConfig) -> (Command, Option<(String, String)>) {
    match config.runtime {
        SandboxRuntime::Container => {
            let name = format!("strata-sandbox-{}", uuid::Uuid::new_v4().simple());
            let mut command = Command::new(&config.program);
            command
                .arg("run")
                .arg("-i")
                .arg("--rm")
                .args(["--name", &name])
                .args(["--network", "none"])
                .args(["--memory", &config.memory_limit])
                .args(["--pids-limit", "256"])
                .args(["-e", "MPLBACKEND=Agg"])
                .arg(&config.image)
                .arg(&config.python)
                .args(["-u", "-c", BOOTSTRAP]);
            (command, Some((config.program.clone(), name)))
        }
        SandboxRuntime::Local => {
            let mut command = Command::new(&config.python);
            command.args(["-u", "-c", BOOTSTRAP]).env("MPLBACKEND", "Agg");
            (command, None)
        }
    }
}

/// Read protocol messages out of the sandbox's stdout into `replies`
async fn pump_replies<R>(output: R, replies: mpsc::Sender<SandboxMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(output, StreamDemuxer::detect());
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = frames.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("[SANDBOX] Output stream error: {}", e);
                break;
            }
        };
        if chunk.stream == StreamKind::Stderr {
            tracing::debug!(
                "[SANDBOX] stderr: {}",
                String::from_utf8_lossy(&chunk.data).trim_end()
            );
            continue;
        }

        pending.extend_from_slice(&chunk.data);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if line.trim().is_empty() {
                continue;
            }
            match SandboxMessage::parse(&line) {
                Some(message) => {
                    if replies.send(message).await.is_err() {
                        return;
                    }
                }
                None => tracing::debug!("[SANDBOX] Ignoring non-protocol output: {}", line.trim()),
            }
        }
    }
    tracing::debug!("[SANDBOX] Output stream closed");
}

impl SandboxProcess {
    /// Start the interpreter and wait for its ready message until `deadline`.
    /// `budget` is the caller's timeout, reported if the deadline passes.
    async fn spawn(
        config: &SandboxConfig,
        deadline: Instant,
        budget: Duration,
    ) -> Result<Self, SandboxError> {
        let (mut command, container) = build_command(config);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(SandboxError::Spawn)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(SandboxError::Protocol("sandbox pipes not captured".to_string()));
        };

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let reader = tokio::spawn(pump_replies(stdout, tx));
        let stderr_drain = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("[SANDBOX] stderr: {}", line);
                }
            })
        });

        let mut process = Self {
            child,
            stdin,
            replies: rx,
            reader,
            stderr_drain,
            container,
        };

        if let Err(err) = process.wait_ready(deadline, budget).await {
            process.shutdown().await;
            return Err(err);
        }
        tracing::info!(runtime = ?config.runtime, "[SANDBOX] Sandbox process ready");
        Ok(process)
    }

    async fn wait_ready(&mut self, deadline: Instant, budget: Duration) -> Result<(), SandboxError> {
        loop {
            match tokio::time::timeout_at(deadline, self.replies.recv()).await {
                Err(_) => return Err(SandboxError::Timeout(budget)),
                Ok(None) => return Err(SandboxError::Crashed(self.exit_description())),
                Ok(Some(SandboxMessage::Ready)) => return Ok(()),
                Ok(Some(other)) => {
                    tracing::debug!("[SANDBOX] Unexpected message before ready: {:?}", other)
                }
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None)) && !self.reader.is_finished()
    }

    fn exit_description(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => format!("process exited with {}", status),
            _ => "output stream closed".to_string(),
        }
    }

    async fn run(&mut self, id: u64, code: &str, deadline: Instant) -> Result<ExecutionOutput, RunFailure> {
        let line = ExecuteRequest { id, code }
            .to_line()
            .map_err(|e| RunFailure::Protocol(e.to_string()))?;

        let started = Instant::now();
        let write = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await
        };
        match tokio::time::timeout_at(deadline, write).await {
            Err(_) => return Err(RunFailure::Timeout),
            Ok(Err(e)) => return Err(RunFailure::Crashed(format!("write failed: {}", e))),
            Ok(Ok(())) => {}
        }

        loop {
            match tokio::time::timeout_at(deadline, self.replies.recv()).await {
                Err(_) => return Err(RunFailure::Timeout),
                Ok(None) => return Err(RunFailure::Crashed(self.exit_description())),
                Ok(Some(SandboxMessage::Ready)) => continue,
                Ok(Some(SandboxMessage::Error { message })) => {
                    return Err(RunFailure::Protocol(message))
                }
                Ok(Some(SandboxMessage::Result {
                    id: reply_id,
                    stdout,
                    stderr,
                    error,
                    artifacts,
                    ..
                })) => {
                    if reply_id != Some(id) {
                        tracing::debug!(?reply_id, expected = id, "[SANDBOX] Skipping stale result");
                        continue;
                    }
                    return Ok(ExecutionOutput {
                        stdout,
                        stderr,
                        error,
                        artifacts: artifacts.iter().filter_map(|a| a.decode()).collect(),
                        elapsed: started.elapsed(),
                        degraded: false,
                    });
                }
            }
        }
    }

    async fn shutdown(self) {
        let SandboxProcess {
            mut child,
            stdin,
            reader,
            stderr_drain,
            container,
            ..
        } = self;

        drop(stdin);
        let _ = child.start_kill();
        let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
        reader.abort();
        if let Some(drain) = stderr_drain {
            drain.abort();
        }

        // Killing the CLI client does not always stop the container itself
        if let Some((program, name)) = container {
            tokio::spawn(async move {
                let _ = Command::new(program)
                    .args(["rm", "-f", &name])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
            });
        }
    }
}

/// Sandbox keeping one interpreter alive across executions
pub struct PersistentSandbox {
    config: SandboxConfig,
    process: Mutex<Option<SandboxProcess>>,
    next_id: AtomicU64,
}

impl PersistentSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            process: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn program(&self) -> &str {
        match self.config.runtime {
            SandboxRuntime::Container => &self.config.program,
            SandboxRuntime::Local => &self.config.python,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create, execute, destroy. Used when the persistent process cannot be
    /// (re)started.
    async fn run_ephemeral(
        &self,
        code: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<ExecutionOutput, SandboxError> {
        tracing::warn!("[SANDBOX] Falling back to a one-off sandbox process");
        let mut process = SandboxProcess::spawn(&self.config, deadline, timeout).await?;
        let outcome = process.run(self.next_id(), code, deadline).await;
        process.shutdown().await;

        match outcome {
            Ok(mut output) => {
                output.degraded = true;
                Ok(output)
            }
            Err(RunFailure::Timeout) => Err(SandboxError::Timeout(timeout)),
            Err(RunFailure::Crashed(reason)) => Err(SandboxError::Crashed(reason)),
            Err(RunFailure::Protocol(message)) => Err(SandboxError::Protocol(message)),
        }
    }
}

#[async_trait]
impl CodeExecutor for PersistentSandbox {
    async fn is_available(&self) -> bool {
        self.config.enabled && which::which(self.program()).is_ok()
    }

    /// Stop the interpreter. The next execution starts a fresh one.
    async fn shutdown(&self) {
        if let Some(process) = self.process.lock().await.take() {
            process.shutdown().await;
            tracing::info!("[SANDBOX] Sandbox process stopped");
        }
    }

    async fn execute(&self, code: &str, timeout: Duration) -> Result<ExecutionOutput, SandboxError> {
        if !self.config.enabled {
            return Err(SandboxError::Unavailable("sandbox disabled".to_string()));
        }

        // Every wait below, including startup and restarts, shares this deadline
        let deadline = Instant::now() + timeout;
        let Ok(mut slot) = tokio::time::timeout_at(deadline, self.process.lock()).await else {
            return Err(SandboxError::Timeout(timeout));
        };

        if let Some(process) = slot.as_mut() {
            if !process.is_alive() {
                tracing::warn!("[SANDBOX] Sandbox process died while idle, restarting");
                if let Some(dead) = slot.take() {
                    dead.shutdown().await;
                }
            }
        }

        if slot.is_none() {
            match SandboxProcess::spawn(&self.config, deadline, timeout).await {
                Ok(process) => *slot = Some(process),
                Err(err @ SandboxError::Timeout(_)) => {
                    tracing::warn!(?timeout, "[SANDBOX] Sandbox did not start in time");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!("[SANDBOX] Could not start persistent sandbox: {}", err);
                    drop(slot);
                    return self.run_ephemeral(code, deadline, timeout).await;
                }
            }
        }

        let Some(process) = slot.as_mut() else {
            return Err(SandboxError::Crashed("sandbox process missing".to_string()));
        };

        match process.run(self.next_id(), code, deadline).await {
            Ok(output) => Ok(output),
            Err(RunFailure::Timeout) => {
                tracing::warn!(?timeout, "[SANDBOX] Execution timed out, killing sandbox process");
                // Restarted lazily by the next execution
                if let Some(stuck) = slot.take() {
                    stuck.shutdown().await;
                }
                Err(SandboxError::Timeout(timeout))
            }
            Err(RunFailure::Protocol(message)) => Err(SandboxError::Protocol(message)),
            Err(RunFailure::Crashed(reason)) => {
                tracing::warn!("[SANDBOX] Sandbox process crashed ({}), restarting once", reason);
                if let Some(dead) = slot.take() {
                    dead.shutdown().await;
                }

                let mut fresh = match SandboxProcess::spawn(&self.config, deadline, timeout).await {
                    Ok(fresh) => fresh,
                    Err(err @ SandboxError::Timeout(_)) => return Err(err),
                    Err(err) => {
                        tracing::warn!("[SANDBOX] Restart failed: {}", err);
                        drop(slot);
                        return self.run_ephemeral(code, deadline, timeout).await;
                    }
                };

                match fresh.run(self.next_id(), code, deadline).await {
                    Ok(output) => {
                        *slot = Some(fresh);
                        Ok(output)
                    }
                    Err(RunFailure::Timeout) => {
                        fresh.shutdown().await;
                        Err(SandboxError::Timeout(timeout))
                    }
                    Err(RunFailure::Protocol(message)) => {
                        *slot = Some(fresh);
                        Err(SandboxError::Protocol(message))
                    }
                    Err(RunFailure::Crashed(reason)) => {
                        tracing::warn!("[SANDBOX] Restarted sandbox crashed again ({})", reason);
                        fresh.shutdown().await;
                        drop(slot);
                        self.run_ephemeral(code, deadline, timeout).await
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_pump_reassembles_lines_across_frames() {
        let mut bytes = frame(1, br#"{"type":"rea"#);
        bytes.extend(frame(2, b"some warning\n"));
        bytes.extend(frame(1, b"dy\"}\nnot json\n{\"type\":\"result\",\"id\":1,\"stdout\":\"hi\\n\"}\n"));

        let (tx, mut rx) = mpsc::channel(4);
        pump_replies(&bytes[..], tx).await;

        assert_eq!(rx.recv().await, Some(SandboxMessage::Ready));
        match rx.recv().await {
            Some(SandboxMessage::Result { id, stdout, .. }) => {
                assert_eq!(id, Some(1));
                assert_eq!(stdout, "hi\n");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pump_reads_plain_output() {
        let bytes = b"{\"type\":\"ready\"}\n".to_vec();
        let (tx, mut rx) = mpsc::channel(4);
        pump_replies(&bytes[..], tx).await;
        assert_eq!(rx.recv().await, Some(SandboxMessage::Ready));
    }

    #[test]
    fn test_container_command_isolates_network() {
        let (command, container) = build_command(&SandboxConfig::default());
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(command.as_std().get_program(), "docker");
        assert!(args.windows(2).any(|w| w == ["--network", "none"]));
        assert!(args.windows(2).any(|w| w == ["--memory", "512m"]));
        assert!(args.contains(&"python:3.11-slim".to_string()));
        assert!(container.unwrap().1.starts_with("strata-sandbox-"));
    }

    #[tokio::test]
    async fn test_disabled_sandbox_refuses_work() {
        let sandbox = PersistentSandbox::new(SandboxConfig {
            enabled: false,
            ..SandboxConfig::local("python3")
        });
        assert!(!sandbox.is_available().await);
        assert!(matches!(
            sandbox.execute("print(1)", Duration::from_secs(1)).await,
            Err(SandboxError::Unavailable(_))
        ));
    }
}
