//! `codex app-server` as a child process
//!
//! The child is spawned as `<codex_path> app-server [args...]` with piped
//! stdin and stdout. Stderr is piped only when a sink is configured, and is
//! then forwarded to it line by line; otherwise it is inherited.
//!
//! A supervisor task owns the [`Child`] and publishes its exit code on a
//! `watch` channel. The read stream consults that channel after stdout
//! closes; `close` asks the supervisor to kill the child and waits on the
//! same channel. The child is spawned with `kill_on_drop`, so dropping the
//! transport without closing it does not leave a stray process behind.

use super::{MessageStream, Transport};
use async_trait::async_trait;
use codexrpc_core::{Error, LineDecoder, Result, DEFAULT_MAX_BUFFER_SIZE};
use futures::stream;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

/// Callback receiving each line the child writes to stderr
pub type StderrSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Size of a single stdout read
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Exit code reported when the supervisor vanished before publishing one
const UNKNOWN_EXIT_CODE: i32 = -1;

/// `None` while running, then `Some(code)`; `code` is `None` for signals
type ExitState = Option<Option<i32>>;

/// How to launch the child
#[derive(Clone)]
pub struct SubprocessOptions {
    pub codex_path: String,
    /// Extra arguments after `app-server`
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overrides applied on top of the inherited environment
    pub env: HashMap<String, String>,
    pub max_buffer_size: usize,
    pub stderr: Option<StderrSink>,
}

impl Default for SubprocessOptions {
    fn default() -> Self {
        Self {
            codex_path: "codex".to_string(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            stderr: None,
        }
    }
}

impl std::fmt::Debug for SubprocessOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessOptions")
            .field("codex_path", &self.codex_path)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("max_buffer_size", &self.max_buffer_size)
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

struct ProcessHandle {
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<ExitState>,
    stderr_task: Option<JoinHandle<()>>,
}

pub struct SubprocessTransport {
    options: SubprocessOptions,
    ready: AtomicBool,
    stdin: Mutex<Option<ChildStdin>>,
    /// Stdout plus the exit channel, handed to the first `read_messages`
    stdout: std::sync::Mutex<Option<(ChildStdout, watch::Receiver<ExitState>)>>,
    process: Mutex<Option<ProcessHandle>>,
}

impl SubprocessTransport {
    pub fn new(options: SubprocessOptions) -> Self {
        Self {
            options,
            ready: AtomicBool::new(false),
            stdin: Mutex::new(None),
            stdout: std::sync::Mutex::new(None),
            process: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &SubprocessOptions {
        &self.options
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.options.codex_path);
        cmd.arg("app-server")
            .args(&self.options.args)
            .envs(&self.options.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.options.stderr.is_some() {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &self.options.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Connection(format!("Codex CLI not found at: {}", self.options.codex_path))
        } else {
            Error::Connection(format!("Failed to start codex: {}", e))
        }
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    #[tracing::instrument(skip(self), fields(codex_path = %self.options.codex_path))]
    async fn connect(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Ok(());
        }

        tracing::debug!(args = ?self.options.args, "starting app-server");
        let mut child = self.command().spawn().map_err(|e| self.spawn_error(e))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr_task = match (child.stderr.take(), self.options.stderr.clone()) {
            (Some(stderr), Some(sink)) => Some(tokio::spawn(forward_stderr(stderr, sink))),
            _ => None,
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, kill_rx, exit_tx));

        *self.stdin.lock().await = stdin;
        if let (Ok(mut slot), Some(stdout)) = (self.stdout.lock(), stdout) {
            *slot = Some((stdout, exit_rx.clone()));
        }
        *process = Some(ProcessHandle {
            kill_tx: Some(kill_tx),
            exit_rx,
            stderr_task,
        });

        self.ready.store(true, Ordering::SeqCst);
        tracing::debug!("subprocess transport ready");
        Ok(())
    }

    async fn write(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let pipe = match stdin.as_mut() {
            Some(pipe) if self.is_ready() => pipe,
            _ => {
                return Err(Error::Connection(
                    "Transport is not ready for writing".to_string(),
                ))
            }
        };

        tracing::trace!(bytes = line.len(), "writing to app-server stdin");
        pipe.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Connection(format!("Failed to write to codex: {}", e)))?;
        pipe.flush()
            .await
            .map_err(|e| Error::Connection(format!("Failed to write to codex: {}", e)))
    }

    fn read_messages(&self) -> Result<MessageStream> {
        let (stdout, exit_rx) = self
            .stdout
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| Error::Connection("Not connected".to_string()))?;

        let reader = StdoutReader {
            stdout,
            decoder: LineDecoder::new(self.options.max_buffer_size),
            chunk: vec![0; READ_CHUNK_SIZE],
            exit_rx,
            program: self.options.codex_path.clone(),
            finished: false,
        };
        Ok(Box::pin(stream::unfold(reader, |mut reader| async move {
            let item = reader.next().await?;
            Some((item, reader))
        })))
    }

    async fn end_input(&self) {
        if let Some(mut pipe) = self.stdin.lock().await.take() {
            // Already-closed pipes are fine here
            let _ = pipe.shutdown().await;
        }
    }

    async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        tracing::debug!("closing subprocess transport");

        // A writer blocked on a full pipe keeps the lock until the child dies
        let stdin = match self.stdin.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                tracing::debug!("stdin busy, killing app-server before closing it");
                None
            }
        };
        if let Some(mut pipe) = stdin {
            let _ = pipe.shutdown().await;
        }

        let Some(mut process) = self.process.lock().await.take() else {
            return;
        };

        if process.exit_rx.borrow().is_none() {
            if let Some(kill_tx) = process.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
        let _ = process.exit_rx.wait_for(|state| state.is_some()).await;

        if let Some(task) = process.stderr_task.take() {
            task.abort();
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Wait for the child to exit or for a kill request, then publish the code
async fn supervise(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<ExitState>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "kill request failed");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to wait for app-server");
            Some(UNKNOWN_EXIT_CODE)
        }
    };
    tracing::debug!(exit_code = ?code, "app-server exited");
    let _ = exit_tx.send(Some(code));
}

async fn forward_stderr(stderr: ChildStderr, sink: StderrSink) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.is_empty() {
                    sink(&line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "stderr read failed");
                break;
            }
        }
    }
}

struct StdoutReader {
    stdout: ChildStdout,
    decoder: LineDecoder,
    chunk: Vec<u8>,
    exit_rx: watch::Receiver<ExitState>,
    program: String,
    finished: bool,
}

impl StdoutReader {
    async fn next(&mut self) -> Option<Result<serde_json::Value>> {
        if self.finished {
            return None;
        }
        loop {
            match self.decoder.next_message() {
                Ok(Some(value)) => return Some(Ok(value)),
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }

            match self.stdout.read(&mut self.chunk).await {
                Ok(0) => {
                    self.finished = true;
                    return self.exit_error().await.map(Err);
                }
                Ok(n) => self.decoder.push(&self.chunk[..n]),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(Error::Connection(format!(
                        "Failed to read from codex: {}",
                        e
                    ))));
                }
            }
        }
    }

    /// After EOF: a non-zero exit code is an error, zero or a signal is not
    async fn exit_error(&mut self) -> Option<Error> {
        if self.decoder.buffered_len() > 0 {
            tracing::debug!(
                bytes = self.decoder.buffered_len(),
                "discarding unterminated output"
            );
        }

        let code = match self.exit_rx.wait_for(|state| state.is_some()).await {
            Ok(state) => (*state).flatten(),
            Err(_) => Some(UNKNOWN_EXIT_CODE),
        };
        match code {
            Some(code) if code != 0 => Some(Error::process_exit(&self.program, code)),
            _ => None,
        }
    }
}
