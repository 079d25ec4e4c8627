//! Reactor-backed process handle on top of `tokio::process`.
//!
//! ```text
//!   ┌────────────┐  unbounded mpsc   ┌──────────────┐
//!   │ stdout task│ ────────────────▶ │ drain_stdout │
//!   │ stderr task│ ────────────────▶ │ drain_stderr │
//!   │ stdin task │ ◀──────────────── │ write_stdin  │
//!   │ waiter task│ ──▶ exit slot ──▶ │ poll_exit    │
//!   └────────────┘                   └──────────────┘
//! ```
//!
//! The waiter task reaps the child and then joins both reader tasks before
//! publishing the exit summary, so every captured byte is already in the
//! drain queues when `poll_exit` first reports.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use hatch_types::{ExitSummary, SpawnError};

use super::{deliver_signal, summarize, ProcessHandle};
use crate::task::CommandSpec;

/// Commands accepted by the stdin pump task.
enum StdinCmd {
    Write(Vec<u8>),
    Close,
}

/// Tokio-backed process handle.
pub struct ReactorProcess {
    spec: CommandSpec,
    pid: Option<u32>,
    stdout_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    stderr_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    stdin_tx: Option<mpsc::UnboundedSender<StdinCmd>>,
    exit: Arc<Mutex<Option<ExitSummary>>>,
    exit_seen: Option<ExitSummary>,
}

impl ReactorProcess {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            pid: None,
            stdout_rx: None,
            stderr_rx: None,
            stdin_tx: None,
            exit: Arc::new(Mutex::new(None)),
            exit_seen: None,
        }
    }
}

#[async_trait]
impl ProcessHandle for ReactorProcess {
    async fn start(&mut self) -> Result<(), SpawnError> {
        if self.pid.is_some() {
            return Err(SpawnError::AlreadyStarted);
        }

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.spec.clear_env {
            cmd.env_clear();
        }
        for (key, value) in &self.spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::Spawn(self.spec.program.clone(), e.to_string()))?;
        self.pid = child.id();
        tracing::debug!("spawned {} as pid {:?}", self.spec.describe(), self.pid);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let out_task = tokio::spawn(async move {
            if let Some(stream) = stdout {
                read_stream(stream, out_tx).await;
            }
        });
        let err_task = tokio::spawn(async move {
            if let Some(stream) = stderr {
                read_stream(stream, err_tx).await;
            }
        });
        if let Some(stdin) = stdin {
            tokio::spawn(pump_stdin(stdin, in_rx));
        }

        let exit = self.exit.clone();
        tokio::spawn(wait_child(child, out_task, err_task, exit));

        self.stdout_rx = Some(out_rx);
        self.stderr_rx = Some(err_rx);
        self.stdin_tx = Some(in_tx);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn poll_exit(&mut self) -> Option<ExitSummary> {
        if self.exit_seen.is_none() {
            self.exit_seen = *self.exit.lock().unwrap_or_else(|e| e.into_inner());
        }
        self.exit_seen
    }

    fn stop(&mut self, signal: i32) {
        if let Some(pid) = self.pid {
            if self.exit_seen.is_none() {
                deliver_signal(pid, signal);
            }
        }
    }

    fn drain_stdout(&mut self) -> Vec<u8> {
        drain(&mut self.stdout_rx)
    }

    fn drain_stderr(&mut self) -> Vec<u8> {
        drain(&mut self.stderr_rx)
    }

    fn write_stdin(&mut self, bytes: &[u8]) {
        if let Some(tx) = &self.stdin_tx {
            let _ = tx.send(StdinCmd::Write(bytes.to_vec()));
        }
    }

    fn close_stdin(&mut self) {
        if let Some(tx) = self.stdin_tx.take() {
            let _ = tx.send(StdinCmd::Close);
        }
    }
}

/// Pull everything currently queued out of a drain channel.
fn drain(rx: &mut Option<mpsc::UnboundedReceiver<Vec<u8>>>) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(rx) = rx {
        while let Ok(chunk) = rx.try_recv() {
            out.extend(chunk);
        }
    }
    out
}

/// Read a child stream to EOF, forwarding chunks as they arrive.
async fn read_stream(
    mut stream: impl tokio::io::AsyncRead + Unpin,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Forward queued writes into the child's stdin; dropping the pipe on exit
/// delivers EOF.
async fn pump_stdin(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<StdinCmd>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StdinCmd::Write(bytes) => {
                if stdin.write_all(&bytes).await.is_err() {
                    break;
                }
                let _ = stdin.flush().await;
            }
            StdinCmd::Close => break,
        }
    }
}

/// Reap the child, then join the readers so the exit summary is published
/// only after every captured byte is in the drain queues.
async fn wait_child(
    mut child: Child,
    out_task: tokio::task::JoinHandle<()>,
    err_task: tokio::task::JoinHandle<()>,
    exit: Arc<Mutex<Option<ExitSummary>>>,
) {
    let summary = match child.wait().await {
        Ok(status) => summarize(status),
        Err(e) => {
            tracing::warn!("wait on child failed: {}", e);
            ExitSummary::exited(-1)
        }
    };
    let _ = out_task.await;
    let _ = err_task.await;
    *exit.lock().unwrap_or_else(|e| e.into_inner()) = Some(summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn run_to_exit(handle: &mut ReactorProcess) -> ExitSummary {
        for _ in 0..500 {
            if let Some(exit) = handle.poll_exit() {
                return exit;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process did not exit in time");
    }

    #[tokio::test]
    async fn test_capture_stdout() {
        let mut handle = ReactorProcess::new(CommandSpec::new("/bin/echo").arg("hello"));
        handle.start().await.unwrap();

        let exit = run_to_exit(&mut handle).await;
        assert!(exit.success());
        let out = String::from_utf8(handle.drain_stdout()).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_capture_stderr() {
        let mut handle = ReactorProcess::new(
            CommandSpec::new("/bin/sh").arg("-c").arg("echo oops >&2; exit 3"),
        );
        handle.start().await.unwrap();

        let exit = run_to_exit(&mut handle).await;
        assert_eq!(exit.code, Some(3));
        let err = String::from_utf8(handle.drain_stderr()).unwrap();
        assert_eq!(err.trim(), "oops");
    }

    #[tokio::test]
    async fn test_stdin_round_trip() {
        let mut handle = ReactorProcess::new(CommandSpec::new("/bin/cat"));
        handle.start().await.unwrap();

        handle.write_stdin(b"ping\n");
        handle.close_stdin();

        let exit = run_to_exit(&mut handle).await;
        assert!(exit.success());
        let out = String::from_utf8(handle.drain_stdout()).unwrap();
        assert_eq!(out, "ping\n");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut handle = ReactorProcess::new(CommandSpec::new("/nonexistent/binary"));
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, SpawnError::Spawn(_, _)));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut handle = ReactorProcess::new(CommandSpec::new("/bin/echo"));
        handle.start().await.unwrap();
        assert_eq!(handle.start().await.unwrap_err(), SpawnError::AlreadyStarted);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_delivers_signal() {
        let mut handle = ReactorProcess::new(CommandSpec::new("/bin/sleep").arg("30"));
        handle.start().await.unwrap();
        assert!(handle.is_running());

        handle.stop(super::super::STOP_SIGNAL);
        let exit = run_to_exit(&mut handle).await;
        assert_eq!(exit.signal, Some(9));
    }
}
