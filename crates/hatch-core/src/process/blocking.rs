//! Blocking process handle on top of `std::process`.
//!
//! The fallback backend for callers outside a tokio runtime. Pipes are
//! pumped by plain reader threads into `std::sync::mpsc` queues; exit is
//! observed with `try_wait`. Unlike the reactor backend, `stop` here blocks
//! until the child is confirmed gone.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;

use hatch_types::{ExitSummary, SpawnError};

use super::{deliver_signal, summarize, ProcessHandle};
use crate::task::CommandSpec;

/// `std::process`-backed handle.
pub struct BlockingProcess {
    spec: CommandSpec,
    child: Option<Child>,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout_rx: Option<mpsc::Receiver<Vec<u8>>>,
    stderr_rx: Option<mpsc::Receiver<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
    exit: Option<ExitSummary>,
}

impl BlockingProcess {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            child: None,
            pid: None,
            stdin: None,
            stdout_rx: None,
            stderr_rx: None,
            readers: Vec::new(),
            exit: None,
        }
    }

    /// Join the reader threads; they finish as soon as the pipes hit EOF.
    fn join_readers(&mut self) {
        for handle in self.readers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[async_trait]
impl ProcessHandle for BlockingProcess {
    async fn start(&mut self) -> Result<(), SpawnError> {
        if self.pid.is_some() {
            return Err(SpawnError::AlreadyStarted);
        }

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
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
        self.pid = Some(child.id());
        tracing::debug!("spawned {} as pid {:?}", self.spec.describe(), self.pid);

        if let Some(stdout) = child.stdout.take() {
            let (tx, rx) = mpsc::channel();
            self.readers.push(std::thread::spawn(move || read_stream(stdout, tx)));
            self.stdout_rx = Some(rx);
        }
        if let Some(stderr) = child.stderr.take() {
            let (tx, rx) = mpsc::channel();
            self.readers.push(std::thread::spawn(move || read_stream(stderr, tx)));
            self.stderr_rx = Some(rx);
        }
        self.stdin = child.stdin.take();
        self.child = Some(child);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn poll_exit(&mut self) -> Option<ExitSummary> {
        if self.exit.is_some() {
            return self.exit;
        }
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                // Readers drain the remaining pipe contents before the exit
                // becomes visible to callers.
                self.join_readers();
                self.exit = Some(summarize(status));
                self.exit
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("try_wait failed: {}", e);
                None
            }
        }
    }

    fn stop(&mut self, signal: i32) {
        if self.exit.is_some() {
            return;
        }
        let Some(pid) = self.pid else { return };
        deliver_signal(pid, signal);
        // Blocking backend contract: confirmed exit before returning.
        if let Some(child) = self.child.as_mut() {
            match child.wait() {
                Ok(status) => {
                    self.join_readers();
                    self.exit = Some(summarize(status));
                }
                Err(e) => tracing::warn!("wait after stop failed: {}", e),
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
        if let Some(stdin) = &mut self.stdin {
            if stdin.write_all(bytes).and_then(|_| stdin.flush()).is_err() {
                self.stdin = None;
            }
        }
    }

    fn close_stdin(&mut self) {
        self.stdin = None;
    }
}

impl Drop for BlockingProcess {
    fn drop(&mut self) {
        // A still-running child must be reaped or it lingers as a zombie
        if self.exit.is_none() {
            if let Some(child) = self.child.as_mut() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Pull everything currently queued out of a drain channel.
fn drain(rx: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(rx) = rx {
        while let Ok(chunk) = rx.try_recv() {
            out.extend(chunk);
        }
    }
    out
}

/// Read a child stream to EOF, forwarding chunks as they arrive.
fn read_stream(mut stream: impl Read, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}
