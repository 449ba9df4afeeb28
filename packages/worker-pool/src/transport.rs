//! ============================================================================
//! File: packages/worker-pool/src/transport.rs
//! ----------------------------------------------------------------------------
//! Abstracts "one OS-isolated worker" behind a small capability set: send a
//! line, receive a line, kill. The pool never learns what language or binary
//! the worker runs — only that it speaks the protocol over this trait.
//! ============================================================================

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, Command};

use crate::error::{Result, WorkerPoolError};

/// The host side of one worker's message channel. Implementations own the
/// process or thread backing the worker and must make `kill` idempotent.
#[async_trait]
pub trait WorkerTransport: Send {
    /// Sends one newline-delimited JSON line to the worker.
    async fn send_line(&mut self, line: &[u8]) -> Result<()>;

    /// Reads the next newline-delimited JSON line from the worker, or `None`
    /// on a clean EOF (the worker exited).
    async fn recv_line(&mut self) -> Result<Option<Vec<u8>>>;

    /// Sends a termination signal (e.g. SIGTERM) without waiting.
    async fn request_exit(&mut self);

    /// Unconditionally and idempotently ends the worker (e.g. SIGKILL).
    async fn force_kill(&mut self);

    /// Best-effort liveness probe used by the graceful-shutdown wait loop.
    async fn has_exited(&mut self) -> bool;
}

/// Spawns the configured worker-entry command with piped stdio and frames
/// messages as newline-delimited JSON.
pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<tokio::process::ChildStdout>>,
}

impl ProcessTransport {
    pub async fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerPoolError::WorkerCrashed {
                detail: format!("failed to spawn worker process: {e}"),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| WorkerPoolError::WorkerCrashed {
            detail: "worker process has no stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| WorkerPoolError::WorkerCrashed {
            detail: "worker process has no stdout".into(),
        })?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

#[async_trait]
impl WorkerTransport for ProcessTransport {
    async fn send_line(&mut self, line: &[u8]) -> Result<()> {
        self.stdin
            .write_all(line)
            .await
            .map_err(|e| WorkerPoolError::WorkerCrashed {
                detail: format!("failed to write to worker stdin: {e}"),
            })?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| WorkerPoolError::WorkerCrashed {
                detail: format!("failed to write newline to worker stdin: {e}"),
            })
    }

    async fn recv_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self.stdout.next_line().await {
            Ok(Some(line)) => Ok(Some(line.into_bytes())),
            Ok(None) => Ok(None),
            Err(e) => Err(WorkerPoolError::WorkerCrashed {
                detail: format!("failed to read worker stdout: {e}"),
            }),
        }
    }

    async fn request_exit(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: sending SIGTERM to a child we spawned and still own.
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }

    async fn force_kill(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }

    async fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

/// An in-process, deterministic stand-in for [`ProcessTransport`] used to
/// unit-test the slot and pool without spawning real OS processes.
#[cfg(any(test, feature = "testing"))]
pub mod mock {
    use std::collections::VecDeque;

    use tokio::sync::mpsc;

    use super::*;

    /// A [`WorkerTransport`] driven entirely by in-memory queues. Tests feed
    /// worker responses via `inbound` and observe host sends via `outbound`.
    pub struct MockTransport {
        pub inbound: mpsc::UnboundedReceiver<Vec<u8>>,
        pub outbound: mpsc::UnboundedSender<Vec<u8>>,
        exited: bool,
        pending: VecDeque<Vec<u8>>,
    }

    impl MockTransport {
        pub fn new() -> (Self, MockHandle) {
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            (
                Self {
                    inbound: in_rx,
                    outbound: out_tx,
                    exited: false,
                    pending: VecDeque::new(),
                },
                MockHandle {
                    to_worker: in_tx,
                    from_worker: out_rx,
                },
            )
        }
    }

    /// The test-side handle: push messages the worker "sends", observe what
    /// the host "sent" to the worker.
    pub struct MockHandle {
        pub to_worker: mpsc::UnboundedSender<Vec<u8>>,
        pub from_worker: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    #[async_trait]
    impl WorkerTransport for MockTransport {
        async fn send_line(&mut self, line: &[u8]) -> Result<()> {
            self.outbound
                .send(line.to_vec())
                .map_err(|_| WorkerPoolError::WorkerCrashed {
                    detail: "mock worker disconnected".into(),
                })
        }

        async fn recv_line(&mut self) -> Result<Option<Vec<u8>>> {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            match self.inbound.recv().await {
                Some(line) => Ok(Some(line)),
                None => Ok(None),
            }
        }

        async fn request_exit(&mut self) {
            self.exited = true;
        }

        async fn force_kill(&mut self) {
            self.exited = true;
        }

        async fn has_exited(&mut self) -> bool {
            self.exited
        }
    }
}
