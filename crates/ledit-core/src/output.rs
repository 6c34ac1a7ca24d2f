// SPDX-License-Identifier: Apache-2.0
//! Asynchronous user-visible output with a hard ordering guarantee.
//!
//! The buffer is a bounded FIFO: when the consumer falls behind, the sender
//! *blocks* rather than dropping or reordering lines.  Parallel sub-agents
//! all write through one buffer, so their interleaved output stays readable
//! and nothing is lost under load.

use tokio::sync::mpsc;

/// Sender half; cheap to clone into sub-agents and tool callbacks.
#[derive(Debug, Clone)]
pub struct AsyncOutputBuffer {
    tx: mpsc::Sender<String>,
}

/// Consumer half; drain from exactly one task.
#[derive(Debug)]
pub struct OutputDrain {
    rx: mpsc::Receiver<String>,
}

impl AsyncOutputBuffer {
    /// Create a buffer with the given capacity (number of queued lines).
    pub fn new(capacity: usize) -> (Self, OutputDrain) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, OutputDrain { rx })
    }

    /// Queue one line.  Blocks (asynchronously) when the buffer is full —
    /// backpressure, never drops.
    pub async fn print_line(&self, line: impl Into<String>) {
        // The receiver being gone means shutdown; nothing useful to do.
        let _ = self.tx.send(line.into()).await;
    }
}

impl OutputDrain {
    /// Receive the next line; `None` after all senders are dropped.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Spawn a task that writes every line to stdout until shutdown.
    pub fn spawn_stdout_printer(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(line) = self.rx.recv().await {
                println!("{line}");
            }
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
