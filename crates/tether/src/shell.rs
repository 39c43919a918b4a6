//! Shell collaborator interface and output hand-off
//!
//! The channel does not execute commands itself. An agent plugs in a
//! [`CommandShell`] implementation and moves its output lines into an
//! [`OutputQueue`] that the channel drains and sends.

use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

/// Local command interpreter driven by the agent
#[async_trait]
pub trait CommandShell: Send {
    /// Start the interpreter
    async fn start(&mut self) -> Result<()>;

    /// Hand one command line to the interpreter
    async fn run(&mut self, command: &str) -> Result<()>;

    /// Next line of output, or `None` once the interpreter has nothing more
    async fn next_output_line(&mut self) -> Option<String>;

    /// Stop the interpreter
    async fn terminate(&mut self) -> Result<()>;
}

/// Create a connected sink and queue
pub fn output_queue() -> (OutputSink, OutputQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutputSink { tx }, OutputQueue { rx })
}

/// Producer half, cloneable across tasks
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<String>,
}

impl OutputSink {
    /// Append a line; returns `false` if the queue has been dropped
    pub fn push(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).is_ok()
    }

    /// Move every line `shell` produces into the queue
    ///
    /// Returns the number of lines forwarded.
    pub async fn forward_from<S>(&self, shell: &mut S) -> usize
    where
        S: CommandShell + ?Sized,
    {
        let mut forwarded = 0;
        while let Some(line) = shell.next_output_line().await {
            if !self.push(line) {
                debug!("Output queue dropped, stopping forward");
                break;
            }
            forwarded += 1;
        }
        forwarded
    }
}

/// Consumer half, FIFO
#[derive(Debug)]
pub struct OutputQueue {
    rx: mpsc::UnboundedReceiver<String>,
}

impl OutputQueue {
    /// Wait for the next line; `None` once every sink is dropped and the queue is empty
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take every line currently buffered, leaving the queue empty
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(line) => lines.push(line),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        lines
    }

    /// Take every buffered line as one string, each line ending in `\n`
    pub fn drain_text(&mut self) -> String {
        self.drain()
            .into_iter()
            .map(|line| line + "\n")
            .collect()
    }
}
