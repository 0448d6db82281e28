//! Build progress relay and console display
//!
//! The engine emits [`StatusResponse`] batches. [`ProgressRelay`] republishes each one as a
//! display-oriented [`SolveStatus`] with at most one batch in flight, and a
//! [`ProgressDisplay`] renders the result.

use crate::engine::{StatusResponse, VertexLogRecord, VertexRecord, VertexStatusRecord};
use crate::error::{Error, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStatus {
    pub vertexes: Vec<Vertex>,
    pub statuses: Vec<VertexStatus>,
    pub logs: Vec<VertexLog>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub digest: String,
    pub inputs: Vec<String>,
    pub name: String,
    pub started: Option<SystemTime>,
    pub completed: Option<SystemTime>,
    pub error: Option<String>,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexStatus {
    pub id: String,
    pub vertex: String,
    pub name: String,
    pub total: i64,
    pub current: i64,
    pub timestamp: Option<SystemTime>,
    pub started: Option<SystemTime>,
    pub completed: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
    Other(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexLog {
    pub vertex: String,
    pub stream: LogStream,
    pub data: Vec<u8>,
    pub timestamp: Option<SystemTime>,
}

impl From<VertexRecord> for Vertex {
    fn from(v: VertexRecord) -> Self {
        Self {
            digest: v.digest,
            inputs: v.inputs,
            name: v.name,
            started: v.started,
            completed: v.completed,
            error: Some(v.error).filter(|e| !e.is_empty()),
            cached: v.cached,
        }
    }
}

impl From<VertexStatusRecord> for VertexStatus {
    fn from(s: VertexStatusRecord) -> Self {
        Self {
            id: s.id,
            vertex: s.vertex,
            name: s.name,
            total: s.total,
            current: s.current,
            timestamp: s.timestamp,
            started: s.started,
            completed: s.completed,
        }
    }
}

impl From<VertexLogRecord> for VertexLog {
    fn from(l: VertexLogRecord) -> Self {
        let stream = match l.stream {
            1 => LogStream::Stdout,
            2 => LogStream::Stderr,
            other => LogStream::Other(other),
        };
        Self {
            vertex: l.vertex,
            stream,
            data: l.msg,
            timestamp: l.timestamp,
        }
    }
}

impl From<StatusResponse> for SolveStatus {
    fn from(resp: StatusResponse) -> Self {
        Self {
            vertexes: resp.vertexes.into_iter().map(Vertex::from).collect(),
            statuses: resp.statuses.into_iter().map(VertexStatus::from).collect(),
            logs: resp.logs.into_iter().map(VertexLog::from).collect(),
        }
    }
}

/// Translation stage between the engine's status channel and a display
pub struct ProgressRelay;

impl ProgressRelay {
    /// Forward every batch from `input` to `output` until `input` closes.
    ///
    /// `output` is dropped on return, which closes the display's stream.
    pub async fn run(
        mut input: mpsc::Receiver<StatusResponse>,
        output: mpsc::Sender<SolveStatus>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let batch = tokio::select! {
                batch = input.recv() => batch,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };
            let Some(batch) = batch else {
                return Ok(());
            };

            tokio::select! {
                sent = output.send(SolveStatus::from(batch)) => {
                    sent.map_err(|_| Error::Progress("display stream closed".to_string()))?
                }
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }
}

/// Consumer of the relay's output stream
#[async_trait]
pub trait ProgressDisplay: Send {
    /// Render updates until the stream closes
    async fn display(&mut self, updates: mpsc::Receiver<SolveStatus>) -> Result<()>;
}

/// Relay `input` into `display` and wait for both to finish
pub async fn relay_to_display(
    input: mpsc::Receiver<StatusResponse>,
    display: &mut dyn ProgressDisplay,
    cancel: &CancellationToken,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::try_join!(ProgressRelay::run(input, tx, cancel), display.display(rx))?;
    Ok(())
}

/// Plain, line-oriented progress output through a [`Logger`]
pub struct ConsoleProgress {
    logger: Logger,
    numbers: HashMap<String, usize>,
    announced: HashSet<String>,
    finished: HashSet<String>,
}

impl ConsoleProgress {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            numbers: HashMap::new(),
            announced: HashSet::new(),
            finished: HashSet::new(),
        }
    }

    fn number(&mut self, digest: &str) -> usize {
        let next = self.numbers.len() + 1;
        *self.numbers.entry(digest.to_string()).or_insert(next)
    }

    /// Lines to print for one snapshot
    pub fn render(&mut self, status: &SolveStatus) -> Vec<String> {
        let mut lines = Vec::new();

        for vertex in &status.vertexes {
            let n = self.number(&vertex.digest);
            if vertex.started.is_some() && self.announced.insert(vertex.digest.clone()) {
                lines.push(format!("#{} {}", n, vertex.name));
            }
            if self.finished.contains(&vertex.digest) {
                continue;
            }
            if vertex.cached {
                lines.push(format!("#{} CACHED", n));
            } else if let Some(error) = &vertex.error {
                lines.push(format!("#{} ERROR: {}", n, error));
            } else if let (Some(started), Some(completed)) = (vertex.started, vertex.completed) {
                let took = completed.duration_since(started).unwrap_or_default();
                lines.push(format!("#{} DONE {}", n, self.logger.format_duration(took)));
            } else {
                continue;
            }
            self.finished.insert(vertex.digest.clone());
        }

        for status in &status.statuses {
            let n = self.number(&status.vertex);
            let counter = if status.total > 0 {
                format!("{}/{}", status.current, status.total)
            } else {
                status.current.to_string()
            };
            let done = if status.completed.is_some() { " done" } else { "" };
            lines.push(format!("#{} {} {}{}", n, status.name, counter, done));
        }

        for log in &status.logs {
            let n = self.number(&log.vertex);
            let text = String::from_utf8_lossy(&log.data);
            for line in text.lines().filter(|l| !l.is_empty()) {
                lines.push(format!("#{} {}", n, line));
            }
        }

        lines
    }
}

#[async_trait]
impl ProgressDisplay for ConsoleProgress {
    async fn display(&mut self, mut updates: mpsc::Receiver<SolveStatus>) -> Result<()> {
        while let Some(status) = updates.recv().await {
            for line in self.render(&status) {
                self.logger.progress_line(&line);
            }
        }
        Ok(())
    }
}
