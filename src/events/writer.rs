use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Event;
use crate::server::health::HealthMetrics;

/// Failures of the event log. None of them stop the writer.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("opening event log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serializing event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("appending to event log: {0}")]
    Append(#[source] std::io::Error),

    #[error("event writer has shut down")]
    Closed,
}

impl WriteError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Serialize(_) => "serialize",
            Self::Append(_) => "append",
            Self::Closed => "closed",
        }
    }
}

/// Producer handle of the bounded event queue. Cheap to clone.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
    health: Option<Arc<HealthMetrics>>,
}

impl EventQueue {
    fn new(tx: mpsc::Sender<Event>, health: Option<Arc<HealthMetrics>>) -> Self {
        if let Some(h) = &health {
            h.event_queue_capacity.set(tx.max_capacity() as i64);
        }
        Self { tx, health }
    }

    /// Queues an event for the writer, waiting while the queue is full.
    pub async fn enqueue(&self, event: Event) -> Result<(), WriteError> {
        self.tx.send(event).await.map_err(|_| WriteError::Closed)?;

        if let Some(h) = &self.health {
            h.events_enqueued.inc();
            h.event_queue_length
                .set((self.tx.max_capacity() - self.tx.capacity()) as i64);
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Starts the single event log writer.
///
/// Events are appended in FIFO order as one JSON object per line. The task
/// finishes once every [`EventQueue`] clone is dropped and the queue is drained.
pub fn spawn_writer(
    path: PathBuf,
    capacity: usize,
    health: Option<Arc<HealthMetrics>>,
) -> Result<(EventQueue, JoinHandle<()>)> {
    if capacity == 0 {
        bail!("event queue size must be positive");
    }

    let (tx, rx) = mpsc::channel(capacity);
    let queue = EventQueue::new(tx, health.clone());

    let handle = tokio::spawn(async move {
        tracing::info!(path = %path.display(), capacity, "event writer started");
        run(&path, rx, health).await;
        tracing::info!(path = %path.display(), "event writer drained");
    });

    Ok((queue, handle))
}

async fn run(path: &Path, mut rx: mpsc::Receiver<Event>, health: Option<Arc<HealthMetrics>>) {
    let mut file: Option<File> = None;

    while let Some(event) = rx.recv().await {
        if let Some(h) = &health {
            h.event_queue_length.set(rx.len() as i64);
        }

        match append(&mut file, path, &event).await {
            Ok(()) => {
                if let Some(h) = &health {
                    h.events_written.inc();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, source = %event.source, "failed to append event");
                if let Some(h) = &health {
                    h.event_write_errors.with_label_values(&[e.kind()]).inc();
                }
            }
        }
    }
}

/// Appends one line. A handle that failed is dropped so the next event reopens the log.
async fn append(file: &mut Option<File>, path: &Path, event: &Event) -> Result<(), WriteError> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');

    let mut handle = match file.take() {
        Some(handle) => handle,
        None => open_log(path).await?,
    };
    handle.write_all(&line).await.map_err(WriteError::Append)?;
    handle.flush().await.map_err(WriteError::Append)?;

    *file = Some(handle);
    Ok(())
}

/// Opens the log for appending. A log left ending mid-line, by an append that
/// failed partway or by another writer, is terminated first so the next event
/// starts on a line of its own.
async fn open_log(path: &Path) -> Result<File, WriteError> {
    let open_error = |source| WriteError::Open {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .await
        .map_err(open_error)?;

    let len = file.metadata().await.map_err(open_error)?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))
            .await
            .map_err(WriteError::Append)?;
        file.read_exact(&mut last).await.map_err(WriteError::Append)?;
        if last[0] != b'\n' {
            file.write_all(b"\n").await.map_err(WriteError::Append)?;
        }
    }
    Ok(file)
}
