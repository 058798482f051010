use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::sink::ArchiveSink;
use crate::config::ArchiveConfig;
use crate::error::Error;
use crate::models::EventRecord;

/// Counters describing what happened to dispatched records
#[derive(Debug, Default)]
pub struct ArchiveStats {
    queued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStatsSnapshot {
    pub queued: u64,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl ArchiveStats {
    pub fn snapshot(&self) -> ArchiveStatsSnapshot {
        ArchiveStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Sending side of the archive queue, cheap to clone into request handlers
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: mpsc::Sender<String>,
    stats: Arc<ArchiveStats>,
}

impl ArchiveHandle {
    /// Queue a record for the writer without waiting for it to be written.
    pub fn dispatch(&self, record: &EventRecord) -> Result<(), Error> {
        let line = record.to_json_line()?;

        match self.tx.try_send(line) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(Error::Archive(format!(
                    "queue full, dropped record for {}",
                    record.serial
                )))
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(Error::Archive(format!(
                    "writer stopped, dropped record for {}",
                    record.serial
                )))
            }
        }
    }

    pub fn stats(&self) -> ArchiveStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Bounded queue between the ingestion endpoint and a single archive writer
pub struct ArchiveQueue {
    handle: ArchiveHandle,
    writer: JoinHandle<()>,
}

impl ArchiveQueue {
    /// Start the writer task. It drains what is queued once `shutdown` fires.
    pub fn start(config: &ArchiveConfig, shutdown: CancellationToken) -> Self {
        let sink = ArchiveSink::new(config.path.clone(), config.create_if_missing);
        Self::with_sink(sink, config.queue_capacity, shutdown)
    }

    pub fn with_sink(sink: ArchiveSink, capacity: usize, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(ArchiveStats::default());

        info!("Starting archive writer for {}", sink.path().display());
        let writer = tokio::spawn(run_writer(sink, rx, stats.clone(), shutdown));

        Self {
            handle: ArchiveHandle { tx, stats },
            writer,
        }
    }

    pub fn handle(&self) -> ArchiveHandle {
        self.handle.clone()
    }

    /// Wait for the writer to finish after shutdown was requested.
    pub async fn join(self) -> ArchiveStatsSnapshot {
        let stats = self.handle.stats.clone();
        drop(self.handle);

        if let Err(e) = self.writer.await {
            error!("Archive writer task failed: {}", e);
        }

        stats.snapshot()
    }
}

async fn run_writer(
    sink: ArchiveSink,
    mut rx: mpsc::Receiver<String>,
    stats: Arc<ArchiveStats>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => write_record(&sink, &record, &stats).await,
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                while let Some(record) = rx.recv().await {
                    write_record(&sink, &record, &stats).await;
                }
                break;
            }
        }
    }

    debug!("Archive writer for {} stopped", sink.path().display());
}

async fn write_record(sink: &ArchiveSink, record: &str, stats: &ArchiveStats) {
    match sink.append(record).await {
        Ok(()) => {
            stats.written.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping archived record {}: {}", record, e);
        }
    }
}
