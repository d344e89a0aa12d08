//! Producer workers that write generated records into a link endpoint.

use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{Record, RecordWriter};
use crate::core::{ProgressCounters, ProgressSnapshot, StageState};
use crate::errors::{HarnessError, Result};
use crate::waiter::StageProbe;

/// What a producer wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerSummary {
    /// Records written, stop marker excluded.
    pub records: u64,
    /// Bytes written, stop marker included.
    pub bytes: u64,
    /// Timestamp of the last record written.
    pub last_timestamp: Option<i64>,
    /// Whether a stop marker was written.
    pub stopped: bool,
}

/// Lifecycle and counters of a producer, observable as a stage.
#[derive(Debug)]
pub struct ProducerProbe {
    name: String,
    state: AtomicU8,
    counters: ProgressCounters,
    error: Mutex<Option<String>>,
}

impl ProducerProbe {
    fn new(name: String) -> Self {
        Self {
            name,
            state: AtomicU8::new(StageState::Created.to_u8()),
            counters: ProgressCounters::new(),
            error: Mutex::new(None),
        }
    }

    fn set_state(&self, state: StageState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The write error that stopped the producer, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }
}

impl StageProbe for ProducerProbe {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_running(&self) -> bool {
        self.state().is_running()
    }

    fn is_stopped(&self) -> bool {
        self.state().is_stopped()
    }

    fn current_state(&self) -> String {
        match self.error() {
            Some(e) => format!("{} ({e})", self.state()),
            None => self.state().to_string(),
        }
    }

    fn progress(&self) -> ProgressSnapshot {
        self.counters.snapshot()
    }
}

/// Handle on a running producer.
#[derive(Debug)]
pub struct ProducerHandle {
    probe: Arc<ProducerProbe>,
    task: JoinHandle<io::Result<ProducerSummary>>,
}

impl ProducerHandle {
    /// Observable state, for waiters and the stasis detector.
    #[must_use]
    pub fn probe(&self) -> Arc<ProducerProbe> {
        self.probe.clone()
    }

    /// Returns true once the worker has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the worker without writing a stop marker.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits for the worker and returns what it wrote.
    pub async fn join(self) -> Result<ProducerSummary> {
        match self.task.await {
            Ok(summary) => summary.map_err(HarnessError::from),
            Err(e) => Err(HarnessError::Io(io::Error::other(format!(
                "producer '{}' did not finish: {e}",
                self.probe.name
            )))),
        }
    }
}

/// Spawns a worker writing `count` records from `generator` into `writer`.
///
/// With `send_stop` the worker ends the stream with a stop marker. The
/// writer is shut down when the worker finishes, so the reading side sees
/// end-of-stream either way.
pub fn spawn_producer<G, W>(
    name: impl Into<String>,
    generator: G,
    writer: W,
    count: u64,
    send_stop: bool,
) -> ProducerHandle
where
    G: Iterator<Item = Record> + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let probe = Arc::new(ProducerProbe::new(name.into()));
    let worker_probe = probe.clone();
    let task = tokio::spawn(async move {
        let result = produce(&worker_probe, generator, writer, count, send_stop).await;
        match &result {
            Ok(summary) => {
                worker_probe.set_state(StageState::Stopped);
                info!(
                    producer = %worker_probe.name,
                    records = summary.records,
                    bytes = summary.bytes,
                    "Producer finished"
                );
            }
            Err(e) => {
                *worker_probe.error.lock() = Some(e.to_string());
                worker_probe.set_state(StageState::Failed);
                warn!(producer = %worker_probe.name, error = %e, "Producer failed");
            }
        }
        result
    });
    ProducerHandle { probe, task }
}

async fn produce<G, W>(
    probe: &ProducerProbe,
    generator: G,
    writer: W,
    count: u64,
    send_stop: bool,
) -> io::Result<ProducerSummary>
where
    G: Iterator<Item = Record>,
    W: AsyncWrite + Unpin,
{
    probe.set_state(StageState::Running);
    debug!(producer = %probe.name, count, send_stop, "Producer started");

    let mut writer = RecordWriter::new(writer);
    let mut summary = ProducerSummary::default();
    for record in generator.take(usize::try_from(count).unwrap_or(usize::MAX)) {
        writer.write_record(&record).await?;
        probe.counters.record_sent();
        summary.records += 1;
        if let Some(ts) = record.timestamp() {
            summary.last_timestamp = Some(ts);
        }
    }

    probe.set_state(StageState::Stopping);
    if send_stop {
        writer.write_stop().await?;
        summary.stopped = true;
    } else {
        writer.flush().await?;
    }
    writer.shutdown().await?;
    summary.bytes = writer.bytes_written();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RecordReader;
    use crate::channel::duplex_channel;
    use crate::generator::HitGenerator;

    #[tokio::test]
    async fn test_producer_writes_count_then_stop() {
        let (tx, rx) = duplex_channel(256);
        let handle = spawn_producer("hits", HitGenerator::sequential(), tx, 25, true);
        let probe = handle.probe();

        let mut reader = RecordReader::new(rx);
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await.unwrap() {
            frames.push(frame);
        }

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.records, 25);
        assert_eq!(summary.bytes, 25 * 32 + 4);
        assert_eq!(summary.last_timestamp, Some(240));
        assert!(summary.stopped);
        assert_eq!(frames.len(), 26);
        assert!(frames[25].is_stop_marker());

        assert!(probe.is_stopped());
        assert_eq!(probe.progress().sent, 25);
    }

    #[tokio::test]
    async fn test_producer_without_stop_just_closes() {
        let (tx, rx) = duplex_channel(256);
        let handle = spawn_producer("hits", HitGenerator::sequential(), tx, 3, false);

        let mut reader = RecordReader::new(rx);
        let mut n = 0;
        while reader.next_frame().await.unwrap().is_some() {
            n += 1;
        }
        assert_eq!(n, 3);
        assert!(!handle.join().await.unwrap().stopped);
    }

    #[tokio::test]
    async fn test_producer_reports_broken_pipe() {
        let (tx, rx) = duplex_channel(64);
        drop(rx);
        let handle = spawn_producer("orphan", HitGenerator::sequential(), tx, 10, true);
        let probe = handle.probe();

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, HarnessError::Io(_)));
        assert_eq!(probe.state(), StageState::Failed);
        assert!(probe.current_state().starts_with("failed"));
    }
}
