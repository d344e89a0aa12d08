//! Terminal collectors standing in for the pipeline's final consumer.

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{decode, encode, Frame, Record, RecordReader};
use crate::core::{ProgressSnapshot, StageState};
use crate::errors::{HarnessError, Result};
use crate::waiter::StageProbe;

/// Receives every frame arriving at a terminal endpoint.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Called once per frame, stop marker included.
    async fn accept(&self, frame: &Frame);

    /// Called when the stream has ended.
    async fn finish(&self) {}
}

/// SHA-256 over a byte stream, for comparing what was sent with what arrived.
#[derive(Clone, Default)]
pub struct StreamFingerprint {
    hasher: Sha256,
    bytes: u64,
}

impl std::fmt::Debug for StreamFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFingerprint")
            .field("bytes", &self.bytes)
            .field("digest", &self.hex())
            .finish()
    }
}

impl StreamFingerprint {
    /// Creates an empty fingerprint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.bytes += bytes.len() as u64;
    }

    /// Feeds the encoding of a record.
    pub fn push_record(&mut self, record: &Record) -> Result<()> {
        let bytes = encode(record)?;
        self.update(&bytes);
        Ok(())
    }

    /// Bytes fed so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes
    }

    /// Returns true if nothing has been fed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Hex digest of everything fed so far.
    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Fingerprint of `records` followed by a stop marker.
    pub fn of_stream<'a, I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut fp = Self::new();
        for record in records {
            fp.push_record(record)?;
        }
        fp.push_record(&Record::StopMarker)?;
        Ok(fp)
    }
}

/// Counts, fingerprints and remembers what reaches it.
#[derive(Debug)]
pub struct CountingSink {
    name: String,
    state: AtomicU8,
    records: AtomicU64,
    decode_errors: AtomicU64,
    stop_seen: AtomicBool,
    last: Mutex<Option<Record>>,
    fingerprint: Mutex<StreamFingerprint>,
}

impl CountingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(StageState::Created.to_u8()),
            records: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            stop_seen: AtomicBool::new(false),
            last: Mutex::new(None),
            fingerprint: Mutex::new(StreamFingerprint::new()),
        }
    }

    /// Records received, stop marker excluded.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Records that could not be decoded.
    #[must_use]
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Whether the stop marker arrived.
    #[must_use]
    pub fn stop_seen(&self) -> bool {
        self.stop_seen.load(Ordering::SeqCst)
    }

    /// The last record decoded.
    #[must_use]
    pub fn last_record(&self) -> Option<Record> {
        self.last.lock().clone()
    }

    /// Timestamp of the last record decoded.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last.lock().as_ref().and_then(Record::timestamp)
    }

    /// Hex digest of every byte received, stop marker included.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.fingerprint.lock().hex()
    }

    /// Bytes received, stop marker included.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.fingerprint.lock().len()
    }

    fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl RecordSink for CountingSink {
    async fn accept(&self, frame: &Frame) {
        self.state.store(StageState::Running.to_u8(), Ordering::SeqCst);
        self.fingerprint.lock().update(&frame.bytes);
        if frame.is_stop_marker() {
            self.stop_seen.store(true, Ordering::SeqCst);
            return;
        }
        match decode(&frame.bytes) {
            Ok(record) => *self.last.lock() = Some(record),
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sink = %self.name,
                    record_index = frame.index,
                    error = %e,
                    "Undecodable record at sink"
                );
            }
        }
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    async fn finish(&self) {
        self.state.store(StageState::Stopped.to_u8(), Ordering::SeqCst);
    }
}

impl StageProbe for CountingSink {
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
        self.state().to_string()
    }

    /// A sink's output is what it received.
    fn progress(&self) -> ProgressSnapshot {
        let n = self.received();
        ProgressSnapshot::new(n, 0, n)
    }
}

/// Feeds every frame from `input` to `sink` until end-of-stream.
///
/// Returns the number of frames read. Reading continues past a stop
/// marker so anything sent after it is still seen.
pub async fn drain_into<S, R>(sink: &S, input: R) -> Result<u64>
where
    S: RecordSink + ?Sized,
    R: AsyncRead + Unpin,
{
    let mut reader = RecordReader::new(input);
    let result = loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => sink.accept(&frame).await,
            Ok(None) => break Ok(reader.records_read()),
            Err(e) => break Err(HarnessError::from(e)),
        }
    };
    sink.finish().await;
    debug!(frames = reader.records_read(), bytes = reader.bytes_read(), "Sink drained");
    result
}

/// Spawns a worker draining `input` into `sink`.
pub fn spawn_sink<S, R>(sink: Arc<S>, input: R) -> JoinHandle<Result<u64>>
where
    S: RecordSink + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move { drain_into(sink.as_ref(), input).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::duplex_channel;
    use crate::codec::RecordWriter;
    use crate::generator::HitGenerator;

    #[tokio::test]
    async fn test_counting_sink_matches_fingerprint() {
        let records: Vec<Record> = HitGenerator::seeded(3).take(50).collect();
        let expected = StreamFingerprint::of_stream(&records).unwrap();

        let (tx, rx) = duplex_channel(512);
        let sink = Arc::new(CountingSink::new("sink"));
        let task = spawn_sink(sink.clone(), rx);

        let mut writer = RecordWriter::new(tx);
        for record in &records {
            writer.write_record(record).await.unwrap();
        }
        writer.write_stop().await.unwrap();
        drop(writer);

        assert_eq!(task.await.unwrap().unwrap(), 51);
        assert_eq!(sink.received(), 50);
        assert!(sink.stop_seen());
        assert!(sink.is_stopped());
        assert_eq!(sink.fingerprint(), expected.hex());
        assert_eq!(sink.bytes(), expected.len());
        assert_eq!(sink.last_timestamp(), records[49].timestamp());
    }

    #[tokio::test]
    async fn test_sink_counts_undecodable_records() {
        let (tx, rx) = duplex_channel(512);
        let sink = Arc::new(CountingSink::new("sink"));
        let task = spawn_sink(sink.clone(), rx);

        let mut bogus = encode(&HitGenerator::sequential().next().unwrap()).unwrap().to_vec();
        bogus[7] = 9;
        let mut writer = RecordWriter::new(tx);
        writer.write_frame(&bogus).await.unwrap();
        writer.shutdown().await.unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(sink.received(), 1);
        assert_eq!(sink.decode_errors(), 1);
        assert!(!sink.stop_seen());
        assert_eq!(sink.last_record(), None);
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let a: Vec<Record> = HitGenerator::sequential().take(2).collect();
        let b: Vec<Record> = a.iter().rev().cloned().collect();
        let fa = StreamFingerprint::of_stream(&a).unwrap();
        let fb = StreamFingerprint::of_stream(&b).unwrap();
        assert_ne!(fa.hex(), fb.hex());
        assert_eq!(fa.len(), 2 * 32 + 4);
        assert_eq!(fa.hex().len(), 64);
    }
}
