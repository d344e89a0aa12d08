//! Forwarding links between stage endpoints.
//!
//! Each link owns one worker task that reads whole records from upstream
//! and writes them downstream. Reads and writes block, so a slow consumer
//! stalls only the links that feed it.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancellation::CloseToken;
use crate::codec::{
    decode, encode, Frame, Record, RecordReader, RecordWriter, DEFAULT_MAX_RECORD_LEN,
};
use crate::errors::{LinkIoError, ValidationFailure};
use crate::validation::{ValidationAggregator, Validator};

/// How a link treats the records it forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Forward record bytes verbatim.
    #[default]
    PassThrough,
    /// Decode, validate, re-encode, forward.
    ValidatingBridge,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PassThrough => write!(f, "pass_through"),
            Self::ValidatingBridge => write!(f, "validating_bridge"),
        }
    }
}

/// Counters a link worker updates as it forwards.
#[derive(Debug, Default)]
pub struct LinkStats {
    records: AtomicU64,
    bytes: AtomicU64,
    validation_failures: AtomicU64,
    stop_forwarded: AtomicBool,
}

impl LinkStats {
    fn record_forwarded(&self, len: usize) {
        self.records.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records forwarded, stop marker excluded.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Bytes forwarded, stop marker excluded.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Records rejected on this link.
    #[must_use]
    pub fn validation_failures(&self) -> u64 {
        self.validation_failures.load(Ordering::Relaxed)
    }

    /// Whether a stop marker has been forwarded.
    #[must_use]
    pub fn stop_forwarded(&self) -> bool {
        self.stop_forwarded.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy.
    #[must_use]
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            records: self.records(),
            bytes: self.bytes(),
            validation_failures: self.validation_failures(),
            stop_forwarded: self.stop_forwarded(),
        }
    }
}

/// Copy of a link's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatsSnapshot {
    /// Records forwarded.
    pub records: u64,
    /// Bytes forwarded.
    pub bytes: u64,
    /// Records rejected.
    pub validation_failures: u64,
    /// Whether the stop marker went through.
    pub stop_forwarded: bool,
}

/// How a link worker ended.
#[derive(Debug)]
pub enum LinkOutcome {
    /// A stop marker was forwarded.
    Stopped,
    /// The link was closed explicitly.
    Closed {
        /// The close reason.
        reason: String,
    },
    /// Upstream ended cleanly without a stop marker.
    UpstreamEnded,
    /// The transport failed.
    Failed(LinkIoError),
    /// The worker task panicked or was aborted.
    Aborted(String),
}

impl LinkOutcome {
    /// Returns true if the stream ended with a stop marker.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns true if the worker hit a transport failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Aborted(_))
    }
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Closed { reason } => write!(f, "closed ({reason})"),
            Self::UpstreamEnded => write!(f, "upstream ended"),
            Self::Failed(e) => write!(f, "failed: {e}"),
            Self::Aborted(msg) => write!(f, "aborted: {msg}"),
        }
    }
}

/// A link definition; [`ChannelLink::spawn`] starts its worker.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    name: String,
    kind: LinkKind,
    validator: Option<Arc<dyn Validator>>,
    aggregator: Option<Arc<ValidationAggregator>>,
    max_record_len: usize,
}

impl ChannelLink {
    /// Creates a pass-through link.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LinkKind::PassThrough,
            validator: None,
            aggregator: None,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }

    /// Creates a validating bridge.
    #[must_use]
    pub fn bridge(name: impl Into<String>, validator: impl Validator + 'static) -> Self {
        Self::new(name)
            .with_kind(LinkKind::ValidatingBridge)
            .with_validator(Arc::new(validator))
    }

    /// Sets the link kind.
    #[must_use]
    pub fn with_kind(mut self, kind: LinkKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attaches a validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Reports failures into a run aggregator.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: Arc<ValidationAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Sets the largest acceptable record.
    #[must_use]
    pub fn with_max_record_len(mut self, bytes: usize) -> Self {
        self.max_record_len = bytes;
        self
    }

    /// Link name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Link kind.
    #[must_use]
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// Returns true if an aggregator is attached.
    #[must_use]
    pub fn has_aggregator(&self) -> bool {
        self.aggregator.is_some()
    }

    /// Starts the forwarding worker.
    pub fn spawn<R, W>(self, upstream: R, downstream: W) -> LinkHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let stats = Arc::new(LinkStats::default());
        let token = Arc::new(CloseToken::new());
        let name = self.name.clone();

        debug!(link = %name, kind = %self.kind, "Starting link worker");
        let worker = Worker {
            link: self,
            stats: stats.clone(),
            token: token.clone(),
        };
        let task = tokio::spawn(worker.run(upstream, downstream));

        LinkHandle {
            name,
            stats,
            token,
            task: Some(task),
        }
    }
}

struct Worker {
    link: ChannelLink,
    stats: Arc<LinkStats>,
    token: Arc<CloseToken>,
}

impl Worker {
    async fn run<R, W>(self, upstream: R, downstream: W) -> LinkOutcome
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = RecordReader::with_max_record_len(upstream, self.link.max_record_len);
        let mut writer = RecordWriter::new(downstream);
        let outcome = self.forward(&mut reader, &mut writer).await;

        // Downstream sees end-of-stream whatever happened upstream.
        if let Err(e) = writer.shutdown().await {
            debug!(link = %self.link.name, error = %e, "Downstream shutdown failed");
        }

        match &outcome {
            LinkOutcome::Failed(e) => warn!(
                link = %self.link.name,
                records = self.stats.records(),
                error = %e.source,
                "Link terminated by I/O failure"
            ),
            other => info!(
                link = %self.link.name,
                records = self.stats.records(),
                bytes = self.stats.bytes(),
                outcome = %other,
                "Link finished"
            ),
        }
        outcome
    }

    async fn forward<R, W>(
        &self,
        reader: &mut RecordReader<R>,
        writer: &mut RecordWriter<W>,
    ) -> LinkOutcome
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let next = tokio::select! {
                biased;
                () = self.token.closed() => return self.closed_outcome(),
                next = reader.next_frame() => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => return LinkOutcome::UpstreamEnded,
                Err(e) => return LinkOutcome::Failed(LinkIoError::new(&self.link.name, e)),
            };

            if frame.is_stop_marker() {
                let sent = async {
                    writer.write_frame(&frame.bytes).await?;
                    writer.flush().await
                };
                let sent = tokio::select! {
                    biased;
                    () = self.token.closed() => return self.closed_outcome(),
                    sent = sent => sent,
                };
                return match sent {
                    Ok(()) => {
                        self.stats.stop_forwarded.store(true, Ordering::Relaxed);
                        LinkOutcome::Stopped
                    }
                    Err(e) => LinkOutcome::Failed(LinkIoError::new(&self.link.name, e)),
                };
            }

            let out = self.process(&frame);
            let written = tokio::select! {
                biased;
                () = self.token.closed() => return self.closed_outcome(),
                written = writer.write_frame(&out) => written,
            };
            if let Err(e) = written {
                return LinkOutcome::Failed(LinkIoError::new(&self.link.name, e));
            }
            self.stats.record_forwarded(out.len());
        }
    }

    fn closed_outcome(&self) -> LinkOutcome {
        LinkOutcome::Closed {
            reason: self
                .token
                .reason()
                .unwrap_or_else(|| "closed".to_string()),
        }
    }

    /// Validates a frame and returns the bytes to forward.
    fn process(&self, frame: &Frame) -> Bytes {
        let needs_decode =
            self.link.kind == LinkKind::ValidatingBridge || self.link.validator.is_some();
        if !needs_decode {
            return frame.bytes.clone();
        }

        let record = match decode(&frame.bytes) {
            Ok(record) => record,
            Err(e) => {
                self.reject(frame, "codec", e.to_string());
                return frame.bytes.clone();
            }
        };

        match &self.link.validator {
            Some(validator) => match validator.check(&record, &frame.bytes) {
                Ok(()) => self.accept(),
                Err(reason) => self.reject(frame, validator.name(), reason),
            },
            None => self.accept(),
        }

        match self.link.kind {
            LinkKind::PassThrough => frame.bytes.clone(),
            LinkKind::ValidatingBridge => self.reencode(&record, frame),
        }
    }

    fn reencode(&self, record: &Record, frame: &Frame) -> Bytes {
        encode(record).unwrap_or_else(|e| {
            self.reject(frame, "codec", e.to_string());
            frame.bytes.clone()
        })
    }

    fn accept(&self) {
        if let Some(agg) = &self.link.aggregator {
            agg.record_pass();
        }
    }

    fn reject(&self, frame: &Frame, validator: &str, reason: String) {
        self.stats.record_validation_failure();
        let failure = ValidationFailure::for_frame(&self.link.name, validator, frame, reason);
        match &self.link.aggregator {
            Some(agg) => agg.record_failure(failure),
            None => warn!(link = %self.link.name, "{}", failure),
        }
    }
}

/// Owner's handle on a running link.
///
/// Dropping the handle closes the link.
#[derive(Debug)]
pub struct LinkHandle {
    name: String,
    stats: Arc<LinkStats>,
    token: Arc<CloseToken>,
    task: Option<JoinHandle<LinkOutcome>>,
}

impl LinkHandle {
    /// Link name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// Returns true once the worker has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Asks the worker to stop.
    pub fn close(&self, reason: impl Into<String>) {
        self.token.close(reason);
    }

    /// Waits for the worker to exit.
    pub async fn join(mut self) -> LinkOutcome {
        let Some(task) = self.task.take() else {
            return LinkOutcome::Aborted("link already joined".to_string());
        };
        task.await
            .unwrap_or_else(|e| LinkOutcome::Aborted(e.to_string()))
    }

    /// Closes the link and waits for the worker to exit.
    pub async fn close_and_join(self, reason: impl Into<String>) -> LinkOutcome {
        self.close(reason);
        self.join().await
    }

    /// Gives the worker `grace` to finish on its own, then closes it.
    pub async fn join_within(mut self, grace: Duration, reason: impl Into<String>) -> LinkOutcome {
        let Some(mut task) = self.task.take() else {
            return LinkOutcome::Aborted("link already joined".to_string());
        };
        let joined = match tokio::time::timeout(grace, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                self.token.close(reason);
                task.await
            }
        };
        joined.unwrap_or_else(|e| LinkOutcome::Aborted(e.to_string()))
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.token.close("link handle dropped");
        }
    }
}
