//! Per-run registry of stage endpoints and the links between them.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use super::duplex::{duplex_channel, ChannelReader, ChannelWriter};
use super::link::{ChannelLink, LinkHandle, LinkOutcome, LinkStatsSnapshot};
use crate::config::LinkConfig;
use crate::core::SourceId;
use crate::errors::{HarnessError, Result};
use crate::validation::ValidationAggregator;

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// The stage-side halves of a stage's two channels.
#[derive(Debug)]
pub struct StageEndpoints {
    /// Records arriving from upstream links.
    pub input: ChannelReader,
    /// Records the stage sends downstream.
    pub output: ChannelWriter,
}

/// Tracks which stage owns which endpoint and starts links between them.
///
/// A stage's output endpoint is the read half a link pulls from; its input
/// endpoint is the write half a link pushes into. Each endpoint can be
/// connected once. Dropping the registry closes every link it started.
pub struct LinkRegistry {
    config: LinkConfig,
    aggregator: Arc<ValidationAggregator>,
    outputs: Mutex<HashMap<SourceId, BoxedReader>>,
    inputs: Mutex<HashMap<SourceId, BoxedWriter>>,
    links: DashMap<String, LinkHandle>,
}

impl LinkRegistry {
    /// Creates an empty registry reporting into `aggregator`.
    #[must_use]
    pub fn new(config: LinkConfig, aggregator: Arc<ValidationAggregator>) -> Self {
        Self {
            config,
            aggregator,
            outputs: Mutex::new(HashMap::new()),
            inputs: Mutex::new(HashMap::new()),
            links: DashMap::new(),
        }
    }

    /// The run's validation aggregator.
    #[must_use]
    pub fn aggregator(&self) -> &Arc<ValidationAggregator> {
        &self.aggregator
    }

    /// Registers the stream a stage writes its output into.
    pub fn register_output<R>(&self, source: SourceId, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut outputs = self.outputs.lock();
        if outputs.contains_key(&source) {
            return Err(HarnessError::config(format!(
                "output endpoint for {source} already registered"
            )));
        }
        outputs.insert(source, Box::new(reader));
        debug!(source = %source, "Registered output endpoint");
        Ok(())
    }

    /// Registers the stream a stage reads its input from.
    pub fn register_input<W>(&self, source: SourceId, writer: W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut inputs = self.inputs.lock();
        if inputs.contains_key(&source) {
            return Err(HarnessError::config(format!(
                "input endpoint for {source} already registered"
            )));
        }
        inputs.insert(source, Box::new(writer));
        debug!(source = %source, "Registered input endpoint");
        Ok(())
    }

    /// Creates and registers both channels for an in-process stage.
    pub fn stage_endpoints(&self, source: SourceId) -> Result<StageEndpoints> {
        let output = self.producer_endpoint(source)?;
        let input = self.consumer_endpoint(source)?;
        Ok(StageEndpoints { input, output })
    }

    /// Creates an output channel for a stage that only produces.
    pub fn producer_endpoint(&self, source: SourceId) -> Result<ChannelWriter> {
        let (writer, reader) = duplex_channel(self.config.buffer_size);
        self.register_output(source, reader)?;
        Ok(writer)
    }

    /// Creates an input channel for a stage that only consumes.
    pub fn consumer_endpoint(&self, source: SourceId) -> Result<ChannelReader> {
        let (writer, reader) = duplex_channel(self.config.buffer_size);
        self.register_input(source, writer)?;
        Ok(reader)
    }

    /// Starts `link` from `from`'s output to `to`'s input.
    ///
    /// Both endpoints must be registered and unconnected, and the link
    /// name must be unused.
    pub fn connect(&self, link: ChannelLink, from: SourceId, to: SourceId) -> Result<()> {
        let slot = match self.links.entry(link.name().to_string()) {
            Entry::Occupied(_) => {
                return Err(HarnessError::config(format!(
                    "link '{}' already exists",
                    link.name()
                )))
            }
            Entry::Vacant(slot) => slot,
        };

        let (upstream, downstream) = {
            let mut outputs = self.outputs.lock();
            let mut inputs = self.inputs.lock();
            if !outputs.contains_key(&from) {
                return Err(HarnessError::config(format!(
                    "link '{}': no unconnected output endpoint for {from}",
                    link.name()
                )));
            }
            if !inputs.contains_key(&to) {
                return Err(HarnessError::config(format!(
                    "link '{}': no unconnected input endpoint for {to}",
                    link.name()
                )));
            }
            match (outputs.remove(&from), inputs.remove(&to)) {
                (Some(upstream), Some(downstream)) => (upstream, downstream),
                _ => return Err(HarnessError::config("endpoint vanished during connect")),
            }
        };

        let link = if link.has_aggregator() {
            link
        } else {
            link.with_aggregator(self.aggregator.clone())
        }
        .with_max_record_len(self.config.max_record_len);

        info!(link = %link.name(), kind = %link.kind(), from = %from, to = %to, "Connecting link");
        slot.insert(link.spawn(upstream, downstream));
        Ok(())
    }

    /// Names of the links currently owned.
    #[must_use]
    pub fn link_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.links.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of links currently owned.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Counters for one link.
    #[must_use]
    pub fn stats(&self, name: &str) -> Option<LinkStatsSnapshot> {
        self.links.get(name).map(|h| h.stats().snapshot())
    }

    /// Counters for every link, keyed by name.
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, LinkStatsSnapshot> {
        self.links
            .iter()
            .map(|e| (e.key().clone(), e.value().stats().snapshot()))
            .collect()
    }

    /// Waits up to `grace` for a link to finish, then closes it.
    pub async fn join_link(&self, name: &str, grace: Duration) -> Result<LinkOutcome> {
        let (_, handle) = self
            .links
            .remove(name)
            .ok_or_else(|| HarnessError::config(format!("unknown link '{name}'")))?;
        Ok(handle.join_within(grace, "join grace expired").await)
    }

    /// Closes and joins every link, returning each outcome by name.
    ///
    /// Endpoints that were never connected are dropped, so stages blocked
    /// on them see end-of-stream.
    pub async fn close_all(&self, reason: &str) -> Vec<(String, LinkOutcome)> {
        self.outputs.lock().clear();
        self.inputs.lock().clear();

        let handles: Vec<LinkHandle> = self
            .link_names()
            .into_iter()
            .filter_map(|name| self.links.remove(&name).map(|(_, h)| h))
            .collect();
        if handles.is_empty() {
            return Vec::new();
        }

        for handle in &handles {
            handle.close(reason);
        }
        let names: Vec<String> = handles.iter().map(|h| h.name().to_string()).collect();
        let outcomes = join_all(handles.into_iter().map(LinkHandle::join)).await;

        info!(links = names.len(), reason, "Closed all links");
        names.into_iter().zip(outcomes).collect()
    }
}

impl std::fmt::Debug for LinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkRegistry")
            .field("links", &self.link_names())
            .field("pending_outputs", &self.outputs.lock().len())
            .field("pending_inputs", &self.inputs.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Hit, Record, RecordReader, RecordWriter};
    use crate::validation::HitRangeValidator;

    fn registry() -> LinkRegistry {
        LinkRegistry::new(LinkConfig::default(), Arc::new(ValidationAggregator::new()))
    }

    fn hit(ts: i64, detector_id: i32) -> Record {
        Record::Hit(Hit {
            timestamp: ts,
            detector_id,
            config_id: 1,
            source_id: SourceId::new(1),
            device_id: 0,
            mode: 0,
        })
    }

    #[tokio::test]
    async fn test_connect_requires_both_endpoints() {
        let reg = registry();
        let _out = reg.producer_endpoint(SourceId::new(1)).unwrap();
        let err = reg
            .connect(ChannelLink::new("1->2"), SourceId::new(1), SourceId::new(2))
            .unwrap_err();
        assert!(err.to_string().contains("input endpoint for src#2"));

        // The output endpoint is still available after the failed attempt.
        let _input = reg.consumer_endpoint(SourceId::new(2)).unwrap();
        reg.connect(ChannelLink::new("1->2"), SourceId::new(1), SourceId::new(2))
            .unwrap();
        assert_eq!(reg.link_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_names_and_endpoints_rejected() {
        let reg = registry();
        reg.stage_endpoints(SourceId::new(1)).map(drop).unwrap();
        assert!(reg.producer_endpoint(SourceId::new(1)).is_err());
        assert!(reg.consumer_endpoint(SourceId::new(1)).is_err());

        let _a = reg.producer_endpoint(SourceId::new(2)).unwrap();
        let _b = reg.consumer_endpoint(SourceId::new(3)).unwrap();
        reg.connect(ChannelLink::new("x"), SourceId::new(2), SourceId::new(3))
            .unwrap();
        let err = reg
            .connect(ChannelLink::new("x"), SourceId::new(1), SourceId::new(1))
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_records_flow_and_failures_reach_aggregator() {
        let reg = registry();
        let output = reg.producer_endpoint(SourceId::new(1)).unwrap();
        let input = reg.consumer_endpoint(SourceId::new(9)).unwrap();
        reg.connect(
            ChannelLink::bridge("src->sink", HitRangeValidator::new(0..=10)),
            SourceId::new(1),
            SourceId::new(9),
        )
        .unwrap();

        let mut writer = RecordWriter::new(output);
        writer.write_record(&hit(1, 5)).await.unwrap();
        writer.write_record(&hit(2, 50)).await.unwrap();
        writer.write_stop().await.unwrap();

        let mut reader = RecordReader::new(input);
        let mut count = 0;
        while let Some(frame) = reader.next_frame().await.unwrap() {
            if frame.is_stop_marker() {
                break;
            }
            count += 1;
        }
        assert_eq!(count, 2);

        let outcome = reg
            .join_link("src->sink", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.is_stopped());
        assert_eq!(reg.aggregator().failure_count(), 1);
        assert_eq!(reg.aggregator().first_failure().unwrap().record_index, 1);
    }

    #[tokio::test]
    async fn test_close_all_is_unconditional() {
        let reg = registry();
        let mut outputs = Vec::new();
        for i in 0..3u32 {
            outputs.push(reg.producer_endpoint(SourceId::new(i)).unwrap());
            let _ = reg.consumer_endpoint(SourceId::new(100 + i)).unwrap();
            reg.connect(
                ChannelLink::new(format!("link-{i}")),
                SourceId::new(i),
                SourceId::new(100 + i),
            )
            .unwrap();
        }
        let _pending = reg.producer_endpoint(SourceId::new(50)).unwrap();

        let outcomes = reg.close_all("teardown").await;
        assert_eq!(outcomes.len(), 3);
        assert!(reg.all_stats().is_empty());
        assert!(reg.close_all("again").await.is_empty());
        assert!(format!("{reg:?}").contains("pending_outputs: 0"));
    }
}
