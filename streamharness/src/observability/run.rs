//! Per-run correlation fields and phase timing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Fields attached to every log line of one harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAttributes {
    /// Human-chosen run name.
    pub run_name: String,
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Number of stages monitored.
    pub stages: usize,
    /// Number of links wired.
    pub links: usize,
}

impl RunAttributes {
    /// Creates attributes for a new run with a fresh id.
    #[must_use]
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            run_id: Uuid::new_v4(),
            stages: 0,
            links: 0,
        }
    }

    /// Sets the stage and link counts.
    #[must_use]
    pub fn with_topology(mut self, stages: usize, links: usize) -> Self {
        self.stages = stages;
        self.links = links;
        self
    }

    /// Flattens into `harness.*` keys for structured sinks.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("harness.run_name".to_string(), self.run_name.clone());
        attrs.insert("harness.run_id".to_string(), self.run_id.to_string());
        attrs.insert("harness.stages".to_string(), self.stages.to_string());
        attrs.insert("harness.links".to_string(), self.links.to_string());
        attrs
    }

    /// A span carrying the run's name and id.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("harness_run", run = %self.run_name, run_id = %self.run_id)
    }
}

/// Measures one phase of a run.
#[derive(Debug)]
pub struct PhaseTimer {
    start: Instant,
    name: String,
}

impl PhaseTimer {
    /// Starts timing.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Phase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops timing, logs the phase and returns its duration.
    pub fn finish(self) -> f64 {
        let ms = self.elapsed_ms();
        tracing::debug!(phase = %self.name, duration_ms = ms, "Phase finished");
        ms
    }
}
