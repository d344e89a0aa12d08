//! In-process stages that behave like the real ones from the outside.

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::logic::StageLogic;
use crate::cancellation::CloseToken;
use crate::codec::{decode, Record, RecordReader, RecordWriter};
use crate::core::{ProgressCounters, ProgressSnapshot, StageState};
use crate::errors::{HarnessError, Result};
use crate::waiter::StageProbe;

/// A stage with a lifecycle, progress counters and pluggable logic.
///
/// It reads records from its input until a stop marker arrives, passes
/// each through its [`StageLogic`], and writes what comes out. The stop
/// marker is forwarded after any records the logic flushes on stop.
#[derive(Debug)]
pub struct SimulatedStage {
    name: String,
    state: AtomicU8,
    counters: ProgressCounters,
    startup_delay: Duration,
    record_delay: Duration,
    error: Mutex<Option<String>>,
}

impl SimulatedStage {
    /// Creates a stage that starts immediately.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(StageState::Created.to_u8()),
            counters: ProgressCounters::new(),
            startup_delay: Duration::ZERO,
            record_delay: Duration::ZERO,
            error: Mutex::new(None),
        }
    }

    /// Sets how long the stage stays in `starting`.
    #[must_use]
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Sets a pause before each record is handled.
    #[must_use]
    pub fn with_record_delay(mut self, delay: Duration) -> Self {
        self.record_delay = delay;
        self
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: StageState) {
        debug!(stage = %self.name, state = %state, "Stage state changed");
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Starts the stage on its endpoints.
    pub fn spawn<L, R, W>(self, logic: L, input: R, output: W) -> StageHandle
    where
        L: StageLogic + 'static,
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let stage = Arc::new(self);
        let token = Arc::new(CloseToken::new());
        let worker = stage.clone();
        let worker_token = token.clone();
        stage.set_state(StageState::Starting);

        let task = tokio::spawn(async move {
            let result = worker.run(&logic, &worker_token, input, output).await;
            match &result {
                Ok(()) => {
                    worker.set_state(StageState::Stopped);
                    info!(
                        stage = %worker.name,
                        logic = logic.kind(),
                        received = worker.counters.snapshot().received,
                        sent = worker.counters.sent(),
                        "Stage stopped"
                    );
                }
                Err(e) => {
                    *worker.error.lock() = Some(e.to_string());
                    worker.set_state(StageState::Failed);
                    warn!(stage = %worker.name, error = %e, "Stage failed");
                }
            }
            result.map_err(HarnessError::from)
        });

        StageHandle { stage, token, task }
    }

    async fn run<L, R, W>(
        &self,
        logic: &L,
        token: &CloseToken,
        input: R,
        output: W,
    ) -> io::Result<()>
    where
        L: StageLogic,
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if !self.startup_delay.is_zero() {
            tokio::select! {
                biased;
                () = token.closed() => return Ok(()),
                () = tokio::time::sleep(self.startup_delay) => {}
            }
        }
        self.set_state(StageState::Running);

        let mut reader = RecordReader::new(input);
        let mut writer = RecordWriter::new(output);
        let mut saw_stop = false;

        loop {
            let next = tokio::select! {
                biased;
                () = token.closed() => break,
                next = reader.next_frame() => next?,
            };
            let Some(frame) = next else {
                break;
            };
            if frame.is_stop_marker() {
                saw_stop = true;
                break;
            }

            self.counters.record_received();
            let record = match decode(&frame.bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        stage = %self.name,
                        record_index = frame.index,
                        error = %e,
                        "Dropping undecodable record"
                    );
                    continue;
                }
            };
            self.counters.record_queued();
            if !self.record_delay.is_zero() {
                tokio::select! {
                    biased;
                    () = token.closed() => return Ok(()),
                    () = tokio::time::sleep(self.record_delay) => {}
                }
            }
            for out in logic.on_record(record).await {
                if !self.send(token, &mut writer, &out).await? {
                    return Ok(());
                }
            }
        }

        // A closed stage drops whatever it still holds.
        self.set_state(StageState::Stopping);
        for out in logic.on_stop().await {
            if !self.send(token, &mut writer, &out).await? {
                return Ok(());
            }
        }
        if saw_stop {
            tokio::select! {
                biased;
                () = token.closed() => return Ok(()),
                sent = writer.write_stop() => sent?,
            }
        }
        tokio::select! {
            biased;
            () = token.closed() => Ok(()),
            done = writer.shutdown() => done,
        }
    }

    /// Writes one record unless the stage is closed first.
    async fn send<W>(
        &self,
        token: &CloseToken,
        writer: &mut RecordWriter<W>,
        record: &Record,
    ) -> io::Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            biased;
            () = token.closed() => Ok(false),
            written = writer.write_record(record) => {
                written?;
                self.counters.record_sent();
                Ok(true)
            }
        }
    }
}

impl StageProbe for SimulatedStage {
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
        match self.error.lock().as_deref() {
            Some(e) => format!("{} ({e})", self.state()),
            None => self.state().to_string(),
        }
    }

    fn progress(&self) -> ProgressSnapshot {
        self.counters.snapshot()
    }
}

/// Handle on a running simulated stage.
#[derive(Debug)]
pub struct StageHandle {
    stage: Arc<SimulatedStage>,
    token: Arc<CloseToken>,
    task: JoinHandle<Result<()>>,
}

impl StageHandle {
    /// The stage, for waiters and the stasis detector.
    #[must_use]
    pub fn stage(&self) -> Arc<SimulatedStage> {
        self.stage.clone()
    }

    /// Asks the stage to stop reading.
    pub fn stop(&self, reason: impl Into<String>) {
        self.token.close(reason);
    }

    /// Waits for the stage to exit.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(HarnessError::Io(io::Error::other(format!(
                "stage '{}' did not finish: {e}",
                self.stage.name
            )))),
        }
    }

    /// Gives the stage `grace` to finish, then stops it.
    ///
    /// A stage still running `grace` after the stop is aborted and left failed.
    pub async fn stop_within(mut self, grace: Duration, reason: impl Into<String>) -> Result<()> {
        let joined = match tokio::time::timeout(grace, &mut self.task).await {
            Ok(joined) => joined,
            Err(_) => {
                self.token.close(reason);
                match tokio::time::timeout(grace, &mut self.task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        self.task.abort();
                        let message = format!("aborted {grace:?} after stop");
                        *self.stage.error.lock() = Some(message.clone());
                        self.stage.set_state(StageState::Failed);
                        warn!(stage = %self.stage.name, "Stage ignored stop; aborted");
                        return Err(HarnessError::Io(io::Error::other(format!(
                            "stage '{}' {message}",
                            self.stage.name
                        ))));
                    }
                }
            }
        };
        joined.unwrap_or_else(|e| {
            Err(HarnessError::Io(io::Error::other(format!(
                "stage '{}' did not finish: {e}",
                self.stage.name
            ))))
        })
    }
}
