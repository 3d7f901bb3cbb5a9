//! Worker loop: run a stage until it runs dry, then sleep until woken.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use labelwise_core::Settings;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::signal::ChangeSignal;

/// Whether a cycle found anything to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Worked,
    Idle,
}

/// One unit of background work, run synchronously on the blocking pool.
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn run_cycle(&self) -> labelwise_core::Result<Progress>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
    #[default]
    Idle,
    Processing,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep between cycles once the stage reports no work.
    pub idle_interval: Duration,
    /// Stop the worker on the first failed cycle instead of retrying.
    /// Transient store conflicts are always retried.
    pub stop_on_error: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(10),
            stop_on_error: true,
        }
    }
}

impl From<&Settings> for WorkerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            idle_interval: settings.idle_interval(),
            stop_on_error: settings.stop_on_error,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: labelwise_core::Error,
    },

    #[error("{stage} stage panicked: {message}")]
    Panicked { stage: &'static str, message: String },
}

/// Counters returned when a worker stops cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub cycles: u64,
    pub worked: u64,
    pub failures: u64,
}

pub struct Worker {
    stage: Arc<dyn Stage>,
    config: WorkerConfig,
    signal: ChangeSignal,
    downstream: Vec<ChangeSignal>,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn new(stage: Arc<dyn Stage>, config: WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            stage,
            config,
            signal: ChangeSignal::new(),
            downstream: Vec::new(),
            state,
        }
    }

    /// Wake this worker through an externally owned signal.
    pub fn with_signal(mut self, signal: ChangeSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Notify `signal` after every cycle that did work.
    pub fn notify_on_work(mut self, signal: ChangeSignal) -> Self {
        self.downstream.push(signal);
        self
    }

    pub fn signal(&self) -> ChangeSignal {
        self.signal.clone()
    }

    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Drive the stage until `shutdown` flips to `true` or its sender is
    /// dropped. Shutdown is only observed between cycles.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WorkerStats, WorkerError> {
        let name = self.stage.name();
        let mut stats = WorkerStats::default();
        info!(stage = name, "worker started");

        while !*shutdown.borrow() {
            self.state.send_replace(WorkerState::Processing);
            let stage = Arc::clone(&self.stage);
            let outcome = match tokio::task::spawn_blocking(move || stage.run_cycle()).await {
                Ok(result) => result.map_err(|source| WorkerError::Stage {
                    stage: name,
                    source,
                }),
                Err(join) => Err(WorkerError::Panicked {
                    stage: name,
                    message: panic_message(join),
                }),
            };
            stats.cycles += 1;

            let wake_on_change = match outcome {
                Ok(Progress::Worked) => {
                    stats.worked += 1;
                    for signal in &self.downstream {
                        signal.notify();
                    }
                    continue;
                }
                Ok(Progress::Idle) => {
                    debug!(stage = name, "nothing to do");
                    true
                }
                Err(err) if is_transient(&err) => {
                    stats.failures += 1;
                    warn!(stage = name, error = %err, "transient failure, will retry");
                    false
                }
                Err(err) => {
                    stats.failures += 1;
                    error!(stage = name, error = %err, "cycle failed");
                    if self.config.stop_on_error {
                        self.state.send_replace(WorkerState::Failed);
                        return Err(err);
                    }
                    false
                }
            };
            self.state.send_replace(WorkerState::Idle);

            let closed = tokio::select! {
                _ = tokio::time::sleep(self.config.idle_interval) => false,
                _ = self.signal.changed(), if wake_on_change => {
                    debug!(stage = name, "woken by change");
                    false
                }
                res = shutdown.changed() => res.is_err(),
            };
            if closed {
                break;
            }
        }

        self.state.send_replace(WorkerState::Idle);
        info!(
            stage = name,
            cycles = stats.cycles,
            worked = stats.worked,
            failures = stats.failures,
            "worker stopped"
        );
        Ok(stats)
    }

    /// Run on the tokio runtime, returning a handle for status and join.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> WorkerHandle {
        let stage = self.stage.name();
        let state = self.state();
        let task = tokio::spawn(self.run(shutdown));
        WorkerHandle { stage, state, task }
    }
}

pub struct WorkerHandle {
    stage: &'static str,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<Result<WorkerStats, WorkerError>>,
}

impl WorkerHandle {
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn is_working(&self) -> bool {
        self.state() == WorkerState::Processing
    }

    pub async fn join(self) -> Result<WorkerStats, WorkerError> {
        match self.task.await {
            Ok(result) => result,
            Err(join) => Err(WorkerError::Panicked {
                stage: self.stage,
                message: panic_message(join),
            }),
        }
    }
}

fn is_transient(err: &WorkerError) -> bool {
    matches!(err, WorkerError::Stage { source, .. } if source.is_transient())
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".into();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
