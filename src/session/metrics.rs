// src/session/metrics.rs - Live metrics polling
//
// One spawned task per session: fetch immediately, then on every interval tick.
// Ticks are aligned to the start time; any that land while a fetch is
// outstanding are dropped, so the next request waits for the next aligned tick.
// Stop is enforced twice: the cancellation token drops an in-flight fetch, and
// the generation gate rejects any result that slips past it.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::types::LiveMetrics;
use crate::infra::config::MetricsConfig;
use crate::infra::errors::SimError;
use crate::remote::SimulationService;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub metrics: LiveMetrics,
    pub fetched_at: DateTime<Utc>,
    received: Instant,
}

impl MetricsSnapshot {
    pub fn new(metrics: LiveMetrics) -> Self {
        Self {
            metrics,
            fetched_at: Utc::now(),
            received: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.received.elapsed()
    }

    pub fn is_fresh(&self, validity: Duration) -> bool {
        self.age() <= validity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Polling,
    Stopped,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Polling => write!(f, "polling"),
            SyncState::Stopped => write!(f, "stopped"),
        }
    }
}

struct Worker {
    state: SyncState,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

pub struct MetricsSynchronizer {
    service: Arc<dyn SimulationService>,
    interval: Duration,
    validity: Duration,
    worker: Mutex<Worker>,
    /// Bumped by `stop()`. Callbacks run while holding it.
    gate: Arc<Mutex<u64>>,
    latest: Arc<Mutex<Option<MetricsSnapshot>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl MetricsSynchronizer {
    pub fn new(service: Arc<dyn SimulationService>, config: &MetricsConfig) -> Self {
        Self::with_timing(service, config.poll_interval(), config.validity())
    }

    pub fn with_timing(
        service: Arc<dyn SimulationService>,
        interval: Duration,
        validity: Duration,
    ) -> Self {
        Self {
            service,
            interval: interval.max(Duration::from_millis(1)),
            validity,
            worker: Mutex::new(Worker {
                state: SyncState::Idle,
                cancel: None,
                task: None,
            }),
            gate: Arc::new(Mutex::new(0)),
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Begin polling `session_id`. `on_update` runs after every successful
    /// fetch and must not call back into `stop()`. Failed fetches arrive on
    /// the returned channel; polling carries on regardless.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(
        &self,
        session_id: &str,
        on_update: F,
    ) -> Result<mpsc::UnboundedReceiver<SimError>, SimError>
    where
        F: Fn(&MetricsSnapshot) + Send + Sync + 'static,
    {
        let mut worker = lock(&self.worker);
        if worker.state != SyncState::Idle {
            return Err(SimError::invalid_state("start metrics polling", worker.state));
        }

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let generation = *lock(&self.gate);

        let task = tokio::spawn(poll_loop(PollContext {
            service: Arc::clone(&self.service),
            session_id: session_id.to_string(),
            interval: self.interval,
            cancel: cancel.clone(),
            gate: Arc::clone(&self.gate),
            generation,
            latest: Arc::clone(&self.latest),
            errors: errors_tx,
            on_update: Box::new(on_update),
        }));

        worker.state = SyncState::Polling;
        worker.cancel = Some(cancel);
        worker.task = Some(task);
        tracing::debug!(session = session_id, "Metrics polling started every {:?}", self.interval);
        Ok(errors_rx)
    }

    /// Stop polling. Once this returns no further `on_update` call happens.
    /// Idempotent.
    pub fn stop(&self) {
        let (cancel, task) = {
            let mut worker = lock(&self.worker);
            if worker.state == SyncState::Stopped {
                return;
            }
            worker.state = SyncState::Stopped;
            (worker.cancel.take(), worker.task.take())
        };

        // Waits out a callback already running.
        *lock(&self.gate) += 1;

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        // The task exits on its own once cancelled.
        drop(task);
        tracing::debug!("Metrics polling stopped");
    }

    pub fn state(&self) -> SyncState {
        lock(&self.worker).state
    }

    /// Last successful snapshot, if any.
    pub fn latest(&self) -> Option<MetricsSnapshot> {
        lock(&self.latest).clone()
    }

    /// Last snapshot if it is still within the validity window.
    pub fn fresh(&self) -> Option<MetricsSnapshot> {
        self.latest().filter(|s| s.is_fresh(self.validity))
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }
}

impl Drop for MetricsSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollContext {
    service: Arc<dyn SimulationService>,
    session_id: String,
    interval: Duration,
    cancel: CancellationToken,
    gate: Arc<Mutex<u64>>,
    generation: u64,
    latest: Arc<Mutex<Option<MetricsSnapshot>>>,
    errors: mpsc::UnboundedSender<SimError>,
    on_update: Box<dyn Fn(&MetricsSnapshot) + Send + Sync>,
}

async fn poll_loop(ctx: PollContext) {
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let fetched = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = ctx.service.live_metrics(&ctx.session_id) => result,
        };

        match fetched {
            Ok(metrics) => {
                let snapshot = MetricsSnapshot::new(metrics);
                let current = lock(&ctx.gate);
                if *current != ctx.generation {
                    tracing::debug!(session = ctx.session_id.as_str(), "Discarding metrics fetched after stop");
                    break;
                }
                *lock(&ctx.latest) = Some(snapshot.clone());
                (ctx.on_update)(&snapshot);
            }
            Err(e) => {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                tracing::warn!(session = ctx.session_id.as_str(), "Metrics poll failed: {e}");
                // Receiver may be gone; polling continues either way.
                let _ = ctx.errors.send(e);
            }
        }

        deadline = next_deadline(deadline, ctx.interval, Instant::now());
    }
}

/// The first aligned tick after `last` that has not already passed.
fn next_deadline(last: Instant, interval: Duration, now: Instant) -> Instant {
    let elapsed = now.saturating_duration_since(last).as_nanos();
    let ticks = elapsed.div_ceil(interval.as_nanos().max(1)).max(1);
    last + interval * u32::try_from(ticks).unwrap_or(u32::MAX)
}
