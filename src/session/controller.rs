// src/session/controller.rs - Session lifecycle state machine
//
//   idle -> initializing -> active -> ending -> ended
//
// Composes the resolver, pointer store, exchange engine, signal tracker and
// metrics synchronizer for one session. All methods take `&self`; internal
// locks are never held across an await.

use std::sync::{Arc, Mutex, MutexGuard};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::exchange::{ExchangeEngine, SendOutcome, Transcript};
use super::metrics::{MetricsSnapshot, MetricsSynchronizer};
use super::resolver::ScenarioResolver;
use super::signals::{SignalSnapshot, SignalTracker};
use super::store::SessionStore;
use super::types::{
    Emotion, Message, ProgressValue, Scenario, Session, SessionAnalysis, SessionStatus,
};
use crate::infra::config::Config;
use crate::infra::errors::SimError;
use crate::remote::SimulationService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Initializing,
    Active,
    Ending,
    Ended,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Active => "active",
            LifecycleState::Ending => "ending",
            LifecycleState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Notifications for whoever renders the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    ExchangeCompleted {
        sequence: u64,
        signals: SignalSnapshot,
    },
    MetricsUpdated(MetricsSnapshot),
    MetricsError(String),
}

type Observer = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Shared services a controller is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub service: Arc<dyn SimulationService>,
    pub resolver: Arc<ScenarioResolver>,
    pub store: Arc<SessionStore>,
}

impl SessionDeps {
    pub fn new(service: Arc<dyn SimulationService>, store: Arc<SessionStore>) -> Self {
        Self {
            resolver: Arc::new(ScenarioResolver::new(Arc::clone(&service))),
            service,
            store,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub scenario: Arc<Scenario>,
    pub session: Session,
    pub resumed: bool,
    pub transcript_len: usize,
}

#[derive(Debug, Clone)]
pub struct EndSummary {
    pub session_id: String,
    pub scenario_id: String,
    pub transcript: Transcript,
    pub elapsed: Duration,
    pub signals: SignalSnapshot,
    pub analysis: Option<SessionAnalysis>,
    /// Whether the remote service confirmed the close in time.
    pub remote_acknowledged: bool,
}

struct Inner {
    lifecycle: LifecycleState,
    scenario_key: Option<String>,
    scenario: Option<Arc<Scenario>>,
    session: Option<Session>,
    signals: SignalSnapshot,
    started: Option<Instant>,
    /// Time the session had already run before this process resumed it.
    carried: Duration,
    resumed: bool,
}

impl Inner {
    fn elapsed(&self) -> Duration {
        self.carried + self.started.map(|s| s.elapsed()).unwrap_or_default()
    }
}

pub struct SessionController {
    deps: SessionDeps,
    exchange: ExchangeEngine,
    tracker: SignalTracker,
    metrics: MetricsSynchronizer,
    end_timeout: Duration,
    welcome_message: String,
    inner: Mutex<Inner>,
    observer: Option<Observer>,
    metrics_errors: Mutex<Option<mpsc::UnboundedReceiver<SimError>>>,
}

impl SessionController {
    pub fn new(deps: SessionDeps, config: &Config) -> Self {
        Self::with_tracker(deps, config, SignalTracker::new(&config.signals))
    }

    pub fn with_tracker(deps: SessionDeps, config: &Config, tracker: SignalTracker) -> Self {
        Self {
            exchange: ExchangeEngine::new(
                Arc::clone(&deps.service),
                config.session.fallback_message.clone(),
            ),
            metrics: MetricsSynchronizer::new(Arc::clone(&deps.service), &config.metrics),
            tracker,
            end_timeout: config.remote.end_timeout(),
            welcome_message: config.session.welcome_message.clone(),
            inner: Mutex::new(Inner {
                lifecycle: LifecycleState::Idle,
                scenario_key: None,
                scenario: None,
                session: None,
                signals: SignalSnapshot::default(),
                started: None,
                carried: Duration::ZERO,
                resumed: false,
            }),
            observer: None,
            metrics_errors: Mutex::new(None),
            deps,
        }
    }

    pub fn with_events(mut self, observer: impl Fn(&SessionEvent) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    // ─── Transitions ────────────────────────────────────────────────────────

    /// Open a session for `scenario_id`: resume the stored one when it is
    /// still live, otherwise create a new one.
    pub async fn open(&self, scenario_id: &str) -> Result<OpenedSession, SimError> {
        self.transition(LifecycleState::Idle, LifecycleState::Initializing, "open a session")?;
        let mut guard = InitGuard {
            controller: self,
            armed: true,
        };

        let opened = self.initialize(scenario_id).await;
        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(scenario = scenario_id, "Session initialization failed: {e}");
                return Err(e);
            }
        };
        guard.armed = false;

        {
            let mut inner = self.lock();
            inner.scenario_key = Some(scenario_id.to_string());
            inner.scenario = Some(Arc::clone(&opened.scenario));
            inner.session = Some(opened.session.clone());
            inner.signals = initial_signals(&opened.scenario);
            inner.started = Some(Instant::now());
            inner.carried = if opened.resumed {
                (Utc::now() - opened.session.started_at).to_std().unwrap_or_default()
            } else {
                Duration::ZERO
            };
            inner.resumed = opened.resumed;
        }
        self.set_state(LifecycleState::Active);
        tracing::info!(
            scenario = scenario_id,
            session = opened.session.id.as_str(),
            resumed = opened.resumed,
            "Session active"
        );

        self.start_metrics(&opened.session.id);
        Ok(opened)
    }

    async fn initialize(&self, scenario_id: &str) -> Result<OpenedSession, SimError> {
        let scenario = self.deps.resolver.resolve(scenario_id).await?;

        let resumed = match self.deps.store.get(scenario_id) {
            Some(pointer) => match self.live_session(scenario_id, &pointer.session_id).await {
                // The session is confirmed live from here on: a transcript
                // failure is fatal and the pointer stays.
                Ok(session) => {
                    let history = self.fetch_history(&session.id).await?;
                    Some((session, history))
                }
                Err(e) if is_pointer_invalid(&e) => {
                    tracing::info!(
                        scenario = scenario_id,
                        session = pointer.session_id.as_str(),
                        "Discarding stale session pointer: {e}"
                    );
                    if let Err(e) = self.deps.store.clear(scenario_id) {
                        tracing::warn!("Failed to persist pointer removal: {e}");
                    }
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let (session, history, was_resumed) = match resumed {
            Some((session, history)) => (session, history, true),
            None => {
                let session = self.deps.service.create_session(&scenario.id).await?;
                if let Err(e) = self.deps.store.put(scenario_id, &session.id) {
                    tracing::warn!("Failed to persist session pointer: {e}");
                }
                tracing::debug!(session = session.id.as_str(), "Created session");
                (session, Vec::new(), false)
            }
        };

        if history.is_empty() {
            self.exchange
                .seed([Message::local_counterpart(&self.welcome_message, Emotion::Neutral)]);
        } else {
            self.exchange.seed(history);
        }

        Ok(OpenedSession {
            scenario,
            session,
            resumed: was_resumed,
            transcript_len: self.exchange.len(),
        })
    }

    /// Fetch the pointed-to session. Only this lookup can invalidate the
    /// pointer: not found, or no longer active.
    async fn live_session(&self, scenario_id: &str, session_id: &str) -> Result<Session, SimError> {
        let session = self.deps.service.get_session(session_id).await?;
        if !session.is_active() {
            return Err(SimError::StalePointer {
                scenario_id: scenario_id.to_string(),
                session_id: session_id.to_string(),
            });
        }
        Ok(session)
    }

    async fn fetch_history(&self, session_id: &str) -> Result<Vec<Message>, SimError> {
        let mut history = Vec::new();
        let mut page = Some(1);
        while let Some(n) = page {
            let fetched = self.deps.service.get_messages(session_id, n).await.map_err(|e| {
                tracing::warn!(session = session_id, "Transcript fetch failed for a live session: {e}");
                e
            })?;
            history.extend(fetched.messages);
            page = fetched.next_page.filter(|next| *next > n);
        }
        tracing::debug!(session = session_id, "Restored {} message(s)", history.len());
        Ok(history)
    }

    fn start_metrics(&self, session_id: &str) {
        let observer = self.observer.clone();
        let started = self.metrics.start(session_id, move |snapshot| {
            if let Some(ref observer) = observer {
                observer(&SessionEvent::MetricsUpdated(snapshot.clone()));
            }
        });

        let mut errors = match started {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!("Metrics polling not started: {e}");
                return;
            }
        };

        match self.observer.clone() {
            // Forward to the observer; the channel closes when polling stops.
            Some(observer) => {
                tokio::spawn(async move {
                    while let Some(e) = errors.recv().await {
                        observer(&SessionEvent::MetricsError(e.to_string()));
                    }
                });
            }
            None => {
                *self.metrics_errors.lock().unwrap_or_else(|p| p.into_inner()) = Some(errors);
            }
        }
    }

    /// Send one user message. Signals move only on a delivered exchange.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, SimError> {
        let session = {
            let inner = self.lock();
            match (inner.lifecycle, inner.session.as_ref()) {
                (LifecycleState::Active, Some(session)) => session.clone(),
                (state, _) => return Err(SimError::invalid_state("send a message", state)),
            }
        };

        let outcome = self.exchange.send(&session, text).await?;

        if let SendOutcome::Delivered(ref exchange) = outcome {
            let signals = {
                let mut inner = self.lock();
                if inner.lifecycle != LifecycleState::Active {
                    return Err(SimError::invalid_state("apply an exchange", inner.lifecycle));
                }
                let next = self.tracker.update(&inner.signals, exchange);
                inner.signals = next.clone();
                next
            };
            self.emit(SessionEvent::ExchangeCompleted {
                sequence: exchange.sequence,
                signals,
            });
        }
        Ok(outcome)
    }

    /// End the session. Polling stops first; the remote close is best-effort
    /// and bounded by the end timeout. Always reaches `ended`.
    pub async fn end(&self) -> Result<EndSummary, SimError> {
        self.transition(LifecycleState::Active, LifecycleState::Ending, "end the session")?;
        self.metrics.stop();
        // A send still awaiting its reply can no longer touch the transcript.
        self.exchange.close();

        let (session_id, scenario_key) = {
            let inner = self.lock();
            (
                inner.session.as_ref().map(|s| s.id.clone()).unwrap_or_default(),
                inner.scenario_key.clone().unwrap_or_default(),
            )
        };

        let closed =
            tokio::time::timeout(self.end_timeout, self.deps.service.end_session(&session_id)).await;
        let (analysis, remote_acknowledged) = match closed {
            Ok(Ok(ack)) => (ack.analysis, true),
            Ok(Err(e)) => {
                tracing::warn!(session = session_id.as_str(), "Remote close failed: {e}");
                (None, false)
            }
            Err(_) => {
                tracing::warn!(
                    session = session_id.as_str(),
                    "Remote close timed out after {:?}",
                    self.end_timeout
                );
                (None, false)
            }
        };

        if let Err(e) = self.deps.store.clear(&scenario_key) {
            tracing::warn!("Failed to persist pointer removal: {e}");
        }

        let (elapsed, signals) = {
            let mut inner = self.lock();
            if let Some(ref mut session) = inner.session {
                session.status = SessionStatus::Ended;
            }
            (
                inner.elapsed(),
                inner.signals.clone(),
            )
        };
        self.set_state(LifecycleState::Ended);
        tracing::info!(session = session_id.as_str(), "Session ended");

        Ok(EndSummary {
            session_id,
            scenario_id: scenario_key,
            transcript: self.exchange.transcript(),
            elapsed,
            signals,
            analysis,
            remote_acknowledged,
        })
    }

    /// Fetch the post-hoc analysis of an ended session, for when the close
    /// acknowledgement did not carry one.
    pub async fn analysis(&self) -> Result<SessionAnalysis, SimError> {
        let session_id = {
            let inner = self.lock();
            match (inner.lifecycle, inner.session.as_ref()) {
                (LifecycleState::Ended, Some(session)) => session.id.clone(),
                (state, _) => return Err(SimError::invalid_state("fetch the analysis", state)),
            }
        };
        self.deps.service.get_analysis(&session_id).await
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn state(&self) -> LifecycleState {
        self.lock().lifecycle
    }

    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn scenario(&self) -> Option<Arc<Scenario>> {
        self.lock().scenario.clone()
    }

    pub fn was_resumed(&self) -> bool {
        self.lock().resumed
    }

    pub fn signals(&self) -> SignalSnapshot {
        self.lock().signals.clone()
    }

    pub fn transcript(&self) -> Transcript {
        self.exchange.transcript()
    }

    pub fn latest_metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.latest()
    }

    pub fn fresh_metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.fresh()
    }

    pub fn metrics_validity(&self) -> Duration {
        self.metrics.validity()
    }

    /// Session run time, including time before a resume.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed()
    }

    pub fn tracker_seed(&self) -> u64 {
        self.tracker.seed()
    }

    /// Metrics failures since the last call. Empty when an observer is
    /// attached, since those go to the observer.
    pub fn drain_metrics_errors(&self) -> Vec<SimError> {
        let mut slot = self.metrics_errors.lock().unwrap_or_else(|p| p.into_inner());
        let mut drained = Vec::new();
        if let Some(ref mut rx) = *slot {
            while let Ok(e) = rx.try_recv() {
                drained.push(e);
            }
        }
        drained
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn transition(
        &self,
        from: LifecycleState,
        to: LifecycleState,
        operation: &'static str,
    ) -> Result<(), SimError> {
        {
            let mut inner = self.lock();
            if inner.lifecycle != from {
                return Err(SimError::invalid_state(operation, inner.lifecycle));
            }
            inner.lifecycle = to;
        }
        self.emit(SessionEvent::StateChanged { from, to });
        Ok(())
    }

    fn set_state(&self, to: LifecycleState) {
        let from = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.lifecycle, to)
        };
        if from != to {
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(ref observer) = self.observer {
            observer(&event);
        }
    }
}

/// Puts the controller back to idle if initialization does not finish,
/// including when the `open` future is dropped.
struct InitGuard<'a> {
    controller: &'a SessionController,
    armed: bool,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.set_state(LifecycleState::Idle);
        }
    }
}

fn is_pointer_invalid(e: &SimError) -> bool {
    e.is_not_found() || matches!(e.root(), SimError::StalePointer { .. })
}

/// 50/50 signals, with every scenario objective registered as not started.
fn initial_signals(scenario: &Scenario) -> SignalSnapshot {
    let mut signals = SignalSnapshot::default();
    let objectives = scenario
        .objectives
        .iter()
        .map(|o| (o.clone(), ProgressValue::Done(false)))
        .collect();
    signals.objectives.merge(&objectives, 0);
    signals
}
