// tests/common/mod.rs - In-memory simulation service for integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use simcoach::infra::config::Config;
use simcoach::infra::errors::{ResourceKind, SimError};
use simcoach::remote::{EndSessionAck, ExchangeResult, MessagePage, ScenarioFilter, SimulationService};
use simcoach::session::store::SessionStore;
use simcoach::session::types::{
    Difficulty, Emotion, LiveMetrics, Message, ProgressValue, Scenario, Sender, Session,
    SessionAnalysis, SessionStatus,
};
use simcoach::session::{SessionController, SessionDeps};

/// A mock service that keeps sessions and transcripts in memory, with
/// switches for failures and delays.
#[derive(Default)]
pub struct MockService {
    pub scenarios: Vec<Scenario>,
    pub sessions: Mutex<HashMap<String, Session>>,
    pub messages: Mutex<HashMap<String, Vec<Message>>>,
    pub page_size: usize,

    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub get_session_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub end_calls: AtomicUsize,
    pub metrics_calls: AtomicUsize,
    pub analysis_calls: AtomicUsize,

    pub list_delay: Mutex<Option<Duration>>,
    pub fail_send: AtomicBool,
    pub fail_get_session: AtomicBool,
    pub end_delay: Mutex<Option<Duration>>,
    pub reply_emotion: Mutex<Option<Emotion>>,
    pub progress: Mutex<Option<BTreeMap<String, ProgressValue>>>,
    pub analysis: Mutex<Option<SessionAnalysis>>,

    /// When set, `send_message` signals `send_entered` and waits on
    /// `send_release` before answering.
    pub hold_sends: AtomicBool,
    pub send_entered: Notify,
    pub send_release: Notify,

    /// Same for `live_metrics`.
    pub hold_metrics: AtomicBool,
    pub metrics_entered: Notify,
    pub metrics_release: Notify,
}

pub fn scenario(id: &str, objectives: &[&str]) -> Scenario {
    Scenario {
        id: id.into(),
        title: format!("Scenario {id}"),
        category: "Leadership".into(),
        difficulty: Difficulty::Advanced,
        duration: "20-30 min".into(),
        description: "Board meeting after a product recall.".into(),
        objectives: objectives.iter().map(|o| o.to_string()).collect(),
        skills: BTreeSet::from(["communication".to_string()]),
        participants: Some("Board chair".into()),
        is_featured: true,
    }
}

pub fn message(id: &str, sender: Sender, content: &str) -> Message {
    Message {
        id: id.into(),
        sender,
        content: content.into(),
        timestamp: Utc::now(),
        emotion: match sender {
            Sender::User => None,
            Sender::Counterpart => Some(Emotion::Neutral),
        },
    }
}

impl MockService {
    pub fn new() -> Self {
        Self {
            scenarios: vec![
                scenario("crisis-leadership", &["Calm the board", "Present a plan"]),
                scenario("negotiation", &["Anchor high"]),
            ],
            page_size: 50,
            ..Default::default()
        }
    }

    /// Register a session as if it had been created earlier.
    pub fn insert_session(&self, id: &str, status: SessionStatus, history: Vec<Message>) {
        self.sessions.lock().unwrap().insert(
            id.into(),
            Session {
                id: id.into(),
                scenario_id: Some("crisis-leadership".into()),
                status,
                started_at: Utc::now(),
            },
        );
        self.messages.lock().unwrap().insert(id.into(), history);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimulationService for MockService {
    async fn list_scenarios(&self, filter: &ScenarioFilter) -> Result<Vec<Scenario>, SimError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .scenarios
            .iter()
            .filter(|s| filter.difficulty.map_or(true, |d| s.difficulty == d))
            .filter(|s| filter.category.as_ref().map_or(true, |c| &s.category == c))
            .cloned()
            .collect())
    }

    async fn get_scenario(&self, scenario_id: &str) -> Result<Scenario, SimError> {
        self.scenarios
            .iter()
            .find(|s| s.id == scenario_id)
            .cloned()
            .ok_or_else(|| SimError::not_found(ResourceKind::Scenario, scenario_id))
    }

    async fn create_session(&self, scenario_id: &str) -> Result<Session, SimError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session {
            id: format!("sim-{n}"),
            scenario_id: Some(scenario_id.into()),
            status: SessionStatus::Active,
            started_at: Utc::now(),
        };
        self.insert_session(&session.id, SessionStatus::Active, Vec::new());
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, SimError> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get_session.load(Ordering::SeqCst) {
            return Err(SimError::RemoteFailure {
                message: "HTTP 503".into(),
                status: Some(503),
                timed_out: false,
            });
        }
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SimError::not_found(ResourceKind::Session, session_id))
    }

    async fn get_messages(&self, session_id: &str, page: u32) -> Result<MessagePage, SimError> {
        let messages = self.messages.lock().unwrap();
        let all = messages
            .get(session_id)
            .ok_or_else(|| SimError::not_found(ResourceKind::Session, session_id))?;
        let start = (page as usize - 1) * self.page_size;
        let end = (start + self.page_size).min(all.len());
        let slice = if start < all.len() { all[start..end].to_vec() } else { Vec::new() };
        Ok(MessagePage {
            messages: slice,
            next_page: (end < all.len()).then_some(page + 1),
        })
    }

    async fn send_message(&self, session_id: &str, text: &str) -> Result<ExchangeResult, SimError> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hold_sends.load(Ordering::SeqCst) {
            self.send_entered.notify_one();
            self.send_release.notified().await;
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(SimError::RemoteFailure {
                message: "HTTP 500".into(),
                status: Some(500),
                timed_out: false,
            });
        }

        let user = message(&format!("u{n}"), Sender::User, text);
        let mut reply = message(&format!("a{n}"), Sender::Counterpart, "Tell me more.");
        reply.emotion = Some(self.reply_emotion.lock().unwrap().unwrap_or(Emotion::Neutral));

        if let Some(history) = self.messages.lock().unwrap().get_mut(session_id) {
            history.push(user.clone());
            history.push(reply.clone());
        }
        Ok(ExchangeResult {
            user_message: user,
            counterpart_message: reply,
            objective_progress: self.progress.lock().unwrap().clone(),
        })
    }

    async fn end_session(&self, session_id: &str) -> Result<EndSessionAck, SimError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.end_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let session = self.sessions.lock().unwrap().get_mut(session_id).map(|s| {
            s.status = SessionStatus::Ended;
            s.clone()
        });
        Ok(EndSessionAck {
            session,
            analysis: self.analysis.lock().unwrap().clone(),
        })
    }

    async fn live_metrics(&self, _session_id: &str) -> Result<LiveMetrics, SimError> {
        let n = self.metrics_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hold_metrics.load(Ordering::SeqCst) {
            self.metrics_entered.notify_one();
            self.metrics_release.notified().await;
        }
        let mut metrics = LiveMetrics::default();
        metrics.session_kpis.total_messages = n as u32;
        Ok(metrics)
    }

    async fn get_analysis(&self, session_id: &str) -> Result<SessionAnalysis, SimError> {
        self.analysis_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.status)
            .ok_or_else(|| SimError::not_found(ResourceKind::Session, session_id))?;
        if status == SessionStatus::Active {
            return Err(SimError::RemoteFailure {
                message: "HTTP 400".into(),
                status: Some(400),
                timed_out: false,
            });
        }
        Ok(self.analysis.lock().unwrap().clone().unwrap_or_default())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.signals.seed = Some(1234);
    config
}

pub fn controller(mock: &Arc<MockService>, store: &Arc<SessionStore>) -> SessionController {
    let service: Arc<dyn SimulationService> = mock.clone();
    SessionController::new(SessionDeps::new(service, Arc::clone(store)), &test_config())
}
