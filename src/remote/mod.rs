// src/remote/mod.rs - Remote simulation service port

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::infra::errors::SimError;
use crate::session::types::{
    Difficulty, LiveMetrics, Message, ProgressValue, Scenario, Session, SessionAnalysis,
};

/// Every remote operation the orchestrator consumes. The counterpart's
/// reply generation lives entirely behind `send_message`.
#[async_trait]
pub trait SimulationService: Send + Sync {
    async fn list_scenarios(&self, filter: &ScenarioFilter) -> Result<Vec<Scenario>, SimError>;

    async fn get_scenario(&self, scenario_id: &str) -> Result<Scenario, SimError>;

    async fn create_session(&self, scenario_id: &str) -> Result<Session, SimError>;

    async fn get_session(&self, session_id: &str) -> Result<Session, SimError>;

    /// Pages are 1-based. Services that return the whole transcript at once
    /// answer page 1 with no `next_page`.
    async fn get_messages(&self, session_id: &str, page: u32) -> Result<MessagePage, SimError>;

    async fn send_message(&self, session_id: &str, text: &str) -> Result<ExchangeResult, SimError>;

    async fn end_session(&self, session_id: &str) -> Result<EndSessionAck, SimError>;

    async fn live_metrics(&self, session_id: &str) -> Result<LiveMetrics, SimError>;

    /// Post-hoc analysis of an ended session, generated on demand.
    async fn get_analysis(&self, session_id: &str) -> Result<SessionAnalysis, SimError>;
}

/// Filter criteria for scenario listing. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioFilter {
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub search: Option<String>,
}

impl ScenarioFilter {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.difficulty.is_none() && self.search.is_none()
    }

    /// Stable textual form, used as an in-flight registry key.
    pub fn cache_key(&self) -> String {
        format!(
            "category={}&difficulty={}&search={}",
            self.category.as_deref().unwrap_or(""),
            self.difficulty.map(|d| d.as_str()).unwrap_or(""),
            self.search.as_deref().unwrap_or("")
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Next page number, if the transcript continues.
    pub next_page: Option<u32>,
}

/// Result of one exchange as reported by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExchangeResult {
    pub user_message: Message,
    #[serde(alias = "ai_message")]
    pub counterpart_message: Message,
    #[serde(default)]
    pub objective_progress: Option<BTreeMap<String, ProgressValue>>,
}

/// Acknowledgement of a closed session, with post-hoc analysis when the
/// service produced one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EndSessionAck {
    #[serde(default, rename = "simulation")]
    pub session: Option<Session>,
    #[serde(default)]
    pub analysis: Option<SessionAnalysis>,
}
