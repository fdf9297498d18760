// src/session/types.rs - Domain types: scenarios, sessions, transcript messages, progress
//
// Wire quirks of the simulation API are absorbed here: numeric ids become
// strings, `ai` is the counterpart, `completed`/`abandoned` sessions are ended,
// difficulty accepts the Spanish labels the service ships with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ─── Identifiers ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(i64),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Text(s) => s,
            WireId::Number(n) => n.to_string(),
        }
    }
}

fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    WireId::deserialize(d).map(String::from)
}

fn opt_id_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Option::<WireId>::deserialize(d).map(|id| id.map(String::from))
}

// ─── Scenario ───────────────────────────────────────────────────────────────

/// Difficulty tier, ordered from easiest to hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Expert => "expert",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "principiante" => Ok(Difficulty::Beginner),
            "intermediate" | "intermedio" => Ok(Difficulty::Intermediate),
            "advanced" | "avanzado" => Ok(Difficulty::Advanced),
            "expert" | "experto" => Ok(Difficulty::Expert),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

impl TryFrom<String> for Difficulty {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Difficulty> for String {
    fn from(d: Difficulty) -> Self {
        d.as_str().to_string()
    }
}

/// A training scenario. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: String,
    pub difficulty: Difficulty,
    /// Free-form estimate such as "20-30 min".
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub participants: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
}

// ─── Session ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "ended", alias = "completed", alias = "abandoned")]
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => f.write_str("active"),
            SessionStatus::Ended => f.write_str("ended"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "scenario", default, deserialize_with = "opt_id_string")]
    pub scenario_id: Option<String>,
    pub status: SessionStatus,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

// ─── Messages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "counterpart", alias = "ai", alias = "assistant")]
    Counterpart,
}

/// Emotion tag attached to counterpart replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Positive,
    Skeptical,
    Confident,
    Urgent,
    Concerned,
    Encouraging,
    Collaborative,
    Hesitant,
    Negative,
    Frustrated,
    Aggressive,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Emotion::Neutral => "neutral",
            Emotion::Positive => "positive",
            Emotion::Skeptical => "skeptical",
            Emotion::Confident => "confident",
            Emotion::Urgent => "urgent",
            Emotion::Concerned => "concerned",
            Emotion::Encouraging => "encouraging",
            Emotion::Collaborative => "collaborative",
            Emotion::Hesitant => "hesitant",
            Emotion::Negative => "negative",
            Emotion::Frustrated => "frustrated",
            Emotion::Aggressive => "aggressive",
            Emotion::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub sender: Sender,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub emotion: Option<Emotion>,
}

impl Message {
    /// A counterpart message produced on this side (welcome, fallback).
    pub fn local_counterpart(content: impl Into<String>, emotion: Emotion) -> Self {
        Self {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            sender: Sender::Counterpart,
            content: content.into(),
            timestamp: Utc::now(),
            emotion: Some(emotion),
        }
    }

    pub fn is_local(&self) -> bool {
        self.id.starts_with("local-")
    }
}

// ─── Objective progress ─────────────────────────────────────────────────────

/// Percentage at which a numeric progress value counts as completed.
pub const COMPLETION_THRESHOLD: f64 = 80.0;

/// Server hint for one objective: a flag or a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressValue {
    Done(bool),
    Percent(f64),
}

impl ProgressValue {
    pub fn percent(&self) -> f64 {
        match self {
            ProgressValue::Done(true) => 100.0,
            ProgressValue::Done(false) => 0.0,
            ProgressValue::Percent(p) => p.clamp(0.0, 100.0),
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            ProgressValue::Done(done) => *done,
            ProgressValue::Percent(_) => self.percent() >= COMPLETION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEntry {
    pub value: ProgressValue,
    /// Exchange sequence that wrote this value.
    pub sequence: u64,
}

/// Running objective completion, keyed by objective text or index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveProgress {
    entries: BTreeMap<String, ProgressEntry>,
}

impl ObjectiveProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sparse last-write-wins merge. Keys absent from `update` are untouched;
    /// an entry written by a later exchange is never overwritten by an
    /// earlier one. Returns how many keys were written.
    pub fn merge(&mut self, update: &BTreeMap<String, ProgressValue>, sequence: u64) -> usize {
        let mut written = 0;
        for (key, value) in update {
            match self.entries.get(key) {
                Some(existing) if existing.sequence > sequence => {
                    tracing::debug!(
                        objective = key.as_str(),
                        stored = existing.sequence,
                        incoming = sequence,
                        "Ignoring out-of-order objective update"
                    );
                }
                _ => {
                    self.entries.insert(
                        key.clone(),
                        ProgressEntry {
                            value: *value,
                            sequence,
                        },
                    );
                    written += 1;
                }
            }
        }
        written
    }

    pub fn get(&self, key: &str) -> Option<ProgressValue> {
        self.entries.get(key).map(|e| e.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProgressEntry)> {
        self.entries.iter()
    }

    pub fn completed_count(&self) -> usize {
        self.entries.values().filter(|e| e.value.is_complete()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Live metrics payload ───────────────────────────────────────────────────

/// Live metrics as computed by the remote service. Every field is optional on
/// the wire so partial payloads still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveMetrics {
    pub session_kpis: SessionKpis,
    pub emotional_metrics: EmotionalMetrics,
    pub business_metrics: BusinessMetrics,
    pub progress_metrics: ProgressMetrics,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionKpis {
    pub duration_minutes: u32,
    pub total_messages: u32,
    pub user_messages: u32,
    pub ai_messages: u32,
    pub objectives_progress: ObjectivesSummary,
    pub momentum: Momentum,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectivesSummary {
    pub completed: u32,
    pub total: u32,
    pub percentage: u32,
    pub details: Vec<ObjectiveDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveDetail {
    pub text: String,
    pub progress_percentage: u32,
    pub is_completed: bool,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Momentum {
    pub level: String,
    pub trend: String,
    pub score: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionalMetrics {
    pub emotional_tone: u32,
    pub tone_trend: String,
    pub dominant_emotion: String,
    pub urgency_level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessMetrics {
    pub financial_mentions: Vec<String>,
    pub stakeholders: Vec<String>,
    pub risk_level: String,
    pub business_impact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressMetrics {
    pub engagement_level: String,
    pub information_density: String,
}

// ─── Post-hoc analysis ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionAnalysis {
    pub overall_score: i32,
    pub strategic_score: i32,
    pub communication_score: i32,
    pub emotional_score: i32,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub recommendations: Vec<String>,
    pub key_moments: Vec<KeyMoment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyMoment {
    pub time: String,
    pub message: String,
    pub impact: String,
    pub analysis: String,
}
