// src/session/exchange.rs - Turn-by-turn message exchange and the transcript
//
// One remote round trip per send. The transcript only grows: both halves of
// an exchange are appended together, or a single fallback reply on failure.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::single_flight::InFlightSet;
use super::types::{Emotion, Message, ProgressValue, Sender, Session, SessionStatus};
use crate::infra::errors::SimError;
use crate::remote::SimulationService;

/// Ordered, append-only message log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

}

/// A completed exchange, tagged with its position in the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub user_message: Message,
    pub counterpart_message: Message,
    pub objective_progress: Option<BTreeMap<String, ProgressValue>>,
    pub sequence: u64,
}

#[derive(Debug)]
pub enum SendOutcome {
    Delivered(Exchange),
    /// The remote call failed. `message` is the placeholder reply that was
    /// appended in its place.
    Fallback { message: Message, error: SimError },
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered(_))
    }

    pub fn error(&self) -> Option<&SimError> {
        match self {
            SendOutcome::Delivered(_) => None,
            SendOutcome::Fallback { error, .. } => Some(error),
        }
    }
}

pub struct ExchangeEngine {
    service: Arc<dyn SimulationService>,
    transcript: Mutex<Transcript>,
    in_flight: InFlightSet<String>,
    sequence: AtomicU64,
    /// Set under the transcript lock; appends check it under the same lock.
    closed: AtomicBool,
    fallback_text: String,
}

impl ExchangeEngine {
    pub fn new(service: Arc<dyn SimulationService>, fallback_text: impl Into<String>) -> Self {
        Self {
            service,
            transcript: Mutex::new(Transcript::new()),
            in_flight: InFlightSet::new(),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            fallback_text: fallback_text.into(),
        }
    }

    /// Send one user utterance.
    ///
    /// Precondition failures (empty text, inactive session, a send already
    /// outstanding for the session) return `Err` and leave the transcript
    /// untouched. A remote failure returns `Ok(SendOutcome::Fallback)`.
    pub async fn send(&self, session: &Session, text: &str) -> Result<SendOutcome, SimError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SimError::EmptyMessage);
        }
        if !session.is_active() || self.is_closed() {
            return Err(SimError::invalid_state("send a message", session.status));
        }
        let _guard = self
            .in_flight
            .try_begin(session.id.clone())
            .ok_or_else(|| SimError::SendInFlight {
                session_id: session.id.clone(),
            })?;

        let result = self
            .service
            .send_message(&session.id, text)
            .await
            .and_then(|r| {
                if r.user_message.sender != Sender::User
                    || r.counterpart_message.sender != Sender::Counterpart
                {
                    return Err(SimError::remote(format!(
                        "malformed exchange: senders were {:?}/{:?}",
                        r.user_message.sender, r.counterpart_message.sender
                    )));
                }
                Ok(r)
            });

        match result {
            Ok(r) => {
                let sequence = {
                    let mut transcript = self.open_transcript(session)?;
                    transcript.push(r.user_message.clone());
                    transcript.push(r.counterpart_message.clone());
                    self.sequence.fetch_add(1, Ordering::SeqCst) + 1
                };
                tracing::debug!(session = session.id.as_str(), sequence, "Exchange delivered");
                Ok(SendOutcome::Delivered(Exchange {
                    user_message: r.user_message,
                    counterpart_message: r.counterpart_message,
                    objective_progress: r.objective_progress,
                    sequence,
                }))
            }
            Err(error) => {
                tracing::warn!(session = session.id.as_str(), "Send failed: {error}");
                let message = Message::local_counterpart(&self.fallback_text, Emotion::Neutral);
                self.open_transcript(session)?.push(message.clone());
                Ok(SendOutcome::Fallback { message, error })
            }
        }
    }

    /// Stop accepting appends. A send that completes afterwards is
    /// discarded and reported as `InvalidState`.
    pub fn close(&self) {
        let _transcript = self.lock();
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Append restored or locally synthesized messages.
    pub fn seed(&self, messages: impl IntoIterator<Item = Message>) {
        self.lock().extend(messages);
    }

    pub fn transcript(&self) -> Transcript {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sequence number of the last delivered exchange, 0 if none.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn open_transcript(&self, session: &Session) -> Result<MutexGuard<'_, Transcript>, SimError> {
        let transcript = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(session = session.id.as_str(), "Discarding reply that arrived after close");
            return Err(SimError::invalid_state("record a reply", SessionStatus::Ended));
        }
        Ok(transcript)
    }

    fn lock(&self) -> MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap_or_else(|p| p.into_inner())
    }
}
