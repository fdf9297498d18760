// src/session/signals.rs - Session-quality signals derived from each exchange
//
// Tone follows the counterpart's emotion; alignment follows the shape of the
// user's message. Both live in [0, 100] and start at 50.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::exchange::Exchange;
use super::types::{Emotion, ObjectiveProgress};
use crate::infra::config::SignalsConfig;

pub const INITIAL_SIGNAL: u8 = 50;

const SKEPTICAL_PENALTY: i32 = 15;
const SKEPTICAL_FLOOR: i32 = 20;
const POSITIVE_BOOST: i32 = 10;
const POSITIVE_CAP: i32 = 90;
const TONE_DRIFT: i32 = 5;

const ALIGNMENT_BOOST: i32 = 5;
const ALIGNMENT_CAP: i32 = 100;
const ALIGNMENT_PENALTY: i32 = 3;
const ALIGNMENT_FLOOR: i32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct SignalSnapshot {
    pub emotional_tone: u8,
    pub strategic_alignment: u8,
    pub objectives: ObjectiveProgress,
    /// Sequence of the last exchange folded in.
    pub last_sequence: u64,
}

impl Default for SignalSnapshot {
    fn default() -> Self {
        Self {
            emotional_tone: INITIAL_SIGNAL,
            strategic_alignment: INITIAL_SIGNAL,
            objectives: ObjectiveProgress::new(),
            last_sequence: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalTracker {
    seed: u64,
    min_strategic_length: usize,
    short_message_length: usize,
    strategy_terms: Vec<String>,
}

impl SignalTracker {
    /// Tracker from config. Without a configured seed one is drawn at random.
    pub fn new(config: &SignalsConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        Self::with_seed(config, seed)
    }

    pub fn with_seed(config: &SignalsConfig, seed: u64) -> Self {
        Self {
            seed,
            min_strategic_length: config.min_strategic_length,
            short_message_length: config.short_message_length,
            strategy_terms: config
                .strategy_terms
                .iter()
                .map(|t| t.to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Fold one exchange into the prior snapshot. Pure: the same prior,
    /// exchange and seed always give the same result.
    pub fn update(&self, prior: &SignalSnapshot, exchange: &Exchange) -> SignalSnapshot {
        let tone = self.next_tone(prior.emotional_tone, exchange);
        let alignment = self.next_alignment(prior.strategic_alignment, &exchange.user_message.content);

        let mut objectives = prior.objectives.clone();
        if let Some(ref update) = exchange.objective_progress {
            objectives.merge(update, exchange.sequence);
        }

        SignalSnapshot {
            emotional_tone: clamp_signal(tone),
            strategic_alignment: clamp_signal(alignment),
            objectives,
            last_sequence: prior.last_sequence.max(exchange.sequence),
        }
    }

    fn next_tone(&self, prior: u8, exchange: &Exchange) -> i32 {
        let tone = i32::from(prior);
        match exchange.counterpart_message.emotion {
            Some(Emotion::Skeptical) => {
                if tone > SKEPTICAL_FLOOR {
                    (tone - SKEPTICAL_PENALTY).max(SKEPTICAL_FLOOR)
                } else {
                    tone
                }
            }
            Some(Emotion::Positive) => {
                if tone < POSITIVE_CAP {
                    (tone + POSITIVE_BOOST).min(POSITIVE_CAP)
                } else {
                    tone
                }
            }
            _ => tone + tone_drift(self.seed, exchange.sequence),
        }
    }

    fn next_alignment(&self, prior: u8, text: &str) -> i32 {
        let mut alignment = i32::from(prior);
        let chars = text.chars().count();

        if chars >= self.min_strategic_length && self.mentions_strategy(text) && alignment < ALIGNMENT_CAP {
            alignment = (alignment + ALIGNMENT_BOOST).min(ALIGNMENT_CAP);
        }
        if chars < self.short_message_length && alignment > ALIGNMENT_FLOOR {
            alignment = (alignment - ALIGNMENT_PENALTY).max(ALIGNMENT_FLOOR);
        }
        alignment
    }

    fn mentions_strategy(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.strategy_terms.iter().any(|t| lowered.contains(t.as_str()))
    }
}

/// Tone drift for a neutral-ish reply, in [-5, 5]. Deterministic in
/// `(seed, sequence)`.
pub fn tone_drift(seed: u64, sequence: u64) -> i32 {
    let mut rng = StdRng::seed_from_u64(seed ^ sequence.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    rng.gen_range(-TONE_DRIFT..=TONE_DRIFT)
}

fn clamp_signal(value: i32) -> u8 {
    // Clamped into u8 range first, so the cast is lossless.
    value.clamp(0, 100) as u8
}
