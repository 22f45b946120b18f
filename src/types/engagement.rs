//! Engagements: one scored interaction each

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{QualityScore, ReasonCode, Tier, Tokens};

/// A turn that has been classified but not yet issued against the curve
#[derive(Debug, Clone)]
pub struct ScoredTurn {
    pub id: String,
    pub participant: String,
    pub session: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub score: QualityScore,
}

impl ScoredTurn {
    pub fn new(
        id: impl Into<String>,
        participant: impl Into<String>,
        session: Option<String>,
        text: impl Into<String>,
        score: QualityScore,
    ) -> Self {
        Self {
            id: id.into(),
            participant: participant.into(),
            session,
            text: text.into(),
            timestamp: Utc::now(),
            score,
        }
    }
}

/// One scored, issued engagement. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    /// Idempotency key
    pub id: String,
    pub participant: String,
    pub session: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub tier: Tier,
    pub multiplier: f64,
    pub depth_score: f64,
    pub novelty_score: f64,
    pub kindness_score: f64,
    pub tokens: Tokens,
}

impl Engagement {
    /// Freeze a scored turn with its issued amount
    pub fn from_scored(turn: &ScoredTurn, tokens: Tokens) -> Self {
        Self {
            id: turn.id.clone(),
            participant: turn.participant.clone(),
            session: turn.session.clone(),
            text: turn.text.clone(),
            timestamp: turn.timestamp,
            tier: turn.score.tier,
            multiplier: turn.score.multiplier(),
            depth_score: turn.score.depth_score,
            novelty_score: turn.score.novelty_score,
            kindness_score: turn.score.kindness_score,
            tokens,
        }
    }
}

/// Inbound human submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementRequest {
    pub participant_id: String,
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Client-supplied idempotency key for retries; generated when absent
    #[serde(default)]
    pub engagement_id: Option<String>,
}

impl EngagementRequest {
    pub fn new(participant_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            message: message.into(),
            session_id: None,
            engagement_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_id(mut self, engagement_id: impl Into<String>) -> Self {
        self.engagement_id = Some(engagement_id.into());
        self
    }
}

/// Witnessing an existing thought block with a comment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessRequest {
    pub witness_id: String,
    pub block_digest: String,
    pub comment: String,
    #[serde(default)]
    pub engagement_id: Option<String>,
}

/// What a participant gets back for one engagement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementReceipt {
    pub engagement_id: String,
    pub participant_id: String,
    pub tier: Tier,
    pub multiplier: f64,
    pub depth_score: f64,
    pub novelty_score: f64,
    pub kindness_score: f64,
    pub tokens_awarded: Tokens,
    pub balance: Tokens,
    pub block_index: Option<u64>,
    pub block_digest: Option<String>,
    pub reason: ReasonCode,
    pub message: String,
}

impl EngagementReceipt {
    /// Receipt for a NOISE engagement: nothing issued, nothing recorded
    pub fn noise(id: String, participant: String, score: &QualityScore, balance: Tokens) -> Self {
        Self {
            engagement_id: id,
            participant_id: participant,
            tier: Tier::Noise,
            multiplier: 0.0,
            depth_score: score.depth_score,
            novelty_score: score.novelty_score,
            kindness_score: score.kindness_score,
            tokens_awarded: Tokens::ZERO,
            balance,
            block_index: None,
            block_digest: None,
            reason: score.reason,
            message: Tier::Noise.message().to_string(),
        }
    }
}
