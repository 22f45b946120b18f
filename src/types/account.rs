//! Per-participant running state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Engagement, Tier, Tokens};
use crate::QUALITY_TREND_LEN;

/// Running balance and history for one participant.
/// Created lazily on the first credited engagement, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantAccount {
    pub participant: String,
    pub balance: Tokens,
    /// Engagement count per tier, indexed by [`Tier::index`]
    pub tier_counts: [u64; 5],
    pub engagements: u64,
    /// Lifetime sum of novelty × multiplier
    pub novelty_weighted_score: f64,
    /// Most recent tiers, oldest first
    pub quality_trend: Vec<Tier>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ParticipantAccount {
    pub fn new(participant: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            participant: participant.into(),
            balance: Tokens::ZERO,
            tier_counts: [0; 5],
            engagements: 0,
            novelty_weighted_score: 0.0,
            quality_trend: Vec::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Apply one committed engagement
    pub fn credit(&mut self, engagement: &Engagement) {
        self.balance += engagement.tokens;
        self.tier_counts[engagement.tier.index()] += 1;
        self.engagements += 1;
        self.novelty_weighted_score += engagement.novelty_score * engagement.multiplier;
        self.quality_trend.push(engagement.tier);
        if self.quality_trend.len() > QUALITY_TREND_LEN {
            let excess = self.quality_trend.len() - QUALITY_TREND_LEN;
            self.quality_trend.drain(..excess);
        }
        if engagement.timestamp > self.last_seen {
            self.last_seen = engagement.timestamp;
        }
    }

    pub fn count(&self, tier: Tier) -> u64 {
        self.tier_counts[tier.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engagement(tier: Tier, micro: u64) -> Engagement {
        Engagement {
            id: "e".to_string(),
            participant: "bob".to_string(),
            session: None,
            text: "text".to_string(),
            timestamp: Utc::now(),
            tier,
            multiplier: tier.multiplier(),
            depth_score: 0.5,
            novelty_score: 0.5,
            kindness_score: 0.0,
            tokens: Tokens(micro),
        }
    }

    #[test]
    fn test_credit_updates_counts_and_balance() {
        let mut account = ParticipantAccount::new("bob", Utc::now());
        account.credit(&engagement(Tier::Clarity, 3_500_000));
        account.credit(&engagement(Tier::Genuine, 1_000_000));
        assert_eq!(account.balance, Tokens(4_500_000));
        assert_eq!(account.count(Tier::Clarity), 1);
        assert_eq!(account.count(Tier::Genuine), 1);
        assert_eq!(account.engagements, 2);
        assert!((account.novelty_weighted_score - 2.25).abs() < 1e-9);
    }

    #[test]
    fn test_quality_trend_is_capped() {
        let mut account = ParticipantAccount::new("bob", Utc::now());
        for _ in 0..QUALITY_TREND_LEN + 3 {
            account.credit(&engagement(Tier::Genuine, 1));
        }
        account.credit(&engagement(Tier::Breakthrough, 1));
        assert_eq!(account.quality_trend.len(), QUALITY_TREND_LEN);
        assert_eq!(account.quality_trend.last(), Some(&Tier::Breakthrough));
    }
}
