//! Classifier signal types

use serde::{Deserialize, Serialize};
use crate::types::{ReasonCode, Tier};

/// Raw depth signals, each normalized to 0.0-1.0
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySignals {
    /// Word count against the saturation length
    pub length: f64,
    /// Density of reasoning markers (because, therefore, however, ...)
    pub reasoning: f64,
    /// Questions and open inquiry
    pub inquiry: f64,
    /// Mean word length as a proxy for vocabulary
    pub vocabulary: f64,
    /// Multi-sentence structure
    pub structure: f64,
    /// Hostile vocabulary hits (raw count)
    pub hostile_hits: usize,
}

impl QualitySignals {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Output of the quality classifier for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub tier: Tier,
    pub depth_score: f64,
    pub novelty_score: f64,
    pub kindness_score: f64,
    /// Weighted combination the tier bands are applied to
    pub combined: f64,
    /// Hostility/spam indicator; true forces NOISE
    pub hostile: bool,
    pub word_count: usize,
    pub signals: QualitySignals,
    pub reason: ReasonCode,
}

impl QualityScore {
    /// A NOISE score with all signals zeroed
    pub fn noise(reason: ReasonCode, word_count: usize) -> Self {
        Self {
            tier: Tier::Noise,
            depth_score: 0.0,
            novelty_score: 0.0,
            kindness_score: 0.0,
            combined: 0.0,
            hostile: reason.is_spam(),
            word_count,
            signals: QualitySignals::zero(),
            reason,
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.tier.multiplier()
    }

    pub fn is_noise(&self) -> bool {
        self.tier.is_noise()
    }
}
