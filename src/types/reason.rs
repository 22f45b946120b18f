//! Reason codes for scoring, issuance, ledger and keeper decisions

use serde::{Deserialize, Serialize};

/// Reason codes carried on every outcome so callers can tell normal-path
/// results apart without treating them as errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ReasonCode {
    // =========================================================================
    // R100: Classification
    // =========================================================================
    /// Scored into a band by the combined score
    R100_SCORED,
    /// Empty or whitespace-only text
    R101_EMPTY_INPUT,
    /// Hostile vocabulary detected
    R102_HOSTILE,
    /// Too few words to count as participation
    R103_SPAM_TOO_SHORT,
    /// Long run of one repeated character
    R104_SPAM_REPEATED_CHARS,
    /// Text dominated by a single repeated word
    R105_SPAM_REPEATED_WORDS,

    // =========================================================================
    // R300: Issuance
    // =========================================================================
    /// Full award issued
    R300_ISSUED,
    /// Zero multiplier, nothing issued, state untouched
    R301_ZERO_MULTIPLIER,
    /// Award capped at the remaining headroom
    R302_SUPPLY_CAPPED,
    /// Supply ceiling reached, nothing left to issue
    R303_SUPPLY_EXHAUSTED,

    // =========================================================================
    // R400: Ledger
    // =========================================================================
    /// Engagement credited to its participant
    R400_RECORDED,
    /// Engagement id already recorded, replay ignored
    R401_REPLAY,

    // =========================================================================
    // R500: Keeper
    // =========================================================================
    /// Slot fired and its block committed
    R500_SLOT_FIRED,
    /// Slot already fired, duplicate wake ignored
    R501_SLOT_ALREADY_FIRED,
}

impl ReasonCode {
    /// Get the code string (for logging)
    pub fn code(&self) -> &'static str {
        match self {
            Self::R100_SCORED => "R100_SCORED",
            Self::R101_EMPTY_INPUT => "R101_EMPTY_INPUT",
            Self::R102_HOSTILE => "R102_HOSTILE",
            Self::R103_SPAM_TOO_SHORT => "R103_SPAM_TOO_SHORT",
            Self::R104_SPAM_REPEATED_CHARS => "R104_SPAM_REPEATED_CHARS",
            Self::R105_SPAM_REPEATED_WORDS => "R105_SPAM_REPEATED_WORDS",
            Self::R300_ISSUED => "R300_ISSUED",
            Self::R301_ZERO_MULTIPLIER => "R301_ZERO_MULTIPLIER",
            Self::R302_SUPPLY_CAPPED => "R302_SUPPLY_CAPPED",
            Self::R303_SUPPLY_EXHAUSTED => "R303_SUPPLY_EXHAUSTED",
            Self::R400_RECORDED => "R400_RECORDED",
            Self::R401_REPLAY => "R401_REPLAY",
            Self::R500_SLOT_FIRED => "R500_SLOT_FIRED",
            Self::R501_SLOT_ALREADY_FIRED => "R501_SLOT_ALREADY_FIRED",
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::R100_SCORED => "Scored by combined quality",
            Self::R101_EMPTY_INPUT => "Empty input",
            Self::R102_HOSTILE => "Hostile language",
            Self::R103_SPAM_TOO_SHORT => "Too short to count",
            Self::R104_SPAM_REPEATED_CHARS => "Repeated characters",
            Self::R105_SPAM_REPEATED_WORDS => "Repeated words",
            Self::R300_ISSUED => "Tokens issued",
            Self::R301_ZERO_MULTIPLIER => "Nothing to issue",
            Self::R302_SUPPLY_CAPPED => "Award capped at supply ceiling",
            Self::R303_SUPPLY_EXHAUSTED => "Supply exhausted",
            Self::R400_RECORDED => "Recorded to ledger",
            Self::R401_REPLAY => "Replay ignored",
            Self::R500_SLOT_FIRED => "Keeper slot fired",
            Self::R501_SLOT_ALREADY_FIRED => "Keeper slot already fired",
        }
    }

    /// Whether this reason means the classifier forced NOISE
    pub fn is_spam(&self) -> bool {
        matches!(
            self,
            Self::R102_HOSTILE
                | Self::R103_SPAM_TOO_SHORT
                | Self::R104_SPAM_REPEATED_CHARS
                | Self::R105_SPAM_REPEATED_WORDS
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}
