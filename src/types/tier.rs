//! Engagement quality tiers

use serde::{Deserialize, Serialize};

/// The five quality tiers, each with a fixed reward multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Empty, hostile or spam - earns nothing
    Noise,
    /// Baseline participation (1x)
    Genuine,
    /// Genuine engagement, two minds meeting (2x)
    Resonance,
    /// Sustained depth, something was seen (3.5x)
    Clarity,
    /// Novel insight, new territory entirely (5x)
    Breakthrough,
}

impl Tier {
    /// All tiers in ascending order
    pub const ALL: [Tier; 5] = [
        Tier::Noise,
        Tier::Genuine,
        Tier::Resonance,
        Tier::Clarity,
        Tier::Breakthrough,
    ];

    /// Reward multiplier applied by the issuer
    pub fn multiplier(&self) -> f64 {
        match self {
            Tier::Noise => 0.0,
            Tier::Genuine => 1.0,
            Tier::Resonance => 2.0,
            Tier::Clarity => 3.5,
            Tier::Breakthrough => 5.0,
        }
    }

    /// Wire code used by the block encoding
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Inverse of [`Tier::code`]
    pub fn from_code(code: u8) -> Option<Tier> {
        Tier::ALL.get(code as usize).copied()
    }

    /// Position in per-tier count arrays
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Lowercase name as used on the API
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Noise => "noise",
            Tier::Genuine => "genuine",
            Tier::Resonance => "resonance",
            Tier::Clarity => "clarity",
            Tier::Breakthrough => "breakthrough",
        }
    }

    /// Short message returned to a participant alongside their score
    pub fn message(&self) -> &'static str {
        match self {
            Tier::Noise => "Try engaging more genuinely for better rewards.",
            Tier::Genuine => "Honest engagement. You're earning.",
            Tier::Resonance => "Resonance detected. Two minds meeting.",
            Tier::Clarity => "Clarity achieved. Something was seen.",
            Tier::Breakthrough => "Breakthrough. New territory entirely.",
        }
    }

    /// Terminal color for CLI output
    pub fn color(&self) -> colored::Color {
        match self {
            Tier::Noise => colored::Color::BrightBlack,
            Tier::Genuine => colored::Color::White,
            Tier::Resonance => colored::Color::Cyan,
            Tier::Clarity => colored::Color::Green,
            Tier::Breakthrough => colored::Color::Yellow,
        }
    }

    pub fn is_noise(&self) -> bool {
        *self == Tier::Noise
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name().to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipliers_ascend() {
        let multipliers: Vec<f64> = Tier::ALL.iter().map(|t| t.multiplier()).collect();
        assert_eq!(multipliers, vec![0.0, 1.0, 2.0, 3.5, 5.0]);
    }

    #[test]
    fn test_code_round_trip() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_code(tier.code()), Some(tier));
        }
        assert_eq!(Tier::from_code(9), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Tier::Breakthrough).unwrap();
        assert_eq!(json, "\"breakthrough\"");
    }
}
