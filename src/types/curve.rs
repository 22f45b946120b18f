//! Supply state and issuance outcomes

use serde::{Deserialize, Serialize};

use crate::types::{ReasonCode, Tokens};

/// Economy-wide issuance state. One per ledger, persisted in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondingCurveState {
    pub cumulative_issued: Tokens,
    /// Number of nonzero issuances so far
    pub issuance_count: u64,
}

/// Result of one issuance against the curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Issuance {
    pub tokens: Tokens,
    /// Curve factor at the supply the issuance was priced at
    pub curve_factor: f64,
    /// Award was reduced to fit under the supply ceiling
    pub capped: bool,
    pub reason: ReasonCode,
}

impl Issuance {
    pub fn zero(reason: ReasonCode, curve_factor: f64) -> Self {
        Self {
            tokens: Tokens::ZERO,
            curve_factor,
            capped: false,
            reason,
        }
    }
}

/// Economics overview query result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyOverview {
    pub cumulative_issued: Tokens,
    pub supply_ceiling: Tokens,
    pub headroom: Tokens,
    pub curve_factor: f64,
    /// Marginal award for a 1x engagement at the current supply
    pub current_rate: Tokens,
    pub issuance_count: u64,
    pub chain_length: u64,
    pub quality_multipliers: Vec<(String, f64)>,
}
