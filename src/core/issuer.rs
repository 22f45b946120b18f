//! Bonding-Curve Issuer
//!
//! tokens = base_rate · multiplier · curve_factor(cumulative_issued)
//!
//! curve_factor(s) = floor + (1 − floor) · (1 + e^(−m/k)) / (1 + e^((s − m)/k))
//!
//! A logistic decay normalized to exactly 1.0 at zero supply. It never rises
//! and never drops below `floor`, so every nonzero multiplier earns
//! something until the supply ceiling is reached.

use serde::{Deserialize, Serialize};

use crate::types::{BondingCurveState, Issuance, ReasonCode, Tokens};
use crate::{
    DEFAULT_BASE_RATE, DEFAULT_CURVE_FLOOR, DEFAULT_CURVE_MIDPOINT, DEFAULT_CURVE_STEEPNESS,
    DEFAULT_SUPPLY_CEILING,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurveError {
    #[error("curve floor must be in (0, 1], got {0}")]
    Floor(f64),
    #[error("curve steepness must be > 0, got {0}")]
    Steepness(f64),
    #[error("curve midpoint must be >= 0, got {0}")]
    Midpoint(f64),
    #[error("base rate must be > 0, got {0}")]
    BaseRate(f64),
    #[error("supply ceiling must be > 0, got {0}")]
    Ceiling(f64),
}

/// Curve shape, in whole tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveParams {
    pub base_rate: f64,
    pub floor: f64,
    pub midpoint: f64,
    pub steepness: f64,
    pub supply_ceiling: f64,
}

impl Default for CurveParams {
    fn default() -> Self {
        Self {
            base_rate: DEFAULT_BASE_RATE,
            floor: DEFAULT_CURVE_FLOOR,
            midpoint: DEFAULT_CURVE_MIDPOINT,
            steepness: DEFAULT_CURVE_STEEPNESS,
            supply_ceiling: DEFAULT_SUPPLY_CEILING,
        }
    }
}

impl CurveParams {
    pub fn validate(&self) -> Result<(), CurveError> {
        // Negated comparisons so NaN is rejected too
        if !(self.floor > 0.0 && self.floor <= 1.0) {
            return Err(CurveError::Floor(self.floor));
        }
        if !(self.steepness > 0.0) {
            return Err(CurveError::Steepness(self.steepness));
        }
        if !(self.midpoint >= 0.0) {
            return Err(CurveError::Midpoint(self.midpoint));
        }
        if !(self.base_rate > 0.0) {
            return Err(CurveError::BaseRate(self.base_rate));
        }
        if !(self.supply_ceiling > 0.0) {
            return Err(CurveError::Ceiling(self.supply_ceiling));
        }
        Ok(())
    }
}

/// Prices engagements against the current supply
#[derive(Debug, Clone)]
pub struct BondingCurve {
    params: CurveParams,
    ceiling: Tokens,
    /// 1 + e^(−m/k), makes the factor exactly 1.0 at zero supply
    norm: f64,
}

impl BondingCurve {
    pub fn new(params: CurveParams) -> Result<Self, CurveError> {
        params.validate()?;
        Ok(Self {
            ceiling: Tokens::from_tokens(params.supply_ceiling),
            norm: 1.0 + (-params.midpoint / params.steepness).exp(),
            params,
        })
    }

    pub fn params(&self) -> &CurveParams {
        &self.params
    }

    pub fn supply_ceiling(&self) -> Tokens {
        self.ceiling
    }

    /// Multiplier on the base rate at supply `issued`
    pub fn curve_factor(&self, issued: Tokens) -> f64 {
        let p = &self.params;
        let x = (issued.as_tokens() - p.midpoint) / p.steepness;
        // e^x overflows to inf far past the midpoint, which lands on the floor
        let decay = self.norm / (1.0 + x.exp());
        (p.floor + (1.0 - p.floor) * decay).clamp(p.floor, 1.0)
    }

    pub fn headroom(&self, state: &BondingCurveState) -> Tokens {
        self.ceiling.saturating_sub(state.cumulative_issued)
    }

    /// Price one engagement without touching the state
    pub fn quote(&self, multiplier: f64, state: &BondingCurveState) -> Issuance {
        let factor = self.curve_factor(state.cumulative_issued);
        if !(multiplier > 0.0) {
            return Issuance::zero(ReasonCode::R301_ZERO_MULTIPLIER, factor);
        }

        let headroom = self.headroom(state);
        if headroom.is_zero() {
            return Issuance::zero(ReasonCode::R303_SUPPLY_EXHAUSTED, factor);
        }

        let raw = Tokens::from_tokens(self.params.base_rate * multiplier * factor);
        // Rounding must not undo the floor
        let award = if raw.is_zero() { Tokens::from_micro(1) } else { raw };

        if award > headroom {
            Issuance {
                tokens: headroom,
                curve_factor: factor,
                capped: true,
                reason: ReasonCode::R302_SUPPLY_CAPPED,
            }
        } else {
            Issuance {
                tokens: award,
                curve_factor: factor,
                capped: false,
                reason: ReasonCode::R300_ISSUED,
            }
        }
    }

    /// Price one engagement and apply it to `state`.
    /// The caller holds the commit critical section.
    pub fn issue(&self, multiplier: f64, state: &mut BondingCurveState) -> Issuance {
        let issuance = self.quote(multiplier, state);
        match issuance.reason {
            ReasonCode::R302_SUPPLY_CAPPED => tracing::warn!(
                award = %issuance.tokens,
                issued = %state.cumulative_issued,
                ceiling = %self.ceiling,
                "supply ceiling reached, award capped at remaining headroom"
            ),
            ReasonCode::R303_SUPPLY_EXHAUSTED => tracing::warn!(
                ceiling = %self.ceiling,
                "supply exhausted, nothing issued"
            ),
            _ => {}
        }
        if !issuance.tokens.is_zero() {
            state.cumulative_issued += issuance.tokens;
            state.issuance_count += 1;
        }
        issuance
    }
}

// =============================================================================
// TESTS
// =============================================================================
