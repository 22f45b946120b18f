//! Token amounts in integer micro-units

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::MICRO_PER_TOKEN;

/// A CGT amount. One token is [`MICRO_PER_TOKEN`] micro-units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tokens(pub u64);

impl Tokens {
    pub const ZERO: Tokens = Tokens(0);

    pub fn from_micro(micro: u64) -> Self {
        Tokens(micro)
    }

    /// Convert whole tokens to micro-units, rounding down
    pub fn from_tokens(tokens: f64) -> Self {
        if tokens <= 0.0 || !tokens.is_finite() {
            return Tokens::ZERO;
        }
        Tokens((tokens * MICRO_PER_TOKEN as f64).floor() as u64)
    }

    pub fn micro(&self) -> u64 {
        self.0
    }

    pub fn as_tokens(&self) -> f64 {
        self.0 as f64 / MICRO_PER_TOKEN as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: Tokens) -> Tokens {
        Tokens(self.0.saturating_sub(other.0))
    }
}

impl Add for Tokens {
    type Output = Tokens;

    fn add(self, rhs: Tokens) -> Tokens {
        Tokens(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Tokens {
    fn add_assign(&mut self, rhs: Tokens) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Tokens {
    fn sum<I: Iterator<Item = Tokens>>(iter: I) -> Tokens {
        iter.fold(Tokens::ZERO, |acc, t| acc + t)
    }
}

impl std::fmt::Display for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:06}", self.0 / MICRO_PER_TOKEN, self.0 % MICRO_PER_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_six_decimals() {
        assert_eq!(Tokens(1_500_000).to_string(), "1.500000");
        assert_eq!(Tokens(42).to_string(), "0.000042");
    }

    #[test]
    fn test_from_tokens_floors() {
        assert_eq!(Tokens::from_tokens(0.0000015), Tokens(1));
        assert_eq!(Tokens::from_tokens(-3.0), Tokens::ZERO);
        assert_eq!(Tokens::from_tokens(f64::NAN), Tokens::ZERO);
    }

    #[test]
    fn test_sum() {
        let total: Tokens = [Tokens(1), Tokens(2), Tokens(3)].into_iter().sum();
        assert_eq!(total, Tokens(6));
    }
}
