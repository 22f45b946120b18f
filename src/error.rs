//! Error taxonomy for the economy
//!
//! Validation failures and supply exhaustion are not errors: they come back
//! as normal outcomes carrying a [`ReasonCode`](crate::types::ReasonCode).
//! Everything here is either retryable (provider, contention) or fatal
//! (integrity).

use crate::core::chain::ChainIntegrity;
use crate::core::issuer::CurveError;
use crate::core::provider::ProviderError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EconomyError {
    /// Completion backend down or timed out; nothing was scored or written
    #[error("completion provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    /// Optimistic-concurrency retries exhausted; nothing was written
    #[error("commit failed after {attempts} attempts: {last}")]
    CommitFailed { attempts: u32, last: String },

    /// Chain verification failed; operator intervention required
    #[error(transparent)]
    Integrity(#[from] ChainIntegrity),

    #[error("unknown block: {0}")]
    UnknownBlock(String),

    /// Another writer claimed this Keeper slot first
    #[error("keeper slot {slot} already fired")]
    SlotTaken { slot: u64 },

    /// A block needs at least one engagement
    #[error("refusing to commit a block with no engagements")]
    EmptyBlock,

    #[error("invalid curve: {0}")]
    Curve(#[from] CurveError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl EconomyError {
    /// The caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        match self {
            EconomyError::ProviderUnavailable(_) | EconomyError::CommitFailed { .. } => true,
            EconomyError::Store(e) => e.is_conflict(),
            _ => false,
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, EconomyError::Integrity(_))
    }
}

pub type Result<T> = std::result::Result<T, EconomyError>;
