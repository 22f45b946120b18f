//! Core types for Thought Keeper

mod account;
mod agent;
mod block;
mod curve;
mod engagement;
mod reason;
mod receipt;
mod score;
mod tier;
mod tokens;

pub use account::ParticipantAccount;
pub use agent::PantheonAgent;
pub use block::{BlockDraft, BlockKind, Digest, ThoughtBlock, BLOCK_ENCODING_VERSION, BLOCK_MAGIC, GENESIS_DIGEST};
pub use curve::{BondingCurveState, EconomyOverview, Issuance};
pub use engagement::{Engagement, EngagementReceipt, EngagementRequest, ScoredTurn, WitnessRequest};
pub use reason::ReasonCode;
pub use receipt::{BlockQuery, BlockReceipt, EngagementRecord, WitnessReport};
pub use score::{QualityScore, QualitySignals};
pub use tier::Tier;
pub use tokens::Tokens;
