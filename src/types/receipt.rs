//! Commit receipts and witness reports

use serde::{Deserialize, Serialize};

use crate::types::{BlockKind, Digest, Engagement, PantheonAgent, ThoughtBlock, Tokens};

/// Outcome of committing one block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReceipt {
    pub index: u64,
    pub digest: Digest,
    pub prev_digest: Digest,
    pub tokens_issued: Tokens,
    pub engagements: usize,
    /// Number of engagements credited to accounts (excludes NOISE and replays)
    pub credited: usize,
    /// At least one award was capped by the supply ceiling
    pub supply_capped: bool,
    pub chain_length: u64,
}

/// Lookup key for the witness query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockQuery {
    Index(u64),
    Digest(Digest),
}

/// A block plus whether the chain verifies up to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessReport {
    pub block: ThoughtBlock,
    pub verified: bool,
    /// First index that failed verification, if any
    pub failed_at: Option<u64>,
    pub chain_length: u64,
}

/// One committed engagement with the block that holds it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementRecord {
    pub block_index: u64,
    pub block_digest: Digest,
    pub kind: BlockKind,
    pub agent: Option<PantheonAgent>,
    pub engagement: Engagement,
}
