//! Thought Chain: append-only, hash-linked block log
//!
//! The store holds the chain as a list of JSON blocks under
//! [`keys::CHAIN`]; this type keeps a verified in-memory view of it.
//! `append` is the only mutator and must run inside the economy's commit
//! critical section. Readers get `Arc` snapshots and never see a partial
//! block.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::store::{keys, DurableStore, WriteBatch};
use crate::types::{BlockDraft, Digest, ThoughtBlock};

/// What was wrong with a block during verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFault {
    /// Recomputed digest differs from the stored one
    DigestMismatch,
    /// prev_digest does not match the previous block
    BrokenLink,
    /// Stored index differs from the block's position
    IndexMismatch,
    /// The stored record could not be decoded
    Undecodable(String),
    /// The store holds fewer blocks than already verified
    Truncated,
}

impl std::fmt::Display for IntegrityFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityFault::DigestMismatch => write!(f, "digest mismatch"),
            IntegrityFault::BrokenLink => write!(f, "broken link to previous block"),
            IntegrityFault::IndexMismatch => write!(f, "index out of sequence"),
            IntegrityFault::Undecodable(e) => write!(f, "undecodable record: {e}"),
            IntegrityFault::Truncated => write!(f, "chain truncated in store"),
        }
    }
}

/// First block that failed verification. Not retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chain integrity failure at block {index}: {fault}")]
pub struct ChainIntegrity {
    pub index: u64,
    pub fault: IntegrityFault,
}

#[derive(Debug, Default)]
pub struct ThoughtChain {
    blocks: RwLock<Vec<Arc<ThoughtBlock>>>,
}

impl ThoughtChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a view from blocks as given. Nothing is verified; call
    /// [`verify_chain`](Self::verify_chain) before trusting it.
    pub fn from_blocks(blocks: Vec<ThoughtBlock>) -> Self {
        Self {
            blocks: RwLock::new(blocks.into_iter().map(Arc::new).collect()),
        }
    }

    /// Read the whole chain from the store and verify it
    pub fn load(store: &dyn DurableStore) -> Result<Self> {
        let chain = Self::new();
        chain.sync(store)?;
        tracing::debug!(blocks = chain.len(), "thought chain loaded");
        Ok(chain)
    }

    /// Pull blocks appended to the store by another writer.
    /// Returns the number of new blocks.
    pub fn sync(&self, store: &dyn DurableStore) -> Result<usize> {
        let mut blocks = self.write();
        let local = blocks.len() as u64;
        let stored = store.len(keys::CHAIN)?;
        if stored < local {
            return Err(ChainIntegrity {
                index: stored,
                fault: IntegrityFault::Truncated,
            }
            .into());
        }
        if stored == local {
            return Ok(0);
        }

        let records = store.range(keys::CHAIN, local, stored)?;
        let mut prev = blocks.last().map(|b| b.digest).unwrap_or_else(Digest::genesis);
        let mut fresh = Vec::with_capacity(records.len());
        for (offset, raw) in records.iter().enumerate() {
            let index = local + offset as u64;
            let block = decode_block(raw, index)?;
            check_block(&block, index, &prev)?;
            prev = block.digest;
            fresh.push(Arc::new(block));
        }

        let added = fresh.len();
        blocks.extend(fresh);
        if added > 0 {
            tracing::debug!(added, len = blocks.len(), "synced thought chain from store");
        }
        Ok(added)
    }

    /// Link `draft` to the tip and commit it together with `writes` in one
    /// store batch. The append is conditional on the chain length, so a
    /// concurrent writer surfaces as a store conflict and nothing is written.
    pub fn append(
        &self,
        store: &dyn DurableStore,
        draft: BlockDraft,
        writes: WriteBatch,
    ) -> Result<Arc<ThoughtBlock>> {
        let mut blocks = self.write();
        let index = blocks.len() as u64;
        let prev = blocks.last().map(|b| b.digest).unwrap_or_else(Digest::genesis);
        let block = ThoughtBlock::link(draft, index, prev);

        let mut batch = writes;
        batch.append(keys::CHAIN, serde_json::to_string(&block)?, index);
        store.apply(batch)?;

        let block = Arc::new(block);
        blocks.push(Arc::clone(&block));
        tracing::info!(
            index,
            digest = %block.digest.short(),
            kind = ?block.kind,
            engagements = block.engagements.len(),
            "block appended"
        );
        Ok(block)
    }

    pub fn get(&self, index: u64) -> Option<Arc<ThoughtBlock>> {
        self.read().get(index as usize).cloned()
    }

    pub fn find(&self, digest: &Digest) -> Option<Arc<ThoughtBlock>> {
        self.read().iter().rev().find(|b| &b.digest == digest).cloned()
    }

    pub fn blocks(&self) -> Vec<Arc<ThoughtBlock>> {
        self.read().clone()
    }

    pub fn tip(&self) -> Option<Arc<ThoughtBlock>> {
        self.read().last().cloned()
    }

    /// Digest the next block will link to
    pub fn tip_digest(&self) -> Digest {
        self.tip().map(|b| b.digest).unwrap_or_else(Digest::genesis)
    }

    pub fn len(&self) -> u64 {
        self.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Last `n` blocks, oldest first
    pub fn recent(&self, n: usize) -> Vec<Arc<ThoughtBlock>> {
        let blocks = self.read();
        let start = blocks.len().saturating_sub(n);
        blocks[start..].to_vec()
    }

    /// Verify every block. Ok carries the number of blocks checked.
    pub fn verify_chain(&self) -> std::result::Result<u64, ChainIntegrity> {
        verify_blocks(&self.read(), None)
    }

    /// Re-read and verify every stored record, ignoring any in-memory view.
    /// Catches records rewritten in place after they were loaded.
    pub fn verify_store(store: &dyn DurableStore) -> Result<u64> {
        let stored = store.len(keys::CHAIN)?;
        verify_records(store, stored)
    }

    /// Re-read and verify the stored prefix `0..=index` (clamped to the
    /// stored length)
    pub fn verify_store_through(store: &dyn DurableStore, index: u64) -> Result<u64> {
        let stored = store.len(keys::CHAIN)?;
        verify_records(store, stored.min(index.saturating_add(1)))
    }

    /// The record at `index` as it is in the store now
    pub fn stored_block(store: &dyn DurableStore, index: u64) -> Result<Option<ThoughtBlock>> {
        match store.range(keys::CHAIN, index, index.saturating_add(1))?.first() {
            Some(raw) => Ok(Some(decode_block(raw, index)?)),
            None => Ok(None),
        }
    }

    /// Verify the prefix `0..=index` (clamped to the chain length)
    pub fn verify_through(&self, index: u64) -> std::result::Result<u64, ChainIntegrity> {
        verify_blocks(&self.read(), Some(index))
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<ThoughtBlock>>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<ThoughtBlock>>> {
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn verify_records(store: &dyn DurableStore, end: u64) -> Result<u64> {
    let mut prev = Digest::genesis();
    for (i, raw) in store.range(keys::CHAIN, 0, end)?.iter().enumerate() {
        let block = decode_block(raw, i as u64)?;
        check_block(&block, i as u64, &prev)?;
        prev = block.digest;
    }
    Ok(end)
}

fn decode_block(raw: &str, index: u64) -> std::result::Result<ThoughtBlock, ChainIntegrity> {
    serde_json::from_str(raw).map_err(|e| ChainIntegrity {
        index,
        fault: IntegrityFault::Undecodable(e.to_string()),
    })
}

fn check_block(block: &ThoughtBlock, index: u64, prev: &Digest) -> std::result::Result<(), ChainIntegrity> {
    let fault = if block.index != index {
        Some(IntegrityFault::IndexMismatch)
    } else if &block.prev_digest != prev {
        Some(IntegrityFault::BrokenLink)
    } else if !block.digest_matches() {
        Some(IntegrityFault::DigestMismatch)
    } else {
        None
    };
    match fault {
        Some(fault) => {
            tracing::error!(index, %fault, "thought chain verification failed");
            Err(ChainIntegrity { index, fault })
        }
        None => Ok(()),
    }
}

fn verify_blocks(blocks: &[Arc<ThoughtBlock>], through: Option<u64>) -> std::result::Result<u64, ChainIntegrity> {
    let end = match through {
        Some(i) => blocks.len().min(i as usize + 1),
        None => blocks.len(),
    };
    let mut prev = Digest::genesis();
    for (i, block) in blocks[..end].iter().enumerate() {
        check_block(block, i as u64, &prev)?;
        prev = block.digest;
    }
    Ok(end as u64)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{BlockKind, Engagement, Tier, Tokens};
    use chrono::Utc;

    fn draft(text: &str) -> BlockDraft {
        BlockDraft::new(
            BlockKind::Engagement,
            vec![Engagement {
                id: text.to_string(),
                participant: "ada".to_string(),
                session: None,
                text: text.to_string(),
                timestamp: Utc::now(),
                tier: Tier::Genuine,
                multiplier: 1.0,
                depth_score: 0.2,
                novelty_score: 0.4,
                kindness_score: 0.0,
                tokens: Tokens(1_000_000),
            }],
        )
    }

    fn chain_of(n: usize) -> (MemoryStore, ThoughtChain) {
        let store = MemoryStore::new();
        let chain = ThoughtChain::new();
        for i in 0..n {
            chain
                .append(&store, draft(&format!("thought {i}")), WriteBatch::new())
                .unwrap();
        }
        (store, chain)
    }

    #[test]
    fn test_first_block_links_to_genesis() {
        let (_, chain) = chain_of(1);
        let block = chain.get(0).unwrap();
        assert_eq!(block.index, 0);
        assert_eq!(block.prev_digest, Digest::genesis());
    }

    #[test]
    fn test_blocks_link() {
        let (_, chain) = chain_of(3);
        let blocks = chain.blocks();
        assert_eq!(blocks[1].prev_digest, blocks[0].digest);
        assert_eq!(blocks[2].prev_digest, blocks[1].digest);
        assert_eq!(chain.verify_chain(), Ok(3));
    }

    #[test]
    fn test_tamper_reports_first_bad_index() {
        let (_, chain) = chain_of(5);
        let mut blocks: Vec<ThoughtBlock> = chain.blocks().iter().map(|b| (**b).clone()).collect();
        blocks[2].engagements[0].text.push('!');
        let tampered = ThoughtChain::from_blocks(blocks);

        let err = tampered.verify_chain().unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.fault, IntegrityFault::DigestMismatch);
        assert_eq!(tampered.verify_through(1), Ok(2));
    }

    #[test]
    fn test_verify_store_sees_rewritten_record() {
        let (store, chain) = chain_of(3);
        assert_eq!(ThoughtChain::verify_store(&store).unwrap(), 3);

        let mut block = (*chain.get(1).unwrap()).clone();
        block.engagements[0].tokens = Tokens(9_000_000);
        store
            .replace_item(keys::CHAIN, 1, &serde_json::to_string(&block).unwrap())
            .unwrap();

        // The view was verified at append time and still passes
        assert_eq!(chain.verify_chain(), Ok(3));
        match ThoughtChain::verify_store(&store).unwrap_err() {
            crate::error::EconomyError::Integrity(e) => {
                assert_eq!(e.index, 1);
                assert_eq!(e.fault, IntegrityFault::DigestMismatch);
            }
            other => panic!("expected integrity failure, got {other}"),
        }
    }

    #[test]
    fn test_verify_store_through_stops_at_index() {
        let (store, chain) = chain_of(3);
        let mut block = (*chain.get(2).unwrap()).clone();
        block.engagements[0].text = "rewritten".to_string();
        store
            .replace_item(keys::CHAIN, 2, &serde_json::to_string(&block).unwrap())
            .unwrap();

        // The prefix before the rewrite still verifies
        assert_eq!(ThoughtChain::verify_store_through(&store, 1).unwrap(), 2);
        let err = ThoughtChain::verify_store_through(&store, 99).unwrap_err();
        assert_eq!(err.to_string(), "chain integrity failure at block 2: digest mismatch");

        let stored = ThoughtChain::stored_block(&store, 2).unwrap().unwrap();
        assert_eq!(stored.engagements[0].text, "rewritten");
        assert!(ThoughtChain::stored_block(&store, 3).unwrap().is_none());
    }

    #[test]
    fn test_stale_append_conflicts() {
        let (store, chain) = chain_of(1);
        let stale = ThoughtChain::new();
        let err = stale.append(&store, draft("late"), WriteBatch::new()).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.len(keys::CHAIN).unwrap(), 1);
        assert!(stale.is_empty());

        stale.sync(&store).unwrap();
        stale.append(&store, draft("late"), WriteBatch::new()).unwrap();
        assert_eq!(store.len(keys::CHAIN).unwrap(), 2);
        assert_eq!(chain.sync(&store).unwrap(), 1);
        assert_eq!(chain.verify_chain(), Ok(2));
    }

    #[test]
    fn test_load_round_trip() {
        let (store, chain) = chain_of(4);
        let loaded = ThoughtChain::load(&store).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.tip_digest(), chain.tip_digest());
    }

    #[test]
    fn test_recent_and_find() {
        let (_, chain) = chain_of(4);
        let recent = chain.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].index, 2);
        let found = chain.find(&recent[1].digest).unwrap();
        assert_eq!(found.index, 3);
        assert!(chain.find(&Digest::of(b"nope")).is_none());
        assert_eq!(chain.recent(10).len(), 4);
    }
}
