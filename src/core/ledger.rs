//! Engagement Ledger: per-participant balances and idempotency markers
//!
//! The ledger never writes on its own. A [`LedgerTxn`] reads accounts at a
//! version, applies credits in memory and stages conditional writes into the
//! commit batch, so the account update lands in the same store transaction
//! as the supply update and the chain append.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{get_json, keys, DurableStore, WriteBatch};
use crate::types::{Engagement, ParticipantAccount, ReasonCode, Tier, Tokens};

/// Stored once per recorded engagement id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMarker {
    pub participant: String,
    pub tier: Tier,
    pub multiplier: f64,
    pub tokens: Tokens,
    pub block_index: u64,
}

/// Result of recording one engagement
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    /// Credited; the account as it will be after commit
    Recorded(ParticipantAccount),
    /// Id seen before; nothing credited
    Replay(EngagementMarker),
    /// NOISE is never recorded
    Skipped,
}

impl LedgerOutcome {
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            LedgerOutcome::Recorded(_) => Some(ReasonCode::R400_RECORDED),
            LedgerOutcome::Replay(_) => Some(ReasonCode::R401_REPLAY),
            LedgerOutcome::Skipped => None,
        }
    }
}

pub struct EngagementLedger {
    store: Arc<dyn DurableStore>,
}

impl EngagementLedger {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    pub fn account(&self, participant: &str) -> Result<Option<ParticipantAccount>> {
        Ok(get_json(self.store.as_ref(), &keys::account(participant))?.map(|(a, _)| a))
    }

    /// Marker for `engagement_id` if it has been recorded
    pub fn marker(&self, engagement_id: &str) -> Result<Option<EngagementMarker>> {
        Ok(get_json(self.store.as_ref(), &keys::engagement(engagement_id))?.map(|(m, _)| m))
    }

    /// Start staging credits for one commit attempt
    pub fn begin(&self) -> LedgerTxn<'_> {
        LedgerTxn {
            store: self.store.as_ref(),
            accounts: HashMap::new(),
            markers: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

/// Staged ledger changes for one commit attempt
pub struct LedgerTxn<'a> {
    store: &'a dyn DurableStore,
    /// Account after staged credits, and the version it was read at
    accounts: HashMap<String, (ParticipantAccount, u64)>,
    markers: Vec<(String, EngagementMarker)>,
    seen: HashSet<String>,
}

impl<'a> LedgerTxn<'a> {
    /// Stage a credit for `engagement`, committed in block `block_index`
    pub fn record(&mut self, engagement: &Engagement, block_index: u64) -> Result<LedgerOutcome> {
        if engagement.tier.is_noise() {
            return Ok(LedgerOutcome::Skipped);
        }
        if let Some(marker) = self.recorded(&engagement.id)? {
            tracing::debug!(engagement = %engagement.id, "engagement replay ignored");
            return Ok(LedgerOutcome::Replay(marker));
        }

        let (account, _) = match self.accounts.entry(engagement.participant.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let loaded = get_json::<ParticipantAccount>(self.store, &keys::account(&engagement.participant))?;
                slot.insert(loaded.unwrap_or_else(|| {
                    (ParticipantAccount::new(&engagement.participant, engagement.timestamp), 0)
                }))
            }
        };
        account.credit(engagement);
        let snapshot = account.clone();

        self.seen.insert(engagement.id.clone());
        self.markers.push((
            engagement.id.clone(),
            EngagementMarker {
                participant: engagement.participant.clone(),
                tier: engagement.tier,
                multiplier: engagement.multiplier,
                tokens: engagement.tokens,
                block_index,
            },
        ));
        Ok(LedgerOutcome::Recorded(snapshot))
    }

    /// Marker already stored, or staged earlier in this attempt
    pub fn recorded(&self, engagement_id: &str) -> Result<Option<EngagementMarker>> {
        if self.seen.contains(engagement_id) {
            return Ok(self
                .markers
                .iter()
                .find(|(id, _)| id == engagement_id)
                .map(|(_, m)| m.clone()));
        }
        Ok(get_json(self.store, &keys::engagement(engagement_id))?.map(|(m, _)| m))
    }

    /// Staged account for `participant`, if any credit touched it
    pub fn staged(&self, participant: &str) -> Option<&ParticipantAccount> {
        self.accounts.get(participant).map(|(a, _)| a)
    }

    /// Move the staged writes into `batch`. Accounts are conditional on the
    /// version read, markers on absence.
    pub fn stage_into(self, batch: &mut WriteBatch) -> Result<usize> {
        let credited = self.markers.len();
        for (participant, (account, version)) in &self.accounts {
            batch.set(keys::account(participant), serde_json::to_string(account)?, *version);
        }
        for (id, marker) in &self.markers {
            batch.set(keys::engagement(id), serde_json::to_string(marker)?, 0);
        }
        Ok(credited)
    }
}

// =============================================================================
// TESTS
// =============================================================================
