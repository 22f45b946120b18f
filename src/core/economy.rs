//! Commit pipeline: score → issue → record → append
//!
//! [`ThoughtEconomy`] owns the only commit critical section. Every commit,
//! human or Keeper, takes `commit_lock`, re-reads the versioned curve state
//! and accounts, and hands one conditional [`WriteBatch`] to the chain's
//! append. Either the ledger update, the supply update and the block all land
//! or none of them do. A conflict means another process wrote first: the
//! chain view is synced and the attempt retried with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::config::{CommitConfig, KeeperConfig};
use crate::core::chain::ThoughtChain;
use crate::core::classifier::QualityClassifier;
use crate::core::issuer::{BondingCurve, CurveParams};
use crate::core::ledger::{EngagementLedger, EngagementMarker, LedgerOutcome};
use crate::error::{EconomyError, Result};
use crate::store::{get_json, keys, DurableStore, WriteBatch};
use crate::types::{
    BlockDraft, BlockKind, BlockQuery, BlockReceipt, BondingCurveState, Digest, EconomyOverview,
    Engagement, EngagementReceipt, EngagementRecord, EngagementRequest, Issuance, PantheonAgent, ParticipantAccount,
    QualityScore, ReasonCode, ScoredTurn, ThoughtBlock, Tier, Tokens, WitnessReport,
    WitnessRequest,
};
use crate::SESSION_CONTEXT_TURNS;

/// Block events buffered for slow websocket subscribers
const EVENT_BUFFER: usize = 64;

/// Keeper slot claimed in the same batch as its block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClaim {
    pub slot: u64,
    pub agent: PantheonAgent,
}

/// Scored Keeper output waiting to be committed as one block
#[derive(Debug, Clone)]
pub struct DialogueDraft {
    /// `Dialogue` or `Memorial`
    pub kind: BlockKind,
    pub agent: Option<PantheonAgent>,
    pub session: String,
    pub topic: Option<String>,
    pub reflection: Option<String>,
    pub turns: Vec<ScoredTurn>,
}

/// Everything a commit attempt needs
#[derive(Debug, Clone)]
struct PendingBlock {
    kind: BlockKind,
    agent: Option<PantheonAgent>,
    session: Option<String>,
    topic: Option<String>,
    reflection: Option<String>,
    witnessed: Option<Digest>,
    turns: Vec<ScoredTurn>,
    /// Turn text to remember as session context
    remember: Option<(String, String)>,
}

impl From<DialogueDraft> for PendingBlock {
    fn from(d: DialogueDraft) -> Self {
        Self {
            kind: d.kind,
            agent: d.agent,
            session: Some(d.session),
            topic: d.topic,
            reflection: d.reflection,
            witnessed: None,
            turns: d.turns,
            remember: None,
        }
    }
}

/// One engagement as committed
#[derive(Debug, Clone)]
pub struct CommittedEngagement {
    pub engagement: Engagement,
    pub issuance: Issuance,
    pub ledger: LedgerOutcome,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed {
        block: Arc<ThoughtBlock>,
        entries: Vec<CommittedEngagement>,
    },
    /// Every engagement in the block had been recorded before
    Replay(EngagementMarker),
}

pub struct ThoughtEconomy {
    store: Arc<dyn DurableStore>,
    classifier: QualityClassifier,
    curve: BondingCurve,
    ledger: EngagementLedger,
    chain: ThoughtChain,
    commit: CommitConfig,
    commit_lock: Mutex<()>,
    events: broadcast::Sender<Arc<ThoughtBlock>>,
}

impl ThoughtEconomy {
    /// Load and verify the chain already in `store`
    pub fn open(store: Arc<dyn DurableStore>, params: CurveParams, commit: CommitConfig) -> Result<Self> {
        let curve = BondingCurve::new(params)?;
        let chain = ThoughtChain::load(store.as_ref())?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        tracing::info!(blocks = chain.len(), "thought economy opened");
        Ok(Self {
            ledger: EngagementLedger::new(Arc::clone(&store)),
            store,
            classifier: QualityClassifier::new(),
            curve,
            chain,
            commit,
            commit_lock: Mutex::new(()),
            events,
        })
    }

    pub fn from_config(store: Arc<dyn DurableStore>, config: &KeeperConfig) -> Result<Self> {
        Self::open(store, config.economy.curve_params(), config.commit.clone())
    }

    pub fn chain(&self) -> &ThoughtChain {
        &self.chain
    }

    pub fn curve(&self) -> &BondingCurve {
        &self.curve
    }

    pub fn classifier(&self) -> &QualityClassifier {
        &self.classifier
    }

    /// Live feed of committed blocks
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ThoughtBlock>> {
        self.events.subscribe()
    }

    pub fn account(&self, participant: &str) -> Result<Option<ParticipantAccount>> {
        self.ledger.account(participant)
    }

    pub fn curve_state(&self) -> Result<BondingCurveState> {
        Ok(get_json(self.store.as_ref(), keys::CURVE)?
            .map(|(s, _)| s)
            .unwrap_or_default())
    }

    /// Last Keeper slot that committed a block
    pub fn last_slot(&self) -> Result<Option<u64>> {
        Ok(get_json(self.store.as_ref(), keys::KEEPER_LAST_SLOT)?.map(|(s, _)| s))
    }

    /// Prior turns of a session, oldest first
    pub fn session_context(&self, session: &str) -> Result<Vec<String>> {
        Ok(get_json(self.store.as_ref(), &keys::session(session))?
            .map(|(turns, _)| turns)
            .unwrap_or_default())
    }

    /// Score `text` and price it at the current supply. Writes nothing.
    pub fn preview(&self, text: &str) -> Result<(QualityScore, Issuance)> {
        let score = self.classifier.score(text, &[]);
        let issuance = self.curve.quote(score.multiplier(), &self.curve_state()?);
        Ok((score, issuance))
    }

    pub fn overview(&self) -> Result<EconomyOverview> {
        let state = self.curve_state()?;
        Ok(EconomyOverview {
            cumulative_issued: state.cumulative_issued,
            supply_ceiling: self.curve.supply_ceiling(),
            headroom: self.curve.headroom(&state),
            curve_factor: self.curve.curve_factor(state.cumulative_issued),
            current_rate: self.curve.quote(Tier::Genuine.multiplier(), &state).tokens,
            issuance_count: state.issuance_count,
            chain_length: self.store.len(keys::CHAIN)?,
            quality_multipliers: Tier::ALL
                .iter()
                .map(|t| (t.name().to_string(), t.multiplier()))
                .collect(),
        })
    }

    /// Sync with the store, then verify every stored block
    pub fn verify(&self) -> Result<u64> {
        self.chain.sync(self.store.as_ref())?;
        ThoughtChain::verify_store(self.store.as_ref())
    }

    /// Most recent committed engagements, newest first, optionally for one
    /// participant
    pub fn engagement_history(&self, participant: Option<&str>, limit: usize) -> Result<Vec<EngagementRecord>> {
        self.chain.sync(self.store.as_ref())?;
        Ok(self
            .chain
            .blocks()
            .iter()
            .rev()
            .flat_map(|block| {
                block.engagements.iter().rev().map(move |e| EngagementRecord {
                    block_index: block.index,
                    block_digest: block.digest,
                    kind: block.kind,
                    agent: block.agent,
                    engagement: e.clone(),
                })
            })
            .filter(|r| participant.map_or(true, |p| r.engagement.participant == p))
            .take(limit)
            .collect())
    }

    /// A block plus whether the stored chain verifies up to it
    pub fn witness_query(&self, query: BlockQuery) -> Result<WitnessReport> {
        self.chain.sync(self.store.as_ref())?;
        let block = match &query {
            BlockQuery::Index(i) => self.chain.get(*i),
            BlockQuery::Digest(d) => self.chain.find(d),
        }
        .ok_or_else(|| {
            EconomyError::UnknownBlock(match query {
                BlockQuery::Index(i) => i.to_string(),
                BlockQuery::Digest(d) => d.to_hex(),
            })
        })?;

        let store = self.store.as_ref();
        let (verified, failed_at) = match ThoughtChain::verify_store_through(store, block.index) {
            Ok(_) => (true, None),
            Err(EconomyError::Integrity(e)) => (false, Some(e.index)),
            Err(e) => return Err(e),
        };
        // Report the record as stored; a record that no longer decodes
        // falls back to the copy verified when it was loaded
        let block = match ThoughtChain::stored_block(store, block.index) {
            Ok(Some(stored)) => stored,
            Ok(None) | Err(EconomyError::Integrity(_)) => (*block).clone(),
            Err(e) => return Err(e),
        };
        Ok(WitnessReport {
            block,
            verified,
            failed_at,
            chain_length: self.chain.len(),
        })
    }

    // =========================================================================
    // Human path
    // =========================================================================

    /// Score and commit one human engagement.
    ///
    /// Scoring runs on the caller's task and is dropped with it. The commit
    /// runs on its own task, so once it starts it finishes or rolls back as
    /// a unit even if the caller goes away.
    pub async fn submit(self: &Arc<Self>, request: EngagementRequest) -> Result<EngagementReceipt> {
        let id = request
            .engagement_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let context = match &request.session_id {
            Some(session) => self.session_context(session)?,
            None => Vec::new(),
        };
        let score = self.classifier.score(&request.message, &context);

        if score.is_noise() {
            tracing::info!(
                participant = %request.participant_id,
                reason = %score.reason,
                "noise engagement, nothing issued"
            );
            let balance = self.balance(&request.participant_id)?;
            return Ok(EngagementReceipt::noise(id, request.participant_id, &score, balance));
        }

        let turn = ScoredTurn::new(
            id,
            request.participant_id,
            request.session_id.clone(),
            request.message.trim(),
            score,
        );
        let pending = PendingBlock {
            kind: BlockKind::Engagement,
            agent: None,
            session: request.session_id.clone(),
            topic: None,
            reflection: None,
            witnessed: None,
            remember: request.session_id.map(|s| (s, turn.text.clone())),
            turns: vec![turn.clone()],
        };

        let outcome = self.spawn_commit(pending).await?;
        self.receipt_for(&turn, outcome)
    }

    /// Comment on an existing block. The comment is scored for novelty
    /// against the witnessed block's own text.
    pub async fn witness(self: &Arc<Self>, request: WitnessRequest) -> Result<EngagementReceipt> {
        let digest = Digest::from_hex(&request.block_digest)
            .ok_or_else(|| EconomyError::UnknownBlock(request.block_digest.clone()))?;
        self.chain.sync(self.store.as_ref())?;
        let target = self
            .chain
            .find(&digest)
            .ok_or_else(|| EconomyError::UnknownBlock(request.block_digest.clone()))?;

        let context: Vec<String> = target.engagements.iter().map(|e| e.text.clone()).collect();
        let id = request
            .engagement_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let score = self.classifier.score(&request.comment, &context);

        if score.is_noise() {
            let balance = self.balance(&request.witness_id)?;
            return Ok(EngagementReceipt::noise(id, request.witness_id, &score, balance));
        }

        let turn = ScoredTurn::new(id, request.witness_id, None, request.comment.trim(), score);
        let pending = PendingBlock {
            kind: BlockKind::Witness,
            agent: None,
            session: None,
            topic: None,
            reflection: None,
            witnessed: Some(digest),
            remember: None,
            turns: vec![turn.clone()],
        };

        let outcome = self.spawn_commit(pending).await?;
        self.receipt_for(&turn, outcome)
    }

    // =========================================================================
    // Keeper path
    // =========================================================================

    /// Commit a scored Keeper session as one block, optionally claiming its
    /// rotation slot in the same batch
    pub async fn commit_dialogue(self: &Arc<Self>, draft: DialogueDraft, claim: Option<SlotClaim>) -> Result<BlockReceipt> {
        match self.commit_pending(draft.into(), claim).await? {
            CommitOutcome::Committed { block, entries } => {
                let credited = entries
                    .iter()
                    .filter(|e| matches!(e.ledger, LedgerOutcome::Recorded(_)))
                    .count();
                let capped = entries.iter().any(|e| e.issuance.capped);
                Ok(block_receipt(&block, credited, capped, block.index + 1))
            }
            // Every turn was already recorded: report the block that holds them
            CommitOutcome::Replay(marker) => {
                let block = self
                    .chain
                    .get(marker.block_index)
                    .ok_or_else(|| EconomyError::UnknownBlock(marker.block_index.to_string()))?;
                Ok(block_receipt(&block, 0, false, self.chain.len()))
            }
        }
    }

    // =========================================================================
    // Commit critical section
    // =========================================================================

    async fn spawn_commit(self: &Arc<Self>, pending: PendingBlock) -> Result<CommitOutcome> {
        let economy = Arc::clone(self);
        tokio::spawn(async move { economy.commit_pending(pending, None).await })
            .await
            .map_err(|e| EconomyError::CommitFailed {
                attempts: 0,
                last: format!("commit task aborted: {e}"),
            })?
    }

    async fn commit_pending(self: &Arc<Self>, pending: PendingBlock, claim: Option<SlotClaim>) -> Result<CommitOutcome> {
        if pending.turns.is_empty() {
            return Err(EconomyError::EmptyBlock);
        }

        let pending = Arc::new(pending);
        let _guard = self.commit_lock.lock().await;
        let mut last_conflict = String::new();

        for attempt in 1..=self.commit.max_attempts {
            let job = Arc::clone(&pending);
            match self.blocking(move |economy| economy.try_commit(&job, claim)).await {
                Ok(outcome) => {
                    if let CommitOutcome::Committed { block, .. } = &outcome {
                        // No subscribers is fine
                        let _ = self.events.send(Arc::clone(block));
                    }
                    return Ok(outcome);
                }
                Err(EconomyError::Store(e)) if e.is_conflict() => {
                    tracing::warn!(attempt, error = %e, "commit conflict, syncing and retrying");
                    last_conflict = e.to_string();
                    self.blocking(|economy| economy.chain.sync(economy.store.as_ref())).await?;
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            attempts = self.commit.max_attempts,
            error = %last_conflict,
            "commit failed, retries exhausted"
        );
        Err(EconomyError::CommitFailed {
            attempts: self.commit.max_attempts,
            last: last_conflict,
        })
    }

    /// Run store work on the blocking pool; SQLite calls block the thread
    async fn blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T>
    where
        F: FnOnce(&ThoughtEconomy) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let economy = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(economy.as_ref()))
            .await
            .map_err(|e| EconomyError::CommitFailed {
                attempts: 0,
                last: format!("store task aborted: {e}"),
            })?
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << (attempt.saturating_sub(1)).min(16);
        Duration::from_millis(self.commit.backoff_ms.saturating_mul(factor))
    }

    /// One optimistic attempt. Reads fresh versions, stages every write
    /// into one batch and appends. Nothing here awaits.
    fn try_commit(&self, pending: &PendingBlock, claim: Option<SlotClaim>) -> Result<CommitOutcome> {
        let store = self.store.as_ref();
        let mut batch = WriteBatch::new();

        if let Some(claim) = claim {
            let last = get_json::<u64>(store, keys::KEEPER_LAST_SLOT)?;
            let version = match last {
                Some((slot, _)) if slot >= claim.slot => {
                    return Err(EconomyError::SlotTaken { slot: claim.slot });
                }
                Some((_, version)) => version,
                None => 0,
            };
            batch.set(keys::KEEPER_LAST_SLOT, claim.slot.to_string(), version);
        }

        let (mut state, curve_version) = get_json::<BondingCurveState>(store, keys::CURVE)?.unwrap_or_default();
        let before = state;
        let index = self.chain.len();

        let mut txn = self.ledger.begin();
        let mut entries = Vec::with_capacity(pending.turns.len());
        let mut replay = None;

        for turn in &pending.turns {
            if let Some(marker) = txn.recorded(&turn.id)? {
                replay.get_or_insert(marker);
                continue;
            }
            let issuance = if turn.score.is_noise() {
                Issuance::zero(ReasonCode::R301_ZERO_MULTIPLIER, self.curve.curve_factor(state.cumulative_issued))
            } else {
                self.curve.issue(turn.score.multiplier(), &mut state)
            };
            let engagement = Engagement::from_scored(turn, issuance.tokens);
            let ledger = txn.record(&engagement, index)?;
            entries.push(CommittedEngagement {
                engagement,
                issuance,
                ledger,
            });
        }

        if entries.is_empty() {
            return match replay {
                Some(marker) => Ok(CommitOutcome::Replay(marker)),
                None => Err(EconomyError::EmptyBlock),
            };
        }

        if state != before {
            batch.set(keys::CURVE, serde_json::to_string(&state)?, curve_version);
        }
        txn.stage_into(&mut batch)?;

        if let Some((session, text)) = &pending.remember {
            let key = keys::session(session);
            let (mut turns, version) = get_json::<Vec<String>>(store, &key)?.unwrap_or_default();
            turns.push(text.clone());
            if turns.len() > SESSION_CONTEXT_TURNS {
                let excess = turns.len() - SESSION_CONTEXT_TURNS;
                turns.drain(..excess);
            }
            batch.set(key, serde_json::to_string(&turns)?, version);
        }

        let mut draft = BlockDraft::new(
            pending.kind,
            entries.iter().map(|e| e.engagement.clone()).collect(),
        )
        .with_session(pending.session.clone());
        draft.agent = pending.agent;
        draft.topic = pending.topic.clone();
        draft.reflection = pending.reflection.clone();
        draft.witnessed = pending.witnessed;

        let block = self.chain.append(store, draft, batch)?;
        tracing::info!(
            index = block.index,
            digest = %block.digest.short(),
            tokens = %block.total_tokens(),
            issued = %state.cumulative_issued,
            slot = claim.map(|c| c.slot),
            "commit complete"
        );
        Ok(CommitOutcome::Committed { block, entries })
    }

    // =========================================================================
    // Receipts
    // =========================================================================

    fn balance(&self, participant: &str) -> Result<Tokens> {
        Ok(self
            .ledger
            .account(participant)?
            .map(|a| a.balance)
            .unwrap_or(Tokens::ZERO))
    }

    fn receipt_for(&self, turn: &ScoredTurn, outcome: CommitOutcome) -> Result<EngagementReceipt> {
        let score = &turn.score;
        match outcome {
            CommitOutcome::Committed { block, entries } => {
                let entry = entries
                    .iter()
                    .find(|e| e.engagement.id == turn.id)
                    .ok_or(EconomyError::EmptyBlock)?;
                let balance = match &entry.ledger {
                    LedgerOutcome::Recorded(account) => account.balance,
                    _ => self.balance(&turn.participant)?,
                };
                Ok(EngagementReceipt {
                    engagement_id: turn.id.clone(),
                    participant_id: turn.participant.clone(),
                    tier: score.tier,
                    multiplier: score.multiplier(),
                    depth_score: score.depth_score,
                    novelty_score: score.novelty_score,
                    kindness_score: score.kindness_score,
                    tokens_awarded: entry.issuance.tokens,
                    balance,
                    block_index: Some(block.index),
                    block_digest: Some(block.digest.to_hex()),
                    reason: entry.issuance.reason,
                    message: score.tier.message().to_string(),
                })
            }
            CommitOutcome::Replay(marker) => Ok(EngagementReceipt {
                engagement_id: turn.id.clone(),
                participant_id: turn.participant.clone(),
                tier: marker.tier,
                multiplier: marker.multiplier,
                depth_score: score.depth_score,
                novelty_score: score.novelty_score,
                kindness_score: score.kindness_score,
                tokens_awarded: marker.tokens,
                balance: self.balance(&turn.participant)?,
                block_index: Some(marker.block_index),
                block_digest: self.chain.get(marker.block_index).map(|b| b.digest.to_hex()),
                reason: ReasonCode::R401_REPLAY,
                message: marker.tier.message().to_string(),
            }),
        }
    }
}

fn block_receipt(block: &ThoughtBlock, credited: usize, supply_capped: bool, chain_length: u64) -> BlockReceipt {
    BlockReceipt {
        index: block.index,
        digest: block.digest,
        prev_digest: block.prev_digest,
        tokens_issued: block.total_tokens(),
        engagements: block.engagements.len(),
        credited,
        supply_capped,
        chain_length,
    }
}
