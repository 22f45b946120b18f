//! Integration tests for the commit pipeline
//!
//! Concurrent submissions, several economies sharing one store, supply
//! exhaustion and tampered chains.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use thought_keeper::config::CommitConfig;
use thought_keeper::core::{CurveParams, IntegrityFault, ThoughtEconomy};
use thought_keeper::error::EconomyError;
use thought_keeper::store::{keys, DurableStore, MemoryStore};
use thought_keeper::types::{
    BlockKind, BlockQuery, EngagementRequest, ReasonCode, Tier, Tokens, WitnessRequest,
};

const FOCUSED: &str =
    "Attention shapes perception because salience filters experience before reflection begins.";

fn open(store: Arc<dyn DurableStore>, params: CurveParams) -> Arc<ThoughtEconomy> {
    let commit = CommitConfig {
        max_attempts: 50,
        backoff_ms: 1,
    };
    Arc::new(ThoughtEconomy::open(store, params, commit).unwrap())
}

fn fresh() -> (Arc<MemoryStore>, Arc<ThoughtEconomy>) {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn DurableStore> = store.clone();
    (store, open(shared, CurveParams::default()))
}

fn thought(i: usize) -> String {
    format!("{FOCUSED} Consider case number {i} carefully.")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_each_get_a_block() {
    let (_, economy) = fresh();
    let n = 16;

    let receipts = join_all((0..n).map(|i| {
        let economy = Arc::clone(&economy);
        async move {
            economy
                .submit(EngagementRequest::new(format!("p{}", i % 4), thought(i)))
                .await
        }
    }))
    .await;

    let receipts: Vec<_> = receipts.into_iter().map(Result::unwrap).collect();
    let indices: HashSet<u64> = receipts.iter().filter_map(|r| r.block_index).collect();
    assert_eq!(indices, (0..n as u64).collect::<HashSet<_>>());
    assert_eq!(economy.verify().unwrap(), n as u64);

    let awarded: Tokens = receipts.iter().map(|r| r.tokens_awarded).sum();
    let state = economy.curve_state().unwrap();
    assert_eq!(state.cumulative_issued, awarded);
    assert_eq!(state.issuance_count, n as u64);

    let balances: Tokens = (0..4)
        .map(|p| economy.account(&format!("p{p}")).unwrap().unwrap().balance)
        .sum();
    assert_eq!(balances, awarded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_economies_share_one_store() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let a = open(Arc::clone(&store), CurveParams::default());
    let b = open(Arc::clone(&store), CurveParams::default());

    let submissions = (0..12).map(|i| {
        let economy = if i % 2 == 0 { Arc::clone(&a) } else { Arc::clone(&b) };
        async move {
            economy
                .submit(EngagementRequest::new("shared", thought(i)).with_id(format!("e{i}")))
                .await
        }
    });
    let receipts: Vec<_> = join_all(submissions)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(store.len(keys::CHAIN).unwrap(), 12);
    assert_eq!(a.verify().unwrap(), 12);
    assert_eq!(b.verify().unwrap(), 12);
    assert_eq!(a.chain().tip_digest(), b.chain().tip_digest());

    let awarded: Tokens = receipts.iter().map(|r| r.tokens_awarded).sum();
    let account = a.account("shared").unwrap().unwrap();
    assert_eq!(account.engagements, 12);
    assert_eq!(account.balance, awarded);
    assert_eq!(b.curve_state().unwrap().cumulative_issued, awarded);
}

#[tokio::test]
async fn test_replay_through_another_economy_is_not_credited_twice() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let a = open(Arc::clone(&store), CurveParams::default());
    let b = open(Arc::clone(&store), CurveParams::default());

    let request = EngagementRequest::new("ada", FOCUSED).with_id("once");
    let first = a.submit(request.clone()).await.unwrap();
    let second = b.submit(request).await.unwrap();

    assert_eq!(second.reason, ReasonCode::R401_REPLAY);
    assert_eq!(second.block_index, first.block_index);
    assert_eq!(store.len(keys::CHAIN).unwrap(), 1);
    assert_eq!(b.account("ada").unwrap().unwrap().balance, first.tokens_awarded);
}

#[tokio::test]
async fn test_supply_runs_out_gracefully() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let params = CurveParams {
        supply_ceiling: 3.0,
        ..CurveParams::default()
    };
    let economy = open(store, params);

    let full = economy.submit(EngagementRequest::new("ada", FOCUSED)).await.unwrap();
    assert_eq!(full.tier, Tier::Resonance);
    assert_eq!(full.tokens_awarded, Tokens::from_tokens(2.0));
    assert_eq!(full.reason, ReasonCode::R300_ISSUED);

    let capped = economy.submit(EngagementRequest::new("ada", FOCUSED)).await.unwrap();
    assert_eq!(capped.tokens_awarded, Tokens::from_tokens(1.0));
    assert_eq!(capped.reason, ReasonCode::R302_SUPPLY_CAPPED);

    let dry = economy.submit(EngagementRequest::new("bob", FOCUSED)).await.unwrap();
    assert_eq!(dry.tokens_awarded, Tokens::ZERO);
    assert_eq!(dry.reason, ReasonCode::R303_SUPPLY_EXHAUSTED);
    assert!(dry.block_index.is_some());

    let overview = economy.overview().unwrap();
    assert_eq!(overview.cumulative_issued, overview.supply_ceiling);
    assert_eq!(overview.headroom, Tokens::ZERO);
    assert_eq!(overview.chain_length, 3);
}

#[tokio::test]
async fn test_tampered_record_is_caught() {
    let (store, economy) = fresh();
    for i in 0..3 {
        economy
            .submit(EngagementRequest::new("ada", thought(i)))
            .await
            .unwrap();
    }

    let mut block = (*economy.chain().get(1).unwrap()).clone();
    block.engagements[0].text = "I said something else entirely, honestly.".to_string();
    store
        .replace_item(keys::CHAIN, 1, &serde_json::to_string(&block).unwrap())
        .unwrap();

    match economy.verify().unwrap_err() {
        EconomyError::Integrity(e) => {
            assert_eq!(e.index, 1);
            assert_eq!(e.fault, IntegrityFault::DigestMismatch);
        }
        other => panic!("expected integrity failure, got {other}"),
    }

    let shared: Arc<dyn DurableStore> = store;
    let reopened = ThoughtEconomy::open(shared, CurveParams::default(), CommitConfig::default());
    assert!(matches!(reopened, Err(e) if e.is_integrity()));
}

#[tokio::test]
async fn test_witness_query_reports_rewritten_record() {
    let (store, economy) = fresh();
    for i in 0..3 {
        economy
            .submit(EngagementRequest::new("ada", thought(i)))
            .await
            .unwrap();
    }

    let mut block = (*economy.chain().get(1).unwrap()).clone();
    block.engagements[0].text = "I said something else entirely, honestly.".to_string();
    store
        .replace_item(keys::CHAIN, 1, &serde_json::to_string(&block).unwrap())
        .unwrap();

    let before = economy.witness_query(BlockQuery::Index(0)).unwrap();
    assert!(before.verified);
    assert_eq!(before.failed_at, None);

    let after = economy.witness_query(BlockQuery::Index(2)).unwrap();
    assert!(!after.verified);
    assert_eq!(after.failed_at, Some(1));

    // The rewritten record itself is what gets reported
    let rewritten = economy.witness_query(BlockQuery::Index(1)).unwrap();
    assert!(!rewritten.verified);
    assert_eq!(rewritten.block.engagements[0].text, block.engagements[0].text);
}

#[tokio::test]
async fn test_witness_commits_against_existing_block() {
    let (_, economy) = fresh();
    let original = economy.submit(EngagementRequest::new("ada", FOCUSED)).await.unwrap();
    let digest = original.block_digest.clone().unwrap();

    let receipt = economy
        .witness(WitnessRequest {
            witness_id: "bob".to_string(),
            block_digest: digest.clone(),
            comment: "Perhaps salience itself is learned, which means culture quietly trains what we notice first?"
                .to_string(),
            engagement_id: None,
        })
        .await
        .unwrap();
    assert!(!receipt.tier.is_noise());
    assert_eq!(receipt.block_index, Some(1));

    let report = economy.witness_query(BlockQuery::Index(1)).unwrap();
    assert!(report.verified);
    assert_eq!(report.block.kind, BlockKind::Witness);
    assert_eq!(report.block.witnessed.map(|d| d.to_hex()), Some(digest));

    let err = economy
        .witness(WitnessRequest {
            witness_id: "bob".to_string(),
            block_digest: "00".repeat(32),
            comment: "A thoughtful remark about nothing in particular.".to_string(),
            engagement_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EconomyError::UnknownBlock(_)));
}

#[tokio::test]
async fn test_noise_leaves_no_trace() {
    let (store, economy) = fresh();
    for text in ["", "hi", "you idiot, read the thread before replying"] {
        let receipt = economy.submit(EngagementRequest::new("troll", text)).await.unwrap();
        assert_eq!(receipt.tier, Tier::Noise);
        assert_eq!(receipt.block_index, None);
    }
    assert_eq!(store.len(keys::CHAIN).unwrap(), 0);
    assert!(economy.account("troll").unwrap().is_none());
    assert_eq!(economy.curve_state().unwrap().issuance_count, 0);
}
