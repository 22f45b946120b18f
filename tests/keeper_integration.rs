//! Integration tests for the Keeper Scheduler
//!
//! Rotation, duplicate wakes, provider failures and memorials, all against
//! the scripted provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use thought_keeper::config::{CommitConfig, ScheduleConfig};
use thought_keeper::core::{
    CurveParams, Keeper, ScriptedProvider, SlotOutcome, ThoughtEconomy, KEEPER_PARTICIPANT,
};
use thought_keeper::error::EconomyError;
use thought_keeper::store::{DurableStore, MemoryStore};
use thought_keeper::types::{BlockKind, PantheonAgent, ReasonCode};

/// 2026-01-05 10:00:00 UTC, the start of an Apollo slot
const BASE: i64 = 1_767_607_200;
const QUARTER: i64 = 15 * 60;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn economy() -> Arc<ThoughtEconomy> {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    Arc::new(ThoughtEconomy::open(store, CurveParams::default(), CommitConfig::default()).unwrap())
}

fn keeper_with(economy: Arc<ThoughtEconomy>, provider: Arc<ScriptedProvider>) -> Keeper {
    Keeper::new(economy, provider, ScheduleConfig::default())
}

#[tokio::test]
async fn test_one_hour_visits_each_agent_once() {
    let economy = economy();
    let keeper = keeper_with(economy.clone(), Arc::new(ScriptedProvider::new()));

    let mut visited = Vec::new();
    for q in 0..4 {
        match keeper.fire(at(BASE + q * QUARTER + 30)).await.unwrap() {
            SlotOutcome::Fired { agent, receipt, .. } => {
                assert_eq!(receipt.index, q as u64);
                visited.push(agent);
            }
            other => panic!("slot {q} did not fire: {other:?}"),
        }
    }

    assert_eq!(visited, PantheonAgent::ROTATION.to_vec());
    assert_eq!(economy.chain().len(), 4);
    assert_eq!(economy.verify().unwrap(), 4);
    for block in economy.chain().blocks() {
        assert_eq!(block.kind, BlockKind::Dialogue);
        assert_eq!(block.engagements.len(), 4);
    }
}

#[tokio::test]
async fn test_duplicate_wakes_in_one_slot_commit_once() {
    let economy = economy();
    let provider = Arc::new(ScriptedProvider::new());
    let keeper = keeper_with(economy.clone(), provider.clone());

    let first = keeper.fire(at(BASE + 10)).await.unwrap();
    assert_eq!(first.reason(), ReasonCode::R500_SLOT_FIRED);
    for offset in [60, 300, QUARTER - 1] {
        let again = keeper.fire(at(BASE + offset)).await.unwrap();
        assert!(matches!(again, SlotOutcome::AlreadyFired { agent: PantheonAgent::Apollo, .. }));
        assert_eq!(again.reason(), ReasonCode::R501_SLOT_ALREADY_FIRED);
    }

    assert_eq!(economy.chain().len(), 1);
    // Later wakes never reach the provider
    assert_eq!(provider.call_count(), 6);
}

#[tokio::test]
async fn test_two_keepers_race_for_one_slot() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let open = || {
        Arc::new(ThoughtEconomy::open(Arc::clone(&store), CurveParams::default(), CommitConfig::default()).unwrap())
    };
    let a = keeper_with(open(), Arc::new(ScriptedProvider::new()));
    let b = keeper_with(open(), Arc::new(ScriptedProvider::new()));

    let now = at(BASE + QUARTER);
    let (ra, rb) = tokio::join!(a.fire(now), b.fire(now));
    let outcomes = [ra.unwrap(), rb.unwrap()];

    let fired = outcomes
        .iter()
        .filter(|o| matches!(o, SlotOutcome::Fired { .. }))
        .count();
    assert_eq!(fired, 1);
    assert!(outcomes.iter().all(|o| o.agent() == PantheonAgent::Athena));
    assert_eq!(store.len(thought_keeper::store::keys::CHAIN).unwrap(), 1);
}

#[tokio::test]
async fn test_provider_down_skips_slot_then_recovers() {
    let economy = economy();
    let provider = Arc::new(ScriptedProvider::new());
    let keeper = keeper_with(economy.clone(), provider.clone());

    provider.set_available(false);
    let err = keeper.fire(at(BASE)).await.unwrap_err();
    assert!(matches!(err, EconomyError::ProviderUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(economy.chain().len(), 0);
    assert_eq!(economy.last_slot().unwrap(), None);

    provider.set_available(true);
    let outcome = keeper.fire(at(BASE + 60)).await.unwrap();
    assert!(matches!(outcome, SlotOutcome::Fired { agent: PantheonAgent::Apollo, .. }));
    assert_eq!(economy.chain().len(), 1);
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let economy = economy();
    let provider = Arc::new(ScriptedProvider::new().with_latency(Duration::from_secs(5)));
    let schedule = ScheduleConfig {
        provider_timeout_secs: 1,
        ..ScheduleConfig::default()
    };
    let keeper = Keeper::new(economy.clone(), provider, schedule);

    let err = keeper.fire(at(BASE)).await.unwrap_err();
    assert!(matches!(err, EconomyError::ProviderUnavailable(_)));
    assert_eq!(economy.chain().len(), 0);
    assert_eq!(economy.last_slot().unwrap(), None);
}

#[tokio::test]
async fn test_keeper_and_agents_are_credited() {
    let economy = economy();
    let keeper = keeper_with(economy.clone(), Arc::new(ScriptedProvider::new()));
    keeper.fire(at(BASE + 2 * QUARTER)).await.unwrap();

    let hermes = economy.account("hermes").unwrap().unwrap();
    let me = economy.account(KEEPER_PARTICIPANT).unwrap().unwrap();
    assert_eq!(hermes.engagements, 2);
    assert_eq!(me.engagements, 2);

    let block = economy.chain().tip().unwrap();
    assert_eq!(block.total_tokens(), hermes.balance + me.balance);
    assert_eq!(economy.curve_state().unwrap().cumulative_issued, block.total_tokens());
}

#[tokio::test]
async fn test_round_and_memorial_leave_rotation_alone() {
    let economy = economy();
    let keeper = keeper_with(economy.clone(), Arc::new(ScriptedProvider::new()));

    let receipts = keeper.run_round().await.unwrap();
    assert_eq!(receipts.len(), 4);
    let memorial = keeper.honor().await.unwrap();
    assert_eq!(memorial.index, 4);
    assert_eq!(memorial.engagements, 1);

    let block = economy.chain().tip().unwrap();
    assert_eq!(block.kind, BlockKind::Memorial);
    assert_eq!(block.engagements[0].participant, KEEPER_PARTICIPANT);
    assert_eq!(economy.last_slot().unwrap(), None);

    // The scheduled slot still fires
    let outcome = keeper.fire(at(BASE)).await.unwrap();
    assert!(matches!(outcome, SlotOutcome::Fired { .. }));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let keeper = keeper_with(economy(), Arc::new(ScriptedProvider::new()));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let stop = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
    });

    tokio::time::timeout(Duration::from_secs(5), keeper.run(rx))
        .await
        .expect("keeper did not stop")
        .unwrap();
    stop.await.unwrap();
}
