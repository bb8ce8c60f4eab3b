// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Whole-pipeline runs against the mock daemon and the in-memory store.

use crate::metrics::LedgerMetrics;
use crate::registry::IdentityRegistry;
use crate::rpc::mock::MockChainSource;
use crate::scanner::{ScanConfig, ScanCoordinator};
use crate::statistics::rebuild_statistics;
use crate::store::{LedgerStore, MemoryLedgerStore};
use crate::test_utils::*;
use crate::types::{Attribution, IdentityHistory, ScanState, COIN};
use crate::utxo::{UtxoConfig, UtxoTracker};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ALICE: &str = "RAlice";
const BOB: &str = "RBob";
const H: u64 = 200;
const STAKE: i64 = 5_000 * COIN;
const REWARD: i64 = 3 * COIN;

struct Env {
    chain: Arc<MockChainSource>,
    store: Arc<MemoryLedgerStore>,
    metrics: Arc<LedgerMetrics>,
}

impl Env {
    async fn new(identities: &[&str]) -> Self {
        let chain = Arc::new(MockChainSource::new());
        let store = Arc::new(MemoryLedgerStore::new());
        let metrics = Arc::new(LedgerMetrics::new_for_testing());
        let registry = IdentityRegistry::new(chain.clone(), store.clone(), H - 1);
        for address in identities {
            registry.register_identity(address, None).await.unwrap();
        }
        Self {
            chain,
            store,
            metrics,
        }
    }

    fn scanner(&self, config: ScanConfig) -> ScanCoordinator {
        ScanCoordinator::new(
            self.chain.clone(),
            self.store.clone(),
            self.metrics.clone(),
            config,
        )
        .unwrap()
    }

    async fn scan(&self, config: ScanConfig) -> crate::scanner::ScanReport {
        self.scanner(config)
            .scan(CancellationToken::new())
            .await
            .unwrap()
    }
}

fn config() -> ScanConfig {
    ScanConfig {
        workers: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_self_staked_block_is_direct() {
    let env = Env::new(&[ALICE]).await;
    fill_work_blocks(&env.chain, H - 1, H + 1, &[H]);
    let coinstake = add_stake_block(&env.chain, H, ALICE, STAKE, &[(ALICE, STAKE + REWARD)]);

    let report = env.scan(config()).await;
    assert_eq!(report.range, Some((H - 1, H + 1)));

    let events = env.store.stake_events(None, None).await.unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.identity_address, ALICE);
    assert_eq!(event.txid, coinstake);
    assert_eq!(event.amount, REWARD);
    assert_eq!(event.attribution, Attribution::Direct);
    assert_eq!(event.block_height, H);
}

#[tokio::test]
async fn test_block_staked_by_other_owner_is_indirect() {
    let env = Env::new(&[ALICE]).await;
    fill_work_blocks(&env.chain, H - 1, H + 1, &[H]);
    add_stake_block(&env.chain, H, BOB, STAKE, &[(ALICE, STAKE + REWARD)]);

    env.scan(config()).await;

    let events = env.store.stake_events(None, None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].attribution, Attribution::Indirect);
    assert_eq!(events[0].source_address.as_deref(), Some(BOB));
}

#[tokio::test]
async fn test_rescanning_window_changes_nothing() {
    let env = Env::new(&[ALICE]).await;
    fill_work_blocks(&env.chain, H - 1, H + 1, &[H]);
    add_stake_block(&env.chain, H, ALICE, STAKE, &[(ALICE, STAKE + REWARD)]);
    env.scan(config()).await;
    let stats_before = rebuild_statistics(env.store.as_ref(), &env.metrics)
        .await
        .unwrap();
    let ledger_before = env.store.stake_events(None, None).await.unwrap();

    let replay = env
        .scan(ScanConfig {
            scan_id: "replay".into(),
            start_height: Some(H - 1),
            ..config()
        })
        .await;
    let stats_after = rebuild_statistics(env.store.as_ref(), &env.metrics)
        .await
        .unwrap();

    assert_eq!(replay.range, Some((H - 1, H + 1)));
    assert_eq!(replay.events_inserted, 0);
    assert_eq!(env.store.stake_events(None, None).await.unwrap(), ledger_before);
    assert_eq!(stats_after, stats_before);
    assert_eq!(env.store.statistics().await.unwrap(), stats_before);
}

#[tokio::test]
async fn test_only_indirect_events_yield_zero_stakes() {
    let env = Env::new(&[ALICE, BOB]).await;
    fill_work_blocks(&env.chain, H - 1, H + 3, &[H, H + 2]);
    add_stake_block(&env.chain, H, ALICE, STAKE, &[(BOB, STAKE + REWARD)]);
    add_stake_block(&env.chain, H + 2, ALICE, STAKE, &[(ALICE, STAKE + REWARD)]);

    env.scan(config()).await;
    let rows = rebuild_statistics(env.store.as_ref(), &env.metrics)
        .await
        .unwrap();

    let bob_events = env
        .store
        .stake_events(Some(Attribution::Indirect), None)
        .await
        .unwrap();
    assert_eq!(bob_events.len(), 1);
    assert_eq!(bob_events[0].identity_address, BOB);

    let bob = rows.iter().find(|r| r.address == BOB).unwrap();
    assert_eq!(bob.total_stakes, 0);
    assert_eq!(bob.rank, None);
    let alice = rows.iter().find(|r| r.address == ALICE).unwrap();
    assert_eq!(alice.total_stakes, 1);
    assert_eq!(alice.rank, Some(1));
}

#[tokio::test]
async fn test_full_cycle_registers_scans_reconciles_and_ranks() {
    let env = Env::new(&[]).await;
    env.chain.set_identity_history(
        ALICE,
        IdentityHistory {
            name: Some("alice@".into()),
            first_seen_height: Some(H - 50),
        },
    );
    IdentityRegistry::new(env.chain.clone(), env.store.clone(), 0)
        .register_identity(ALICE, None)
        .await
        .unwrap();

    fill_work_blocks(&env.chain, 1, 400, &[H, H + 100]);
    add_stake_block(&env.chain, H, ALICE, STAKE, &[(ALICE, STAKE + REWARD)]);
    add_stake_block(&env.chain, H + 100, ALICE, STAKE, &[(ALICE, STAKE + REWARD)]);
    env.chain.set_utxos(
        ALICE,
        vec![
            utxo(ALICE, "coinstake-200", 0, STAKE + REWARD, H),
            utxo(ALICE, "coinstake-300", 0, STAKE + REWARD, H + 100),
        ],
    );

    let scanner = env.scanner(config());
    let mut state = scanner.subscribe();
    let report = scanner.scan(CancellationToken::new()).await.unwrap();
    assert_eq!(report.range, Some((H - 50, 400)));
    assert_eq!(report.pos_blocks, 2);
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), ScanState::Complete);

    let tracker = UtxoTracker::new(
        env.chain.clone(),
        env.store.clone(),
        env.metrics.clone(),
        &UtxoConfig::default(),
    );
    let summary = tracker.reconcile_all().await.unwrap();
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.upserted, 2);

    let local = env.store.utxos(ALICE, false).await.unwrap();
    // created at 200 and 300 with tip 400: only the first has matured
    assert_eq!(local.iter().filter(|u| u.is_eligible).count(), 1);

    let rows = rebuild_statistics(env.store.as_ref(), &env.metrics)
        .await
        .unwrap();
    let alice = &rows[0];
    assert_eq!(alice.total_stakes, 2);
    assert_eq!(alice.total_rewards, 2 * REWARD);
    assert_eq!(alice.observed_principal, 2 * (STAKE + REWARD));
    assert_eq!(
        alice.mean_interval_secs,
        Some((100 * BLOCK_SPACING_SECS) as f64)
    );
    assert!(alice.apy_estimate.unwrap() > 0.0);
    assert_eq!(alice.rank, Some(1));
}
