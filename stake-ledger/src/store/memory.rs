// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory ledger store, used by tests and dry runs.

use super::LedgerStore;
use crate::error::LedgerResult;
use crate::types::{
    Amount, Attribution, EventKey, EventPosition, Identity, IdentityStatistics, OutPoint, ScanGap,
    SpentMark, StakeEvent, Utxo,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    identities: BTreeMap<String, Identity>,
    // ordered by (height, key) for stable reads
    events: BTreeMap<(u64, EventKey), StakeEvent>,
    event_heights: HashMap<EventKey, u64>,
    utxos: BTreeMap<OutPoint, Utxo>,
    checkpoints: HashMap<String, u64>,
    enrollments: HashMap<(String, String), u64>,
    gaps: BTreeMap<(String, u64), ScanGap>,
    statistics: Vec<IdentityStatistics>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn upsert_identity(&self, identity: &Identity) -> LedgerResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .identities
            .entry(identity.address.clone())
            .and_modify(|existing| {
                existing.display_name = identity.display_name.clone();
                existing.first_seen_height =
                    existing.first_seen_height.min(identity.first_seen_height);
            })
            .or_insert_with(|| identity.clone());
        Ok(())
    }

    async fn identities(&self) -> LedgerResult<Vec<Identity>> {
        Ok(self.tables.read().await.identities.values().cloned().collect())
    }

    async fn insert_stake_events(&self, events: &[StakeEvent]) -> LedgerResult<usize> {
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for event in events {
            let key = event.key();
            if tables.event_heights.contains_key(&key) {
                continue;
            }
            tables.event_heights.insert(key.clone(), event.block_height);
            tables
                .events
                .insert((event.block_height, key), event.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn correct_attribution(
        &self,
        key: &EventKey,
        attribution: Attribution,
        source_address: Option<&str>,
        amount: Amount,
    ) -> LedgerResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(height) = tables.event_heights.get(key).copied() else {
            return Ok(false);
        };
        match tables.events.get_mut(&(height, key.clone())) {
            Some(event) => {
                event.attribution = attribution;
                event.source_address = source_address.map(str::to_string);
                event.amount = amount;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stake_events(
        &self,
        attribution: Option<Attribution>,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<StakeEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .values()
            .filter(|event| attribution.map_or(true, |a| event.attribution == a))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn stake_events_after(
        &self,
        attribution: Attribution,
        after: Option<&EventPosition>,
        limit: usize,
    ) -> LedgerResult<Vec<StakeEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .values()
            .filter(|event| event.attribution == attribution)
            .filter(|event| after.map_or(true, |after| event.position() > *after))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn utxos(&self, address: &str, include_spent: bool) -> LedgerResult<Vec<Utxo>> {
        let tables = self.tables.read().await;
        Ok(tables
            .utxos
            .values()
            .filter(|utxo| utxo.address == address && (include_spent || !utxo.is_spent))
            .cloned()
            .collect())
    }

    async fn upsert_utxos(&self, utxos: &[Utxo]) -> LedgerResult<usize> {
        let mut tables = self.tables.write().await;
        let mut written = 0;
        for utxo in utxos {
            match tables.utxos.get_mut(&utxo.key()) {
                Some(existing) if existing.is_spent => {}
                Some(existing) => {
                    existing.is_eligible = utxo.is_eligible;
                    written += 1;
                }
                None => {
                    tables.utxos.insert(utxo.key(), utxo.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn mark_spent(&self, marks: &[SpentMark]) -> LedgerResult<usize> {
        let mut tables = self.tables.write().await;
        let mut marked = 0;
        for mark in marks {
            if let Some(utxo) = tables.utxos.get_mut(&mark.outpoint) {
                if !utxo.is_spent {
                    utxo.is_spent = true;
                    utxo.is_eligible = false;
                    utxo.spent_txid = mark.spent_txid.clone();
                    utxo.spent_height = Some(mark.spent_height);
                    utxo.spent_time = Some(mark.spent_time);
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    async fn unspent_balances(&self) -> LedgerResult<HashMap<String, Amount>> {
        let tables = self.tables.read().await;
        let mut balances = HashMap::new();
        for utxo in tables.utxos.values().filter(|u| !u.is_spent) {
            *balances.entry(utxo.address.clone()).or_insert(0) += utxo.value;
        }
        Ok(balances)
    }

    async fn checkpoint(&self, scan_id: &str) -> LedgerResult<Option<u64>> {
        Ok(self.tables.read().await.checkpoints.get(scan_id).copied())
    }

    async fn advance_checkpoint(&self, scan_id: &str, height: u64) -> LedgerResult<u64> {
        let mut tables = self.tables.write().await;
        let current = tables
            .checkpoints
            .entry(scan_id.to_string())
            .or_insert(height);
        if height > *current {
            *current = height;
        }
        Ok(*current)
    }

    async fn enroll_identity(
        &self,
        scan_id: &str,
        address: &str,
        covered_from: u64,
    ) -> LedgerResult<u64> {
        let mut tables = self.tables.write().await;
        Ok(*tables
            .enrollments
            .entry((scan_id.to_string(), address.to_string()))
            .or_insert(covered_from))
    }

    async fn record_gap(&self, scan_id: &str, height: u64, reason: &str) -> LedgerResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .gaps
            .entry((scan_id.to_string(), height))
            .and_modify(|gap| {
                gap.attempts += 1;
                gap.reason = reason.to_string();
                gap.resolved = false;
            })
            .or_insert_with(|| ScanGap {
                scan_id: scan_id.to_string(),
                height,
                reason: reason.to_string(),
                attempts: 1,
                resolved: false,
            });
        Ok(())
    }

    async fn open_gaps(
        &self,
        scan_id: &str,
        after_height: Option<u64>,
        limit: usize,
    ) -> LedgerResult<Vec<ScanGap>> {
        let tables = self.tables.read().await;
        Ok(tables
            .gaps
            .values()
            .filter(|gap| gap.scan_id == scan_id && !gap.resolved)
            .filter(|gap| after_height.map_or(true, |after| gap.height > after))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn resolve_gap(&self, scan_id: &str, height: u64) -> LedgerResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(gap) = tables.gaps.get_mut(&(scan_id.to_string(), height)) {
            gap.resolved = true;
        }
        Ok(())
    }

    async fn replace_statistics(&self, statistics: &[IdentityStatistics]) -> LedgerResult<()> {
        self.tables.write().await.statistics = statistics.to_vec();
        Ok(())
    }

    async fn statistics(&self) -> LedgerResult<Vec<IdentityStatistics>> {
        Ok(self.tables.read().await.statistics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(txid: &str, index: u32, height: u64) -> StakeEvent {
        StakeEvent {
            identity_address: "RAlice".into(),
            txid: txid.into(),
            output_index: index,
            block_height: height,
            block_hash: format!("h{height}"),
            block_time: 1_000 + height as i64,
            amount: 10,
            attribution: Attribution::Unknown,
            source_address: None,
        }
    }

    fn utxo(txid: &str, value: Amount) -> Utxo {
        Utxo {
            address: "RAlice".into(),
            txid: txid.into(),
            output_index: 0,
            value,
            creation_height: 10,
            creation_time: 100,
            is_spent: false,
            is_eligible: false,
            spent_txid: None,
            spent_height: None,
            spent_time: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_on_natural_key() {
        let store = MemoryLedgerStore::new();
        let batch = vec![event("a", 0, 5), event("b", 1, 6)];

        assert_eq!(store.insert_stake_events(&batch).await.unwrap(), 2);
        assert_eq!(store.insert_stake_events(&batch).await.unwrap(), 0);

        let mut changed = event("a", 0, 5);
        changed.amount = 999;
        assert_eq!(store.insert_stake_events(&[changed]).await.unwrap(), 0);
        let events = store.stake_events(None, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].amount, 10);
    }

    #[tokio::test]
    async fn test_correct_attribution_only_touches_known_keys() {
        let store = MemoryLedgerStore::new();
        store.insert_stake_events(&[event("a", 0, 5)]).await.unwrap();
        let key = EventKey { txid: "a".into(), index: 0 };

        assert!(store
            .correct_attribution(&key, Attribution::Direct, Some("RAlice"), 7)
            .await
            .unwrap());
        let missing = EventKey { txid: "zz".into(), index: 0 };
        assert!(!store
            .correct_attribution(&missing, Attribution::Direct, None, 7)
            .await
            .unwrap());

        let direct = store.stake_events(Some(Attribution::Direct), None).await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].amount, 7);
        assert!(store
            .stake_events(Some(Attribution::Unknown), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_events_after_position_follow_ledger_order() {
        let store = MemoryLedgerStore::new();
        store
            .insert_stake_events(&[
                event("b", 0, 5),
                event("a", 1, 6),
                event("a", 0, 6),
                event("c", 0, 7),
            ])
            .await
            .unwrap();

        let first = store
            .stake_events_after(Attribution::Unknown, None, 2)
            .await
            .unwrap();
        assert_eq!(
            first
                .iter()
                .map(|e| (e.block_height, e.txid.as_str(), e.output_index))
                .collect::<Vec<_>>(),
            vec![(5, "b", 0), (6, "a", 0)]
        );
        let rest = store
            .stake_events_after(Attribution::Unknown, Some(&first[1].position()), 10)
            .await
            .unwrap();
        assert_eq!(
            rest.iter()
                .map(|e| (e.block_height, e.txid.as_str(), e.output_index))
                .collect::<Vec<_>>(),
            vec![(6, "a", 1), (7, "c", 0)]
        );
        assert!(store
            .stake_events_after(Attribution::Direct, None, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backwards() {
        let store = MemoryLedgerStore::new();
        assert_eq!(store.checkpoint("main").await.unwrap(), None);
        assert_eq!(store.advance_checkpoint("main", 10).await.unwrap(), 10);
        assert_eq!(store.advance_checkpoint("main", 7).await.unwrap(), 10);
        assert_eq!(store.advance_checkpoint("main", 12).await.unwrap(), 12);
        assert_eq!(store.checkpoint("main").await.unwrap(), Some(12));
        assert_eq!(store.checkpoint("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_spent_utxo_is_never_resurrected() {
        let store = MemoryLedgerStore::new();
        store.upsert_utxos(&[utxo("a", 50)]).await.unwrap();
        let mark = SpentMark {
            outpoint: OutPoint { txid: "a".into(), index: 0 },
            spent_txid: None,
            spent_height: 20,
            spent_time: 200,
        };
        assert_eq!(store.mark_spent(&[mark.clone()]).await.unwrap(), 1);
        assert_eq!(store.mark_spent(&[mark]).await.unwrap(), 0);

        let mut again = utxo("a", 50);
        again.is_eligible = true;
        assert_eq!(store.upsert_utxos(&[again]).await.unwrap(), 0);

        let all = store.utxos("RAlice", true).await.unwrap();
        assert!(all[0].is_spent);
        assert!(!all[0].is_eligible);
        assert!(store.utxos("RAlice", false).await.unwrap().is_empty());
        assert!(store.unspent_balances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_enrollment_sticks() {
        let store = MemoryLedgerStore::new();
        assert_eq!(store.enroll_identity("main", "RAlice", 1).await.unwrap(), 1);
        assert_eq!(store.enroll_identity("main", "RAlice", 51).await.unwrap(), 1);
        assert_eq!(store.enroll_identity("replay", "RAlice", 9).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_gap_attempts_accumulate_until_resolved() {
        let store = MemoryLedgerStore::new();
        store.record_gap("main", 42, "timeout").await.unwrap();
        store.record_gap("main", 42, "reset").await.unwrap();
        store.record_gap("main", 40, "timeout").await.unwrap();

        let gaps = store.open_gaps("main", None, 10).await.unwrap();
        assert_eq!(gaps.iter().map(|g| g.height).collect::<Vec<_>>(), vec![40, 42]);
        assert_eq!(gaps[1].attempts, 2);
        assert_eq!(gaps[1].reason, "reset");
        let later = store.open_gaps("main", Some(40), 10).await.unwrap();
        assert_eq!(later.iter().map(|g| g.height).collect::<Vec<_>>(), vec![42]);

        store.resolve_gap("main", 40).await.unwrap();
        assert_eq!(store.open_gaps("main", None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_identity_upsert_keeps_earliest_first_seen() {
        let store = MemoryLedgerStore::new();
        let mut identity = Identity {
            address: "RAlice".into(),
            display_name: "alice@".into(),
            first_seen_height: 500,
        };
        store.upsert_identity(&identity).await.unwrap();
        identity.display_name = "Alice@".into();
        identity.first_seen_height = 900;
        store.upsert_identity(&identity).await.unwrap();

        let identities = store.identities().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].display_name, "Alice@");
        assert_eq!(identities[0].first_seen_height, 500);
    }
}
