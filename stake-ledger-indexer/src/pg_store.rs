// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Postgres-backed [`LedgerStore`].
//!
//! Idempotence is enforced by the database: stake events are `ON CONFLICT DO NOTHING`, spent
//! outputs are excluded from upserts by a `WHERE NOT is_spent` guard, and checkpoints only move
//! when the new height is greater.

use async_trait::async_trait;
use diesel::dsl::{now, sql};
use diesel::sql_types::BigInt;
use diesel::upsert::excluded;
use diesel::{
    BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use stake_ledger::error::{LedgerError, LedgerResult};
use stake_ledger::store::LedgerStore;
use stake_ledger::types::{
    Amount, Attribution, EventKey, EventPosition, Identity, IdentityStatistics, ScanGap,
    SpentMark, StakeEvent, Utxo,
};
use stake_ledger_pg_db::{Connection, Db};
use stake_ledger_schema::models;
use stake_ledger_schema::schema::{
    identities, identity_statistics, scan_checkpoints, scan_enrollments, scan_gaps, stake_events,
    utxos,
};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

#[derive(Clone)]
pub struct PgLedgerStore {
    db: Db,
}

impl PgLedgerStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn connect(&self) -> LedgerResult<Connection<'_>> {
        self.db.connect().await.map_err(LedgerError::storage)
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn identity_row(identity: &Identity) -> models::Identity {
    models::Identity {
        address: identity.address.clone(),
        display_name: identity.display_name.clone(),
        first_seen_height: identity.first_seen_height as i64,
    }
}

fn identity_from_row(row: models::Identity) -> Identity {
    Identity {
        address: row.address,
        display_name: row.display_name,
        first_seen_height: row.first_seen_height as u64,
    }
}

fn event_row(event: &StakeEvent) -> models::StakeEvent {
    models::StakeEvent {
        identity_address: event.identity_address.clone(),
        txid: event.txid.clone(),
        output_index: event.output_index as i32,
        block_height: event.block_height as i64,
        block_hash: event.block_hash.clone(),
        block_time: event.block_time,
        amount: event.amount,
        attribution: event.attribution.as_ref().to_string(),
        source_address: event.source_address.clone(),
    }
}

fn event_from_row(row: models::StakeEvent) -> LedgerResult<StakeEvent> {
    let attribution = Attribution::from_str(&row.attribution).map_err(|_| {
        LedgerError::Storage(format!(
            "stake event {}:{} has attribution '{}'",
            row.txid, row.output_index, row.attribution
        ))
    })?;
    Ok(StakeEvent {
        identity_address: row.identity_address,
        txid: row.txid,
        output_index: row.output_index as u32,
        block_height: row.block_height as u64,
        block_hash: row.block_hash,
        block_time: row.block_time,
        amount: row.amount,
        attribution,
        source_address: row.source_address,
    })
}

fn utxo_row(utxo: &Utxo) -> models::Utxo {
    models::Utxo {
        address: utxo.address.clone(),
        txid: utxo.txid.clone(),
        output_index: utxo.output_index as i32,
        value: utxo.value,
        creation_height: utxo.creation_height as i64,
        creation_time: utxo.creation_time,
        is_spent: utxo.is_spent,
        is_eligible: utxo.is_eligible,
        spent_txid: utxo.spent_txid.clone(),
        spent_height: utxo.spent_height.map(|h| h as i64),
        spent_time: utxo.spent_time,
    }
}

fn utxo_from_row(row: models::Utxo) -> Utxo {
    Utxo {
        address: row.address,
        txid: row.txid,
        output_index: row.output_index as u32,
        value: row.value,
        creation_height: row.creation_height as u64,
        creation_time: row.creation_time,
        is_spent: row.is_spent,
        is_eligible: row.is_eligible,
        spent_txid: row.spent_txid,
        spent_height: row.spent_height.map(|h| h as u64),
        spent_time: row.spent_time,
    }
}

fn gap_from_row(row: models::ScanGap) -> ScanGap {
    ScanGap {
        scan_id: row.scan_id,
        height: row.height as u64,
        reason: row.reason,
        attempts: row.attempts as u32,
        resolved: row.resolved,
    }
}

fn statistics_row(stats: &IdentityStatistics) -> models::IdentityStatistics {
    models::IdentityStatistics {
        address: stats.address.clone(),
        total_stakes: stats.total_stakes as i64,
        total_rewards: stats.total_rewards,
        first_stake_time: stats.first_stake_time,
        last_stake_time: stats.last_stake_time,
        mean_interval_secs: stats.mean_interval_secs,
        median_interval_secs: stats.median_interval_secs,
        observed_principal: stats.observed_principal,
        apy_estimate: stats.apy_estimate,
        rank: stats.rank.map(|r| r as i64),
        percentile: stats.percentile,
    }
}

fn statistics_from_row(row: models::IdentityStatistics) -> IdentityStatistics {
    IdentityStatistics {
        address: row.address,
        total_stakes: row.total_stakes as u64,
        total_rewards: row.total_rewards,
        first_stake_time: row.first_stake_time,
        last_stake_time: row.last_stake_time,
        mean_interval_secs: row.mean_interval_secs,
        median_interval_secs: row.median_interval_secs,
        observed_principal: row.observed_principal,
        apy_estimate: row.apy_estimate,
        rank: row.rank.map(|r| r as u64),
        percentile: row.percentile,
    }
}

// ============================================================================
// LedgerStore
// ============================================================================

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn upsert_identity(&self, identity: &Identity) -> LedgerResult<()> {
        let mut conn = self.connect().await?;
        diesel::insert_into(identities::table)
            .values(&identity_row(identity))
            .on_conflict(identities::address)
            .do_update()
            .set((
                identities::display_name.eq(excluded(identities::display_name)),
                identities::first_seen_height.eq(sql::<BigInt>(
                    "LEAST(identities.first_seen_height, EXCLUDED.first_seen_height)",
                )),
                identities::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(())
    }

    async fn identities(&self) -> LedgerResult<Vec<Identity>> {
        let mut conn = self.connect().await?;
        let rows: Vec<models::Identity> = identities::table
            .select(models::Identity::as_select())
            .order(identities::address.asc())
            .load(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(rows.into_iter().map(identity_from_row).collect())
    }

    async fn insert_stake_events(&self, events: &[StakeEvent]) -> LedgerResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let rows: Vec<_> = events.iter().map(event_row).collect();
        let mut conn = self.connect().await?;
        let inserted = diesel::insert_into(stake_events::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        debug!(
            "[PgStore] Inserted {} of {} stake events",
            inserted,
            rows.len()
        );
        Ok(inserted)
    }

    async fn correct_attribution(
        &self,
        key: &EventKey,
        attribution: Attribution,
        source_address: Option<&str>,
        amount: Amount,
    ) -> LedgerResult<bool> {
        let mut conn = self.connect().await?;
        let updated = diesel::update(
            stake_events::table.find((key.txid.as_str(), key.index as i32)),
        )
        .set((
            stake_events::attribution.eq(attribution.as_ref()),
            stake_events::source_address.eq(source_address),
            stake_events::amount.eq(amount),
        ))
        .execute(&mut conn)
        .await
        .map_err(LedgerError::storage)?;
        Ok(updated == 1)
    }

    async fn stake_events(
        &self,
        attribution: Option<Attribution>,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<StakeEvent>> {
        let mut query = stake_events::table
            .select(models::StakeEvent::as_select())
            .order((
                stake_events::block_height.asc(),
                stake_events::txid.asc(),
                stake_events::output_index.asc(),
            ))
            .into_boxed();
        if let Some(attribution) = attribution {
            query = query.filter(stake_events::attribution.eq(attribution.as_ref().to_string()));
        }
        if let Some(limit) = limit {
            query = query.limit(limit as i64);
        }

        let mut conn = self.connect().await?;
        let rows: Vec<models::StakeEvent> = query
            .load(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        rows.into_iter().map(event_from_row).collect()
    }

    async fn stake_events_after(
        &self,
        attribution: Attribution,
        after: Option<&EventPosition>,
        limit: usize,
    ) -> LedgerResult<Vec<StakeEvent>> {
        let mut query = stake_events::table
            .select(models::StakeEvent::as_select())
            .filter(stake_events::attribution.eq(attribution.as_ref().to_string()))
            .order((
                stake_events::block_height.asc(),
                stake_events::txid.asc(),
                stake_events::output_index.asc(),
            ))
            .limit(limit as i64)
            .into_boxed();
        if let Some(after) = after {
            let height = after.height as i64;
            let txid = after.key.txid.clone();
            query = query.filter(
                stake_events::block_height.gt(height).or(stake_events::block_height
                    .eq(height)
                    .and(
                        stake_events::txid.gt(txid.clone()).or(stake_events::txid
                            .eq(txid)
                            .and(stake_events::output_index.gt(after.key.index as i32))),
                    )),
            );
        }

        let mut conn = self.connect().await?;
        let rows: Vec<models::StakeEvent> = query
            .load(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        rows.into_iter().map(event_from_row).collect()
    }

    async fn utxos(&self, address: &str, include_spent: bool) -> LedgerResult<Vec<Utxo>> {
        let mut query = utxos::table
            .select(models::Utxo::as_select())
            .filter(utxos::address.eq(address.to_string()))
            .order((utxos::txid.asc(), utxos::output_index.asc()))
            .into_boxed();
        if !include_spent {
            query = query.filter(utxos::is_spent.eq(false));
        }

        let mut conn = self.connect().await?;
        let rows: Vec<models::Utxo> = query
            .load(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(rows.into_iter().map(utxo_from_row).collect())
    }

    async fn upsert_utxos(&self, utxos: &[Utxo]) -> LedgerResult<usize> {
        if utxos.is_empty() {
            return Ok(0);
        }
        let rows: Vec<_> = utxos.iter().map(utxo_row).collect();
        let mut conn = self.connect().await?;
        diesel::query_dsl::methods::FilterDsl::filter(
            diesel::insert_into(utxos::table)
                .values(&rows)
                .on_conflict((utxos::txid, utxos::output_index))
                .do_update()
                .set((
                    utxos::is_eligible.eq(excluded(utxos::is_eligible)),
                    utxos::updated_at.eq(now),
                )),
            utxos::is_spent.eq(false),
        )
        .execute(&mut conn)
            .await
            .map_err(LedgerError::storage)
    }

    async fn mark_spent(&self, marks: &[SpentMark]) -> LedgerResult<usize> {
        if marks.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect().await?;
        let marked = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let mut marked = 0;
                    for mark in marks {
                        marked += diesel::update(
                            utxos::table
                                .find((mark.outpoint.txid.as_str(), mark.outpoint.index as i32))
                                .filter(utxos::is_spent.eq(false)),
                        )
                        .set((
                            utxos::is_spent.eq(true),
                            utxos::is_eligible.eq(false),
                            utxos::spent_txid.eq(mark.spent_txid.as_deref()),
                            utxos::spent_height.eq(Some(mark.spent_height as i64)),
                            utxos::spent_time.eq(Some(mark.spent_time)),
                            utxos::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;
                    }
                    Ok(marked)
                }
                .scope_boxed()
            })
            .await
            .map_err(LedgerError::storage)?;
        Ok(marked)
    }

    async fn unspent_balances(&self) -> LedgerResult<HashMap<String, Amount>> {
        let mut conn = self.connect().await?;
        let rows: Vec<(String, i64)> = utxos::table
            .filter(utxos::is_spent.eq(false))
            .select((utxos::address, utxos::value))
            .load(&mut conn)
            .await
            .map_err(LedgerError::storage)?;

        let mut balances = HashMap::new();
        for (address, value) in rows {
            *balances.entry(address).or_insert(0) += value;
        }
        Ok(balances)
    }

    async fn checkpoint(&self, scan_id: &str) -> LedgerResult<Option<u64>> {
        let mut conn = self.connect().await?;
        let height: Option<i64> = scan_checkpoints::table
            .filter(scan_checkpoints::scan_id.eq(scan_id))
            .select(scan_checkpoints::last_height)
            .first(&mut conn)
            .await
            .optional()
            .map_err(LedgerError::storage)?;
        Ok(height.map(|h| h as u64))
    }

    async fn advance_checkpoint(&self, scan_id: &str, height: u64) -> LedgerResult<u64> {
        let mut conn = self.connect().await?;
        diesel::query_dsl::methods::FilterDsl::filter(
            diesel::insert_into(scan_checkpoints::table)
                .values(&models::ScanCheckpoint {
                    scan_id: scan_id.to_string(),
                    last_height: height as i64,
                })
                .on_conflict(scan_checkpoints::scan_id)
                .do_update()
                .set((
                    scan_checkpoints::last_height.eq(excluded(scan_checkpoints::last_height)),
                    scan_checkpoints::updated_at.eq(now),
                )),
            scan_checkpoints::last_height.lt(excluded(scan_checkpoints::last_height)),
        )
        .execute(&mut conn)
            .await
            .map_err(LedgerError::storage)?;

        let current: i64 = scan_checkpoints::table
            .filter(scan_checkpoints::scan_id.eq(scan_id))
            .select(scan_checkpoints::last_height)
            .first(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(current as u64)
    }

    async fn enroll_identity(
        &self,
        scan_id: &str,
        address: &str,
        covered_from: u64,
    ) -> LedgerResult<u64> {
        let mut conn = self.connect().await?;
        diesel::insert_into(scan_enrollments::table)
            .values(models::ScanEnrollment {
                scan_id: scan_id.to_string(),
                address: address.to_string(),
                covered_from: covered_from as i64,
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        let stored: i64 = scan_enrollments::table
            .find((scan_id, address))
            .select(scan_enrollments::covered_from)
            .first(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(stored as u64)
    }

    async fn record_gap(&self, scan_id: &str, height: u64, reason: &str) -> LedgerResult<()> {
        let mut conn = self.connect().await?;
        diesel::insert_into(scan_gaps::table)
            .values(&models::ScanGap {
                scan_id: scan_id.to_string(),
                height: height as i64,
                reason: reason.to_string(),
                attempts: 1,
                resolved: false,
            })
            .on_conflict((scan_gaps::scan_id, scan_gaps::height))
            .do_update()
            .set((
                scan_gaps::attempts.eq(scan_gaps::attempts + 1),
                scan_gaps::reason.eq(excluded(scan_gaps::reason)),
                scan_gaps::resolved.eq(false),
                scan_gaps::last_failed_at.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(())
    }

    async fn open_gaps(
        &self,
        scan_id: &str,
        after_height: Option<u64>,
        limit: usize,
    ) -> LedgerResult<Vec<ScanGap>> {
        let mut query = scan_gaps::table
            .select(models::ScanGap::as_select())
            .filter(scan_gaps::scan_id.eq(scan_id))
            .filter(scan_gaps::resolved.eq(false))
            .order(scan_gaps::height.asc())
            .limit(limit as i64)
            .into_boxed();
        if let Some(after) = after_height {
            query = query.filter(scan_gaps::height.gt(after as i64));
        }

        let mut conn = self.connect().await?;
        let rows: Vec<models::ScanGap> = query
            .load(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(rows.into_iter().map(gap_from_row).collect())
    }

    async fn resolve_gap(&self, scan_id: &str, height: u64) -> LedgerResult<()> {
        let mut conn = self.connect().await?;
        diesel::update(scan_gaps::table.find((scan_id, height as i64)))
            .set(scan_gaps::resolved.eq(true))
            .execute(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(())
    }

    async fn replace_statistics(&self, statistics: &[IdentityStatistics]) -> LedgerResult<()> {
        let rows: Vec<_> = statistics.iter().map(statistics_row).collect();
        let rows = &rows;
        let mut conn = self.connect().await?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                diesel::delete(identity_statistics::table)
                    .execute(conn)
                    .await?;
                if !rows.is_empty() {
                    diesel::insert_into(identity_statistics::table)
                        .values(rows)
                        .execute(conn)
                        .await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await
        .map_err(LedgerError::storage)
    }

    async fn statistics(&self) -> LedgerResult<Vec<IdentityStatistics>> {
        let mut conn = self.connect().await?;
        let rows: Vec<models::IdentityStatistics> = identity_statistics::table
            .select(models::IdentityStatistics::as_select())
            .order((
                identity_statistics::total_stakes.desc(),
                identity_statistics::total_rewards.desc(),
                identity_statistics::address.asc(),
            ))
            .load(&mut conn)
            .await
            .map_err(LedgerError::storage)?;
        Ok(rows.into_iter().map(statistics_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stake_ledger::types::OutPoint;
    use stake_ledger_pg_db::{reset_database, DbArgs};

    fn identity(address: &str, first_seen_height: u64) -> Identity {
        Identity {
            address: address.into(),
            display_name: format!("{address}@"),
            first_seen_height,
        }
    }

    fn event(txid: &str, height: u64) -> StakeEvent {
        StakeEvent {
            identity_address: "RAlice".into(),
            txid: txid.into(),
            output_index: 0,
            block_height: height,
            block_hash: format!("hash-{height}"),
            block_time: 1_600_000_000 + height as i64,
            amount: 300_000_000,
            attribution: Attribution::Unknown,
            source_address: None,
        }
    }

    fn utxo(txid: &str, value: Amount, is_eligible: bool) -> Utxo {
        Utxo {
            address: "RAlice".into(),
            txid: txid.into(),
            output_index: 0,
            value,
            creation_height: 100,
            creation_time: 1_600_006_000,
            is_spent: false,
            is_eligible,
            spent_txid: None,
            spent_height: None,
            spent_time: None,
        }
    }

    async fn fresh_store() -> PgLedgerStore {
        let url: url::Url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL environment variable must be set")
            .parse()
            .expect("Invalid database URL format");
        reset_database(
            url.clone(),
            DbArgs::default(),
            Some(&stake_ledger_schema::MIGRATIONS),
        )
        .await
        .unwrap();
        PgLedgerStore::new(Db::for_write(url, DbArgs::default()).await.unwrap())
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_identity_upsert_keeps_lowest_first_seen() {
        let store = fresh_store().await;
        store.upsert_identity(&identity("RAlice", 500)).await.unwrap();
        let mut renamed = identity("RAlice", 700);
        renamed.display_name = "alice.vrsc@".into();
        store.upsert_identity(&renamed).await.unwrap();

        let stored = store.identities().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].display_name, "alice.vrsc@");
        assert_eq!(stored[0].first_seen_height, 500);
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_events_insert_once_and_correct() {
        let store = fresh_store().await;
        store.upsert_identity(&identity("RAlice", 1)).await.unwrap();

        let events = vec![event("b", 20), event("a", 10)];
        assert_eq!(store.insert_stake_events(&events).await.unwrap(), 2);
        assert_eq!(store.insert_stake_events(&events).await.unwrap(), 0);

        let key = OutPoint {
            txid: "a".into(),
            index: 0,
        };
        assert!(store
            .correct_attribution(&key, Attribution::Indirect, Some("RBob"), 42)
            .await
            .unwrap());
        let missing = OutPoint {
            txid: "zz".into(),
            index: 0,
        };
        assert!(!store
            .correct_attribution(&missing, Attribution::Direct, None, 1)
            .await
            .unwrap());

        let all = store.stake_events(None, None).await.unwrap();
        assert_eq!(all.iter().map(|e| e.txid.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(all[0].attribution, Attribution::Indirect);
        assert_eq!(all[0].source_address.as_deref(), Some("RBob"));
        assert_eq!(all[0].amount, 42);

        let unknown = store
            .stake_events(Some(Attribution::Unknown), Some(10))
            .await
            .unwrap();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].txid, "b");
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_spent_utxos_are_never_resurrected() {
        let store = fresh_store().await;
        store
            .upsert_utxos(&[utxo("u1", 10, false), utxo("u2", 20, false)])
            .await
            .unwrap();
        let mark = SpentMark {
            outpoint: OutPoint {
                txid: "u1".into(),
                index: 0,
            },
            spent_txid: Some("spender".into()),
            spent_height: 300,
            spent_time: 1_600_018_000,
        };
        assert_eq!(store.mark_spent(&[mark.clone()]).await.unwrap(), 1);
        assert_eq!(store.mark_spent(&[mark]).await.unwrap(), 0);

        // u1 reappears from a stale daemon answer, u2 matures
        let written = store
            .upsert_utxos(&[utxo("u1", 10, true), utxo("u2", 20, true)])
            .await
            .unwrap();
        assert_eq!(written, 1);

        let unspent = store.utxos("RAlice", false).await.unwrap();
        assert_eq!(unspent.len(), 1);
        assert!(unspent[0].is_eligible);
        let all = store.utxos("RAlice", true).await.unwrap();
        let spent = all.iter().find(|u| u.txid == "u1").unwrap();
        assert!(spent.is_spent && !spent.is_eligible);
        assert_eq!(spent.spent_height, Some(300));

        let balances = store.unspent_balances().await.unwrap();
        assert_eq!(balances.get("RAlice"), Some(&20));
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_enrollment_keeps_first_height() {
        let store = fresh_store().await;
        store.upsert_identity(&identity("RAlice", 1)).await.unwrap();
        assert_eq!(store.enroll_identity("main", "RAlice", 1).await.unwrap(), 1);
        assert_eq!(store.enroll_identity("main", "RAlice", 80).await.unwrap(), 1);
        assert_eq!(store.enroll_identity("replay", "RAlice", 9).await.unwrap(), 9);
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_checkpoint_only_moves_forward() {
        let store = fresh_store().await;
        assert_eq!(store.checkpoint("main").await.unwrap(), None);
        assert_eq!(store.advance_checkpoint("main", 100).await.unwrap(), 100);
        assert_eq!(store.advance_checkpoint("main", 90).await.unwrap(), 100);
        assert_eq!(store.advance_checkpoint("main", 150).await.unwrap(), 150);
        assert_eq!(store.checkpoint("main").await.unwrap(), Some(150));
        assert_eq!(store.checkpoint("other").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_gaps_bump_attempts_until_resolved() {
        let store = fresh_store().await;
        store.record_gap("main", 7, "timeout").await.unwrap();
        store.record_gap("main", 7, "bad payload").await.unwrap();
        store.record_gap("main", 3, "timeout").await.unwrap();

        let open = store.open_gaps("main", None, 10).await.unwrap();
        assert_eq!(open.iter().map(|g| g.height).collect::<Vec<_>>(), [3, 7]);
        assert_eq!(open[1].attempts, 2);
        assert_eq!(open[1].reason, "bad payload");

        let after = store.open_gaps("main", Some(3), 10).await.unwrap();
        assert_eq!(after.iter().map(|g| g.height).collect::<Vec<_>>(), [7]);

        store.resolve_gap("main", 3).await.unwrap();
        assert_eq!(store.open_gaps("main", None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_events_after_position_page_in_ledger_order() {
        let store = fresh_store().await;
        store.upsert_identity(&identity("RAlice", 1)).await.unwrap();
        let mut second_output = event("b", 10);
        second_output.output_index = 1;
        store
            .insert_stake_events(&[event("b", 10), second_output, event("a", 12), event("c", 9)])
            .await
            .unwrap();

        let page = store
            .stake_events_after(Attribution::Unknown, None, 2)
            .await
            .unwrap();
        let keys = |events: &[StakeEvent]| {
            events
                .iter()
                .map(|e| (e.block_height, e.txid.clone(), e.output_index))
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&page), [(9, "c".to_string(), 0), (10, "b".to_string(), 0)]);

        let rest = store
            .stake_events_after(Attribution::Unknown, Some(&page[1].position()), 10)
            .await
            .unwrap();
        assert_eq!(keys(&rest), [(10, "b".to_string(), 1), (12, "a".to_string(), 0)]);
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_statistics_are_replaced_wholesale() {
        let store = fresh_store().await;
        let row = |address: &str, stakes: u64| IdentityStatistics {
            address: address.into(),
            total_stakes: stakes,
            total_rewards: stakes as i64 * 3,
            first_stake_time: None,
            last_stake_time: None,
            mean_interval_secs: None,
            median_interval_secs: None,
            observed_principal: 0,
            apy_estimate: None,
            rank: (stakes > 0).then_some(1),
            percentile: None,
        };
        store
            .replace_statistics(&[row("RAlice", 1), row("RBob", 0)])
            .await
            .unwrap();
        store
            .replace_statistics(&[row("RBob", 5), row("RCarol", 2)])
            .await
            .unwrap();

        let stored = store.statistics().await.unwrap();
        assert_eq!(stored, vec![row("RBob", 5), row("RCarol", 2)]);
    }
}
