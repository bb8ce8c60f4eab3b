// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persistence boundary of the engine.
//!
//! Every write is idempotent:
//! - stake events are insert-or-ignore on (txid, output index)
//! - the only event update is [`LedgerStore::correct_attribution`]
//! - utxos never go from spent back to unspent
//! - checkpoints only move forward

use crate::error::LedgerResult;
use crate::types::{
    Amount, Attribution, EventKey, EventPosition, Identity, IdentityStatistics, ScanGap,
    SpentMark, StakeEvent, Utxo,
};
use std::collections::HashMap;

pub mod memory;

pub use memory::MemoryLedgerStore;

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates the identity or refreshes its display name. `first_seen_height` only moves down.
    async fn upsert_identity(&self, identity: &Identity) -> LedgerResult<()>;

    async fn identities(&self) -> LedgerResult<Vec<Identity>>;

    /// Inserts events whose key is not yet present. Returns the number actually inserted.
    async fn insert_stake_events(&self, events: &[StakeEvent]) -> LedgerResult<usize>;

    /// Rewrites the attribution of an existing event. Returns false when the key is unknown.
    async fn correct_attribution(
        &self,
        key: &EventKey,
        attribution: Attribution,
        source_address: Option<&str>,
        amount: Amount,
    ) -> LedgerResult<bool>;

    /// Events ordered by (height, txid, output index), optionally filtered by attribution.
    async fn stake_events(
        &self,
        attribution: Option<Attribution>,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<StakeEvent>>;

    /// Events with `attribution` strictly after `after` in ledger order, at most `limit`.
    async fn stake_events_after(
        &self,
        attribution: Attribution,
        after: Option<&EventPosition>,
        limit: usize,
    ) -> LedgerResult<Vec<StakeEvent>>;

    /// All known outputs of `address`, spent ones included when asked.
    async fn utxos(&self, address: &str, include_spent: bool) -> LedgerResult<Vec<Utxo>>;

    /// Inserts new outputs; for known unspent outputs refreshes eligibility only.
    async fn upsert_utxos(&self, utxos: &[Utxo]) -> LedgerResult<usize>;

    /// Marks unspent outputs as spent. Already spent outputs are left untouched.
    async fn mark_spent(&self, marks: &[SpentMark]) -> LedgerResult<usize>;

    /// Sum of unspent output values per address
    async fn unspent_balances(&self) -> LedgerResult<HashMap<String, Amount>>;

    async fn checkpoint(&self, scan_id: &str) -> LedgerResult<Option<u64>>;

    /// Compare-and-advance: stores `height` only when it is above the current checkpoint.
    /// Returns the checkpoint in effect afterwards.
    async fn advance_checkpoint(&self, scan_id: &str, height: u64) -> LedgerResult<u64>;

    /// Records that `scan_id` tracks `address` from `covered_from` on, unless a height is already
    /// recorded. Returns the height in effect.
    async fn enroll_identity(
        &self,
        scan_id: &str,
        address: &str,
        covered_from: u64,
    ) -> LedgerResult<u64>;

    /// Records a failed height, bumping its attempt counter if already present.
    async fn record_gap(&self, scan_id: &str, height: u64, reason: &str) -> LedgerResult<()>;

    /// Unresolved gaps above `after_height`, in height order
    async fn open_gaps(
        &self,
        scan_id: &str,
        after_height: Option<u64>,
        limit: usize,
    ) -> LedgerResult<Vec<ScanGap>>;

    async fn resolve_gap(&self, scan_id: &str, height: u64) -> LedgerResult<()>;

    /// Truncates the statistics table and writes `statistics` atomically.
    async fn replace_statistics(&self, statistics: &[IdentityStatistics]) -> LedgerResult<()>;

    async fn statistics(&self) -> LedgerResult<Vec<IdentityStatistics>>;
}
