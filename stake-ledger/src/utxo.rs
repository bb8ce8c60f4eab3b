// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! UTXO Tracker
//!
//! Keeps the local unspent set of every identity equal to the daemon's `getaddressutxos` answer.
//! Outputs that disappeared from the daemon are marked spent at the reconciliation tip; the
//! spending transaction is not looked up.

use crate::error::LedgerResult;
use crate::metrics::LedgerMetrics;
use crate::rpc::ChainSource;
use crate::store::LedgerStore;
use crate::types::{OutPoint, SpentMark, Utxo};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MATURITY_WINDOW: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoConfig {
    /// Confirmations an output needs before it may stake
    #[serde(default = "default_maturity_window")]
    pub maturity_window: u64,
}

fn default_maturity_window() -> u64 {
    DEFAULT_MATURITY_WINDOW
}

impl Default for UtxoConfig {
    fn default() -> Self {
        Self {
            maturity_window: DEFAULT_MATURITY_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub marked_spent: usize,
    pub upserted: usize,
    pub unspent: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub addresses: usize,
    pub failures: usize,
    pub marked_spent: usize,
    pub upserted: usize,
}

/// Chain tip plus the block times already resolved in this pass
struct Pass {
    tip: u64,
    tip_time: i64,
    block_times: HashMap<u64, i64>,
}

pub struct UtxoTracker {
    source: Arc<dyn ChainSource>,
    store: Arc<dyn LedgerStore>,
    metrics: Arc<LedgerMetrics>,
    maturity_window: u64,
}

impl UtxoTracker {
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn LedgerStore>,
        metrics: Arc<LedgerMetrics>,
        config: &UtxoConfig,
    ) -> Self {
        Self {
            source,
            store,
            metrics,
            maturity_window: config.maturity_window,
        }
    }

    pub fn is_eligible(&self, creation_height: u64, tip: u64) -> bool {
        tip.saturating_sub(creation_height) >= self.maturity_window
    }

    pub async fn reconcile_address(&self, address: &str) -> LedgerResult<ReconcileOutcome> {
        let mut pass = self.begin_pass().await?;
        self.reconcile_in_pass(address, &mut pass).await
    }

    /// Reconciles every registered identity. A failing address is logged and counted; the
    /// others still run.
    pub async fn reconcile_all(&self) -> LedgerResult<ReconcileSummary> {
        let identities = self.store.identities().await?;
        let mut pass = self.begin_pass().await?;
        let mut summary = ReconcileSummary::default();
        for identity in identities {
            summary.addresses += 1;
            match self.reconcile_in_pass(&identity.address, &mut pass).await {
                Ok(outcome) => {
                    summary.marked_spent += outcome.marked_spent;
                    summary.upserted += outcome.upserted;
                }
                Err(e) => {
                    warn!(
                        "[UtxoTracker] Reconciliation of {} failed: {:?}",
                        identity.address, e
                    );
                    self.metrics.utxo_reconcile_failures.inc();
                    summary.failures += 1;
                }
            }
        }
        info!(
            "[UtxoTracker] Reconciled {} addresses at tip {}: {} upserted, {} marked spent, {} failed",
            summary.addresses, pass.tip, summary.upserted, summary.marked_spent, summary.failures
        );
        Ok(summary)
    }

    async fn begin_pass(&self) -> LedgerResult<Pass> {
        let tip = self.source.block_count().await?;
        let tip_time = self.source.block_at(tip, false).await?.time;
        let mut block_times = HashMap::new();
        block_times.insert(tip, tip_time);
        Ok(Pass {
            tip,
            tip_time,
            block_times,
        })
    }

    async fn block_time(&self, height: u64, pass: &mut Pass) -> LedgerResult<i64> {
        if let Some(time) = pass.block_times.get(&height) {
            return Ok(*time);
        }
        let time = self.source.block_at(height, false).await?.time;
        pass.block_times.insert(height, time);
        Ok(time)
    }

    async fn reconcile_in_pass(
        &self,
        address: &str,
        pass: &mut Pass,
    ) -> LedgerResult<ReconcileOutcome> {
        let authoritative = self.source.address_utxos(&[address.to_string()]).await?;
        let authoritative_keys: HashSet<OutPoint> = authoritative
            .iter()
            .map(|u| OutPoint {
                txid: u.txid.clone(),
                index: u.output_index,
            })
            .collect();

        let marks: Vec<SpentMark> = self
            .store
            .utxos(address, false)
            .await?
            .into_iter()
            .filter(|local| !authoritative_keys.contains(&local.key()))
            .map(|local| SpentMark {
                outpoint: local.key(),
                spent_txid: None,
                spent_height: pass.tip,
                spent_time: pass.tip_time,
            })
            .collect();
        let marked_spent = self.store.mark_spent(&marks).await?;

        let mut rows = Vec::with_capacity(authoritative.len());
        for entry in &authoritative {
            let creation_time = self.block_time(entry.height, pass).await?;
            rows.push(Utxo {
                address: address.to_string(),
                txid: entry.txid.clone(),
                output_index: entry.output_index,
                value: entry.satoshis,
                creation_height: entry.height,
                creation_time,
                is_spent: false,
                is_eligible: self.is_eligible(entry.height, pass.tip),
                spent_txid: None,
                spent_height: None,
                spent_time: None,
            });
        }
        let upserted = self.store.upsert_utxos(&rows).await?;

        self.metrics.utxos_marked_spent.inc_by(marked_spent as u64);
        self.metrics.utxos_upserted.inc_by(upserted as u64);
        debug!(
            "[UtxoTracker] {}: {} unspent, {} upserted, {} marked spent",
            address,
            authoritative.len(),
            upserted,
            marked_spent
        );
        Ok(ReconcileOutcome {
            marked_spent,
            upserted,
            unspent: authoritative.len(),
        })
    }
}
