// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::LedgerResult;
use crate::metrics::LedgerMetrics;
use crate::store::LedgerStore;
use crate::types::{Amount, Attribution, EventKey, StakeEvent};
use std::sync::Arc;
use tracing::{debug, info};

/// Writes stake events to the store and accounts for them.
///
/// Rows are never updated except through [`LedgerWriter::correct_attribution`]; a replayed
/// event is counted as a duplicate and otherwise ignored.
#[derive(Clone)]
pub struct LedgerWriter {
    store: Arc<dyn LedgerStore>,
    metrics: Arc<LedgerMetrics>,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn LedgerStore>, metrics: Arc<LedgerMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Returns the number of events actually inserted. A block carries at most one event per
    /// tracked identity, so events are written one by one to label each new row.
    pub async fn record(&self, events: &[StakeEvent]) -> LedgerResult<usize> {
        let mut inserted = 0;
        for event in events {
            if self.store.insert_stake_events(std::slice::from_ref(event)).await? == 1 {
                self.metrics
                    .stake_events_inserted
                    .with_label_values(&[event.attribution.as_ref()])
                    .inc();
                inserted += 1;
            } else {
                debug!(
                    "[Ledger] Event {}:{} at height {} already recorded",
                    event.txid, event.output_index, event.block_height
                );
                self.metrics.stake_events_duplicate.inc();
            }
        }
        Ok(inserted)
    }

    pub async fn correct_attribution(
        &self,
        key: &EventKey,
        attribution: Attribution,
        source_address: Option<&str>,
        amount: Amount,
    ) -> LedgerResult<bool> {
        let updated = self
            .store
            .correct_attribution(key, attribution, source_address, amount)
            .await?;
        if updated {
            info!(
                "[Ledger] Event {}:{} re-attributed as {} (amount {})",
                key.txid, key.index, attribution, amount
            );
            self.metrics.attributions_corrected.inc();
        }
        Ok(updated)
    }
}
