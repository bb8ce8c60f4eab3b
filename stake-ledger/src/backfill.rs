// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Repair passes over work the scanner could not finish.
//!
//! - gap backfill re-runs the block pipeline on heights recorded as gaps
//! - attribution backfill re-resolves `unknown` events once their inputs become resolvable
//!
//! Each pass resumes after the last row the previous pass examined and wraps around to the
//! oldest rows, so rows that never resolve cannot starve the ones behind them.

use crate::error::LedgerResult;
use crate::extractor::BlockContext;
use crate::ledger::LedgerWriter;
use crate::metrics::LedgerMetrics;
use crate::rpc::ChainSource;
use crate::scanner::BlockProcessor;
use crate::store::LedgerStore;
use crate::types::{Attribution, EventKey, EventPosition, StakeEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GapBackfillReport {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributionBackfillReport {
    pub examined: usize,
    pub corrected: usize,
    pub still_unknown: usize,
    pub failed: usize,
}

pub struct Backfill {
    source: Arc<dyn ChainSource>,
    store: Arc<dyn LedgerStore>,
    processor: Arc<BlockProcessor>,
    writer: LedgerWriter,
    metrics: Arc<LedgerMetrics>,
    // last gap height examined, per scan id
    gap_cursors: Mutex<HashMap<String, u64>>,
    attribution_cursor: Mutex<Option<EventPosition>>,
}

impl Backfill {
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn LedgerStore>,
        processor: Arc<BlockProcessor>,
        metrics: Arc<LedgerMetrics>,
    ) -> Self {
        let writer = LedgerWriter::new(store.clone(), metrics.clone());
        Self {
            source,
            store,
            processor,
            writer,
            metrics,
            gap_cursors: Mutex::new(HashMap::new()),
            attribution_cursor: Mutex::new(None),
        }
    }

    /// Re-processes up to `limit` open gaps of `scan_id`. A gap that fails again has its
    /// attempt counter bumped and stays open.
    pub async fn backfill_gaps(&self, scan_id: &str, limit: usize) -> LedgerResult<GapBackfillReport> {
        let mut cursors = self.gap_cursors.lock().await;
        let cursor = cursors.get(scan_id).copied();
        let mut gaps = self.store.open_gaps(scan_id, cursor, limit).await?;
        if gaps.len() < limit && cursor.is_some() {
            let seen: HashSet<u64> = gaps.iter().map(|gap| gap.height).collect();
            let wrapped = self
                .store
                .open_gaps(scan_id, None, limit - gaps.len())
                .await?;
            gaps.extend(wrapped.into_iter().filter(|gap| !seen.contains(&gap.height)));
        }
        match gaps.last() {
            Some(last) => cursors.insert(scan_id.to_string(), last.height),
            None => cursors.remove(scan_id),
        };
        drop(cursors);

        let mut report = GapBackfillReport::default();
        if gaps.is_empty() {
            return Ok(report);
        }
        let tracked: HashSet<String> = self
            .store
            .identities()
            .await?
            .into_iter()
            .map(|identity| identity.address)
            .collect();

        for gap in gaps {
            report.attempted += 1;
            match self.processor.process(gap.height, &tracked).await {
                Ok(outcome) => {
                    self.store.resolve_gap(scan_id, gap.height).await?;
                    self.metrics.gaps_resolved.inc();
                    report.resolved += 1;
                    debug!(
                        "[Backfill] Gap {} of '{}' resolved after {} attempts, {} events",
                        gap.height, scan_id, gap.attempts, outcome.inserted
                    );
                }
                Err(e) if e.is_block_local() => {
                    warn!(
                        "[Backfill] Gap {} of '{}' still failing (attempt {}): {:?}",
                        gap.height,
                        scan_id,
                        gap.attempts + 1,
                        e
                    );
                    self.store
                        .record_gap(scan_id, gap.height, &e.to_string())
                        .await?;
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "[Backfill] '{}' gaps: {} attempted, {} resolved, {} still open",
            scan_id, report.attempted, report.resolved, report.failed
        );
        Ok(report)
    }

    /// Re-resolves up to `limit` events recorded with `unknown` attribution.
    pub async fn backfill_attribution(&self, limit: usize) -> LedgerResult<AttributionBackfillReport> {
        let mut cursor = self.attribution_cursor.lock().await;
        let mut unknown = self
            .store
            .stake_events_after(Attribution::Unknown, cursor.as_ref(), limit)
            .await?;
        if unknown.len() < limit && cursor.is_some() {
            let seen: HashSet<EventKey> = unknown.iter().map(StakeEvent::key).collect();
            let wrapped = self
                .store
                .stake_events_after(Attribution::Unknown, None, limit - unknown.len())
                .await?;
            unknown.extend(wrapped.into_iter().filter(|event| !seen.contains(&event.key())));
        }
        *cursor = unknown.last().map(StakeEvent::position);
        drop(cursor);

        let mut report = AttributionBackfillReport::default();
        for event in unknown {
            report.examined += 1;
            match self.reresolve(&event).await {
                Ok(Some(resolved)) if resolved.attribution != Attribution::Unknown => {
                    self.writer
                        .correct_attribution(
                            &event.key(),
                            resolved.attribution,
                            resolved.source_address.as_deref(),
                            resolved.amount,
                        )
                        .await?;
                    report.corrected += 1;
                }
                Ok(_) => report.still_unknown += 1,
                Err(e) if e.is_block_local() => {
                    warn!(
                        "[Backfill] Could not re-resolve {}:{}: {:?}",
                        event.txid, event.output_index, e
                    );
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if report.examined > 0 {
            info!(
                "[Backfill] Attribution: {} examined, {} corrected, {} still unknown, {} failed",
                report.examined, report.corrected, report.still_unknown, report.failed
            );
        }
        Ok(report)
    }

    /// Runs extraction again for the event's identity only and returns the matching event.
    async fn reresolve(&self, event: &StakeEvent) -> LedgerResult<Option<StakeEvent>> {
        let coinstake = self.source.raw_transaction(&event.txid).await?;
        let tracked = HashSet::from([event.identity_address.clone()]);
        let block = BlockContext {
            height: event.block_height,
            hash: &event.block_hash,
            time: event.block_time,
        };
        let candidates = self
            .processor
            .extractor()
            .extract(block, &coinstake, &tracked)
            .await?;
        Ok(candidates
            .into_iter()
            .find(|candidate| candidate.key() == event.key()))
    }
}
