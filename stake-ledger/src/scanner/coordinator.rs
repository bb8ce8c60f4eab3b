// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scan Coordinator
//!
//! Walks `[checkpoint + 1, tip - finality_depth]` in batches, with at most `workers` blocks in
//! flight. Completions arrive out of order; the checkpoint only ever covers the gap-free prefix
//! tracked by [`ContiguousWatermark`].
//!
//! ## Late identities
//! Every identity is enrolled with the scan at the height the scan first covered it. An identity
//! registered after the scan passed its first-seen height gets a catch-up window over the
//! history below its enrollment height, checkpointed under its own id (see [`catch_up_scan_id`]).
//!
//! ## Failure policy
//! - RPC failure on a block: counted, logged, recorded as a gap, treated as processed
//! - storage failure: fatal, in-flight blocks are drained and the checkpoint persisted
//! - cancellation: dispatch stops, in-flight blocks get `drain_timeout` to finish, leftovers are
//!   aborted and stay above the checkpoint

use super::block::{BlockOutcome, BlockProcessor};
use super::config::ScanConfig;
use super::watermark::ContiguousWatermark;
use crate::error::{LedgerError, LedgerResult};
use crate::extractor::StakeExtractor;
use crate::ledger::LedgerWriter;
use crate::metrics::LedgerMetrics;
use crate::prevout_cache::PrevOutCache;
use crate::rpc::ChainSource;
use crate::store::LedgerStore;
use crate::types::{Identity, ScanState};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type BlockResult = (u64, LedgerResult<BlockOutcome>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub scan_id: String,
    /// Inclusive window scanned, None when there was nothing to do
    pub range: Option<(u64, u64)>,
    pub blocks_processed: u64,
    pub pos_blocks: u64,
    pub events_inserted: u64,
    pub failures: u64,
    pub final_checkpoint: Option<u64>,
    pub state: ScanState,
    /// Catch-up windows run for late identities during this pass
    pub catch_ups: Vec<ScanReport>,
}

impl ScanReport {
    fn new(scan_id: &str, checkpoint: Option<u64>) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            range: None,
            blocks_processed: 0,
            pos_blocks: 0,
            events_inserted: 0,
            failures: 0,
            final_checkpoint: checkpoint,
            state: ScanState::Scanning,
            catch_ups: Vec::new(),
        }
    }
}

/// Mutable state of one window
struct ScanRun {
    checkpoint_id: String,
    start: u64,
    watermark: ContiguousWatermark,
    last_persisted: Option<u64>,
    report: ScanReport,
}

/// History of one identity still to be scanned
#[derive(Debug, Clone, PartialEq, Eq)]
struct CatchUp {
    address: String,
    from: u64,
    to: u64,
}

enum Halt {
    Cancelled,
    Fatal(LedgerError),
}

/// First height of the scan window.
///
/// A stored checkpoint always wins; without one the configured start height is used, then the
/// earliest first-seen height of the tracked identities.
pub fn resolve_start_height(
    checkpoint: Option<u64>,
    configured_start: Option<u64>,
    earliest_identity: Option<u64>,
) -> u64 {
    checkpoint
        .map(|c| c.saturating_add(1))
        .or(configured_start)
        .or(earliest_identity)
        .unwrap_or(0)
}

/// Checkpoint id of the catch-up window of `address` within `scan_id`
pub fn catch_up_scan_id(scan_id: &str, address: &str) -> String {
    format!("{scan_id}/{address}")
}

pub struct ScanCoordinator {
    source: Arc<dyn ChainSource>,
    store: Arc<dyn LedgerStore>,
    processor: Arc<BlockProcessor>,
    metrics: Arc<LedgerMetrics>,
    config: ScanConfig,
    state: watch::Sender<ScanState>,
}

impl ScanCoordinator {
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn LedgerStore>,
        metrics: Arc<LedgerMetrics>,
        config: ScanConfig,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let cache = Arc::new(PrevOutCache::new(config.prevout_cache_capacity));
        let extractor = Arc::new(StakeExtractor::new(source.clone(), cache));
        let writer = LedgerWriter::new(store.clone(), metrics.clone());
        let processor = Arc::new(BlockProcessor::new(
            source.clone(),
            extractor,
            writer,
            config.coinstake_position,
        ));
        let (state, _) = watch::channel(ScanState::Idle);
        Ok(Self {
            source,
            store,
            processor,
            metrics,
            config,
            state,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn processor(&self) -> Arc<BlockProcessor> {
        self.processor.clone()
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Runs one pass up to the current tip.
    pub async fn scan(&self, cancel: CancellationToken) -> LedgerResult<ScanReport> {
        self.state.send_replace(ScanState::Scanning);
        let result = self.scan_window(&cancel).await;
        let state = match &result {
            Ok(report) => report.state,
            Err(_) => ScanState::Interrupted,
        };
        self.state.send_replace(state);
        result
    }

    async fn scan_window(&self, cancel: &CancellationToken) -> LedgerResult<ScanReport> {
        let scan_id = self.config.scan_id.as_str();
        let identities = self.store.identities().await?;
        let checkpoint = self.store.checkpoint(scan_id).await?;

        if identities.is_empty() {
            info!("[Scanner] No identities registered, nothing to scan");
            let mut report = ScanReport::new(scan_id, checkpoint);
            report.state = ScanState::Complete;
            return Ok(report);
        }
        let tracked: Arc<HashSet<String>> =
            Arc::new(identities.iter().map(|i| i.address.clone()).collect());

        let tip = self.source.block_count().await?;
        self.metrics.scan_tip_height.set(tip as i64);
        let start = resolve_start_height(
            checkpoint,
            self.config.start_height,
            identities.iter().map(|i| i.first_seen_height).min(),
        );
        let end = tip.saturating_sub(self.config.finality_depth);
        let catch_ups = self.enroll(&identities, start).await?;

        let mut report = if start > end {
            debug!(
                "[Scanner] '{}' up to date (checkpoint={:?}, tip={})",
                scan_id, checkpoint, tip
            );
            let mut report = ScanReport::new(scan_id, checkpoint);
            report.state = ScanState::Complete;
            report
        } else {
            info!(
                "[Scanner] '{}' scanning [{}, {}] for {} identities (tip={}, checkpoint={:?})",
                scan_id,
                start,
                end,
                tracked.len(),
                tip,
                checkpoint
            );
            self.run_window(scan_id, checkpoint, start, end, &tracked, cancel)
                .await?
        };

        if report.state != ScanState::Complete {
            return Ok(report);
        }
        for catch_up in &catch_ups {
            let Some(window) = self.catch_up(catch_up, cancel).await? else {
                continue;
            };
            let interrupted = window.state == ScanState::Interrupted;
            report.catch_ups.push(window);
            if interrupted {
                report.state = ScanState::Interrupted;
                break;
            }
        }
        Ok(report)
    }

    /// Enrolls every identity at `start` unless already enrolled, and returns the history that
    /// lies below an identity's enrollment height.
    async fn enroll(&self, identities: &[Identity], start: u64) -> LedgerResult<Vec<CatchUp>> {
        let mut catch_ups = Vec::new();
        for identity in identities {
            let covered_from = self
                .store
                .enroll_identity(&self.config.scan_id, &identity.address, start)
                .await?;
            let from = self
                .config
                .start_height
                .map_or(identity.first_seen_height, |configured| {
                    configured.max(identity.first_seen_height)
                });
            if from < covered_from {
                catch_ups.push(CatchUp {
                    address: identity.address.clone(),
                    from,
                    to: covered_from - 1,
                });
            }
        }
        Ok(catch_ups)
    }

    /// Scans what is left of one identity's history. None when it is already caught up.
    async fn catch_up(
        &self,
        catch_up: &CatchUp,
        cancel: &CancellationToken,
    ) -> LedgerResult<Option<ScanReport>> {
        let checkpoint_id = catch_up_scan_id(&self.config.scan_id, &catch_up.address);
        let progress = self.store.checkpoint(&checkpoint_id).await?;
        if cancel.is_cancelled() {
            let mut report = ScanReport::new(&checkpoint_id, progress);
            report.state = ScanState::Interrupted;
            return Ok(Some(report));
        }
        let start = progress.map_or(catch_up.from, |done| catch_up.from.max(done + 1));
        if start > catch_up.to {
            return Ok(None);
        }
        info!(
            "[Scanner] '{}' catching up [{}, {}] for late identity {}",
            self.config.scan_id, start, catch_up.to, catch_up.address
        );
        let tracked = Arc::new(HashSet::from([catch_up.address.clone()]));
        self.run_window(&checkpoint_id, progress, start, catch_up.to, &tracked, cancel)
            .await
            .map(Some)
    }

    /// Scans `[start, end]` for `tracked`, checkpointing under `checkpoint_id`.
    async fn run_window(
        &self,
        checkpoint_id: &str,
        checkpoint: Option<u64>,
        start: u64,
        end: u64,
        tracked: &Arc<HashSet<String>>,
        cancel: &CancellationToken,
    ) -> LedgerResult<ScanReport> {
        let mut report = ScanReport::new(checkpoint_id, checkpoint);
        report.range = Some((start, end));

        let cache = self.processor.extractor().cache().clone();
        cache.clear().await;
        let cache_before = cache.stats();

        let mut run = ScanRun {
            checkpoint_id: checkpoint_id.to_string(),
            start,
            watermark: ContiguousWatermark::new(start),
            last_persisted: checkpoint,
            report,
        };
        let outcome = self.run_batches(&mut run, start, end, tracked, cancel).await;
        let persisted = self.persist(&mut run).await;

        let cache_after = cache.stats();
        self.metrics
            .prevout_cache_hits
            .inc_by(cache_after.hits - cache_before.hits);
        self.metrics
            .prevout_cache_misses
            .inc_by(cache_after.misses - cache_before.misses);

        let state = match outcome {
            Ok(state) => state,
            Err(e) => {
                error!(
                    "[Scanner] '{}' stopped at checkpoint {:?}: {:?}",
                    checkpoint_id, run.last_persisted, e
                );
                return Err(e);
            }
        };
        persisted?;

        run.report.state = state;
        info!(
            "[Scanner] '{}' {}: {} blocks, {} PoS, {} events, {} failures, checkpoint {:?}",
            checkpoint_id,
            state,
            run.report.blocks_processed,
            run.report.pos_blocks,
            run.report.events_inserted,
            run.report.failures,
            run.report.final_checkpoint
        );
        Ok(run.report)
    }

    async fn run_batches(
        &self,
        run: &mut ScanRun,
        start: u64,
        end: u64,
        tracked: &Arc<HashSet<String>>,
        cancel: &CancellationToken,
    ) -> LedgerResult<ScanState> {
        let mut batch_start = start;
        loop {
            let batch_end = end.min(batch_start.saturating_add(self.config.batch_size - 1));
            let interrupted = self
                .run_batch(run, batch_start, batch_end, tracked, cancel)
                .await?;
            self.persist(run).await?;
            if interrupted {
                return Ok(ScanState::Interrupted);
            }
            debug!(
                "[Scanner] Batch [{}, {}] done, checkpoint {:?}",
                batch_start, batch_end, run.last_persisted
            );
            if batch_end >= end {
                return Ok(ScanState::Complete);
            }
            batch_start = batch_end + 1;
        }
    }

    /// Returns true when the batch was cut short by cancellation.
    async fn run_batch(
        &self,
        run: &mut ScanRun,
        batch_start: u64,
        batch_end: u64,
        tracked: &Arc<HashSet<String>>,
        cancel: &CancellationToken,
    ) -> LedgerResult<bool> {
        let mut tasks: JoinSet<BlockResult> = JoinSet::new();
        let mut halt = None;

        for height in batch_start..=batch_end {
            if let Err(h) = self
                .collect(run, &mut tasks, self.config.workers - 1, cancel)
                .await
            {
                halt = Some(h);
                break;
            }
            if cancel.is_cancelled() {
                halt = Some(Halt::Cancelled);
                break;
            }
            let processor = self.processor.clone();
            let tracked = tracked.clone();
            tasks.spawn(async move { (height, processor.process(height, &tracked).await) });
        }
        if halt.is_none() {
            if let Err(h) = self.collect(run, &mut tasks, 0, cancel).await {
                halt = Some(h);
            }
        }

        match halt {
            None => Ok(false),
            Some(Halt::Cancelled) => {
                info!(
                    "[Scanner] Cancellation requested, draining {} in-flight blocks",
                    tasks.len()
                );
                match self.drain(run, &mut tasks).await {
                    Some(e) => Err(e),
                    None => Ok(true),
                }
            }
            Some(Halt::Fatal(e)) => {
                self.drain(run, &mut tasks).await;
                Err(e)
            }
        }
    }

    /// Handles finished blocks until at most `keep` remain in flight.
    async fn collect(
        &self,
        run: &mut ScanRun,
        tasks: &mut JoinSet<BlockResult>,
        keep: usize,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        while tasks.len() > keep {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Halt::Cancelled),
                joined = tasks.join_next() => match joined {
                    Some(joined) => self.handle(run, joined).await.map_err(Halt::Fatal)?,
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Waits up to `drain_timeout` for in-flight blocks, then aborts the rest. Returns the
    /// first fatal error seen while draining.
    async fn drain(
        &self,
        run: &mut ScanRun,
        tasks: &mut JoinSet<BlockResult>,
    ) -> Option<LedgerError> {
        if tasks.is_empty() {
            return None;
        }
        let mut fatal = None;
        let timeout = self.config.drain_timeout();
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = self.handle(run, joined).await {
                    fatal.get_or_insert(e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "[Scanner] {} blocks still in flight after {:?}, aborting",
                tasks.len(),
                timeout
            );
            tasks.abort_all();
        }
        fatal
    }

    async fn handle(
        &self,
        run: &mut ScanRun,
        joined: Result<BlockResult, JoinError>,
    ) -> LedgerResult<()> {
        let (height, result) =
            joined.map_err(|e| LedgerError::Protocol(format!("block task failed: {e}")))?;
        match result {
            Ok(outcome) => {
                self.metrics.blocks_scanned.inc();
                run.report.blocks_processed += 1;
                if outcome.is_pos {
                    self.metrics.pos_blocks.inc();
                    run.report.pos_blocks += 1;
                }
                run.report.events_inserted += outcome.inserted as u64;
            }
            Err(e) if e.is_block_local() => {
                warn!(
                    "[Scanner] Block {} failed, recording gap: {:?}",
                    height, e
                );
                self.metrics.blocks_scanned.inc();
                self.metrics
                    .block_failures
                    .with_label_values(&[e.error_type()])
                    .inc();
                self.store
                    .record_gap(&self.config.scan_id, height, &e.to_string())
                    .await?;
                self.metrics.gaps_recorded.inc();
                run.report.blocks_processed += 1;
                run.report.failures += 1;
            }
            Err(e) => return Err(e),
        }

        if run.watermark.complete(height) && self.checkpoint_due(run) {
            self.persist(run).await?;
        }
        Ok(())
    }

    fn checkpoint_due(&self, run: &ScanRun) -> bool {
        let Some(committed) = run.watermark.committed() else {
            return false;
        };
        let since = match run.last_persisted {
            Some(persisted) if persisted >= run.start => committed.saturating_sub(persisted),
            _ => committed + 1 - run.start,
        };
        since >= self.config.checkpoint_interval
    }

    async fn persist(&self, run: &mut ScanRun) -> LedgerResult<()> {
        let Some(committed) = run.watermark.committed() else {
            return Ok(());
        };
        if run.last_persisted == Some(committed) {
            return Ok(());
        }
        let stored = self
            .store
            .advance_checkpoint(&run.checkpoint_id, committed)
            .await?;
        run.last_persisted = Some(stored);
        run.report.final_checkpoint = Some(stored);
        if run.checkpoint_id == self.config.scan_id {
            self.metrics
                .scan_checkpoint_height
                .with_label_values(&[&self.config.scan_id])
                .set(stored as i64);
        }
        debug!(
            "[Scanner] '{}' checkpoint advanced to {}",
            run.checkpoint_id, stored
        );
        Ok(())
    }
}
