// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Long-running indexer: register identities, then scan → reconcile → rebuild statistics on every
//! tick, with periodic gap and attribution backfill.

use crate::config::IndexerConfig;
use crate::metrics::IndexerMetrics;
use stake_ledger::backfill::{AttributionBackfillReport, Backfill, GapBackfillReport};
use stake_ledger::error::{LedgerError, LedgerResult};
use stake_ledger::metrics::LedgerMetrics;
use stake_ledger::registry::IdentityRegistry;
use stake_ledger::rpc::ChainSource;
use stake_ledger::scanner::{ScanCoordinator, ScanReport};
use stake_ledger::statistics::rebuild_statistics;
use stake_ledger::store::LedgerStore;
use stake_ledger::types::ScanState;
use stake_ledger::utxo::{ReconcileSummary, UtxoTracker};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub scan: ScanReport,
    /// None when the scan was interrupted and the later stages were skipped
    pub reconcile: Option<ReconcileSummary>,
    pub ranked_identities: Option<usize>,
}

pub struct IndexerService {
    config: IndexerConfig,
    source: Arc<dyn ChainSource>,
    store: Arc<dyn LedgerStore>,
    ledger_metrics: Arc<LedgerMetrics>,
    metrics: Arc<IndexerMetrics>,
    scanner: ScanCoordinator,
    tracker: UtxoTracker,
    backfill: Backfill,
}

impl IndexerService {
    pub fn new(
        config: IndexerConfig,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn LedgerStore>,
        ledger_metrics: Arc<LedgerMetrics>,
        metrics: Arc<IndexerMetrics>,
    ) -> LedgerResult<Self> {
        let scanner = ScanCoordinator::new(
            source.clone(),
            store.clone(),
            ledger_metrics.clone(),
            config.scan.clone(),
        )?;
        let tracker = UtxoTracker::new(
            source.clone(),
            store.clone(),
            ledger_metrics.clone(),
            &config.utxo,
        );
        let backfill = Backfill::new(
            source.clone(),
            store.clone(),
            scanner.processor(),
            ledger_metrics.clone(),
        );
        Ok(Self {
            config,
            source,
            store,
            ledger_metrics,
            metrics,
            scanner,
            tracker,
            backfill,
        })
    }

    /// Upserts every identity listed in the configuration.
    pub async fn register_identities(&self) -> LedgerResult<usize> {
        let registry = IdentityRegistry::new(
            self.source.clone(),
            self.store.clone(),
            self.config.fallback_first_seen_height(),
        );
        for entry in &self.config.identities {
            let identity = registry
                .register_identity(&entry.address, entry.display_name.as_deref())
                .await?;
            info!(
                "[Indexer] Tracking {} ({}) from height {}",
                identity.address, identity.display_name, identity.first_seen_height
            );
        }
        let count = self.config.identities.len();
        self.metrics.registered_identities.set(count as i64);
        Ok(count)
    }

    pub async fn scan(&self, cancel: CancellationToken) -> LedgerResult<ScanReport> {
        self.scanner.scan(cancel).await
    }

    pub async fn reconcile(&self) -> LedgerResult<ReconcileSummary> {
        self.tracker.reconcile_all().await
    }

    /// Returns the number of ranked identities.
    pub async fn rebuild_statistics(&self) -> LedgerResult<usize> {
        let rows = rebuild_statistics(self.store.as_ref(), &self.ledger_metrics).await?;
        Ok(rows.iter().filter(|row| row.rank.is_some()).count())
    }

    pub async fn backfill(&self) -> LedgerResult<(GapBackfillReport, AttributionBackfillReport)> {
        let gaps = self
            .backfill
            .backfill_gaps(&self.config.scan.scan_id, self.config.backfill_batch)
            .await?;
        self.metrics.backfill_passes.with_label_values(&["gaps"]).inc();
        let attribution = self
            .backfill
            .backfill_attribution(self.config.backfill_batch)
            .await?;
        self.metrics
            .backfill_passes
            .with_label_values(&["attribution"])
            .inc();
        Ok((gaps, attribution))
    }

    /// One scan → reconcile → statistics pass. Reconciliation and statistics are skipped when
    /// the scan was interrupted.
    pub async fn run_cycle(&self, cancel: CancellationToken) -> LedgerResult<CycleReport> {
        let started = Instant::now();
        let scan = self.scan(cancel).await?;
        if scan.state != ScanState::Complete {
            return Ok(CycleReport {
                scan,
                reconcile: None,
                ranked_identities: None,
            });
        }
        let reconcile = self.reconcile().await?;
        let ranked = self.rebuild_statistics().await?;

        self.metrics
            .cycle_duration
            .observe(started.elapsed().as_secs_f64());
        let finished = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        self.metrics.last_cycle_timestamp.set(finished);
        Ok(CycleReport {
            scan,
            reconcile: Some(reconcile),
            ranked_identities: Some(ranked),
        })
    }

    /// Runs cycles every poll interval until cancelled. Storage failures end the loop with an
    /// error; chain failures are logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) -> LedgerResult<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_backfill: Option<Instant> = None;

        info!(
            "[Indexer] Service started, polling every {:?}",
            self.config.poll_interval()
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Indexer] Service cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_cycle(cancel.child_token()).await {
                        Ok(report) => {
                            self.metrics.cycles.with_label_values(&["ok"]).inc();
                            info!(
                                "[Indexer] Cycle done: {} blocks, {} events, checkpoint {:?}",
                                report.scan.blocks_processed,
                                report.scan.events_inserted,
                                report.scan.final_checkpoint
                            );
                        }
                        Err(e) => {
                            self.metrics.cycles.with_label_values(&[e.error_type()]).inc();
                            if is_fatal(&e) {
                                error!("[Indexer] Cycle failed, stopping: {:?}", e);
                                return Err(e);
                            }
                            warn!("[Indexer] Cycle failed, retrying next tick: {:?}", e);
                            continue;
                        }
                    }

                    if cancel.is_cancelled() {
                        break;
                    }
                    let due = last_backfill
                        .map_or(true, |at| at.elapsed() >= self.config.backfill_interval());
                    if due {
                        match self.backfill().await {
                            Ok(_) => last_backfill = Some(Instant::now()),
                            Err(e) if is_fatal(&e) => return Err(e),
                            Err(e) => warn!("[Indexer] Backfill failed: {:?}", e),
                        }
                    }
                }
            }
        }
        info!("[Indexer] Service stopped");
        Ok(())
    }
}

fn is_fatal(e: &LedgerError) -> bool {
    matches!(e, LedgerError::Storage(_) | LedgerError::Config(_))
}
