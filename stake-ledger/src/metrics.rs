// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Registry,
};

const RPC_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0, 7.5, 10., 15.,
    20., 30., 60.,
];

#[derive(Clone, Debug)]
pub struct LedgerMetrics {
    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) rpc_errors: IntCounterVec,

    pub(crate) blocks_scanned: IntCounter,
    pub(crate) pos_blocks: IntCounter,
    pub(crate) block_failures: IntCounterVec,
    pub(crate) scan_checkpoint_height: IntGaugeVec,
    pub(crate) scan_tip_height: IntGauge,

    pub(crate) stake_events_inserted: IntCounterVec,
    pub(crate) stake_events_duplicate: IntCounter,
    pub(crate) attributions_corrected: IntCounter,

    pub(crate) prevout_cache_hits: IntCounter,
    pub(crate) prevout_cache_misses: IntCounter,

    pub(crate) utxos_upserted: IntCounter,
    pub(crate) utxos_marked_spent: IntCounter,
    pub(crate) utxo_reconcile_failures: IntCounter,

    pub(crate) gaps_recorded: IntCounter,
    pub(crate) gaps_resolved: IntCounter,

    pub(crate) statistics_rebuilds: IntCounter,
    pub(crate) ranked_identities: IntGauge,
}

impl LedgerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            rpc_queries: register_int_counter_vec_with_registry!(
                "ledger_rpc_queries",
                "Total number of queries issued to the chain daemon, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "ledger_rpc_queries_latency",
                "Latency of queries issued to the chain daemon, by method",
                &["method"],
                RPC_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_errors: register_int_counter_vec_with_registry!(
                "ledger_rpc_errors",
                "Total number of failed daemon queries, by method and error type",
                &["method", "error_type"],
                registry,
            )
            .unwrap(),
            blocks_scanned: register_int_counter_with_registry!(
                "ledger_blocks_scanned",
                "Total number of blocks processed by the scanner",
                registry,
            )
            .unwrap(),
            pos_blocks: register_int_counter_with_registry!(
                "ledger_pos_blocks",
                "Total number of proof-of-stake blocks seen by the scanner",
                registry,
            )
            .unwrap(),
            block_failures: register_int_counter_vec_with_registry!(
                "ledger_block_failures",
                "Total number of blocks skipped after a failure, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            scan_checkpoint_height: register_int_gauge_vec_with_registry!(
                "ledger_scan_checkpoint_height",
                "Last committed height, by scan id",
                &["scan_id"],
                registry,
            )
            .unwrap(),
            scan_tip_height: register_int_gauge_with_registry!(
                "ledger_scan_tip_height",
                "Chain tip observed at the start of the last scan",
                registry,
            )
            .unwrap(),
            stake_events_inserted: register_int_counter_vec_with_registry!(
                "ledger_stake_events_inserted",
                "Total number of stake events written, by attribution",
                &["attribution"],
                registry,
            )
            .unwrap(),
            stake_events_duplicate: register_int_counter_with_registry!(
                "ledger_stake_events_duplicate",
                "Total number of stake events ignored because they were already recorded",
                registry,
            )
            .unwrap(),
            attributions_corrected: register_int_counter_with_registry!(
                "ledger_attributions_corrected",
                "Total number of unknown attributions resolved by backfill",
                registry,
            )
            .unwrap(),
            prevout_cache_hits: register_int_counter_with_registry!(
                "ledger_prevout_cache_hits",
                "Total number of previous-output lookups served from cache",
                registry,
            )
            .unwrap(),
            prevout_cache_misses: register_int_counter_with_registry!(
                "ledger_prevout_cache_misses",
                "Total number of previous-output lookups that went to the daemon",
                registry,
            )
            .unwrap(),
            utxos_upserted: register_int_counter_with_registry!(
                "ledger_utxos_upserted",
                "Total number of unspent outputs written during reconciliation",
                registry,
            )
            .unwrap(),
            utxos_marked_spent: register_int_counter_with_registry!(
                "ledger_utxos_marked_spent",
                "Total number of outputs marked spent during reconciliation",
                registry,
            )
            .unwrap(),
            utxo_reconcile_failures: register_int_counter_with_registry!(
                "ledger_utxo_reconcile_failures",
                "Total number of addresses whose reconciliation failed",
                registry,
            )
            .unwrap(),
            gaps_recorded: register_int_counter_with_registry!(
                "ledger_gaps_recorded",
                "Total number of heights recorded as gaps",
                registry,
            )
            .unwrap(),
            gaps_resolved: register_int_counter_with_registry!(
                "ledger_gaps_resolved",
                "Total number of gaps resolved by backfill",
                registry,
            )
            .unwrap(),
            statistics_rebuilds: register_int_counter_with_registry!(
                "ledger_statistics_rebuilds",
                "Total number of statistics rebuilds",
                registry,
            )
            .unwrap(),
            ranked_identities: register_int_gauge_with_registry!(
                "ledger_ranked_identities",
                "Number of identities with at least one direct stake",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
