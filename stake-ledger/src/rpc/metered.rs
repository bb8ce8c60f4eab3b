// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Metered wrapper for a chain source that tracks query counts, errors and latencies.

use super::ChainSource;
use crate::error::LedgerResult;
use crate::metrics::LedgerMetrics;
use crate::types::{AddressUtxo, IdentityHistory, RawBlock, RawTransaction};
use std::sync::Arc;

pub struct MeteredChainSource {
    inner: Arc<dyn ChainSource>,
    metrics: Arc<LedgerMetrics>,
}

impl MeteredChainSource {
    pub fn new(inner: Arc<dyn ChainSource>, metrics: Arc<LedgerMetrics>) -> Self {
        Self { inner, metrics }
    }

    fn start_timer(&self, method: &str) -> prometheus::HistogramTimer {
        self.metrics.rpc_queries.with_label_values(&[method]).inc();
        self.metrics
            .rpc_queries_latency
            .with_label_values(&[method])
            .start_timer()
    }

    fn observe<T>(&self, method: &str, result: LedgerResult<T>) -> LedgerResult<T> {
        if let Err(err) = &result {
            self.metrics
                .rpc_errors
                .with_label_values(&[method, err.error_type()])
                .inc();
        }
        result
    }
}

#[async_trait::async_trait]
impl ChainSource for MeteredChainSource {
    async fn block_count(&self) -> LedgerResult<u64> {
        let _timer = self.start_timer("getblockcount");
        let result = self.inner.block_count().await;
        self.observe("getblockcount", result)
    }

    async fn block_hash(&self, height: u64) -> LedgerResult<String> {
        let _timer = self.start_timer("getblockhash");
        let result = self.inner.block_hash(height).await;
        self.observe("getblockhash", result)
    }

    async fn block(&self, hash: &str, full_detail: bool) -> LedgerResult<RawBlock> {
        let _timer = self.start_timer("getblock");
        let result = self.inner.block(hash, full_detail).await;
        self.observe("getblock", result)
    }

    async fn address_utxos(&self, addresses: &[String]) -> LedgerResult<Vec<AddressUtxo>> {
        let _timer = self.start_timer("getaddressutxos");
        let result = self.inner.address_utxos(addresses).await;
        self.observe("getaddressutxos", result)
    }

    async fn raw_transaction(&self, txid: &str) -> LedgerResult<RawTransaction> {
        let _timer = self.start_timer("getrawtransaction");
        let result = self.inner.raw_transaction(txid).await;
        self.observe("getrawtransaction", result)
    }

    async fn identity_history(&self, address: &str) -> LedgerResult<IdentityHistory> {
        let _timer = self.start_timer("getidentityhistory");
        let result = self.inner.identity_history(address).await;
        self.observe("getidentityhistory", result)
    }
}
