// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cache of resolved previous outputs.
//!
//! Resolving a coinstake input costs one `getrawtransaction`. Every output of a fetched
//! transaction is cached, so sibling inputs spending the same transaction are served locally.
//! Failed lookups are never cached.

use crate::error::{LedgerError, LedgerResult};
use crate::rpc::ChainSource;
use crate::types::{Amount, OutPoint, TxInput};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub const DEFAULT_PREVOUT_CACHE_CAPACITY: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub value: Amount,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct PrevOutCache {
    entries: Mutex<LruCache<OutPoint, ResolvedOutput>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PrevOutCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Value and owner of the output spent by `input`.
    ///
    /// Uses the input's own spent-index fields when the daemon provides them.
    pub async fn resolve_input(
        &self,
        source: &dyn ChainSource,
        input: &TxInput,
    ) -> LedgerResult<ResolvedOutput> {
        if let (Some(value), Some(address)) = (input.value_sat, &input.address) {
            return Ok(ResolvedOutput {
                value,
                address: Some(address.clone()),
            });
        }
        let outpoint = input
            .prevout()
            .ok_or_else(|| LedgerError::Protocol("input has no previous output".to_string()))?;
        self.resolve(source, &outpoint).await
    }

    pub async fn resolve(
        &self,
        source: &dyn ChainSource,
        outpoint: &OutPoint,
    ) -> LedgerResult<ResolvedOutput> {
        if let Some(hit) = self.entries.lock().await.get(outpoint).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let tx = source.raw_transaction(&outpoint.txid).await?;
        let mut resolved = None;
        let mut entries = self.entries.lock().await;
        for out in &tx.vout {
            let entry = ResolvedOutput {
                value: out.satoshis(),
                address: out.address().map(str::to_string),
            };
            if out.n == outpoint.index {
                resolved = Some(entry.clone());
            }
            entries.put(
                OutPoint {
                    txid: tx.txid.clone(),
                    index: out.n,
                },
                entry,
            );
        }
        resolved.ok_or_else(|| {
            LedgerError::NotFound(format!(
                "output {}:{} does not exist",
                outpoint.txid, outpoint.index
            ))
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

impl Default for PrevOutCache {
    fn default() -> Self {
        Self::new(DEFAULT_PREVOUT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockChainSource;
    use crate::test_utils::*;

    fn funding(chain: &MockChainSource) {
        chain.add_transaction(tx(
            "fund",
            vec![input("genesis", 0)],
            vec![output(0, "RAlice", 700), output(1, "RBob", 300)],
        ));
    }

    #[tokio::test]
    async fn test_sibling_outputs_are_served_from_cache() {
        let chain = MockChainSource::new();
        funding(&chain);
        let cache = PrevOutCache::new(16);

        let first = cache
            .resolve(&chain, &OutPoint { txid: "fund".into(), index: 0 })
            .await
            .unwrap();
        let second = cache
            .resolve(&chain, &OutPoint { txid: "fund".into(), index: 1 })
            .await
            .unwrap();

        assert_eq!(first, ResolvedOutput { value: 700, address: Some("RAlice".into()) });
        assert_eq!(second, ResolvedOutput { value: 300, address: Some("RBob".into()) });
        assert_eq!(chain.raw_transaction_calls(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn test_missing_output_is_not_found_and_not_cached() {
        let chain = MockChainSource::new();
        let cache = PrevOutCache::new(16);
        let outpoint = OutPoint { txid: "pruned".into(), index: 0 };

        let err = cache.resolve(&chain, &outpoint).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        funding(&chain);
        let err = cache
            .resolve(&chain, &OutPoint { txid: "fund".into(), index: 5 })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_spent_index_fields_skip_lookup() {
        let chain = MockChainSource::new();
        let cache = PrevOutCache::new(16);
        let mut spending = input("fund", 0);
        spending.value_sat = Some(42);
        spending.address = Some("RAlice".into());

        let resolved = cache.resolve_input(&chain, &spending).await.unwrap();
        assert_eq!(resolved.value, 42);
        assert_eq!(chain.raw_transaction_calls(), 0);

        let err = cache.resolve_input(&chain, &coinbase_input()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let chain = MockChainSource::new();
        funding(&chain);
        let cache = PrevOutCache::default();
        let outpoint = OutPoint { txid: "fund".into(), index: 0 };

        cache.resolve(&chain, &outpoint).await.unwrap();
        cache.clear().await;
        cache.resolve(&chain, &outpoint).await.unwrap();
        assert_eq!(chain.raw_transaction_calls(), 2);
    }
}
