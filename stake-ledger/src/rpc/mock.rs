// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A mock implementation of the chain daemon.

use super::ChainSource;
use crate::error::{LedgerError, LedgerResult};
use crate::types::{AddressUtxo, IdentityHistory, RawBlock, RawTransaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Mock chain used in test environments.
#[derive(Clone, Debug, Default)]
pub struct MockChainSource {
    tip: Arc<AtomicU64>,
    hashes: Arc<Mutex<HashMap<u64, String>>>,
    blocks: Arc<Mutex<HashMap<String, RawBlock>>>,
    transactions: Arc<Mutex<HashMap<String, RawTransaction>>>,
    utxos: Arc<Mutex<HashMap<String, Vec<AddressUtxo>>>>,
    identities: Arc<Mutex<HashMap<String, IdentityHistory>>>,
    // height -> remaining failures (u32::MAX = always)
    failing_heights: Arc<Mutex<HashMap<u64, (u32, LedgerError)>>>,
    failing_txids: Arc<Mutex<HashMap<String, LedgerError>>>,
    cancel_at: Arc<Mutex<Option<(u64, CancellationToken)>>>,
    block_delay: Arc<Mutex<Option<Duration>>>,
    raw_transaction_calls: Arc<AtomicU64>,
    block_calls: Arc<AtomicU64>,
}

impl MockChainSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, height: u64) {
        self.tip.store(height, Ordering::SeqCst);
    }

    /// Registers a block and every transaction it carries; raises the tip if needed.
    pub fn add_block(&self, block: RawBlock) {
        self.tip.fetch_max(block.height, Ordering::SeqCst);
        self.hashes
            .lock()
            .unwrap()
            .insert(block.height, block.hash.clone());
        for tx in &block.tx {
            self.add_transaction(tx.clone());
        }
        self.blocks.lock().unwrap().insert(block.hash.clone(), block);
    }

    pub fn add_transaction(&self, tx: RawTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.txid.clone(), tx);
    }

    /// Makes a transaction unknown to the daemon, as if pruned
    pub fn remove_transaction(&self, txid: &str) {
        self.transactions.lock().unwrap().remove(txid);
    }

    pub fn set_utxos(&self, address: &str, utxos: Vec<AddressUtxo>) {
        self.utxos
            .lock()
            .unwrap()
            .insert(address.to_string(), utxos);
    }

    pub fn set_identity_history(&self, address: &str, history: IdentityHistory) {
        self.identities
            .lock()
            .unwrap()
            .insert(address.to_string(), history);
    }

    /// Fetching the block at `height` fails `times` times with `error`
    pub fn fail_height(&self, height: u64, times: u32, error: LedgerError) {
        self.failing_heights
            .lock()
            .unwrap()
            .insert(height, (times, error));
    }

    pub fn fail_height_always(&self, height: u64, error: LedgerError) {
        self.fail_height(height, u32::MAX, error);
    }

    pub fn fail_transaction(&self, txid: &str, error: LedgerError) {
        self.failing_txids
            .lock()
            .unwrap()
            .insert(txid.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.failing_heights.lock().unwrap().clear();
        self.failing_txids.lock().unwrap().clear();
    }

    /// Cancels `token` as soon as the block at `height` is requested
    pub fn cancel_at_height(&self, height: u64, token: CancellationToken) {
        *self.cancel_at.lock().unwrap() = Some((height, token));
    }

    pub fn set_block_delay(&self, delay: Duration) {
        *self.block_delay.lock().unwrap() = Some(delay);
    }

    pub fn raw_transaction_calls(&self) -> u64 {
        self.raw_transaction_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> u64 {
        self.block_calls.load(Ordering::SeqCst)
    }

    fn take_height_failure(&self, height: u64) -> Option<LedgerError> {
        let mut failing = self.failing_heights.lock().unwrap();
        let (remaining, error) = failing.get_mut(&height)?;
        let error = error.clone();
        if *remaining != u32::MAX {
            *remaining -= 1;
            if *remaining == 0 {
                failing.remove(&height);
            }
        }
        Some(error)
    }
}

#[async_trait::async_trait]
impl ChainSource for MockChainSource {
    async fn block_count(&self) -> LedgerResult<u64> {
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn block_hash(&self, height: u64) -> LedgerResult<String> {
        let cancel = self.cancel_at.lock().unwrap().clone();
        if let Some((cancel_height, token)) = cancel {
            if cancel_height == height {
                token.cancel();
            }
        }
        if let Some(error) = self.take_height_failure(height) {
            return Err(error);
        }
        let delay = *self.block_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.hashes
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("block height {height}")))
    }

    async fn block(&self, hash: &str, full_detail: bool) -> LedgerResult<RawBlock> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let block = self
            .blocks
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("block {hash}")))?;
        if full_detail {
            Ok(block)
        } else {
            Ok(RawBlock { tx: vec![], ..block })
        }
    }

    async fn address_utxos(&self, addresses: &[String]) -> LedgerResult<Vec<AddressUtxo>> {
        let utxos = self.utxos.lock().unwrap();
        Ok(addresses
            .iter()
            .filter_map(|address| utxos.get(address))
            .flatten()
            .cloned()
            .collect())
    }

    async fn raw_transaction(&self, txid: &str) -> LedgerResult<RawTransaction> {
        self.raw_transaction_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failing_txids.lock().unwrap().get(txid) {
            return Err(error.clone());
        }
        self.transactions
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {txid}")))
    }

    async fn identity_history(&self, address: &str) -> LedgerResult<IdentityHistory> {
        self.identities
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("identity {address}")))
    }
}
