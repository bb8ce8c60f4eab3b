// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Access to the chain daemon.
//!
//! Everything above this module talks to the chain through [`ChainSource`]. The production
//! implementation is [`DaemonRpcClient`]; [`MeteredChainSource`] wraps any source with prometheus
//! counters.

use crate::error::LedgerResult;
use crate::types::{AddressUtxo, IdentityHistory, RawBlock, RawTransaction};

pub mod client;
pub mod metered;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod retry;

pub use client::{DaemonRpcClient, RpcClientConfig};
pub use metered::MeteredChainSource;
pub use retry::{AdaptiveBackoff, RetryPolicy};

/// Read-only view of the chain.
///
/// Implementations surface transport trouble as `LedgerError::TransientRpc` (after their own
/// retries), malformed payloads as `LedgerError::Protocol` and missing objects as
/// `LedgerError::NotFound`.
#[async_trait::async_trait]
pub trait ChainSource: Send + Sync {
    /// Current tip height
    async fn block_count(&self) -> LedgerResult<u64>;

    async fn block_hash(&self, height: u64) -> LedgerResult<String>;

    /// Block by hash. With `full_detail` the transactions are decoded, otherwise `tx` is empty.
    async fn block(&self, hash: &str, full_detail: bool) -> LedgerResult<RawBlock>;

    /// Current unspent outputs of the given addresses
    async fn address_utxos(&self, addresses: &[String]) -> LedgerResult<Vec<AddressUtxo>>;

    async fn raw_transaction(&self, txid: &str) -> LedgerResult<RawTransaction>;

    async fn identity_history(&self, address: &str) -> LedgerResult<IdentityHistory>;

    async fn block_at(&self, height: u64, full_detail: bool) -> LedgerResult<RawBlock> {
        let hash = self.block_hash(height).await?;
        self.block(&hash, full_detail).await
    }
}
