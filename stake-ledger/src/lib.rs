// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Indexing engine that turns a proof-of-stake chain into a per-identity staking ledger.
//!
//! The chain is read through [`rpc::ChainSource`], the ledger is written through
//! [`store::LedgerStore`]. Everything in between is pure or idempotent, so any height range may
//! be scanned again without changing the result.

pub mod backfill;
pub mod classifier;
pub mod error;
pub mod extractor;
pub mod ledger;
pub mod metrics;
pub mod prevout_cache;
pub mod registry;
pub mod rpc;
pub mod scanner;
pub mod statistics;
pub mod store;
pub mod types;
pub mod utxo;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod e2e_tests;

pub use error::{LedgerError, LedgerResult};
